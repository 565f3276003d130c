//! The viewport as a task.
//!
//! One tokio task owns the `ViewportController`. Commands arrive over an
//! mpsc channel, the debounce deadline is a `sleep_until` branch, fetches and
//! device-location requests run in `JoinSet`s, and every change is published
//! as a `ViewportSnapshot` on a watch channel. Nothing awaited inside the loop
//! body waits on the repository or the location provider.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use eventmap_common::{EventCategory, EventPage, GeoPoint};
use eventmap_store::{EventRepository, FilterSpec};

use crate::capability::{LocationError, LocationProvider};
use crate::controller::{InitialCenter, ViewportController, ViewportSettings, ViewportState};
use crate::coordinator::{QueryCoordinator, QueryView};
use crate::grouping::{group_events, EventGroup, GroupKey};

const COMMAND_BUFFER: usize = 64;

type LocateReply = oneshot::Sender<Result<GeoPoint, LocationError>>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("viewport task has stopped")]
pub struct ViewportClosed;

#[derive(Debug, Clone, Default)]
pub struct ViewportOptions {
    pub settings: ViewportSettings,
    /// Event to open on, e.g. from a shared link.
    pub target_event: Option<i64>,
}

/// Everything a renderer needs, captured at one instant.
#[derive(Debug, Clone)]
pub struct ViewportSnapshot {
    pub state: ViewportState,
    pub query: Arc<QueryView>,
    pub groups: Arc<Vec<EventGroup>>,
}

enum Command {
    ViewportChanged { center: GeoPoint, zoom: i32 },
    Recenter(GeoPoint),
    LocateMe(LocateReply),
    ZoomBy(i32),
    SetFilter(FilterSpec),
    ToggleCategory(EventCategory),
    SelectGroup(GroupKey),
    SelectEvent(i64),
    CloseDetail,
    CloseList,
    Revalidate,
}

/// Client side of a running viewport task. Dropping every handle stops it.
pub struct ViewportHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<ViewportSnapshot>,
    task: JoinHandle<()>,
}

impl ViewportHandle {
    pub fn subscribe(&self) -> watch::Receiver<ViewportSnapshot> {
        self.snapshots.clone()
    }

    pub fn snapshot(&self) -> ViewportSnapshot {
        self.snapshots.borrow().clone()
    }

    async fn send(&self, command: Command) -> Result<(), ViewportClosed> {
        self.commands.send(command).await.map_err(|_| ViewportClosed)
    }

    pub async fn viewport_changed(&self, center: GeoPoint, zoom: i32) -> Result<(), ViewportClosed> {
        self.send(Command::ViewportChanged { center, zoom }).await
    }

    pub async fn recenter(&self, center: GeoPoint) -> Result<(), ViewportClosed> {
        self.send(Command::Recenter(center)).await
    }

    /// Ask the location provider and jump there, bypassing the debounce.
    pub async fn locate_me(&self) -> Result<Result<GeoPoint, LocationError>, ViewportClosed> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::LocateMe(tx)).await?;
        rx.await.map_err(|_| ViewportClosed)
    }

    pub async fn zoom_by(&self, delta: i32) -> Result<(), ViewportClosed> {
        self.send(Command::ZoomBy(delta)).await
    }

    pub async fn set_filter(&self, filter: FilterSpec) -> Result<(), ViewportClosed> {
        self.send(Command::SetFilter(filter)).await
    }

    pub async fn toggle_category(&self, category: EventCategory) -> Result<(), ViewportClosed> {
        self.send(Command::ToggleCategory(category)).await
    }

    pub async fn select_group(&self, key: GroupKey) -> Result<(), ViewportClosed> {
        self.send(Command::SelectGroup(key)).await
    }

    pub async fn select_event(&self, id: i64) -> Result<(), ViewportClosed> {
        self.send(Command::SelectEvent(id)).await
    }

    pub async fn close_detail(&self) -> Result<(), ViewportClosed> {
        self.send(Command::CloseDetail).await
    }

    pub async fn close_list(&self) -> Result<(), ViewportClosed> {
        self.send(Command::CloseList).await
    }

    /// Refetch the current query, ignoring the dedupe window.
    pub async fn revalidate(&self) -> Result<(), ViewportClosed> {
        self.send(Command::Revalidate).await
    }

    /// Stop the task and wait for it to exit.
    pub async fn shutdown(self) {
        let ViewportHandle { commands, task, .. } = self;
        drop(commands);
        if let Err(e) = task.await {
            warn!(error = %e, "Viewport task ended abnormally");
        }
    }
}

/// Start the viewport task. It locates itself first (deep-linked event,
/// then device, then the default center) and issues the first query.
pub fn spawn_viewport(
    coordinator: Arc<QueryCoordinator>,
    repo: Arc<dyn EventRepository>,
    location: Arc<dyn LocationProvider>,
    options: ViewportOptions,
) -> ViewportHandle {
    let controller = ViewportController::new(options.settings);
    let initial = ViewportSnapshot {
        state: controller.state().clone(),
        query: coordinator.view(),
        groups: Arc::new(Vec::new()),
    };
    let (snapshot_tx, snapshot_rx) = watch::channel(initial);
    let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);

    let actor = ViewportActor {
        controller,
        coordinator,
        repo,
        location,
        target_event: options.target_event,
        fetches: JoinSet::new(),
        locates: JoinSet::new(),
        snapshots: snapshot_tx,
        groups: Arc::new(Vec::new()),
        grouped_page: None,
    };
    let task = tokio::spawn(actor.run(command_rx));

    ViewportHandle {
        commands: command_tx,
        snapshots: snapshot_rx,
        task,
    }
}

struct ViewportActor {
    controller: ViewportController,
    coordinator: Arc<QueryCoordinator>,
    repo: Arc<dyn EventRepository>,
    location: Arc<dyn LocationProvider>,
    target_event: Option<i64>,
    fetches: JoinSet<()>,
    locates: JoinSet<(Result<GeoPoint, LocationError>, LocateReply)>,
    snapshots: watch::Sender<ViewportSnapshot>,
    groups: Arc<Vec<EventGroup>>,
    grouped_page: Option<Arc<EventPage>>,
}

impl ViewportActor {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        self.controller.begin_locating();
        self.publish();
        let initial = self.initial_center().await;
        if let Some(spec) = self.controller.finish_locating(initial) {
            self.spawn_fetch(spec, false);
        }
        self.publish();

        loop {
            let deadline = self.controller.next_deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = sleep_until_deadline(deadline) => {
                    if let Some(spec) = self.controller.poll_timer(Instant::now()) {
                        self.spawn_fetch(spec, false);
                    }
                }
                Some(joined) = self.fetches.join_next(), if !self.fetches.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Fetch task failed");
                    }
                }
                Some(joined) = self.locates.join_next(), if !self.locates.is_empty() => {
                    match joined {
                        Ok((result, reply)) => self.finish_locate(result, reply),
                        Err(e) => warn!(error = %e, "Locate task failed"),
                    }
                }
            }
            self.publish();
        }

        self.locates.shutdown().await;
        self.fetches.shutdown().await;
        info!("Viewport task stopped");
    }

    async fn initial_center(&self) -> InitialCenter {
        if let Some(id) = self.target_event {
            match self.repo.get_by_id(id).await {
                Ok(Some(event)) => return InitialCenter::Event(event),
                Ok(None) => warn!(event_id = id, "Linked event not found"),
                Err(e) => warn!(event_id = id, error = %e, "Failed to load linked event"),
            }
        }

        match self.location.current_location().await {
            Ok(point) => InitialCenter::Device(point),
            Err(e) => {
                info!(error = %e, "Device location unavailable, using default center");
                InitialCenter::Fallback
            }
        }
    }

    fn handle(&mut self, command: Command) {
        let spec = match command {
            Command::ViewportChanged { center, zoom } => {
                self.controller.viewport_changed(center, zoom, Instant::now());
                None
            }
            Command::Recenter(center) => self.controller.recenter_now(center),
            Command::LocateMe(reply) => {
                let location = self.location.clone();
                self.locates
                    .spawn(async move { (location.current_location().await, reply) });
                None
            }
            Command::ZoomBy(delta) => {
                self.controller.zoom_by(delta);
                None
            }
            Command::SetFilter(filter) => self.controller.set_filter(filter),
            Command::ToggleCategory(category) => self.controller.toggle_category(category),
            Command::SelectGroup(key) => {
                match self.groups.iter().find(|g| g.key == key) {
                    Some(group) => self.controller.select_group(group),
                    None => debug!(key = %key, "Selected group is no longer on the map"),
                }
                None
            }
            Command::SelectEvent(id) => {
                self.controller.select_event(id);
                None
            }
            Command::CloseDetail => {
                self.controller.close_detail();
                None
            }
            Command::CloseList => {
                self.controller.close_list();
                None
            }
            Command::Revalidate => {
                if let Some(spec) = self.controller.current_spec() {
                    self.spawn_fetch(spec, true);
                }
                None
            }
        };

        if let Some(spec) = spec {
            self.spawn_fetch(spec, false);
        }
    }

    fn finish_locate(&mut self, result: Result<GeoPoint, LocationError>, reply: LocateReply) {
        match &result {
            Ok(point) => {
                if let Some(spec) = self.controller.located(*point) {
                    self.spawn_fetch(spec, false);
                }
            }
            Err(e) => warn!(error = %e, "Locate request failed"),
        }
        let _ = reply.send(result);
    }

    fn spawn_fetch(&mut self, spec: FilterSpec, force: bool) {
        let coordinator = self.coordinator.clone();
        self.fetches.spawn(async move {
            let result = if force {
                coordinator.revalidate(&spec).await
            } else {
                coordinator.fetch(&spec).await
            };
            if let Err(e) = result {
                debug!(error = %e, "Viewport fetch failed");
            }
        });
    }

    fn publish(&mut self) {
        let query = self.coordinator.view();

        // Regroup only when the visible page actually changed.
        let unchanged = match (&self.grouped_page, &query.page) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if !unchanged {
            self.groups = Arc::new(
                query
                    .page
                    .as_ref()
                    .map(|p| group_events(&p.events))
                    .unwrap_or_default(),
            );
            self.grouped_page = query.page.clone();
        }

        self.snapshots.send_replace(ViewportSnapshot {
            state: self.controller.state().clone(),
            query,
            groups: self.groups.clone(),
        });
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
