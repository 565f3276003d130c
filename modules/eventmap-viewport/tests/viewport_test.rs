//! The viewport task end to end, on a paused clock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use eventmap_common::geocell;
use eventmap_common::{Event, EventCategory, EventDetails, EventPage, GeoPoint, DEFAULT_CENTER};
use eventmap_store::{EventRepository, FilterSpec, MemoryEventRepository, RepositoryError};
use eventmap_viewport::{
    spawn_viewport, CoordinatorConfig, LocationError, LocationProvider, QueryCoordinator,
    Selection, StaticLocation, ViewportHandle, ViewportOptions, ViewportPhase, ViewportSnapshot,
};

const BUSAN: GeoPoint = GeoPoint::new(35.1796, 129.0756);

/// Records every spec it is asked to run.
struct RecordingRepo {
    inner: MemoryEventRepository,
    calls: AtomicUsize,
    specs: Mutex<Vec<FilterSpec>>,
}

impl RecordingRepo {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_spec(&self) -> Option<FilterSpec> {
        self.specs.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl EventRepository for RecordingRepo {
    async fn query(&self, spec: &FilterSpec) -> Result<EventPage, RepositoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.specs.lock().unwrap().push(spec.clone());
        self.inner.query(spec).await
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Event>, RepositoryError> {
        self.inner.get_by_id(id).await
    }
}

fn event(id: i64, point: GeoPoint) -> Event {
    Event {
        id,
        title: format!("Event {id}"),
        category: EventCategory::Festival,
        start_date: "2026-10-01T00:00:00Z".parse().unwrap(),
        end_date: "2026-10-30T00:00:00Z".parse().unwrap(),
        location_name: "Somewhere".to_string(),
        latitude: Some(point.lat),
        longitude: Some(point.lng),
        district_id: None,
        geohash: None,
        details: EventDetails::default(),
    }
}

fn repo() -> Arc<RecordingRepo> {
    let events = vec![
        event(1, DEFAULT_CENTER),
        event(2, DEFAULT_CENTER),
        event(3, DEFAULT_CENTER),
        event(4, GeoPoint::new(37.5800, 126.9800)),
        event(9, BUSAN),
    ];
    Arc::new(RecordingRepo {
        inner: MemoryEventRepository::with_events(events),
        calls: AtomicUsize::new(0),
        specs: Mutex::new(Vec::new()),
    })
}

/// Unavailable at startup; later requests take ten seconds to reach Busan.
struct SlowLocation {
    calls: AtomicUsize,
}

#[async_trait]
impl LocationProvider for SlowLocation {
    async fn current_location(&self) -> Result<GeoPoint, LocationError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(LocationError::Timeout);
        }
        tokio::time::sleep(Duration::from_secs(10)).await;
        Ok(BUSAN)
    }
}

fn start(repo: &Arc<RecordingRepo>, location: StaticLocation, target: Option<i64>) -> ViewportHandle {
    start_with(repo, Arc::new(location), target)
}

fn start_with(
    repo: &Arc<RecordingRepo>,
    location: Arc<dyn LocationProvider>,
    target: Option<i64>,
) -> ViewportHandle {
    let coordinator = Arc::new(QueryCoordinator::new(repo.clone(), CoordinatorConfig::default()));
    spawn_viewport(
        coordinator,
        repo.clone(),
        location,
        ViewportOptions {
            target_event: target,
            ..Default::default()
        },
    )
}

/// The visible page was fetched for the controller's current filter.
fn is_settled(s: &ViewportSnapshot) -> bool {
    s.state.phase == ViewportPhase::Ready
        && s.query.page.is_some()
        && !s.query.is_loading
        && s.query.page_key.as_deref() == Some(s.state.filter.cache_key().as_str())
}

/// Wait until the visible page belongs to the neighborhood of `cell`.
async fn settled_on(handle: &ViewportHandle, cell: &str) -> ViewportSnapshot {
    let mut rx = handle.subscribe();
    let snapshot = rx
        .wait_for(|s| is_settled(s) && s.state.cells.first().map(String::as_str) == Some(cell))
        .await
        .unwrap()
        .clone();
    snapshot
}

#[tokio::test(start_paused = true)]
async fn opens_on_default_center_without_location() {
    let repo = repo();
    let handle = start(&repo, StaticLocation::unavailable(), None);

    let home = geocell::encode(DEFAULT_CENTER.lat, DEFAULT_CENTER.lng, 5).unwrap();
    let snapshot = settled_on(&handle, &home).await;

    assert_eq!(snapshot.state.center, DEFAULT_CENTER);
    assert_eq!(snapshot.state.zoom, 7);
    assert_eq!(snapshot.state.cells.len(), 9);
    assert_eq!(repo.calls(), 1);

    // Three events share a marker, one stands alone; Busan is out of range.
    let sizes: Vec<usize> = snapshot.groups.iter().map(|g| g.len()).collect();
    assert_eq!(sizes.iter().sum::<usize>(), 4);
    assert!(sizes.contains(&3));

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn five_rapid_moves_trigger_one_query_for_the_last_center() {
    let repo = repo();
    let handle = start(&repo, StaticLocation::unavailable(), None);
    let home = geocell::encode(DEFAULT_CENTER.lat, DEFAULT_CENTER.lng, 5).unwrap();
    settled_on(&handle, &home).await;
    assert_eq!(repo.calls(), 1);

    let path = [
        GeoPoint::new(37.20, 127.00),
        GeoPoint::new(36.80, 127.40),
        GeoPoint::new(36.30, 128.00),
        GeoPoint::new(35.70, 128.60),
        BUSAN,
    ];
    for center in path {
        handle.viewport_changed(center, 7).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let busan = geocell::encode(BUSAN.lat, BUSAN.lng, 5).unwrap();
    let snapshot = settled_on(&handle, &busan).await;

    assert_eq!(repo.calls(), 2);
    let spec = repo.last_spec().unwrap();
    assert!(spec.cells().contains(&busan));
    assert_eq!(snapshot.state.center, BUSAN);
    assert_eq!(snapshot.groups.len(), 1);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn deep_link_opens_zoomed_in_and_selected() {
    let repo = repo();
    let handle = start(&repo, StaticLocation::at(DEFAULT_CENTER), Some(9));

    let busan = geocell::encode(BUSAN.lat, BUSAN.lng, 5).unwrap();
    let snapshot = settled_on(&handle, &busan).await;

    assert_eq!(snapshot.state.zoom, 4);
    assert_eq!(snapshot.state.selection, Selection::Event(9));
    assert_eq!(snapshot.state.focused_event.map(|e| e.id), Some(9));

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn missing_deep_link_falls_back_to_device_location() {
    let repo = repo();
    let handle = start(&repo, StaticLocation::at(BUSAN), Some(12345));

    let busan = geocell::encode(BUSAN.lat, BUSAN.lng, 5).unwrap();
    let snapshot = settled_on(&handle, &busan).await;

    assert_eq!(snapshot.state.zoom, 7);
    assert_eq!(snapshot.state.selection, Selection::None);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn locate_me_recenters_immediately() {
    let repo = repo();
    let handle = start(&repo, StaticLocation::at(BUSAN), None);
    let busan = geocell::encode(BUSAN.lat, BUSAN.lng, 5).unwrap();
    settled_on(&handle, &busan).await;

    handle.recenter(DEFAULT_CENTER).await.unwrap();
    let home = geocell::encode(DEFAULT_CENTER.lat, DEFAULT_CENTER.lng, 5).unwrap();
    settled_on(&handle, &home).await;

    let located = handle.locate_me().await.unwrap().unwrap();
    assert_eq!(located, BUSAN);
    assert_eq!(handle.snapshot().state.user_location, Some(BUSAN));
    let snapshot = settled_on(&handle, &busan).await;
    assert_eq!(snapshot.state.center, BUSAN);

    // Back to a cached neighborhood: no new repository call.
    assert_eq!(repo.calls(), 2);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn pans_keep_flowing_while_a_location_fix_is_pending() {
    let repo = repo();
    let location = Arc::new(SlowLocation {
        calls: AtomicUsize::new(0),
    });
    let handle = start_with(&repo, location, None);
    let home = geocell::encode(DEFAULT_CENTER.lat, DEFAULT_CENTER.lng, 5).unwrap();
    settled_on(&handle, &home).await;

    let daejeon = GeoPoint::new(36.3504, 127.3845);
    let daejeon_cell = geocell::encode(daejeon.lat, daejeon.lng, 5).unwrap();
    let started = tokio::time::Instant::now();

    let (located, panned) = tokio::join!(handle.locate_me(), async {
        handle.viewport_changed(daejeon, 7).await.unwrap();
        let snapshot = settled_on(&handle, &daejeon_cell).await;
        (snapshot, started.elapsed())
    });

    let (snapshot, elapsed) = panned;
    assert!(elapsed < Duration::from_secs(1), "pan settled after {elapsed:?}");
    assert_eq!(snapshot.state.center, daejeon);

    assert_eq!(located.unwrap(), Ok(BUSAN));
    let busan = geocell::encode(BUSAN.lat, BUSAN.lng, 5).unwrap();
    let snapshot = settled_on(&handle, &busan).await;
    assert_eq!(snapshot.state.user_location, Some(BUSAN));
    assert_eq!(repo.calls(), 3);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn group_and_single_selection_are_exclusive() {
    let repo = repo();
    let handle = start(&repo, StaticLocation::unavailable(), None);
    let home = geocell::encode(DEFAULT_CENTER.lat, DEFAULT_CENTER.lng, 5).unwrap();
    let snapshot = settled_on(&handle, &home).await;

    let crowded = snapshot.groups.iter().find(|g| g.len() == 3).unwrap().key;
    handle.select_group(crowded).await.unwrap();
    handle.select_event(2).await.unwrap();
    handle.close_list().await.unwrap();

    let mut rx = handle.subscribe();
    let state = rx
        .wait_for(|s| s.state.selection == Selection::Event(2))
        .await
        .unwrap()
        .state
        .clone();
    assert!(!state.selection.is_group_selected(crowded));

    handle.select_group(crowded).await.unwrap();
    let state = rx
        .wait_for(|s| s.state.selection.is_group_selected(crowded))
        .await
        .unwrap()
        .state
        .clone();
    assert_eq!(state.selection.event_id(), None);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn category_toggle_refetches_same_cells() {
    let repo = repo();
    let handle = start(&repo, StaticLocation::unavailable(), None);
    let home = geocell::encode(DEFAULT_CENTER.lat, DEFAULT_CENTER.lng, 5).unwrap();
    settled_on(&handle, &home).await;

    handle.toggle_category(EventCategory::Exhibition).await.unwrap();
    let mut rx = handle.subscribe();
    let snapshot = rx
        .wait_for(|s| {
            s.state.filter.categories().contains(&EventCategory::Exhibition) && is_settled(s)
        })
        .await
        .unwrap()
        .clone();

    assert_eq!(repo.calls(), 2);
    assert_eq!(snapshot.query.page.as_ref().map(|p| p.total_count), Some(0));
    assert!(snapshot.groups.is_empty());
    assert_eq!(repo.last_spec().unwrap().cells().len(), 9);

    handle.shutdown().await;
}
