//! Viewport state machine.
//!
//! Map movement only records the new center and restarts the debounce timer.
//! When the timer settles, the center is encoded into a query cell and its
//! 3x3 neighborhood; a new filter is produced only if that neighborhood
//! differs from the active one. Every mutating method returns the
//! `FilterSpec` to fetch, or `None` when nothing needs fetching.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use eventmap_common::geocell::{self, QUERY_PRECISION};
use eventmap_common::{Config, Event, EventCategory, GeoPoint, DEFAULT_CENTER};
use eventmap_store::{FilterSpec, MAX_LIMIT};

use crate::capability::MapWidget;
use crate::debounce::{DebounceTicket, DebounceTimer, INTERACTIVE_DELAY, RELAXED_DELAY};
use crate::grouping::{EventGroup, Selection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewportPhase {
    Uninitialized,
    Locating,
    Ready,
}

#[derive(Debug, Clone)]
pub struct ViewportSettings {
    pub precision: usize,
    pub debounce: Duration,
    pub default_center: GeoPoint,
    pub default_zoom: i32,
    /// Zoom used when opening on a deep-linked event.
    pub focus_zoom: i32,
    pub min_zoom: i32,
    pub max_zoom: i32,
    /// Events per map query.
    pub limit: u32,
}

impl Default for ViewportSettings {
    fn default() -> Self {
        Self {
            precision: QUERY_PRECISION,
            debounce: INTERACTIVE_DELAY,
            default_center: DEFAULT_CENTER,
            default_zoom: 7,
            focus_zoom: 4,
            min_zoom: 1,
            max_zoom: 14,
            limit: MAX_LIMIT,
        }
    }
}

impl ViewportSettings {
    /// Slower debounce for low-power or metered clients.
    pub fn relaxed() -> Self {
        Self {
            debounce: RELAXED_DELAY,
            ..Default::default()
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            debounce: config.debounce,
            ..Default::default()
        }
    }
}

/// Where the map opens.
#[derive(Debug, Clone)]
pub enum InitialCenter {
    /// A deep-linked event: center on it, zoom in and select it.
    Event(Event),
    Device(GeoPoint),
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewportState {
    pub phase: ViewportPhase,
    pub center: GeoPoint,
    pub zoom: i32,
    /// Active neighborhood, center cell first. Empty until `Ready`.
    pub cells: Vec<String>,
    pub filter: FilterSpec,
    pub selection: Selection,
    /// The deep-linked event, kept so it can be shown even when the current
    /// page does not contain it.
    pub focused_event: Option<Event>,
    /// Last position reported by the location provider.
    pub user_location: Option<GeoPoint>,
}

pub struct ViewportController {
    settings: ViewportSettings,
    state: ViewportState,
    timer: DebounceTimer,
}

impl ViewportController {
    pub fn new(settings: ViewportSettings) -> Self {
        let state = ViewportState {
            phase: ViewportPhase::Uninitialized,
            center: settings.default_center,
            zoom: settings.default_zoom,
            cells: Vec::new(),
            filter: FilterSpec::default().with_limit(settings.limit),
            selection: Selection::None,
            focused_event: None,
            user_location: None,
        };
        Self {
            timer: DebounceTimer::new(settings.debounce),
            settings,
            state,
        }
    }

    pub fn state(&self) -> &ViewportState {
        &self.state
    }

    pub fn settings(&self) -> &ViewportSettings {
        &self.settings
    }

    pub fn phase(&self) -> ViewportPhase {
        self.state.phase
    }

    /// The filter to fetch for the current state. `None` before `Ready`.
    pub fn current_spec(&self) -> Option<FilterSpec> {
        (self.state.phase == ViewportPhase::Ready).then(|| self.state.filter.clone())
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer.deadline()
    }

    // --- Lifecycle ---

    pub fn begin_locating(&mut self) {
        if self.state.phase == ViewportPhase::Uninitialized {
            self.state.phase = ViewportPhase::Locating;
        }
    }

    /// Enter `Ready` at the chosen center and return the first query.
    /// Ignored once `Ready`.
    pub fn finish_locating(&mut self, initial: InitialCenter) -> Option<FilterSpec> {
        if self.state.phase == ViewportPhase::Ready {
            return None;
        }

        match initial {
            InitialCenter::Event(event) => {
                self.state.center = event.coordinates().unwrap_or(self.settings.default_center);
                self.state.zoom = self.settings.focus_zoom;
                self.state.selection = Selection::Event(event.id);
                info!(event_id = event.id, "Opening map on event");
                self.state.focused_event = Some(event);
            }
            InitialCenter::Device(point) => {
                self.state.center = point;
                self.state.user_location = Some(point);
                self.state.zoom = self.settings.default_zoom;
            }
            InitialCenter::Fallback => {
                self.state.center = self.settings.default_center;
                self.state.zoom = self.settings.default_zoom;
            }
        }

        self.state.phase = ViewportPhase::Ready;
        if self.recompute().is_none() && self.state.cells.is_empty() {
            warn!(
                lat = self.state.center.lat,
                lng = self.state.center.lng,
                "Unusable initial center, using default"
            );
            self.state.center = self.settings.default_center;
            self.recompute();
        }
        self.current_spec()
    }

    // --- Map movement ---

    /// Record a pan or zoom and restart the debounce timer.
    pub fn viewport_changed(
        &mut self,
        center: GeoPoint,
        zoom: i32,
        now: Instant,
    ) -> Option<DebounceTicket> {
        if self.state.phase != ViewportPhase::Ready {
            return None;
        }
        self.state.center = center;
        self.state.zoom = self.clamp_zoom(zoom);
        Some(self.timer.restart(now))
    }

    /// Read the widget's camera as a viewport change.
    pub fn sync_from_map(&mut self, map: &dyn MapWidget, now: Instant) -> Option<DebounceTicket> {
        self.viewport_changed(map.center(), map.zoom(), now)
    }

    /// Push the controller's camera to the widget.
    pub fn apply_camera(&self, map: &mut dyn MapWidget) {
        map.pan_to(self.state.center);
        map.set_zoom(self.state.zoom);
    }

    /// Settle if any pending timer is due.
    pub fn poll_timer(&mut self, now: Instant) -> Option<FilterSpec> {
        if self.timer.poll(now) {
            self.recompute()
        } else {
            None
        }
    }

    /// Settle the fire identified by `ticket`. Stale tickets do nothing.
    pub fn settle(&mut self, ticket: DebounceTicket, now: Instant) -> Option<FilterSpec> {
        if self.timer.fire(ticket, now) {
            self.recompute()
        } else {
            None
        }
    }

    /// Jump to `center` without waiting for the debounce.
    pub fn recenter_now(&mut self, center: GeoPoint) -> Option<FilterSpec> {
        if self.state.phase != ViewportPhase::Ready {
            return None;
        }
        self.timer.cancel();
        self.state.center = center;
        self.recompute()
    }

    /// The device reported its position: remember it and jump there.
    pub fn located(&mut self, point: GeoPoint) -> Option<FilterSpec> {
        self.state.user_location = Some(point);
        self.recenter_now(point)
    }

    /// Step the zoom level, staying within the widget's range.
    pub fn zoom_by(&mut self, delta: i32) -> i32 {
        self.state.zoom = self.clamp_zoom(self.state.zoom.saturating_add(delta));
        self.state.zoom
    }

    fn clamp_zoom(&self, zoom: i32) -> i32 {
        zoom.clamp(self.settings.min_zoom, self.settings.max_zoom)
    }

    fn recompute(&mut self) -> Option<FilterSpec> {
        let center = self.state.center;
        let hood = match geocell::encode(center.lat, center.lng, self.settings.precision)
            .and_then(|cell| geocell::neighbors(&cell))
        {
            Ok(hood) => hood,
            Err(e) => {
                warn!(error = %e, "Cannot encode map center");
                return None;
            }
        };

        if hood == self.state.cells {
            debug!(cell = %hood[0], "Neighborhood unchanged");
            return None;
        }

        debug!(cell = %hood[0], "Neighborhood changed");
        self.state.filter.set_cells(&hood);
        self.state.cells = hood;
        self.current_spec()
    }

    // --- Filter ---

    /// Replace the non-spatial part of the filter. The active cells and the
    /// map page size are kept.
    pub fn set_filter(&mut self, filter: FilterSpec) -> Option<FilterSpec> {
        let filter = filter
            .with_cells(&self.state.cells)
            .with_page(1)
            .with_limit(self.settings.limit);
        if filter == self.state.filter {
            return None;
        }
        self.state.filter = filter;
        self.current_spec()
    }

    pub fn toggle_category(&mut self, category: EventCategory) -> Option<FilterSpec> {
        self.state.filter.toggle_category(category);
        self.current_spec()
    }

    // --- Selection ---

    pub fn select_group(&mut self, group: &EventGroup) {
        self.state.selection.select_group(group);
    }

    pub fn select_event(&mut self, id: i64) {
        self.state.selection.select_event(id);
    }

    pub fn close_detail(&mut self) {
        self.state.selection.close_detail();
    }

    pub fn close_list(&mut self) {
        self.state.selection.close_list();
    }

    pub fn clear_selection(&mut self) {
        self.state.selection.clear();
    }
}
