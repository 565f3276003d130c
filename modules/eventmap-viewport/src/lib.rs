//! Client-side query orchestration for the event map.
//!
//! The `ViewportController` turns map movement into debounced geohash
//! neighborhoods, the `QueryCoordinator` deduplicates and caches the
//! resulting repository calls, and `spawn_viewport` wires both into a
//! single-writer task that publishes snapshots.

pub mod capability;
pub mod controller;
pub mod coordinator;
pub mod debounce;
pub mod feed;
pub mod grouping;
pub mod service;

pub use capability::{LocationError, LocationProvider, MapWidget, StaticLocation};
pub use controller::{InitialCenter, ViewportController, ViewportPhase, ViewportSettings, ViewportState};
pub use coordinator::{CoordinatorConfig, FetchError, QueryCoordinator, QueryView};
pub use debounce::{DebounceTicket, DebounceTimer};
pub use feed::InfiniteFeed;
pub use grouping::{group_events, selected_event, EventGroup, GroupKey, Selection};
pub use service::{spawn_viewport, ViewportClosed, ViewportHandle, ViewportOptions, ViewportSnapshot};
