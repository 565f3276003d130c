//! In-memory `EventRepository`, used for seed-file demos and tests.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use eventmap_common::geocell::{self, STORED_PRECISION};
use eventmap_common::{Event, EventPage};

use crate::filter::FilterSpec;
use crate::predicate;
use crate::repository::{EventRepository, RepositoryError};

/// Events kept sorted newest-first, so a query is filter-then-slice.
pub struct MemoryEventRepository {
    events: RwLock<Vec<Event>>,
    available: AtomicBool,
}

impl Default for MemoryEventRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEventRepository {
    pub fn new() -> Self {
        Self::with_events(Vec::new())
    }

    pub fn with_events(events: impl IntoIterator<Item = Event>) -> Self {
        let mut events: Vec<Event> = events.into_iter().map(prepare).collect();
        sort_newest_first(&mut events);
        Self {
            events: RwLock::new(events),
            available: AtomicBool::new(true),
        }
    }

    /// Parse a JSON array of events.
    pub fn from_json(json: &str) -> Result<Self, RepositoryError> {
        let events: Vec<Event> =
            serde_json::from_str(json).map_err(|e| RepositoryError::Seed(e.to_string()))?;
        Ok(Self::with_events(events))
    }

    pub async fn from_json_file(path: &Path) -> Result<Self, RepositoryError> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RepositoryError::Seed(format!("{}: {e}", path.display())))?;
        let repo = Self::from_json(&json)?;
        info!(
            path = %path.display(),
            count = repo.events.read().await.len(),
            "Loaded seed events"
        );
        Ok(repo)
    }

    pub async fn insert(&self, event: Event) {
        let mut events = self.events.write().await;
        let event = prepare(event);
        events.retain(|e| e.id != event.id);
        events.push(event);
        sort_newest_first(&mut events);
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.read().await.is_empty()
    }

    /// Simulate an outage: while unavailable every call fails with
    /// `RepositoryError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RepositoryError::Unavailable(
                "in-memory repository is offline".to_string(),
            ))
        }
    }
}

#[async_trait]
impl EventRepository for MemoryEventRepository {
    async fn query(&self, spec: &FilterSpec) -> Result<EventPage, RepositoryError> {
        self.check_available()?;
        let events = self.events.read().await;

        let matched: Vec<&Event> = events
            .iter()
            .filter(|e| predicate::matches(spec, e))
            .collect();
        let total_count = matched.len() as u64;
        let offset = usize::try_from(spec.offset()).unwrap_or(usize::MAX);

        let page: Vec<Event> = matched
            .into_iter()
            .skip(offset)
            .take(spec.limit() as usize)
            .cloned()
            .collect();

        debug!(
            total = total_count,
            returned = page.len(),
            page = spec.page(),
            cells = spec.cells().len(),
            "Memory query"
        );

        Ok(EventPage {
            events: page,
            total_count,
        })
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Event>, RepositoryError> {
        self.check_available()?;
        Ok(self.events.read().await.iter().find(|e| e.id == id).cloned())
    }
}

/// Normalize the stored cell: lower-case, drop blanks, and derive it from the
/// coordinates when missing.
fn prepare(mut event: Event) -> Event {
    event.geohash = event
        .geohash
        .take()
        .map(|cell| cell.trim().to_ascii_lowercase())
        .filter(|cell| !cell.is_empty());

    if event.geohash.is_none() {
        if let Some(point) = event.coordinates() {
            match geocell::encode(point.lat, point.lng, STORED_PRECISION) {
                Ok(cell) => event.geohash = Some(cell),
                Err(e) => warn!(id = event.id, error = %e, "Event has unusable coordinates"),
            }
        }
    }
    event
}

fn sort_newest_first(events: &mut [Event]) {
    events.sort_by(|a, b| {
        b.start_date
            .cmp(&a.start_date)
            .then_with(|| b.id.cmp(&a.id))
    });
}
