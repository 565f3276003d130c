//! Deduplicating, caching front for an `EventRepository`.
//!
//! Requests are keyed by `FilterSpec::cache_key()`. Concurrent requests for
//! one key share a single repository call; a successful result younger than
//! the dedupe window is served from cache. The most recent tracked request is
//! the *active* key, and only its results reach the published `QueryView`.
//! Until they do, the previously committed page stays visible and is flagged
//! stale.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use eventmap_common::{Config, EventPage};
use eventmap_store::{EventRepository, FilterSpec, RepositoryError};

use crate::feed::InfiniteFeed;

/// Repository failure as seen by callers sharing one request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct FetchError {
    pub message: String,
    pub retryable: bool,
}

impl From<RepositoryError> for FetchError {
    fn from(err: RepositoryError) -> Self {
        Self {
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How long a successful result is served without asking the repository.
    pub dedupe_window: Duration,
    /// How long a result is kept at all once it is neither active nor visible.
    pub retention: Duration,
    /// Upper bound on cached keys; the oldest unpinned ones go first.
    pub max_entries: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            dedupe_window: Duration::from_secs(60),
            retention: Duration::from_secs(300),
            max_entries: 128,
        }
    }
}

impl CoordinatorConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            dedupe_window: config.dedupe_window,
            retention: config.dedupe_window * 5,
            ..Default::default()
        }
    }
}

/// What a consumer should render right now.
#[derive(Debug, Clone, Default)]
pub struct QueryView {
    /// Key of the most recent tracked request.
    pub key: Option<String>,
    /// Last committed page. May belong to an earlier key (see `is_stale`).
    pub page: Option<Arc<EventPage>>,
    /// Key the visible page was fetched for.
    pub page_key: Option<String>,
    pub is_loading: bool,
    pub is_stale: bool,
    /// Most recent failure for the active key.
    pub error: Option<FetchError>,
}

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<EventPage>, FetchError>>>;

#[derive(Default)]
struct CacheEntry {
    page: Option<Arc<EventPage>>,
    fetched_at: Option<Instant>,
    error: Option<FetchError>,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, CacheEntry>,
    in_flight: HashMap<String, SharedFetch>,
    active: Option<String>,
    visible: Option<(String, Arc<EventPage>)>,
}

impl State {
    fn fresh(&self, key: &str, window: Duration, now: Instant) -> Option<Arc<EventPage>> {
        let entry = self.entries.get(key)?;
        let fetched_at = entry.fetched_at?;
        if now.duration_since(fetched_at) < window {
            entry.page.clone()
        } else {
            None
        }
    }

    fn record(&mut self, key: &str, result: &Result<Arc<EventPage>, FetchError>, now: Instant) {
        let entry = self.entries.entry(key.to_string()).or_default();
        match result {
            Ok(page) => {
                entry.page = Some(page.clone());
                entry.fetched_at = Some(now);
                entry.error = None;
            }
            Err(err) => {
                // Keep the page for display, but stop serving it as fresh.
                entry.fetched_at = None;
                entry.error = Some(err.clone());
            }
        }
    }

    /// Drop expired entries, then the oldest ones beyond `max_entries`. The
    /// active key, the visible key and keys in flight are never dropped.
    fn prune(&mut self, retention: Duration, max_entries: usize, now: Instant) {
        let active = self.active.as_deref();
        let visible = self.visible.as_ref().map(|(k, _)| k.as_str());
        let in_flight = &self.in_flight;
        let pinned =
            |key: &str| Some(key) == active || Some(key) == visible || in_flight.contains_key(key);

        self.entries.retain(|key, entry| {
            pinned(key.as_str())
                || entry
                    .fetched_at
                    .is_some_and(|at| now.duration_since(at) < retention)
        });

        if self.entries.len() <= max_entries {
            return;
        }
        let mut evictable: Vec<(Instant, String)> = self
            .entries
            .iter()
            .filter(|(key, _)| !pinned(key.as_str()))
            .filter_map(|(key, entry)| entry.fetched_at.map(|at| (at, key.clone())))
            .collect();
        evictable.sort();
        let excess = self.entries.len() - max_entries;
        for (_, key) in evictable.into_iter().take(excess) {
            self.entries.remove(&key);
        }
    }

    fn is_active(&self, key: &str) -> bool {
        self.active.as_deref() == Some(key)
    }

    fn view(&self) -> QueryView {
        let active = self.active.clone();
        let (page_key, page) = match &self.visible {
            Some((k, p)) => (Some(k.clone()), Some(p.clone())),
            None => (None, None),
        };
        let error = active
            .as_deref()
            .and_then(|k| self.entries.get(k))
            .and_then(|e| e.error.clone());

        QueryView {
            is_loading: active
                .as_deref()
                .is_some_and(|k| self.in_flight.contains_key(k)),
            is_stale: page.is_some() && page_key != active,
            key: active,
            page,
            page_key,
            error,
        }
    }
}

pub struct QueryCoordinator {
    repo: Arc<dyn EventRepository>,
    config: CoordinatorConfig,
    state: Mutex<State>,
    view: ArcSwap<QueryView>,
}

impl QueryCoordinator {
    pub fn new(repo: Arc<dyn EventRepository>, config: CoordinatorConfig) -> Self {
        Self {
            repo,
            config,
            state: Mutex::new(State::default()),
            view: ArcSwap::from_pointee(QueryView::default()),
        }
    }

    /// Snapshot of the active query. Lock-free.
    pub fn view(&self) -> Arc<QueryView> {
        self.view.load_full()
    }

    /// Make `spec` the active query and resolve it, from cache if fresh.
    pub async fn fetch(&self, spec: &FilterSpec) -> Result<Arc<EventPage>, FetchError> {
        self.run(spec, true, false).await
    }

    /// Make `spec` the active query and ask the repository even if a fresh
    /// result is cached. An identical request already in flight is joined.
    pub async fn revalidate(&self, spec: &FilterSpec) -> Result<Arc<EventPage>, FetchError> {
        self.run(spec, true, true).await
    }

    /// Resolve `spec` through the shared cache without touching the active
    /// query or the published view.
    pub async fn fetch_page(&self, spec: &FilterSpec) -> Result<Arc<EventPage>, FetchError> {
        self.run(spec, false, false).await
    }

    /// Fetch the next page of `feed`. Returns whether the feed changed.
    pub async fn load_more(&self, feed: &mut InfiniteFeed) -> Result<bool, FetchError> {
        let Some(spec) = feed.next_spec() else {
            return Ok(false);
        };
        let page = self.fetch_page(&spec).await?;
        Ok(feed.accept(&spec, page))
    }

    /// Cached page for `spec`, regardless of age.
    pub async fn cached(&self, spec: &FilterSpec) -> Option<Arc<EventPage>> {
        let state = self.state.lock().await;
        state
            .entries
            .get(&spec.cache_key())
            .and_then(|e| e.page.clone())
    }

    async fn run(
        &self,
        spec: &FilterSpec,
        track: bool,
        force: bool,
    ) -> Result<Arc<EventPage>, FetchError> {
        let key = spec.cache_key();

        let fetch = {
            let mut state = self.state.lock().await;
            if track {
                state.active = Some(key.clone());
                // Show whatever we already have for this key while it refreshes.
                let cached = state.entries.get(&key).and_then(|e| e.page.clone());
                if let Some(page) = cached {
                    state.visible = Some((key.clone(), page));
                }
            }

            if !force {
                if let Some(page) = state.fresh(&key, self.config.dedupe_window, Instant::now()) {
                    debug!(key = %key, "Serving cached events");
                    if track {
                        self.publish(&state);
                    }
                    return Ok(page);
                }
            }

            let fetch = match state.in_flight.get(&key) {
                Some(existing) => {
                    debug!(key = %key, "Joining in-flight query");
                    existing.clone()
                }
                None => {
                    let fetch = self.start(spec.clone());
                    state.in_flight.insert(key.clone(), fetch.clone());
                    fetch
                }
            };
            if track {
                self.publish(&state);
            }
            fetch
        };

        let result = fetch.clone().await;

        let mut state = self.state.lock().await;
        // Only the first waiter to wake records the outcome; a newer request
        // for the same key may already have replaced this one.
        let owns_entry = state
            .in_flight
            .get(&key)
            .is_some_and(|current| current.ptr_eq(&fetch));
        if owns_entry {
            state.in_flight.remove(&key);
            let now = Instant::now();
            state.record(&key, &result, now);
            if let Err(err) = &result {
                warn!(key = %key, error = %err, "Event query failed, keeping previous data");
            }
        }

        if state.is_active(&key) {
            if let Ok(page) = &result {
                state.visible = Some((key.clone(), page.clone()));
            }
        } else if track {
            debug!(key = %key, "Discarding superseded result");
        }
        if owns_entry {
            state.prune(self.config.retention, self.config.max_entries, Instant::now());
        }
        self.publish(&state);

        result
    }

    fn start(&self, spec: FilterSpec) -> SharedFetch {
        let repo = self.repo.clone();
        async move {
            match repo.query(&spec).await {
                Ok(page) => {
                    debug!(
                        total = page.total_count,
                        returned = page.events.len(),
                        "Repository answered"
                    );
                    Ok(Arc::new(page))
                }
                Err(err) => Err(FetchError::from(err)),
            }
        }
        .boxed()
        .shared()
    }

    fn publish(&self, state: &State) {
        self.view.store(Arc::new(state.view()));
    }
}
