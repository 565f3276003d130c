//! QueryCoordinator: request sharing, caching, and what becomes visible.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use eventmap_common::{Event, EventCategory, EventDetails, EventPage};
use eventmap_store::{EventRepository, FilterSpec, MemoryEventRepository, RepositoryError};
use eventmap_viewport::{CoordinatorConfig, InfiniteFeed, QueryCoordinator};

// =========================================================================
// Test repository
// =========================================================================

/// Counts calls and can hold a query until its gate opens. Gates are keyed
/// by search term ("" for none).
struct GatedRepo {
    inner: MemoryEventRepository,
    calls: AtomicUsize,
    gates: Mutex<HashMap<String, watch::Receiver<bool>>>,
}

impl GatedRepo {
    fn new(events: Vec<Event>) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryEventRepository::with_events(events),
            calls: AtomicUsize::new(0),
            gates: Mutex::new(HashMap::new()),
        })
    }

    /// Hold queries for `term` until the returned sender sends `true`.
    fn close_gate(&self, term: &str) -> watch::Sender<bool> {
        let (tx, rx) = watch::channel(false);
        self.gates.lock().unwrap().insert(term.to_string(), rx);
        tx
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventRepository for GatedRepo {
    async fn query(&self, spec: &FilterSpec) -> Result<EventPage, RepositoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let term = spec.search_term().unwrap_or_default().to_string();
        let gate = self.gates.lock().unwrap().get(&term).cloned();
        if let Some(mut gate) = gate {
            let _ = gate.wait_for(|open| *open).await;
        }
        self.inner.query(spec).await
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Event>, RepositoryError> {
        self.inner.get_by_id(id).await
    }
}

fn event(id: i64, title: &str) -> Event {
    Event {
        id,
        title: title.to_string(),
        category: EventCategory::Performance,
        start_date: "2026-10-01T00:00:00Z".parse().unwrap(),
        end_date: "2026-10-05T00:00:00Z".parse().unwrap(),
        location_name: "Seoul".to_string(),
        latitude: Some(37.5759),
        longitude: Some(126.9768),
        district_id: None,
        geohash: None,
        details: EventDetails::default(),
    }
}

fn catalog() -> Vec<Event> {
    let mut events: Vec<Event> = (1..=45).map(|i| event(i, &format!("Alpha {i}"))).collect();
    events.push(event(100, "Beta Concert"));
    events
}

fn search(term: &str) -> FilterSpec {
    FilterSpec::default().with_search(Some(term))
}

async fn settle_tasks() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

// =========================================================================
// Sharing and caching
// =========================================================================

#[tokio::test]
async fn concurrent_requests_share_one_repository_call() {
    let repo = GatedRepo::new(catalog());
    let gate = repo.close_gate("alpha");
    let coordinator = QueryCoordinator::new(repo.clone(), CoordinatorConfig::default());
    let spec = search("alpha");

    let (a, b, _) = tokio::join!(coordinator.fetch(&spec), coordinator.fetch(&spec), async {
        settle_tasks().await;
        gate.send(true).unwrap();
    });

    let (a, b) = (a.unwrap(), b.unwrap());
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.total_count, 45);
    assert_eq!(repo.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn fresh_results_are_served_from_cache() {
    let repo = GatedRepo::new(catalog());
    let coordinator = QueryCoordinator::new(
        repo.clone(),
        CoordinatorConfig {
            dedupe_window: Duration::from_secs(60),
            ..Default::default()
        },
    );
    let spec = search("beta");

    coordinator.fetch(&spec).await.unwrap();
    coordinator.fetch(&spec).await.unwrap();
    assert_eq!(repo.calls(), 1);

    tokio::time::advance(Duration::from_secs(61)).await;
    coordinator.fetch(&spec).await.unwrap();
    assert_eq!(repo.calls(), 2);

    coordinator.revalidate(&spec).await.unwrap();
    assert_eq!(repo.calls(), 3);
}

#[tokio::test]
async fn cache_stays_bounded_across_many_keys() {
    let repo = GatedRepo::new(catalog());
    let coordinator = QueryCoordinator::new(
        repo.clone(),
        CoordinatorConfig {
            max_entries: 16,
            ..Default::default()
        },
    );

    let specs: Vec<FilterSpec> = (1..=200).map(|p| search("alpha").with_page(p)).collect();
    for spec in &specs {
        coordinator.fetch(spec).await.unwrap();
    }
    assert_eq!(repo.calls(), 200);

    let mut kept = 0;
    for spec in &specs {
        if coordinator.cached(spec).await.is_some() {
            kept += 1;
        }
    }
    assert!(kept <= 16, "{kept} keys still cached");
    assert!(coordinator.cached(&specs[0]).await.is_none());
    assert!(coordinator.cached(&specs[199]).await.is_some());
}

#[tokio::test]
async fn failed_refresh_is_retried_on_next_fetch() {
    let repo = Arc::new(MemoryEventRepository::with_events(catalog()));
    let coordinator = QueryCoordinator::new(repo.clone(), CoordinatorConfig::default());
    let spec = search("beta");

    coordinator.fetch(&spec).await.unwrap();
    repo.set_available(false);
    coordinator.revalidate(&spec).await.unwrap_err();

    // Inside the dedupe window, but the failure means the store is asked again.
    repo.set_available(true);
    coordinator.fetch(&spec).await.unwrap();
    assert!(coordinator.view().error.is_none());
}

// =========================================================================
// Visibility
// =========================================================================

#[tokio::test]
async fn previous_page_stays_visible_while_loading() {
    let repo = GatedRepo::new(catalog());
    let coordinator = Arc::new(QueryCoordinator::new(repo.clone(), CoordinatorConfig::default()));

    let alpha = search("alpha");
    coordinator.fetch(&alpha).await.unwrap();

    let gate = repo.close_gate("beta");
    let beta = search("beta");
    let pending = {
        let coordinator = coordinator.clone();
        let beta = beta.clone();
        tokio::spawn(async move { coordinator.fetch(&beta).await })
    };
    settle_tasks().await;

    let view = coordinator.view();
    assert_eq!(view.key.as_deref(), Some(beta.cache_key().as_str()));
    assert_eq!(view.page_key.as_deref(), Some(alpha.cache_key().as_str()));
    assert!(view.is_loading);
    assert!(view.is_stale);
    assert_eq!(view.page.as_ref().map(|p| p.total_count), Some(45));

    gate.send(true).unwrap();
    pending.await.unwrap().unwrap();

    let view = coordinator.view();
    assert!(!view.is_loading);
    assert!(!view.is_stale);
    assert_eq!(view.page.as_ref().map(|p| p.total_count), Some(1));
}

#[tokio::test]
async fn late_response_never_overwrites_newer_one() {
    let repo = GatedRepo::new(catalog());
    let coordinator = Arc::new(QueryCoordinator::new(repo.clone(), CoordinatorConfig::default()));

    let gate = repo.close_gate("alpha");
    let alpha = search("alpha");
    let slow = {
        let coordinator = coordinator.clone();
        let alpha = alpha.clone();
        tokio::spawn(async move { coordinator.fetch(&alpha).await })
    };
    settle_tasks().await;

    let beta = search("beta");
    coordinator.fetch(&beta).await.unwrap();

    gate.send(true).unwrap();
    let late = slow.await.unwrap().unwrap();
    assert_eq!(late.total_count, 45);

    let view = coordinator.view();
    assert_eq!(view.page_key.as_deref(), Some(beta.cache_key().as_str()));
    assert_eq!(view.page.as_ref().map(|p| p.total_count), Some(1));

    // The late result is still cached for when the user comes back.
    assert_eq!(coordinator.cached(&alpha).await.map(|p| p.total_count), Some(45));
}

#[tokio::test]
async fn failure_keeps_data_and_flags_error() {
    let repo = Arc::new(MemoryEventRepository::with_events(catalog()));
    let coordinator = QueryCoordinator::new(repo.clone(), CoordinatorConfig::default());
    let spec = search("alpha");

    coordinator.fetch(&spec).await.unwrap();
    repo.set_available(false);

    let err = coordinator.revalidate(&spec).await.unwrap_err();
    assert!(err.retryable);

    let view = coordinator.view();
    assert!(view.error.is_some());
    assert!(!view.is_loading);
    assert_eq!(view.page.as_ref().map(|p| p.total_count), Some(45));

    repo.set_available(true);
    coordinator.revalidate(&spec).await.unwrap();
    assert!(coordinator.view().error.is_none());
}

// =========================================================================
// Infinite feed
// =========================================================================

#[tokio::test]
async fn load_more_walks_pages_until_a_short_one() {
    let repo = GatedRepo::new(catalog());
    let coordinator = QueryCoordinator::new(repo.clone(), CoordinatorConfig::default());
    let mut feed = InfiniteFeed::new(search("alpha").with_limit(20));

    assert!(coordinator.load_more(&mut feed).await.unwrap());
    assert!(coordinator.load_more(&mut feed).await.unwrap());
    assert!(!feed.reached_end());
    assert!(coordinator.load_more(&mut feed).await.unwrap());
    assert!(feed.reached_end());
    assert!(!coordinator.load_more(&mut feed).await.unwrap());

    assert_eq!(feed.len(), 45);
    assert_eq!(repo.calls(), 3);
    // Paging does not disturb the map's active query.
    assert!(coordinator.view().key.is_none());
}
