//! Paged list view over one filter ("load more" scrolling).

use std::sync::Arc;

use eventmap_common::{Event, EventPage};
use eventmap_store::FilterSpec;

/// Concatenated pages of a single filter, in page order.
///
/// Changing the filter does not clear the list: the old pages stay until
/// page 1 of the new filter arrives, so the list never flashes empty.
#[derive(Debug, Clone)]
pub struct InfiniteFeed {
    base: FilterSpec,
    pages: Vec<Arc<EventPage>>,
    pending: Option<FilterSpec>,
    reached_end: bool,
}

impl InfiniteFeed {
    pub fn new(spec: FilterSpec) -> Self {
        Self {
            base: spec.with_page(1),
            pages: Vec::new(),
            pending: None,
            reached_end: false,
        }
    }

    pub fn filter(&self) -> &FilterSpec {
        self.pending.as_ref().unwrap_or(&self.base)
    }

    /// Switch to a new filter. A filter equal to the current one (ignoring
    /// the page) is a no-op.
    pub fn set_filter(&mut self, spec: FilterSpec) {
        if spec.base_key() == self.filter().base_key() {
            return;
        }
        self.pending = Some(spec.with_page(1));
    }

    /// The page to request next, or `None` once the end has been reached.
    pub fn next_spec(&self) -> Option<FilterSpec> {
        if let Some(pending) = &self.pending {
            return Some(pending.clone());
        }
        if self.reached_end {
            return None;
        }
        let next = u32::try_from(self.pages.len() + 1).unwrap_or(u32::MAX);
        Some(self.base.clone().with_page(next))
    }

    /// Append a fetched page. Pages for a superseded filter, or out of
    /// sequence, are ignored and `false` is returned.
    pub fn accept(&mut self, spec: &FilterSpec, page: Arc<EventPage>) -> bool {
        let key = spec.base_key();

        if let Some(pending) = &self.pending {
            if key != pending.base_key() || spec.page() != 1 {
                return false;
            }
            self.base = pending.clone();
            self.pending = None;
            self.pages.clear();
        } else if key != self.base.base_key() || spec.page() as usize != self.pages.len() + 1 {
            return false;
        }

        self.reached_end = page.events.len() < spec.limit() as usize;
        self.pages.push(page);
        true
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.pages.iter().flat_map(|p| p.events.iter())
    }

    pub fn len(&self) -> usize {
        self.pages.iter().map(|p| p.events.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total matches reported by the most recent page.
    pub fn total_count(&self) -> Option<u64> {
        self.pages.last().map(|p| p.total_count)
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn reached_end(&self) -> bool {
        self.reached_end
    }

    /// True between `set_filter` and the arrival of the new filter's first page.
    pub fn is_switching(&self) -> bool {
        self.pending.is_some()
    }
}
