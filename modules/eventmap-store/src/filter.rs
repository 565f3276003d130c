//! Canonical filter specification and the composer that builds it.
//!
//! The composer is total: any query string yields a usable `FilterSpec`.
//! Malformed values fall back to "no restriction" or to the defaults, so a
//! buggy or hostile client degrades to a broader query instead of an error.

use std::collections::BTreeSet;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::Serialize;

use eventmap_common::geocell;
use eventmap_common::EventCategory;

use crate::dates::{parse_bound, weekend_range};

pub const DEFAULT_LIMIT: u32 = 20;
pub const MAX_LIMIT: u32 = 300;
pub const MAX_CELLS: usize = 9;
pub const MAX_SEARCH_CHARS: usize = 100;

/// Characters that would split a structured OR predicate.
const RESERVED_SEARCH_CHARS: [char; 3] = ['(', ')', ','];

// ---------------------------------------------------------------------------
// Raw input
// ---------------------------------------------------------------------------

/// Query parameters as received, before any validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFilter {
    pub category: Option<String>,
    pub search: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub gu_seq: Option<String>,
    pub geohashes: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
    pub weekend: Option<String>,
}

impl RawFilter {
    /// Build from decoded query pairs. Unknown keys are ignored; a repeated key
    /// keeps its last value. `q`, `gu`, `start` and `end` are accepted as
    /// aliases used by the search page.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut raw = RawFilter::default();
        for (key, value) in pairs {
            let slot = match key.as_ref() {
                "category" => &mut raw.category,
                "search" | "q" => &mut raw.search,
                "startDate" | "start" => &mut raw.start_date,
                "endDate" | "end" => &mut raw.end_date,
                "guSeq" | "gu" => &mut raw.gu_seq,
                "geohashes" => &mut raw.geohashes,
                "page" => &mut raw.page,
                "limit" => &mut raw.limit,
                "weekend" => &mut raw.weekend,
                _ => continue,
            };
            *slot = Some(value.into());
        }
        raw
    }
}

// ---------------------------------------------------------------------------
// FilterSpec
// ---------------------------------------------------------------------------

/// Normalized, validated query. Every constructor and setter keeps the
/// invariants: `page >= 1`, `1 <= limit <= MAX_LIMIT`, at most `MAX_CELLS`
/// distinct well-formed cells, and a search term free of reserved characters.
///
/// An empty category set means "any category".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    categories: BTreeSet<EventCategory>,
    search_term: Option<String>,
    district_id: Option<u32>,
    date_start: Option<DateTime<Utc>>,
    date_end: Option<DateTime<Utc>>,
    cells: BTreeSet<String>,
    page: u32,
    limit: u32,
}

impl Default for FilterSpec {
    fn default() -> Self {
        Self {
            categories: BTreeSet::new(),
            search_term: None,
            district_id: None,
            date_start: None,
            date_end: None,
            cells: BTreeSet::new(),
            page: 1,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl FilterSpec {
    pub fn categories(&self) -> &BTreeSet<EventCategory> {
        &self.categories
    }

    pub fn search_term(&self) -> Option<&str> {
        self.search_term.as_deref()
    }

    pub fn district_id(&self) -> Option<u32> {
        self.district_id
    }

    pub fn date_start(&self) -> Option<DateTime<Utc>> {
        self.date_start
    }

    pub fn date_end(&self) -> Option<DateTime<Utc>> {
        self.date_end
    }

    pub fn cells(&self) -> &BTreeSet<String> {
        &self.cells
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Row offset of the first event on this page.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }

    pub fn with_categories(mut self, categories: impl IntoIterator<Item = EventCategory>) -> Self {
        self.categories = categories.into_iter().collect();
        self
    }

    /// Add the category if absent, remove it if present.
    pub fn toggle_category(&mut self, category: EventCategory) {
        if !self.categories.remove(&category) {
            self.categories.insert(category);
        }
    }

    pub fn with_search(mut self, term: Option<&str>) -> Self {
        self.search_term = term.and_then(sanitize_search);
        self
    }

    pub fn with_district(mut self, district_id: Option<u32>) -> Self {
        self.district_id = district_id.filter(|id| *id > 0);
        self
    }

    pub fn with_date_range(
        mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        self.date_start = start;
        self.date_end = end;
        self
    }

    pub fn with_cells<I, S>(mut self, cells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.set_cells(cells);
        self
    }

    /// Replace the spatial restriction. Tokens are lower-cased; malformed ones
    /// are dropped; duplicates collapse; only the first `MAX_CELLS` survive.
    pub fn set_cells<I, S>(&mut self, cells: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut kept = BTreeSet::new();
        for cell in cells {
            let cell = cell.as_ref().trim().to_ascii_lowercase();
            if !geocell::is_valid_cell(&cell) {
                continue;
            }
            if kept.len() == MAX_CELLS && !kept.contains(&cell) {
                break;
            }
            kept.insert(cell);
        }
        self.cells = kept;
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page.max(1);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = match limit {
            0 => DEFAULT_LIMIT,
            n => n.min(MAX_LIMIT),
        };
        self
    }

    /// Stable serialization of the whole spec. Sets serialize in sorted
    /// order, so equal filters produce equal keys regardless of input order.
    pub fn cache_key(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Cache key of this filter with pagination stripped.
    pub fn base_key(&self) -> String {
        self.clone().with_page(1).cache_key()
    }
}

/// Trim, replace reserved characters with spaces, collapse whitespace runs,
/// and cap the length. Returns `None` when nothing searchable remains.
pub fn sanitize_search(raw: &str) -> Option<String> {
    let replaced: String = raw
        .chars()
        .map(|c| if RESERVED_SEARCH_CHARS.contains(&c) { ' ' } else { c })
        .collect();
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    let capped: String = collapsed.chars().take(MAX_SEARCH_CHARS).collect();
    let term = capped.trim_end();
    (!term.is_empty()).then(|| term.to_string())
}

fn parse_positive(raw: &str) -> Option<u32> {
    raw.trim().parse::<u32>().ok().filter(|n| *n > 0)
}

fn parse_categories(raw: &str) -> BTreeSet<EventCategory> {
    raw.split(',').filter_map(EventCategory::parse_token).collect()
}

fn is_truthy(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

// ---------------------------------------------------------------------------
// Composer
// ---------------------------------------------------------------------------

/// Builds `FilterSpec`s from raw input, interpreting dates in a fixed local
/// offset.
#[derive(Debug, Clone, Copy)]
pub struct FilterComposer {
    offset: FixedOffset,
}

impl Default for FilterComposer {
    fn default() -> Self {
        Self::from_utc_offset_hours(9)
    }
}

impl FilterComposer {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    /// Out-of-range offsets fall back to UTC.
    pub fn from_utc_offset_hours(hours: i32) -> Self {
        let offset = hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| Utc.fix());
        Self { offset }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn compose(&self, raw: &RawFilter, now: DateTime<Utc>) -> FilterSpec {
        let categories = raw
            .category
            .as_deref()
            .map(parse_categories)
            .unwrap_or_default();

        let mut date_start = raw
            .start_date
            .as_deref()
            .and_then(|s| parse_bound(s, self.offset, false));
        let mut date_end = raw
            .end_date
            .as_deref()
            .and_then(|s| parse_bound(s, self.offset, true));

        // The weekend window and explicit bounds both apply: keep the tighter
        // edge on each side.
        if raw.weekend.as_deref().is_some_and(is_truthy) {
            let weekend = weekend_range(now, self.offset);
            date_start = Some(date_start.map_or(weekend.start, |s| s.max(weekend.start)));
            date_end = Some(date_end.map_or(weekend.end, |e| e.min(weekend.end)));
        }

        let cells: Vec<&str> = raw
            .geohashes
            .as_deref()
            .map(|s| s.split(',').collect())
            .unwrap_or_default();

        FilterSpec::default()
            .with_categories(categories)
            .with_search(raw.search.as_deref())
            .with_district(raw.gu_seq.as_deref().and_then(parse_positive))
            .with_date_range(date_start, date_end)
            .with_cells(cells)
            .with_page(raw.page.as_deref().and_then(parse_positive).unwrap_or(1))
            .with_limit(
                raw.limit
                    .as_deref()
                    .and_then(parse_positive)
                    .unwrap_or(DEFAULT_LIMIT),
            )
    }
}
