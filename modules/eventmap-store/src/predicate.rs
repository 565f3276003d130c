//! Filter semantics evaluated against a single event.
//!
//! `PgEventRepository` renders the same rules as SQL; the in-memory
//! repository calls these directly.

use eventmap_common::category::buckets_for;
use eventmap_common::Event;

use crate::filter::FilterSpec;

/// A stored cell and a query cell match when either is a prefix of the other.
///
/// Query cells (precision 5) are normally shorter than stored ones
/// (precision 9). The reverse direction covers events stored at a coarser
/// precision than the query. An empty stored cell matches nothing.
pub fn cell_matches(stored: &str, query: &str) -> bool {
    if stored.is_empty() || query.is_empty() {
        return false;
    }
    stored.starts_with(query) || query.starts_with(stored)
}

/// Case-insensitive substring match on title or organizer.
pub fn search_matches(event: &Event, term: &str) -> bool {
    let needle = term.to_lowercase();
    event.title.to_lowercase().contains(&needle)
        || event
            .details
            .org_name
            .as_deref()
            .is_some_and(|org| org.to_lowercase().contains(&needle))
}

/// Every restriction present in the filter must hold. Pagination is ignored.
pub fn matches(spec: &FilterSpec, event: &Event) -> bool {
    if !spec.categories().is_empty() && !spec.categories().contains(&event.category) {
        return false;
    }

    if let Some(term) = spec.search_term() {
        if !search_matches(event, term) {
            return false;
        }
    }

    if let Some(district) = spec.district_id() {
        if event.district_id != Some(district) {
            return false;
        }
    }

    // Overlap: the event ends on or after the window start and starts on or
    // before the window end.
    if let Some(start) = spec.date_start() {
        if event.end_date < start {
            return false;
        }
    }
    if let Some(end) = spec.date_end() {
        if event.start_date > end {
            return false;
        }
    }

    if !spec.cells().is_empty() {
        let Some(stored) = event.geohash.as_deref() else {
            return false;
        };
        if !spec.cells().iter().any(|query| cell_matches(stored, query)) {
            return false;
        }
    }

    true
}

/// Source bucket sequences for the filter's categories, flattened and sorted.
/// Empty when the filter does not restrict categories.
pub fn bucket_sequences(spec: &FilterSpec) -> Vec<i32> {
    let mut seqs: Vec<i32> = spec
        .categories()
        .iter()
        .flat_map(|c| buckets_for(*c).iter().copied())
        .collect();
    seqs.sort_unstable();
    seqs
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};
    use eventmap_common::{EventCategory, EventDetails};

    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn event(id: i64, category: EventCategory, geohash: Option<&str>) -> Event {
        Event {
            id,
            title: format!("Event {id}"),
            category,
            start_date: at("2026-10-10T00:00:00Z"),
            end_date: at("2026-10-20T00:00:00Z"),
            location_name: "Seoul".to_string(),
            latitude: None,
            longitude: None,
            district_id: Some(3),
            geohash: geohash.map(String::from),
            details: EventDetails::default(),
        }
    }

    #[test]
    fn prefix_match_works_both_ways() {
        assert!(cell_matches("wydm9xyzq", "wydm9"));
        assert!(cell_matches("wydm", "wydm9"));
        assert!(!cell_matches("wydmd1234", "wydm9"));
        assert!(!cell_matches("", "wydm9"));
    }

    #[test]
    fn empty_spec_matches_everything() {
        let spec = FilterSpec::default();
        assert!(matches(&spec, &event(1, EventCategory::Other, None)));
    }

    #[test]
    fn missing_cell_never_matches_spatial_filter() {
        let spec = FilterSpec::default().with_cells(["wydm9"]);
        assert!(!matches(&spec, &event(1, EventCategory::Other, None)));
        assert!(matches(&spec, &event(2, EventCategory::Other, Some("wydm9abcd"))));
    }

    #[test]
    fn category_district_and_dates_all_apply() {
        let e = event(1, EventCategory::Festival, Some("wydm9abcd"));

        let spec = FilterSpec::default().with_categories([EventCategory::Exhibition]);
        assert!(!matches(&spec, &e));

        let spec = FilterSpec::default().with_district(Some(4));
        assert!(!matches(&spec, &e));

        let spec = FilterSpec::default()
            .with_date_range(Some(at("2026-10-20T00:00:00Z")), Some(at("2026-10-25T00:00:00Z")));
        assert!(matches(&spec, &e), "touching end date overlaps");

        let spec = FilterSpec::default()
            .with_date_range(Some(at("2026-10-21T00:00:00Z")), None);
        assert!(!matches(&spec, &e));
    }

    #[test]
    fn search_checks_title_and_organizer() {
        let mut e = event(7, EventCategory::Performance, None);
        e.title = "Hangang Jazz Night".to_string();
        e.details.org_name = Some("Mapo Arts Center".to_string());

        let spec = FilterSpec::default().with_search(Some("jazz"));
        assert!(matches(&spec, &e));
        let spec = FilterSpec::default().with_search(Some("arts center"));
        assert!(matches(&spec, &e));
        let spec = FilterSpec::default().with_search(Some("opera"));
        assert!(!matches(&spec, &e));
    }

    #[test]
    fn bucket_sequences_flatten_categories() {
        let spec = FilterSpec::default()
            .with_categories([EventCategory::Exhibition, EventCategory::Other]);
        assert_eq!(bucket_sequences(&spec), vec![1, 7, 8, 16]);
        assert!(bucket_sequences(&FilterSpec::default()).is_empty());
    }
}
