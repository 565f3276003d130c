//! Mapping between display categories and the store's numeric category buckets.
//!
//! The bucket assignment has shifted between data releases (which sequences
//! count as PERFORMANCE versus OTHER, for instance). The table below is pinned
//! to one release and carries its version so a mismatch is visible in logs and
//! responses rather than silently reshuffling results.

use crate::types::EventCategory;

/// Version tag of [`BUCKET_TABLE`].
pub const BUCKET_TABLE_VERSION: &str = "2025-12";

/// Store `category_seq` values grouped by display category.
pub const BUCKET_TABLE: [(EventCategory, &[i32]); 4] = [
    (EventCategory::Festival, &[9, 10, 11, 12, 13]),
    (EventCategory::Exhibition, &[8]),
    (EventCategory::Performance, &[2, 3, 4, 5, 6, 14, 15]),
    (EventCategory::Other, &[1, 7, 16]),
];

/// Buckets belonging to a display category.
pub fn buckets_for(category: EventCategory) -> &'static [i32] {
    BUCKET_TABLE
        .iter()
        .find(|(c, _)| *c == category)
        .map(|(_, seqs)| *seqs)
        .unwrap_or(&[])
}

/// Every bucket in the table, sorted. A row whose bucket is missing or not
/// listed here is shown, and filtered, as OTHER.
pub fn known_buckets() -> Vec<i32> {
    let mut seqs: Vec<i32> = BUCKET_TABLE
        .iter()
        .flat_map(|(_, seqs)| seqs.iter().copied())
        .collect();
    seqs.sort_unstable();
    seqs
}

/// Display category for a store bucket. Unknown buckets fall into OTHER.
pub fn category_for_bucket(seq: i32) -> EventCategory {
    BUCKET_TABLE
        .iter()
        .find(|(_, seqs)| seqs.contains(&seq))
        .map(|(c, _)| *c)
        .unwrap_or(EventCategory::Other)
}
