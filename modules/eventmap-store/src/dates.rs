//! Calendar helpers for date filters.
//!
//! Date-only bounds are interpreted in a fixed local offset (the city the
//! events belong to), then converted to UTC instants for comparison.

use chrono::{DateTime, Datelike, Days, FixedOffset, NaiveDate, NaiveTime, TimeDelta, Utc, Weekday};

/// Closed time window `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Local midnight at the start of `date`.
pub fn start_of_day(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let local = date.and_time(NaiveTime::MIN);
    (local - TimeDelta::seconds(offset.local_minus_utc().into())).and_utc()
}

/// Last millisecond of `date`, local time (23:59:59.999).
pub fn end_of_day(date: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    start_of_day(date + Days::new(1), offset) - TimeDelta::milliseconds(1)
}

/// Friday 00:00 to Sunday 23:59:59.999 local time.
///
/// On Friday, Saturday or Sunday this is the weekend in progress; Monday to
/// Thursday it is the upcoming one.
pub fn weekend_range(now: DateTime<Utc>, offset: FixedOffset) -> DateWindow {
    let today = now.with_timezone(&offset).date_naive();
    let friday = match today.weekday() {
        Weekday::Fri => today,
        Weekday::Sat => today - Days::new(1),
        Weekday::Sun => today - Days::new(2),
        weekday => today + Days::new(u64::from(4 - weekday.num_days_from_monday())),
    };
    DateWindow {
        start: start_of_day(friday, offset),
        end: end_of_day(friday + Days::new(2), offset),
    }
}

/// Parse a filter bound: `YYYY-MM-DD` (expanded to the start or end of that
/// local day) or an RFC 3339 instant. Anything else is `None`.
pub fn parse_bound(raw: &str, offset: FixedOffset, end_of_range: bool) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(if end_of_range {
            end_of_day(date, offset)
        } else {
            start_of_day(date, offset)
        });
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
