use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Geo Types ---

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

/// Gwanghwamun Square, the map's resting center when nothing better is known.
pub const DEFAULT_CENTER: GeoPoint = GeoPoint::new(37.5759, 126.9768);

// --- Enums ---

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventCategory {
    Festival,
    Exhibition,
    Performance,
    Other,
}

impl EventCategory {
    pub const ALL: [EventCategory; 4] = [
        EventCategory::Festival,
        EventCategory::Exhibition,
        EventCategory::Performance,
        EventCategory::Other,
    ];

    /// Parse a single filter token. Case-insensitive; surrounding whitespace ignored.
    pub fn parse_token(token: &str) -> Option<Self> {
        let token = token.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(token))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Festival => "FESTIVAL",
            EventCategory::Exhibition => "EXHIBITION",
            EventCategory::Performance => "PERFORMANCE",
            EventCategory::Other => "OTHER",
        }
    }
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// --- Event Types ---

/// Free-form descriptive fields carried along for display. The query core never
/// looks at these except `org_name`, which the search term also matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_free: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket_price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etc_description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: i64,
    pub title: String,
    pub category: EventCategory,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub location_name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district_id: Option<u32>,
    /// Stored geohash cell, usually longer than the cells used in queries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geohash: Option<String>,
    #[serde(flatten)]
    pub details: EventDetails,
}

impl Event {
    /// Both coordinates, if present and finite.
    pub fn coordinates(&self) -> Option<GeoPoint> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) if lat.is_finite() && lng.is_finite() => {
                Some(GeoPoint { lat, lng })
            }
            _ => None,
        }
    }
}

/// One page of repository results plus the total number of matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPage {
    pub events: Vec<Event>,
    pub total_count: u64,
}

/// Response body of `GET /api/events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsResponse {
    pub events: Vec<Event>,
    pub total_count: u64,
    pub page: u32,
    pub limit: u32,
}

impl EventsResponse {
    pub fn from_page(page: EventPage, page_no: u32, limit: u32) -> Self {
        Self {
            events: page.events,
            total_count: page.total_count,
            page: page_no,
            limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_tokens_are_case_insensitive() {
        assert_eq!(
            EventCategory::parse_token(" festival "),
            Some(EventCategory::Festival)
        );
        assert_eq!(
            EventCategory::parse_token("PERFORMANCE"),
            Some(EventCategory::Performance)
        );
        assert_eq!(EventCategory::parse_token("concert"), None);
        assert_eq!(EventCategory::parse_token(""), None);
    }

    #[test]
    fn category_serializes_upper_case() {
        let json = serde_json::to_string(&EventCategory::Exhibition).unwrap();
        assert_eq!(json, "\"EXHIBITION\"");
    }

    #[test]
    fn event_json_is_camel_case_and_flattens_details() {
        let event = Event {
            id: 7,
            title: "Lantern Festival".to_string(),
            category: EventCategory::Festival,
            start_date: "2026-11-01T00:00:00Z".parse().unwrap(),
            end_date: "2026-11-03T00:00:00Z".parse().unwrap(),
            location_name: "Cheonggyecheon".to_string(),
            latitude: Some(37.569),
            longitude: Some(126.978),
            district_id: Some(23),
            geohash: None,
            details: EventDetails {
                org_name: Some("Seoul Tourism".to_string()),
                is_free: Some(true),
                ..Default::default()
            },
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["startDate"], "2026-11-01T00:00:00Z");
        assert_eq!(value["locationName"], "Cheonggyecheon");
        assert_eq!(value["orgName"], "Seoul Tourism");
        assert_eq!(value["isFree"], true);
        assert!(value.get("geohash").is_none());
        assert!(value.get("details").is_none());

        let back: Event = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn coordinates_require_both_finite_values() {
        let mut event: Event = serde_json::from_value(serde_json::json!({
            "id": 1,
            "title": "t",
            "category": "OTHER",
            "startDate": "2026-01-01T00:00:00Z",
            "endDate": "2026-01-01T00:00:00Z",
            "locationName": "x",
            "latitude": 37.5,
            "longitude": null
        }))
        .unwrap();
        assert!(event.coordinates().is_none());

        event.longitude = Some(f64::NAN);
        assert!(event.coordinates().is_none());

        event.longitude = Some(127.0);
        assert_eq!(event.coordinates(), Some(GeoPoint::new(37.5, 127.0)));
    }
}
