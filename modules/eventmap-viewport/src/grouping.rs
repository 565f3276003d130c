//! Groups events that share a map position, and the selection model that
//! sits on top of the groups.

use std::collections::HashMap;
use std::fmt;

use eventmap_common::{Event, GeoPoint};

/// Exact coordinate pair, usable as a hash key.
///
/// Two events land in the same group only if both coordinates are bitwise
/// equal (after folding `-0.0` into `0.0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupKey {
    lat_bits: u64,
    lng_bits: u64,
}

impl GroupKey {
    pub fn new(point: GeoPoint) -> Self {
        Self {
            lat_bits: normalize(point.lat).to_bits(),
            lng_bits: normalize(point.lng).to_bits(),
        }
    }

    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(f64::from_bits(self.lat_bits), f64::from_bits(self.lng_bits))
    }
}

fn normalize(v: f64) -> f64 {
    if v == 0.0 {
        0.0
    } else {
        v
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.point();
        write!(f, "{},{}", p.lat, p.lng)
    }
}

/// Events sharing one exact position, in the order they were fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct EventGroup {
    pub key: GroupKey,
    pub position: GeoPoint,
    pub events: Vec<Event>,
}

impl EventGroup {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn event_ids(&self) -> Vec<i64> {
        self.events.iter().map(|e| e.id).collect()
    }
}

/// Partition events by exact position. Groups appear in first-seen order;
/// events without usable coordinates are left out.
pub fn group_events(events: &[Event]) -> Vec<EventGroup> {
    let mut index: HashMap<GroupKey, usize> = HashMap::new();
    let mut groups: Vec<EventGroup> = Vec::new();

    for event in events {
        let Some(position) = event.coordinates() else {
            continue;
        };
        let key = GroupKey::new(position);
        match index.get(&key) {
            Some(&i) => groups[i].events.push(event.clone()),
            None => {
                index.insert(key, groups.len());
                groups.push(EventGroup {
                    key,
                    position,
                    events: vec![event.clone()],
                });
            }
        }
    }

    groups
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// What the user has picked on the map. Single and group selection cannot
/// coexist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    None,
    /// Detail view for one event.
    Event(i64),
    /// List view for a multi-event marker.
    Group { key: GroupKey, event_ids: Vec<i64> },
}

impl Selection {
    /// A one-event group opens its detail directly; larger groups open the list.
    pub fn select_group(&mut self, group: &EventGroup) {
        *self = match group.events.as_slice() {
            [] => Selection::None,
            [only] => Selection::Event(only.id),
            many => Selection::Group {
                key: group.key,
                event_ids: many.iter().map(|e| e.id).collect(),
            },
        };
    }

    /// Pick one event, e.g. from a list. Replaces any group selection.
    pub fn select_event(&mut self, id: i64) {
        *self = Selection::Event(id);
    }

    pub fn clear(&mut self) {
        *self = Selection::None;
    }

    /// Close the detail view. A group selection is left alone.
    pub fn close_detail(&mut self) {
        if matches!(self, Selection::Event(_)) {
            *self = Selection::None;
        }
    }

    /// Close the list view. A single selection is left alone.
    pub fn close_list(&mut self) {
        if matches!(self, Selection::Group { .. }) {
            *self = Selection::None;
        }
    }

    pub fn event_id(&self) -> Option<i64> {
        match self {
            Selection::Event(id) => Some(*id),
            _ => None,
        }
    }

    pub fn group_key(&self) -> Option<GroupKey> {
        match self {
            Selection::Group { key, .. } => Some(*key),
            _ => None,
        }
    }

    pub fn is_group_selected(&self, key: GroupKey) -> bool {
        self.group_key() == Some(key)
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Selection::None)
    }
}

/// Resolve the selected event against the current page. The deep-linked
/// event stands in when the page does not contain it.
pub fn selected_event<'a>(
    events: &'a [Event],
    selection: &Selection,
    focused: Option<&'a Event>,
) -> Option<&'a Event> {
    let id = selection.event_id()?;
    events
        .iter()
        .find(|e| e.id == id)
        .or_else(|| focused.filter(|e| e.id == id))
}
