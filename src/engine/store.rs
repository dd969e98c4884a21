use std::collections::{BTreeMap, HashMap};

use dashmap::DashMap;
use serde_json::{Map, Value};
use ulid::Ulid;

use crate::model::Event;
use crate::resource::ResourceKind;

/// One generic record: an opaque JSON object plus its server-assigned id.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: Ulid,
    pub kind: ResourceKind,
    pub body: Map<String, Value>,
}

impl Record {
    /// JSON form served to clients, with `id` injected.
    pub fn to_json(&self) -> Value {
        let mut body = self.body.clone();
        body.insert("id".into(), Value::String(self.id.to_string()));
        Value::Object(body)
    }

    /// Top-level field rendered as a string, for equality filters and parent links.
    pub fn field_str(&self, field: &str) -> Option<String> {
        if field == "id" {
            return Some(self.id.to_string());
        }
        field_str(&self.body, field)
    }

    pub fn matches(&self, filter: &BTreeMap<String, String>) -> bool {
        filter
            .iter()
            .all(|(field, want)| self.field_str(field).as_deref() == Some(want.as_str()))
    }
}

fn field_str(body: &Map<String, Value>, field: &str) -> Option<String> {
    match body.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Equality filter over a JSON object's scalar fields. Nested values and
/// missing fields never match.
pub fn fields_match(body: &Map<String, Value>, filter: &BTreeMap<String, String>) -> bool {
    filter
        .iter()
        .all(|(field, want)| field_str(body, field).as_deref() == Some(want.as_str()))
}

/// In-memory home of every generic record, keyed by kind. Ids are ULIDs, so
/// the per-kind `BTreeMap` keeps records in creation order.
pub struct RecordStore {
    records: DashMap<ResourceKind, BTreeMap<Ulid, Map<String, Value>>>,
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
        }
    }

    pub fn count(&self, kind: ResourceKind) -> usize {
        self.records.get(&kind).map_or(0, |m| m.len())
    }

    pub fn contains(&self, kind: ResourceKind, id: &Ulid) -> bool {
        self.records.get(&kind).is_some_and(|m| m.contains_key(id))
    }

    pub fn get(&self, kind: ResourceKind, id: &Ulid) -> Option<Record> {
        let map = self.records.get(&kind)?;
        map.get(id).map(|body| Record {
            id: *id,
            kind,
            body: body.clone(),
        })
    }

    pub fn list(&self, kind: ResourceKind) -> Vec<Record> {
        self.records
            .get(&kind)
            .map(|m| {
                m.iter()
                    .map(|(id, body)| Record {
                        id: *id,
                        kind,
                        body: body.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn put(&self, kind: ResourceKind, id: Ulid, body: Map<String, Value>) {
        self.records.entry(kind).or_default().insert(id, body);
    }

    pub fn remove(&self, kind: ResourceKind, id: &Ulid) -> Option<Record> {
        let mut map = self.records.get_mut(&kind)?;
        map.remove(id).map(|body| Record {
            id: *id,
            kind,
            body,
        })
    }

    /// Every record, transitively, that names `(kind, id)` as its parent.
    /// Deepest descendants come first so they can be deleted in order.
    pub fn descendants(&self, kind: ResourceKind, id: &Ulid) -> Vec<(ResourceKind, Ulid)> {
        let mut out = Vec::new();
        let parent_id = id.to_string();
        for child in kind.children() {
            let Some(link) = child.parent else { continue };
            let matching: Vec<Ulid> = self
                .list(child.kind)
                .into_iter()
                .filter(|r| r.field_str(link.field).as_deref() == Some(parent_id.as_str()))
                .map(|r| r.id)
                .collect();
            for child_id in matching {
                out.extend(self.descendants(child.kind, &child_id));
                out.push((child.kind, child_id));
            }
        }
        out
    }

    /// Record counts per kind, for startup logging.
    pub fn counts(&self) -> HashMap<ResourceKind, usize> {
        self.records.iter().map(|e| (*e.key(), e.value().len())).collect()
    }

    /// Apply a record event. Reservation events are ignored here.
    pub fn apply_event(&self, event: &Event) {
        match event {
            Event::RecordPut { kind, id, body } => match serde_json::from_str::<Value>(body) {
                Ok(Value::Object(map)) => self.put(*kind, *id, map),
                _ => tracing::warn!("skipping unreadable record body for {kind}/{id}"),
            },
            Event::RecordDeleted { kind, id } => {
                self.remove(*kind, id);
            }
            Event::ReservationCreated { .. }
            | Event::ReservationUpdated { .. }
            | Event::ReservationCancelled { .. } => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn put_get_remove() {
        let store = RecordStore::new();
        let id = Ulid::new();
        store.put(ResourceKind::Contact, id, object(json!({"name": "Isännöitsijä"})));

        let rec = store.get(ResourceKind::Contact, &id).unwrap();
        assert_eq!(rec.to_json()["id"], json!(id.to_string()));
        assert_eq!(store.count(ResourceKind::Contact), 1);
        assert!(store.get(ResourceKind::User, &id).is_none());

        assert!(store.remove(ResourceKind::Contact, &id).is_some());
        assert!(!store.contains(ResourceKind::Contact, &id));
    }

    #[test]
    fn filter_matches_strings_numbers_and_bools() {
        let rec = Record {
            id: Ulid::new(),
            kind: ResourceKind::Apartment,
            body: object(json!({"staircase": "A", "floor": 3, "sauna": true})),
        };
        let f = |pairs: &[(&str, &str)]| -> BTreeMap<String, String> {
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
        };
        assert!(rec.matches(&f(&[])));
        assert!(rec.matches(&f(&[("staircase", "A"), ("floor", "3"), ("sauna", "true")])));
        assert!(!rec.matches(&f(&[("staircase", "B")])));
        assert!(!rec.matches(&f(&[("missing", "x")])));
    }

    #[test]
    fn descendants_follow_parent_links() {
        let store = RecordStore::new();
        let meeting = Ulid::new();
        let other_meeting = Ulid::new();
        store.put(ResourceKind::Meeting, meeting, object(json!({"title": "Yhtiökokous"})));
        store.put(ResourceKind::Meeting, other_meeting, object(json!({"title": "Hallitus"})));

        let doc = Ulid::new();
        store.put(
            ResourceKind::MeetingDocument,
            doc,
            object(json!({"meeting_id": meeting.to_string(), "name": "Pöytäkirja"})),
        );
        store.put(
            ResourceKind::MeetingDocument,
            Ulid::new(),
            object(json!({"meeting_id": other_meeting.to_string()})),
        );

        assert_eq!(
            store.descendants(ResourceKind::Meeting, &meeting),
            vec![(ResourceKind::MeetingDocument, doc)]
        );
        assert!(store.descendants(ResourceKind::Contact, &meeting).is_empty());
    }

    #[test]
    fn apply_event_round_trips_json_text() {
        let store = RecordStore::new();
        let id = Ulid::new();
        store.apply_event(&Event::RecordPut {
            kind: ResourceKind::Announcement,
            id,
            body: r#"{"title":"Vesikatko torstaina"}"#.into(),
        });
        assert_eq!(
            store.get(ResourceKind::Announcement, &id).unwrap().body["title"],
            json!("Vesikatko torstaina")
        );
        store.apply_event(&Event::RecordDeleted {
            kind: ResourceKind::Announcement,
            id,
        });
        assert_eq!(store.count(ResourceKind::Announcement), 0);
    }
}
