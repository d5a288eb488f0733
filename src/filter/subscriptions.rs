//! Subscription list and reconciliation of configuration edits
//!
//! Entries are keyed by a stable [`SubscriptionId`] handed out on insertion, so an
//! editor holding an id keeps pointing at the same entry while others are removed.
//! Insertion order is preserved and the topic string is the unique key.

use crate::protocol::properties::{self, sub_fields, Properties};
use crate::protocol::Qos;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Max QoS given to entries created without one
pub const DEFAULT_SUB_QOS: Qos = Qos::ExactlyOnce;

/// Stable identifier of one subscription entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEntry {
    pub topic: String,
    /// Pre-defined topic id, used when `topic` is empty; 0 means none
    pub topic_id: u16,
    pub max_qos: Qos,
}

impl SubscriptionEntry {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            topic_id: 0,
            max_qos: DEFAULT_SUB_QOS,
        }
    }

    pub fn with_max_qos(mut self, max_qos: Qos) -> Self {
        self.max_qos = max_qos;
        self
    }

    pub fn with_topic_id(mut self, topic_id: u16) -> Self {
        self.topic_id = topic_id;
        self
    }
}

/// Ordered, topic-unique subscription list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriptionSet {
    // ids are allocated monotonically, so key order is insertion order
    entries: BTreeMap<SubscriptionId, SubscriptionEntry>,
    next_id: u64,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (SubscriptionId, &SubscriptionEntry)> {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }

    pub fn entries(&self) -> impl Iterator<Item = &SubscriptionEntry> {
        self.entries.values()
    }

    pub fn get(&self, id: SubscriptionId) -> Option<&SubscriptionEntry> {
        self.entries.get(&id)
    }

    /// Change the max QoS of an entry; false if `id` is unknown
    pub fn set_max_qos(&mut self, id: SubscriptionId, max_qos: Qos) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.max_qos = max_qos;
                true
            }
            None => false,
        }
    }

    /// Change the topic id of an entry; false if `id` is unknown
    pub fn set_topic_id(&mut self, id: SubscriptionId, topic_id: u16) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.topic_id = topic_id;
                true
            }
            None => false,
        }
    }

    pub fn find(&self, topic: &str) -> Option<SubscriptionId> {
        self.entries
            .iter()
            .find(|(_, entry)| entry.topic == topic)
            .map(|(id, _)| *id)
    }

    /// Insert a new entry, or replace the one already holding the same topic
    pub fn upsert(&mut self, entry: SubscriptionEntry) -> SubscriptionId {
        if let Some(id) = self.find(&entry.topic) {
            self.entries.insert(id, entry);
            return id;
        }

        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.entries.insert(id, entry);
        id
    }

    pub fn remove(&mut self, id: SubscriptionId) -> Option<SubscriptionEntry> {
        self.entries.remove(&id)
    }

    pub fn remove_topic(&mut self, topic: &str) -> Option<SubscriptionEntry> {
        let id = self.find(topic)?;
        self.remove(id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Apply an edit batch: removals, then clear-all, then additions
    pub fn reconcile(&mut self, edits: &SubscriptionEdits) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();

        for topic in &edits.remove {
            if self.remove_topic(topic).is_some() {
                debug!(topic = %topic, "Subscription removed");
                outcome.changed = true;
                outcome.session_dirty = true;
            }
        }

        if edits.clear && !self.is_empty() {
            debug!(count = self.len(), "All subscriptions cleared");
            self.clear();
            outcome.changed = true;
            outcome.session_dirty = true;
        }

        if let Some(additions) = &edits.add {
            for update in additions {
                match self.find(&update.topic) {
                    Some(id) => {
                        if let Some(max_qos) = update.max_qos {
                            self.set_max_qos(id, max_qos);
                        }
                        if let Some(topic_id) = update.topic_id {
                            self.set_topic_id(id, topic_id);
                        }
                    }
                    None => {
                        let mut entry = SubscriptionEntry::new(update.topic.clone());
                        if let Some(max_qos) = update.max_qos {
                            entry.max_qos = max_qos;
                        }
                        if let Some(topic_id) = update.topic_id {
                            entry.topic_id = topic_id;
                        }
                        debug!(topic = %entry.topic, qos = %entry.max_qos, "Subscription added");
                        self.upsert(entry);
                    }
                }
            }

            // An addition batch always invalidates a resumable session, even one
            // that only moves the max QoS of an existing topic.
            outcome.changed = true;
            outcome.session_dirty = true;
        }

        outcome
    }
}

/// Requested change to one subscription entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionUpdate {
    pub topic: String,
    pub topic_id: Option<u16>,
    pub max_qos: Option<Qos>,
}

impl SubscriptionUpdate {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            topic_id: None,
            max_qos: None,
        }
    }

    pub fn with_max_qos(mut self, max_qos: Qos) -> Self {
        self.max_qos = Some(max_qos);
        self
    }
}

/// One batch of subscription edits
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionEdits {
    pub remove: Vec<String>,
    pub clear: bool,
    /// `Some` when the batch carried an addition list, even an empty one
    pub add: Option<Vec<SubscriptionUpdate>>,
}

impl SubscriptionEdits {
    pub fn is_empty(&self) -> bool {
        self.remove.is_empty() && !self.clear && self.add.is_none()
    }

    /// Extract subscription edits from an inter-plugin configuration map
    ///
    /// Malformed list elements are skipped; both the alias and the canonical key
    /// contribute when present.
    pub fn from_properties(props: &Properties) -> Self {
        let mut edits = SubscriptionEdits::default();

        for value in properties::SUBSCRIBES_REMOVE.occurrences(props) {
            let Some(list) = value.as_array() else {
                continue;
            };
            edits
                .remove
                .extend(list.iter().filter_map(entry_topic).map(str::to_string));
        }

        edits.clear = properties::SUBSCRIBES_CLEAR
            .occurrences(props)
            .any(|value| value.as_bool() == Some(true));

        for value in properties::SUBSCRIBES.occurrences(props) {
            let Some(list) = value.as_array() else {
                continue;
            };
            let additions = edits.add.get_or_insert_with(Vec::new);
            additions.extend(list.iter().filter_map(parse_update));
        }

        edits
    }
}

fn entry_topic(value: &Value) -> Option<&str> {
    value.as_object()?.get(sub_fields::TOPIC)?.as_str()
}

fn parse_update(value: &Value) -> Option<SubscriptionUpdate> {
    let map = value.as_object()?;
    let topic = map.get(sub_fields::TOPIC)?.as_str()?;
    let mut update = SubscriptionUpdate::new(topic);

    if let Some(qos) = map.get(sub_fields::QOS).and_then(Value::as_i64) {
        match Qos::try_from(qos) {
            Ok(qos) => update.max_qos = Some(qos),
            Err(e) => warn!(topic = %topic, "Ignoring subscription QoS: {}", e),
        }
    }

    if let Some(topic_id) = map.get(sub_fields::TOPIC_ID).and_then(Value::as_u64) {
        match u16::try_from(topic_id) {
            Ok(topic_id) => update.topic_id = Some(topic_id),
            Err(_) => warn!(topic = %topic, topic_id, "Ignoring out of range topic id"),
        }
    }

    Some(update)
}

/// What a reconciliation did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// The list was edited
    pub changed: bool,
    /// The gateway's view of our subscriptions can no longer be trusted
    pub session_dirty: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn set_of(topics: &[&str]) -> SubscriptionSet {
        let mut set = SubscriptionSet::new();
        for topic in topics {
            set.upsert(SubscriptionEntry::new(*topic));
        }
        set
    }

    fn topics(set: &SubscriptionSet) -> Vec<&str> {
        set.entries().map(|e| e.topic.as_str()).collect()
    }

    #[test]
    fn test_insertion_order_preserved() {
        let set = set_of(&["c", "a", "b"]);
        assert_eq!(topics(&set), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_upsert_keeps_topic_unique() {
        let mut set = set_of(&["a", "b"]);
        let id = set.upsert(SubscriptionEntry::new("a").with_max_qos(Qos::AtMostOnce));
        assert_eq!(set.len(), 2);
        assert_eq!(set.find("a"), Some(id));
        assert_eq!(set.get(id).unwrap().max_qos, Qos::AtMostOnce);
        assert_eq!(topics(&set), vec!["a", "b"]);
    }

    #[test]
    fn test_ids_stable_across_removal() {
        let mut set = SubscriptionSet::new();
        let first = set.upsert(SubscriptionEntry::new("first"));
        let middle = set.upsert(SubscriptionEntry::new("middle"));
        let last = set.upsert(SubscriptionEntry::new("last"));

        set.remove(middle);

        assert_eq!(set.get(first).unwrap().topic, "first");
        assert_eq!(set.get(last).unwrap().topic, "last");
        assert!(set.get(middle).is_none());

        // a fresh entry never reuses the removed id
        let again = set.upsert(SubscriptionEntry::new("middle"));
        assert_ne!(again, middle);
        assert_eq!(topics(&set), vec!["first", "last", "middle"]);
    }

    #[test]
    fn test_setters_leave_topic_untouched() {
        let mut set = SubscriptionSet::new();
        let id = set.upsert(SubscriptionEntry::new("sensors/+"));

        assert!(set.set_max_qos(id, Qos::AtMostOnce));
        assert!(set.set_topic_id(id, 12));

        let entry = set.get(id).unwrap();
        assert_eq!(entry.topic, "sensors/+");
        assert_eq!(entry.max_qos, Qos::AtMostOnce);
        assert_eq!(entry.topic_id, 12);
        assert_eq!(set.find("sensors/+"), Some(id));

        set.remove(id);
        assert!(!set.set_max_qos(id, Qos::ExactlyOnce));
        assert!(!set.set_topic_id(id, 3));
    }

    #[test]
    fn test_remove_marks_dirty() {
        let mut set = set_of(&["a", "b"]);
        let edits = SubscriptionEdits {
            remove: vec!["a".to_string()],
            ..Default::default()
        };

        let outcome = set.reconcile(&edits);
        assert!(outcome.changed);
        assert!(outcome.session_dirty);
        assert_eq!(topics(&set), vec!["b"]);
    }

    #[test]
    fn test_remove_unknown_topic_is_noop() {
        let mut set = set_of(&["a"]);
        let edits = SubscriptionEdits {
            remove: vec!["zzz".to_string()],
            ..Default::default()
        };

        assert_eq!(set.reconcile(&edits), ReconcileOutcome::default());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_clear_on_empty_set_is_noop() {
        let mut set = SubscriptionSet::new();
        let edits = SubscriptionEdits {
            clear: true,
            ..Default::default()
        };

        assert_eq!(set.reconcile(&edits), ReconcileOutcome::default());
    }

    #[test]
    fn test_clear_then_add_in_one_batch() {
        let mut set = set_of(&["old/1", "old/2"]);
        let edits = SubscriptionEdits {
            remove: vec![],
            clear: true,
            add: Some(vec![SubscriptionUpdate::new("new/1").with_max_qos(Qos::AtLeastOnce)]),
        };

        let outcome = set.reconcile(&edits);
        assert!(outcome.session_dirty);
        assert_eq!(topics(&set), vec!["new/1"]);
        assert_eq!(set.entries().next().unwrap().max_qos, Qos::AtLeastOnce);
    }

    #[test]
    fn test_add_existing_updates_qos_in_place() {
        let mut set = set_of(&["a", "b"]);
        let edits = SubscriptionEdits {
            add: Some(vec![SubscriptionUpdate::new("a").with_max_qos(Qos::AtMostOnce)]),
            ..Default::default()
        };

        let outcome = set.reconcile(&edits);
        assert!(outcome.session_dirty);
        assert_eq!(topics(&set), vec!["a", "b"]);
        let id = set.find("a").unwrap();
        assert_eq!(set.get(id).unwrap().max_qos, Qos::AtMostOnce);
    }

    #[test]
    fn test_new_entry_gets_default_qos() {
        let mut set = SubscriptionSet::new();
        let edits = SubscriptionEdits {
            add: Some(vec![SubscriptionUpdate::new("x")]),
            ..Default::default()
        };
        set.reconcile(&edits);
        assert_eq!(set.entries().next().unwrap().max_qos, DEFAULT_SUB_QOS);
    }

    #[test]
    fn test_edits_from_properties() {
        let props = json!({
            "mqttsn.subscribes_remove": [{"topic": "gone"}, 42, {"qos": 1}],
            "mqtt.subscribes_clear": true,
            "mqtt.subscribes": [{"topic": "a", "qos": 1}],
            "mqttsn.subscribes": [{"topic": "b", "topic_id": 5}, {"no_topic": true}, {"topic": "c", "qos": 9}]
        });
        let edits = SubscriptionEdits::from_properties(props.as_object().unwrap());

        assert_eq!(edits.remove, vec!["gone".to_string()]);
        assert!(edits.clear);

        let add = edits.add.unwrap();
        assert_eq!(add.len(), 3);
        assert_eq!(add[0].topic, "a");
        assert_eq!(add[0].max_qos, Some(Qos::AtLeastOnce));
        assert_eq!(add[1].topic_id, Some(5));
        assert_eq!(add[2].topic, "c");
        assert_eq!(add[2].max_qos, None);
    }

    #[test]
    fn test_edits_from_unrelated_properties_are_empty() {
        let props = json!({"mqttsn.client": "abc", "mqttsn.subscribes_clear": false});
        let edits = SubscriptionEdits::from_properties(props.as_object().unwrap());
        assert!(edits.is_empty());
    }
}
