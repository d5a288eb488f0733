//! Property keys and typed accessors for pipeline record metadata
//!
//! Properties are a flat JSON object attached to every [`DataRecord`](super::DataRecord).
//! Each key the filter understands has a canonical `mqttsn.` name and, for sharing
//! records with plain MQTT plugins, an alias under the `mqtt.` prefix. When both
//! are present the canonical key wins.

use serde_json::{Map, Value};

/// Metadata map carried by a pipeline record
pub type Properties = Map<String, Value>;

/// A property name with its optional alias
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyKey {
    pub canonical: &'static str,
    pub alias: Option<&'static str>,
}

impl PropertyKey {
    pub const fn new(canonical: &'static str, alias: Option<&'static str>) -> Self {
        Self { canonical, alias }
    }

    /// Value under the canonical key, falling back to the alias
    pub fn lookup<'a>(&self, props: &'a Properties) -> Option<&'a Value> {
        props
            .get(self.canonical)
            .or_else(|| self.alias.and_then(|alias| props.get(alias)))
    }

    /// Every present value in application order: alias first, canonical last.
    ///
    /// Used where each occurrence is an edit to apply, so the canonical one
    /// lands on top.
    pub fn occurrences<'a>(&self, props: &'a Properties) -> impl Iterator<Item = &'a Value> {
        let alias = self.alias.and_then(|alias| props.get(alias));
        alias.into_iter().chain(props.get(self.canonical))
    }

    pub fn get_str<'a>(&self, props: &'a Properties) -> Option<&'a str> {
        self.lookup(props).and_then(Value::as_str)
    }

    pub fn get_u64(&self, props: &Properties) -> Option<u64> {
        self.lookup(props).and_then(Value::as_u64)
    }

    pub fn get_i64(&self, props: &Properties) -> Option<i64> {
        self.lookup(props).and_then(Value::as_i64)
    }

    pub fn get_bool(&self, props: &Properties) -> Option<bool> {
        self.lookup(props).and_then(Value::as_bool)
    }

    /// Write under the canonical key
    pub fn set(&self, props: &mut Properties, value: impl Into<Value>) {
        props.insert(self.canonical.to_string(), value.into());
    }

    pub fn remove(&self, props: &mut Properties) {
        props.remove(self.canonical);
    }
}

// Per-message keys
pub const TOPIC: PropertyKey = PropertyKey::new("mqttsn.topic", Some("mqtt.topic"));
pub const TOPIC_ID: PropertyKey = PropertyKey::new("mqttsn.topic_id", Some("mqtt.topic_id"));
pub const QOS: PropertyKey = PropertyKey::new("mqttsn.qos", Some("mqtt.qos"));
pub const RETAINED: PropertyKey = PropertyKey::new("mqttsn.retained", Some("mqtt.retained"));

// Inter-plugin configuration keys
pub const CLIENT: PropertyKey = PropertyKey::new("mqttsn.client", Some("mqtt.client"));
pub const PUB_TOPIC: PropertyKey = PropertyKey::new("mqttsn.pub_topic", Some("mqtt.pub_topic"));
pub const PUB_TOPIC_ID: PropertyKey = PropertyKey::new("mqttsn.pub_topic_id", None);
pub const PUB_QOS: PropertyKey = PropertyKey::new("mqttsn.pub_qos", Some("mqtt.pub_qos"));
pub const SUBSCRIBES: PropertyKey =
    PropertyKey::new("mqttsn.subscribes", Some("mqtt.subscribes"));
pub const SUBSCRIBES_REMOVE: PropertyKey =
    PropertyKey::new("mqttsn.subscribes_remove", Some("mqtt.subscribes_remove"));
pub const SUBSCRIBES_CLEAR: PropertyKey =
    PropertyKey::new("mqttsn.subscribes_clear", Some("mqtt.subscribes_clear"));

/// Field names inside one subscription edit entry
pub mod sub_fields {
    pub const TOPIC: &str = "topic";
    pub const TOPIC_ID: &str = "topic_id";
    pub const QOS: &str = "qos";
}
