//! Message-level types shared by the filter, the engine boundary and the pipeline
//!
//! These are the small value types that cross every seam of the crate: QoS levels,
//! the two MQTT-SN addressing forms, and the timestamped data record the host
//! pipeline exchanges with the filter.

use super::properties::Properties;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// MQTT-SN quality of service level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Qos {
    /// QoS 0 - fire and forget
    AtMostOnce = 0,
    /// QoS 1 - acknowledged delivery
    AtLeastOnce = 1,
    /// QoS 2 - assured single delivery
    ExactlyOnce = 2,
}

/// Rejected QoS value outside of `0..=2`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid QoS value: {0}")]
pub struct InvalidQos(pub i64);

impl Qos {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<i64> for Qos {
    type Error = InvalidQos;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            2 => Ok(Qos::ExactlyOnce),
            other => Err(InvalidQos(other)),
        }
    }
}

impl TryFrom<u8> for Qos {
    type Error = InvalidQos;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Qos::try_from(i64::from(value))
    }
}

impl From<Qos> for u8 {
    fn from(qos: Qos) -> Self {
        qos.as_u8()
    }
}

impl fmt::Display for Qos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Addressing form of a published or subscribed resource.
///
/// MQTT-SN never sends both on the wire: a message is addressed either by its
/// topic string or by a pre-registered / pre-defined numeric topic id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicRef {
    Name(String),
    Id(u16),
}

impl TopicRef {
    pub fn name(&self) -> Option<&str> {
        match self {
            TopicRef::Name(name) => Some(name),
            TopicRef::Id(_) => None,
        }
    }

    pub fn id(&self) -> Option<u16> {
        match self {
            TopicRef::Name(_) => None,
            TopicRef::Id(id) => Some(*id),
        }
    }
}

impl fmt::Display for TopicRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopicRef::Name(name) => f.write_str(name),
            TopicRef::Id(id) => write!(f, "#{id}"),
        }
    }
}

/// One unit of data flowing through the host pipeline
///
/// Carries a raw payload plus free-form metadata properties. Records produced by
/// the filter are stamped with the time they were created.
#[derive(Debug, Clone, PartialEq)]
pub struct DataRecord {
    pub payload: Bytes,
    pub properties: Properties,
    pub timestamp: DateTime<Utc>,
}

impl DataRecord {
    /// Create a timestamped record with no properties
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self::with_properties(payload, Properties::new())
    }

    /// Create a timestamped record carrying the given properties
    pub fn with_properties(payload: impl Into<Bytes>, properties: Properties) -> Self {
        Self {
            payload: payload.into(),
            properties,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_conversion() {
        assert_eq!(Qos::try_from(0i64), Ok(Qos::AtMostOnce));
        assert_eq!(Qos::try_from(2u8), Ok(Qos::ExactlyOnce));
        assert_eq!(Qos::try_from(3u8), Err(InvalidQos(3)));
        assert_eq!(Qos::try_from(-1i64), Err(InvalidQos(-1)));
        assert_eq!(u8::from(Qos::AtLeastOnce), 1);
    }

    #[test]
    fn test_qos_serde_as_integer() {
        let json = serde_json::to_string(&Qos::ExactlyOnce).unwrap();
        assert_eq!(json, "2");

        let parsed: Result<Qos, _> = serde_json::from_str("7");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_topic_ref_accessors() {
        let by_name = TopicRef::Name("a/b".to_string());
        let by_id = TopicRef::Id(7);

        assert_eq!(by_name.name(), Some("a/b"));
        assert_eq!(by_name.id(), None);
        assert_eq!(by_id.id(), Some(7));
        assert_eq!(by_id.to_string(), "#7");
    }

    #[test]
    fn test_record_creation() {
        let record = DataRecord::new(&b"hello"[..]);
        assert_eq!(record.payload.as_ref(), b"hello");
        assert!(record.properties.is_empty());
    }
}
