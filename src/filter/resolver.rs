//! Resolution of the effective publish parameters for one outbound record
//!
//! Per-record overrides are read out of the record's properties into
//! [`PublishOverrides`] and merged with the session defaults by [`resolve`]:
//!
//! 1. override topic (non-empty), else override topic id (non-zero), else the
//!    session default target
//! 2. no target at all is a [`FilterError::BadParam`]
//! 3. override QoS, else the session default QoS
//! 4. override retained flag, else `false`

use crate::config::SessionConfig;
use crate::error::{FilterError, FilterResult};
use crate::protocol::properties::{self, Properties};
use crate::protocol::{Qos, TopicRef};

/// Publish parameters requested by an individual record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOverrides {
    pub topic: Option<String>,
    pub topic_id: Option<u16>,
    pub qos: Option<Qos>,
    pub retained: Option<bool>,
}

impl PublishOverrides {
    /// Read overrides from record properties, canonical key before alias
    ///
    /// Values of the wrong type are treated as absent; numeric values outside
    /// the protocol range are rejected. The topic id is only read when no
    /// non-empty topic is given.
    pub fn from_properties(props: &Properties) -> FilterResult<Self> {
        let topic = properties::TOPIC.get_str(props).map(str::to_string);
        let has_topic = topic.as_deref().is_some_and(|t| !t.is_empty());

        let topic_id = match properties::TOPIC_ID.get_u64(props) {
            Some(_) if has_topic => None,
            Some(id) => Some(u16::try_from(id).map_err(|_| {
                FilterError::bad_param(format!("topic id {id} does not fit in 16 bits"))
            })?),
            None => None,
        };

        let qos = match properties::QOS.get_i64(props) {
            Some(qos) => Some(
                Qos::try_from(qos).map_err(|e| FilterError::bad_param(e.to_string()))?,
            ),
            None => None,
        };

        Ok(Self {
            topic,
            topic_id,
            qos,
            retained: properties::RETAINED.get_bool(props),
        })
    }

    fn target(&self) -> Option<TopicRef> {
        if let Some(topic) = self.topic.as_deref().filter(|t| !t.is_empty()) {
            return Some(TopicRef::Name(topic.to_string()));
        }
        self.topic_id
            .filter(|id| *id != 0)
            .map(TopicRef::Id)
    }
}

/// Effective parameters of one publish
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPublish {
    pub target: TopicRef,
    pub qos: Qos,
    pub retain: bool,
}

impl ResolvedPublish {
    /// Record the effective values on the message so downstream observers see
    /// what was actually sent
    pub fn write_back(&self, props: &mut Properties) {
        match &self.target {
            TopicRef::Name(topic) => {
                properties::TOPIC.set(props, topic.as_str());
                properties::TOPIC_ID.remove(props);
            }
            TopicRef::Id(id) => {
                properties::TOPIC_ID.set(props, *id);
                properties::TOPIC.remove(props);
            }
        }
        properties::QOS.set(props, self.qos.as_u8());
        properties::RETAINED.set(props, self.retain);
    }
}

/// Merge record overrides with the session defaults
pub fn resolve(
    overrides: &PublishOverrides,
    config: &SessionConfig,
) -> FilterResult<ResolvedPublish> {
    let target = overrides
        .target()
        .or_else(|| config.default_target.clone())
        .ok_or_else(|| FilterError::bad_param("no topic or topic id to publish to"))?;

    Ok(ResolvedPublish {
        target,
        qos: overrides.qos.unwrap_or(config.default_qos),
        retain: overrides.retained.unwrap_or(false),
    })
}
