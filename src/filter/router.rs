//! Attribution of engine output to pipeline records
//!
//! The engine reports decoded messages and outgoing bytes through callbacks,
//! with no idea which pipeline record triggered them. The routers here hold
//! the properties of the record currently being processed so that anything the
//! engine produces meanwhile can be stamped with them.

use crate::engine::DeliveredMessage;
use crate::protocol::properties::{self, Properties};
use crate::protocol::DataRecord;
use tracing::{trace, warn};

/// Turns engine-delivered messages into inbound pipeline records
#[derive(Debug, Default)]
pub struct InboundRouter {
    context: Option<Properties>,
    batch: Vec<DataRecord>,
}

impl InboundRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start processing one raw inbound record
    pub fn begin(&mut self, props: Properties) {
        self.context = Some(props);
    }

    pub fn in_delivery(&self) -> bool {
        self.context.is_some()
    }

    pub fn deliver(&mut self, message: DeliveredMessage) {
        let mut props = match &self.context {
            Some(props) => props.clone(),
            None => {
                warn!(
                    topic = %message.topic,
                    "Message delivered outside of an inbound record, no properties to carry"
                );
                Properties::new()
            }
        };

        properties::TOPIC.set(&mut props, message.topic.as_str());
        properties::QOS.set(&mut props, message.qos.as_u8());
        properties::RETAINED.set(&mut props, message.retained);

        self.batch.push(DataRecord::with_properties(message.payload, props));
    }

    /// End the current inbound record, returning every message decoded from it
    pub fn finish(&mut self) -> Vec<DataRecord> {
        self.context = None;
        std::mem::take(&mut self.batch)
    }

    /// Messages delivered while no inbound record was being processed
    pub fn take_stray(&mut self) -> Vec<DataRecord> {
        if self.context.is_some() {
            return Vec::new();
        }
        std::mem::take(&mut self.batch)
    }
}

/// Wraps outgoing engine bytes in transport records
#[derive(Debug, Default)]
pub struct OutboundRouter {
    context: Option<Properties>,
    attributed: Vec<DataRecord>,
}

impl OutboundRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start submitting one pipeline publish with its resolved properties
    pub fn begin(&mut self, props: Properties) {
        self.context = Some(props);
    }

    /// Route bytes from the engine
    ///
    /// Bytes emitted during a publish are kept for [`OutboundRouter::finish`];
    /// anything else is handed back as an unsolicited record.
    pub fn route(&mut self, data: &[u8]) -> Option<DataRecord> {
        let record = match &self.context {
            Some(props) => DataRecord::with_properties(data.to_vec(), props.clone()),
            None => {
                trace!(len = data.len(), "Unsolicited engine output");
                return Some(DataRecord::new(data.to_vec()));
            }
        };

        self.attributed.push(record);
        None
    }

    pub fn finish(&mut self) -> Vec<DataRecord> {
        self.context = None;
        std::mem::take(&mut self.attributed)
    }
}
