//! Boundary to the embedded MQTT-SN protocol engine
//!
//! The engine is an external, single-threaded state machine that owns packet
//! framing, retransmission and return-code semantics. This module only describes
//! the contract the filter consumes:
//!
//! - [`Engine`] - the entry points the filter calls (connect, publish, tick, ...)
//! - [`EngineHost`] - the callbacks the engine invokes synchronously while one of
//!   those entry points runs (send bytes, arm/cancel the deferred call, deliver
//!   messages, report completions)
//!
//! Completions of asynchronous operations arrive through
//! [`EngineHost::complete`] from within a later engine call, typically while the
//! engine processes the gateway's acknowledgement bytes.

use crate::protocol::{Qos, TopicRef};
use bytes::Bytes;
use std::fmt;
use std::time::Duration;

/// Synchronous rejection of an engine request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineErrorCode {
    InternalError,
    NotInitialized,
    Busy,
    NotConnected,
    BadParam,
    InsufficientConfig,
    OutOfMemory,
    BufferOverflow,
    NotSupported,
    RetryLater,
    Disconnecting,
    NotSleeping,
    PreparationLocked,
}

impl EngineErrorCode {
    /// Resource exhaustion that makes further submissions pointless for now
    pub fn is_resource_exhaustion(self) -> bool {
        matches!(
            self,
            EngineErrorCode::OutOfMemory | EngineErrorCode::BufferOverflow
        )
    }
}

impl fmt::Display for EngineErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            EngineErrorCode::InternalError => "Internal Error",
            EngineErrorCode::NotInitialized => "Not Initialized",
            EngineErrorCode::Busy => "Busy",
            EngineErrorCode::NotConnected => "Not Connected",
            EngineErrorCode::BadParam => "Bad Parameter",
            EngineErrorCode::InsufficientConfig => "Insufficient Config",
            EngineErrorCode::OutOfMemory => "Out of Memory",
            EngineErrorCode::BufferOverflow => "Buffer Overflow",
            EngineErrorCode::NotSupported => "Feature is Not Supported",
            EngineErrorCode::RetryLater => "Retry later",
            EngineErrorCode::Disconnecting => "Disconnecting",
            EngineErrorCode::NotSleeping => "Not Sleeping",
            EngineErrorCode::PreparationLocked => "Preparation Locked",
        };
        f.write_str(text)
    }
}

/// Non-successful termination status of an asynchronous operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AsyncOpStatus {
    InternalError,
    Timeout,
    Aborted,
    OutOfMemory,
    BadParam,
    GatewayDisconnected,
}

impl fmt::Display for AsyncOpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AsyncOpStatus::InternalError => "Internal Error",
            AsyncOpStatus::Timeout => "Timeout",
            AsyncOpStatus::Aborted => "Aborted",
            AsyncOpStatus::OutOfMemory => "Out of Memory",
            AsyncOpStatus::BadParam => "Bad Parameter",
            AsyncOpStatus::GatewayDisconnected => "Gateway Disconnected",
        };
        f.write_str(text)
    }
}

/// Gateway return code carried by CONNACK / SUBACK / PUBACK
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnCode {
    Accepted,
    Congestion,
    InvalidTopicId,
    NotSupported,
}

impl ReturnCode {
    pub fn is_accepted(self) -> bool {
        self == ReturnCode::Accepted
    }
}

impl fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ReturnCode::Accepted => "Accepted",
            ReturnCode::Congestion => "Congestion",
            ReturnCode::InvalidTopicId => "Invalid Topic ID",
            ReturnCode::NotSupported => "Not Supported",
        };
        f.write_str(text)
    }
}

/// Why the engine considers the gateway gone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayDisconnectReason {
    DisconnectMsg,
    NoGatewayResponse,
}

impl fmt::Display for GatewayDisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayDisconnectReason::DisconnectMsg => f.write_str("DISCONNECT Message"),
            GatewayDisconnectReason::NoGatewayResponse => f.write_str("No Response"),
        }
    }
}

/// Origin tag passed along with inbound bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataOrigin {
    /// Bytes came from the gateway the client is connected to
    ConnectedGateway,
    /// Bytes came from somewhere else (e.g. a broadcast)
    Any,
}

/// Engine-issued identifier of an outstanding subscribe or publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpHandle(pub u32);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// `None` lets the engine / gateway assign an identity
    pub client_id: Option<String>,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    pub target: TopicRef,
    pub qos: Qos,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishRequest {
    pub target: TopicRef,
    pub payload: Bytes,
    pub qos: Qos,
    pub retain: bool,
}

/// Application message decoded by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: Qos,
    pub retained: bool,
}

/// Outcome of an asynchronous engine operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Connect {
        result: Result<ReturnCode, AsyncOpStatus>,
    },
    Disconnect {
        result: Result<(), AsyncOpStatus>,
    },
    Subscribe {
        handle: OpHandle,
        result: Result<ReturnCode, AsyncOpStatus>,
    },
    /// QoS 0 publishes complete without a gateway return code
    Publish {
        handle: OpHandle,
        result: Result<Option<ReturnCode>, AsyncOpStatus>,
    },
}

/// Callbacks the engine invokes synchronously from inside its entry points
pub trait EngineHost {
    /// Bytes to put on the wire; `broadcast_radius` is non-zero only for broadcasts
    fn send_bytes(&mut self, data: &[u8], broadcast_radius: u32);

    fn gateway_disconnected(&mut self, reason: GatewayDisconnectReason);

    fn message_delivered(&mut self, message: DeliveredMessage);

    /// Request a single deferred [`Engine::tick`] after `duration_ms`
    fn arm_deferred(&mut self, duration_ms: u32);

    /// Cancel the outstanding deferred call, returning the milliseconds elapsed
    /// since it was armed
    fn cancel_deferred(&mut self) -> u32;

    fn error_log(&mut self, message: &str);

    fn complete(&mut self, completion: Completion);
}

/// The MQTT-SN client engine as consumed by the filter
///
/// Every entry point is synchronous and may call back into `host` any number of
/// times before returning. The engine never holds on to `host` between calls.
pub trait Engine: Send {
    fn default_retry_period(&self) -> Duration;

    fn default_retry_count(&self) -> u32;

    fn set_retry_period(&mut self, period: Duration) -> Result<(), EngineErrorCode>;

    fn set_retry_count(&mut self, count: u32) -> Result<(), EngineErrorCode>;

    fn connect(
        &mut self,
        host: &mut dyn EngineHost,
        request: &ConnectRequest,
    ) -> Result<(), EngineErrorCode>;

    fn disconnect(&mut self, host: &mut dyn EngineHost) -> Result<(), EngineErrorCode>;

    fn subscribe(
        &mut self,
        host: &mut dyn EngineHost,
        request: &SubscribeRequest,
    ) -> Result<OpHandle, EngineErrorCode>;

    fn publish(
        &mut self,
        host: &mut dyn EngineHost,
        request: &PublishRequest,
    ) -> Result<OpHandle, EngineErrorCode>;

    fn process_inbound(&mut self, host: &mut dyn EngineHost, data: &[u8], origin: DataOrigin);

    /// Deferred call fired; `elapsed_ms` is the duration that was requested
    fn tick(&mut self, host: &mut dyn EngineHost, elapsed_ms: u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(EngineErrorCode::BadParam.to_string(), "Bad Parameter");
        assert_eq!(
            AsyncOpStatus::GatewayDisconnected.to_string(),
            "Gateway Disconnected"
        );
        assert_eq!(ReturnCode::InvalidTopicId.to_string(), "Invalid Topic ID");
        assert_eq!(
            GatewayDisconnectReason::NoGatewayResponse.to_string(),
            "No Response"
        );
    }

    #[test]
    fn test_resource_exhaustion_codes() {
        assert!(EngineErrorCode::OutOfMemory.is_resource_exhaustion());
        assert!(EngineErrorCode::BufferOverflow.is_resource_exhaustion());
        assert!(!EngineErrorCode::Busy.is_resource_exhaustion());
        assert!(!EngineErrorCode::NotConnected.is_resource_exhaustion());
    }

    #[test]
    fn test_return_code_acceptance() {
        assert!(ReturnCode::Accepted.is_accepted());
        assert!(!ReturnCode::Congestion.is_accepted());
    }
}
