//! Error types for the MQTT-SN filter
//!
//! Every error the filter surfaces is descriptive and non-fatal: it names the
//! operation that failed together with the engine's status or the gateway's
//! return code, and the filter stays usable afterwards.

use crate::engine::{AsyncOpStatus, EngineErrorCode, GatewayDisconnectReason, ReturnCode};
use std::fmt;
use thiserror::Error;

/// Engine operation an error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Connect,
    Disconnect,
    Subscribe,
    Publish,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Operation::Connect => "connect",
            Operation::Disconnect => "disconnect",
            Operation::Subscribe => "subscribe",
            Operation::Publish => "publish",
        };
        f.write_str(text)
    }
}

/// Main error type for filter operations
#[derive(Debug, Error)]
pub enum FilterError {
    /// Engine refused a configuration value before start
    #[error("Configuration rejected: {message}")]
    Config { message: String },

    /// Engine refused to issue a request
    #[error("Failed to send MQTT-SN {operation}{context} with error: {code}")]
    Send {
        operation: Operation,
        context: String,
        code: EngineErrorCode,
    },

    /// Completion reported a failure status or a rejecting return code
    #[error("{message}")]
    AsyncFailure {
        operation: Option<Operation>,
        message: String,
    },

    #[error("Cannot send MQTT-SN data when socket is not connected")]
    TransportUnavailable,

    /// Publish submitted while the filter is not started
    #[error("Cannot send MQTT-SN data when the filter is stopped")]
    Stopped,

    #[error("Bad parameter: {message}")]
    BadParam { message: String },

    #[error("Settings error: {0}")]
    Settings(#[from] crate::config::ConfigError),

    /// The runtime task driving the filter is gone
    #[error("Filter runtime is not running")]
    RuntimeClosed,
}

impl FilterError {
    /// Create configuration rejection error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create send error for a request the engine refused
    pub fn send(operation: Operation, code: EngineErrorCode) -> Self {
        Self::Send {
            operation,
            context: String::new(),
            code,
        }
    }

    /// Create send error naming the topic involved
    pub fn send_for_topic(operation: Operation, topic: &str, code: EngineErrorCode) -> Self {
        Self::Send {
            operation,
            context: format!(" for topic {topic}"),
            code,
        }
    }

    /// Create error for an operation that completed with a failure status
    pub fn async_status(operation: Operation, status: AsyncOpStatus) -> Self {
        let message = match operation {
            Operation::Connect => {
                format!("Failed to connect to MQTT-SN gateway with status: {status}")
            }
            Operation::Disconnect => {
                format!("Failed to disconnect from MQTT-SN gateway with status: {status}")
            }
            Operation::Subscribe => {
                format!("Failed to subscribe to MQTT-SN topic with status: {status}")
            }
            Operation::Publish => {
                format!("Failed to publish to MQTT-SN gateway with status: {status}")
            }
        };
        Self::AsyncFailure {
            operation: Some(operation),
            message,
        }
    }

    /// Create error for an operation the gateway rejected
    pub fn async_rejected(operation: Operation, code: ReturnCode) -> Self {
        let message = match operation {
            Operation::Connect => {
                format!("MQTT-SN gateway rejected connection with return code: {code}")
            }
            Operation::Subscribe => {
                format!("MQTT-SN gateway rejected subscribe with return code: {code}")
            }
            Operation::Publish | Operation::Disconnect => {
                format!("MQTT-SN gateway rejected {operation} with return code: {code}")
            }
        };
        Self::AsyncFailure {
            operation: Some(operation),
            message,
        }
    }

    /// Create error for a gateway-initiated or detected disconnection
    pub fn gateway_disconnected(reason: GatewayDisconnectReason) -> Self {
        Self::AsyncFailure {
            operation: None,
            message: format!("MQTT-SN gateway is disconnected with reason: {reason}"),
        }
    }

    /// Create bad parameter error
    pub fn bad_param<S: Into<String>>(message: S) -> Self {
        Self::BadParam {
            message: message.into(),
        }
    }
}

/// Result type for filter operations
pub type FilterResult<T> = Result<T, FilterError>;
