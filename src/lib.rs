//! MQTT-SN client filter
//!
//! Adapts an embedded MQTT-SN client engine to a generic data pipeline: raw
//! datagrams come in from and go out to a transport, application messages
//! flow to and from the rest of the pipeline as property-tagged records.
//!
//! # Overview
//!
//! - [`filter::MqttsnFilter`] - session lifecycle, publish resolution and
//!   queueing, subscription reconciliation, inbound routing
//! - [`engine`] - the contract of the embedded engine the filter drives
//! - [`config`] - persisted settings and the runtime session model
//! - [`runtime`] - a tokio actor that owns a filter and feeds it events
//!
//! # Quick Start
//!
//! ```rust
//! use mqttsn_filter::filter::{FilterEvent, MqttsnFilter};
//! use mqttsn_filter::protocol::DataRecord;
//! use mqttsn_filter::testing::MockEngine;
//!
//! let engine = MockEngine::new();
//! engine.accept_connect_on(b"CONNACK");
//!
//! let mut filter = MqttsnFilter::new(engine);
//! filter.start().unwrap();
//! filter.socket_connection_report(true);
//! filter.recv_data(DataRecord::new(&b"CONNACK"[..]));
//!
//! assert!(filter.session().is_connected());
//! let events = filter.take_events();
//! assert!(matches!(events[0], FilterEvent::SendToTransport(_)));
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod filter;
pub mod observability;
pub mod protocol;
pub mod runtime;
pub mod testing;

pub use config::{ConfigError, FilterSettings, SessionConfig, SubscriptionSettings};
pub use engine::{Engine, EngineHost};
pub use error::{FilterError, FilterResult};
pub use filter::{FilterEvent, MqttsnFilter};
pub use protocol::*;
pub use runtime::{FilterHandle, FilterOutput, FilterRuntime, TokioClock};
