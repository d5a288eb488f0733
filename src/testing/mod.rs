//! Testing utilities and mock implementations
//!
//! This module provides mock implementations for testing the filter without a
//! real MQTT-SN engine or gateway.

pub mod mocks;

pub use mocks::*;
