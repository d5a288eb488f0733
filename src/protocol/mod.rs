//! Pipeline-facing protocol types for the MQTT-SN filter
//!
//! This module holds the record and addressing types exchanged with the host
//! pipeline, and the property keys used to tag records with MQTT-SN metadata.

pub mod messages;
pub mod properties;

pub use messages::*;
pub use properties::{Properties, PropertyKey};
