//! Configuration for the MQTT-SN filter
//!
//! Two layers live here:
//!
//! - [`FilterSettings`] - the flat, persisted key/value form, loaded from and saved
//!   to TOML
//! - [`SessionConfig`] - the validated runtime model the filter reads on every
//!   connect and publish

use crate::filter::subscriptions::{SubscriptionEntry, SubscriptionSet, DEFAULT_SUB_QOS};
use crate::protocol::{Qos, TopicRef};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Persisted filter settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilterSettings {
    /// Engine retry period in milliseconds (engine default when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_period: Option<u64>,
    /// Engine retry count (engine default when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    /// Client identity; empty lets the gateway assign one
    #[serde(default)]
    pub client_id: String,
    /// Keep alive period in seconds (default: 60)
    #[serde(default = "default_keep_alive")]
    pub keep_alive: u64,
    #[serde(default)]
    pub force_clean_session: bool,
    /// Default publish topic
    #[serde(default)]
    pub pub_topic: String,
    /// Default publish topic id, used when `pub_topic` is empty; 0 means none
    #[serde(default)]
    pub pub_topic_id: u32,
    #[serde(default)]
    pub pub_qos: u8,
    #[serde(default)]
    pub subscribes: Vec<SubscriptionSettings>,
}

/// One persisted subscription entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionSettings {
    pub sub_topic: String,
    #[serde(default)]
    pub sub_topic_id: u32,
    #[serde(default = "default_sub_qos")]
    pub sub_qos: u8,
}

fn default_keep_alive() -> u64 {
    60
}

fn default_sub_qos() -> u8 {
    DEFAULT_SUB_QOS.as_u8()
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            retry_period: None,
            retry_count: None,
            client_id: String::new(),
            keep_alive: default_keep_alive(),
            force_clean_session: false,
            pub_topic: String::new(),
            pub_topic_id: 0,
            pub_qos: 0,
            subscribes: Vec::new(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Failed to serialize TOML: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl FilterSettings {
    /// Load settings from a TOML file and validate them
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let settings: FilterSettings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check value ranges and subscription topic uniqueness
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(period) = self.retry_period {
            if u32::try_from(period).is_err() {
                return Err(ConfigError::InvalidConfig(format!(
                    "retry_period {period} ms is out of range"
                )));
            }
        }

        check_u16("keep_alive", self.keep_alive)?;
        check_u16("pub_topic_id", u64::from(self.pub_topic_id))?;
        check_qos("pub_qos", self.pub_qos)?;

        let mut seen = HashSet::new();
        for sub in &self.subscribes {
            check_u16("sub_topic_id", u64::from(sub.sub_topic_id))?;
            check_qos("sub_qos", sub.sub_qos)?;

            if sub.sub_topic.trim().is_empty() && sub.sub_topic_id == 0 {
                return Err(ConfigError::InvalidConfig(
                    "subscription needs either sub_topic or sub_topic_id".to_string(),
                ));
            }

            if !seen.insert(sub.sub_topic.as_str()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "duplicate subscription topic '{}'",
                    sub.sub_topic
                )));
            }
        }

        Ok(())
    }
}

fn check_u16(field: &str, value: u64) -> Result<(), ConfigError> {
    if value > u64::from(u16::MAX) {
        return Err(ConfigError::InvalidConfig(format!(
            "{field} {value} does not fit in 16 bits"
        )));
    }
    Ok(())
}

fn check_qos(field: &str, value: u8) -> Result<Qos, ConfigError> {
    Qos::try_from(value).map_err(|e| ConfigError::InvalidConfig(format!("{field}: {e}")))
}

/// Runtime session configuration
///
/// `retry_period` and `retry_count` go to the engine once at start and are not
/// re-applied during a run.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub retry_period: Duration,
    pub retry_count: u32,
    pub client_id: String,
    pub keep_alive: Duration,
    pub forced_clean_session: bool,
    pub default_target: Option<TopicRef>,
    pub default_qos: Qos,
    pub subscriptions: SubscriptionSet,
}

impl SessionConfig {
    /// Configuration with the engine's retry defaults and nothing else set
    pub fn new(retry_period: Duration, retry_count: u32) -> Self {
        Self {
            retry_period,
            retry_count,
            client_id: String::new(),
            keep_alive: Duration::from_secs(default_keep_alive()),
            forced_clean_session: false,
            default_target: None,
            default_qos: Qos::AtMostOnce,
            subscriptions: SubscriptionSet::new(),
        }
    }

    /// Set the default publish topic string
    ///
    /// A non-empty topic replaces any default topic id; an empty one only drops
    /// a previously set topic string.
    pub fn set_default_topic(&mut self, topic: &str) {
        if !topic.is_empty() {
            self.default_target = Some(TopicRef::Name(topic.to_string()));
        } else if matches!(self.default_target, Some(TopicRef::Name(_))) {
            self.default_target = None;
        }
    }

    /// Set the default publish topic id; 0 clears the default target entirely
    pub fn set_default_topic_id(&mut self, topic_id: u16) {
        self.default_target = match topic_id {
            0 => None,
            id => Some(TopicRef::Id(id)),
        };
    }

    pub fn keep_alive_secs(&self) -> u16 {
        u16::try_from(self.keep_alive.as_secs()).unwrap_or(u16::MAX)
    }

    /// Build the runtime model from validated settings
    ///
    /// Absent retry values fall back to the given engine defaults.
    pub fn from_settings(
        settings: &FilterSettings,
        engine_retry_period: Duration,
        engine_retry_count: u32,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;

        let mut config = SessionConfig::new(
            settings
                .retry_period
                .map(Duration::from_millis)
                .unwrap_or(engine_retry_period),
            settings.retry_count.unwrap_or(engine_retry_count),
        );
        config.client_id = settings.client_id.clone();
        config.keep_alive = Duration::from_secs(settings.keep_alive);
        config.forced_clean_session = settings.force_clean_session;
        config.default_qos = check_qos("pub_qos", settings.pub_qos)?;

        // topic string takes precedence over topic id
        if !settings.pub_topic.is_empty() {
            config.set_default_topic(&settings.pub_topic);
        } else {
            config.set_default_topic_id(settings.pub_topic_id as u16);
        }

        for sub in &settings.subscribes {
            let entry = SubscriptionEntry::new(sub.sub_topic.clone())
                .with_topic_id(sub.sub_topic_id as u16)
                .with_max_qos(check_qos("sub_qos", sub.sub_qos)?);
            config.subscriptions.upsert(entry);
        }

        Ok(config)
    }

    /// Persisted form of the current configuration
    pub fn to_settings(&self) -> FilterSettings {
        let (pub_topic, pub_topic_id) = match &self.default_target {
            Some(TopicRef::Name(topic)) => (topic.clone(), 0),
            Some(TopicRef::Id(id)) => (String::new(), u32::from(*id)),
            None => (String::new(), 0),
        };

        FilterSettings {
            retry_period: Some(self.retry_period.as_millis() as u64),
            retry_count: Some(self.retry_count),
            client_id: self.client_id.clone(),
            keep_alive: self.keep_alive.as_secs(),
            force_clean_session: self.forced_clean_session,
            pub_topic,
            pub_topic_id,
            pub_qos: self.default_qos.as_u8(),
            subscribes: self
                .subscriptions
                .entries()
                .map(|entry| SubscriptionSettings {
                    sub_topic: entry.topic.clone(),
                    sub_topic_id: u32::from(entry.topic_id),
                    sub_qos: entry.max_qos.as_u8(),
                })
                .collect(),
        }
    }
}
