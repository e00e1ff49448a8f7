//! Client configuration

use crate::error::{Result, TradfriError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default CoAPS port of the gateway
pub const DEFAULT_PORT: u16 = 5684;

/// Configuration for a [`TradfriClient`](crate::TradfriClient)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Gateway host name or address
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Gateway CoAPS port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Connection attempts per `connect` call before giving up
    #[serde(default = "default_max_connection_attempts")]
    pub max_connection_attempts: u32,

    /// Pause between two connection attempts, in milliseconds
    #[serde(default = "default_connection_interval_ms")]
    pub connection_interval_ms: u64,

    /// Capacity of the event broadcast channel
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_max_connection_attempts() -> u32 {
    1
}

fn default_connection_interval_ms() -> u64 {
    10_000
}

fn default_event_capacity() -> usize {
    256
}

impl ClientConfig {
    /// Configuration for the given gateway with all other values defaulted
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            ..Self::default()
        }
    }

    /// Retry a failing connection `max_attempts` times, pausing `interval` in between
    pub fn with_retries(mut self, max_attempts: u32, interval: Duration) -> Self {
        self.max_connection_attempts = max_attempts;
        self.connection_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn connection_interval(&self) -> Duration {
        Duration::from_millis(self.connection_interval_ms)
    }

    /// Base URL every resource path is resolved against
    pub fn base_url(&self) -> String {
        format!("coaps://{}:{}/", self.hostname, self.port)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.hostname.trim().is_empty() {
            return Err(TradfriError::InvalidConfig("hostname cannot be empty".to_string()));
        }
        if self.max_connection_attempts == 0 {
            return Err(TradfriError::InvalidConfig(
                "max_connection_attempts must be > 0".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(TradfriError::InvalidConfig("event_capacity must be > 0".to_string()));
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            port: default_port(),
            max_connection_attempts: default_max_connection_attempts(),
            connection_interval_ms: default_connection_interval_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}
