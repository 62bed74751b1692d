//! Processor configuration with validation.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Default call timeout (5 seconds)
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default limit on concurrently executing inbound requests per session
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 64;

/// Default number of admitted requests that may wait for a dispatch slot
pub const DEFAULT_MAX_QUEUED_REQUESTS: usize = 256;

/// Default maximum inbound frame size (1MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Default buffered lifecycle events per observer
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Per-session processor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// How long an outbound call waits for its response
    #[serde(with = "humantime_serde")]
    pub call_timeout: Duration,
    /// Include full diagnostic detail in propagated error strings
    pub verbose_errors: bool,
    /// Upper bound on inbound requests whose handlers run at the same time
    pub max_concurrent_requests: usize,
    /// Admitted requests that may wait for a dispatch slot; beyond this they are rejected
    pub max_queued_requests: usize,
    /// Inbound frames larger than this are rejected
    pub max_frame_size: usize,
    /// Capacity of the lifecycle event channel
    pub event_capacity: usize,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            verbose_errors: false,
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            max_queued_requests: DEFAULT_MAX_QUEUED_REQUESTS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl RpcConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DUPLEX_RPC_CALL_TIMEOUT`: e.g. `5s`, `250ms`, `2m` (default: 5s)
    /// - `DUPLEX_RPC_VERBOSE_ERRORS`: `true`/`1` to enable (default: false)
    /// - `DUPLEX_RPC_MAX_CONCURRENT_REQUESTS`: (default: 64)
    /// - `DUPLEX_RPC_MAX_QUEUED_REQUESTS`: (default: 256)
    /// - `DUPLEX_RPC_MAX_FRAME_SIZE`: bytes (default: 1048576)
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            call_timeout: env::var("DUPLEX_RPC_CALL_TIMEOUT")
                .ok()
                .and_then(|v| humantime_serde::parse_duration(&v).ok())
                .unwrap_or(defaults.call_timeout),

            verbose_errors: env::var("DUPLEX_RPC_VERBOSE_ERRORS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.verbose_errors),

            max_concurrent_requests: env::var("DUPLEX_RPC_MAX_CONCURRENT_REQUESTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_concurrent_requests),

            max_queued_requests: env::var("DUPLEX_RPC_MAX_QUEUED_REQUESTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_queued_requests),

            max_frame_size: env::var("DUPLEX_RPC_MAX_FRAME_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_frame_size),

            event_capacity: defaults.event_capacity,
        }
    }

    /// Builder-style call timeout override
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Builder-style verbose error override
    pub fn with_verbose_errors(mut self, verbose: bool) -> Self {
        self.verbose_errors = verbose;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.call_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "call_timeout cannot be 0".into(),
            ));
        }

        if self.max_concurrent_requests == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_concurrent_requests cannot be 0".into(),
            ));
        }

        if self.max_frame_size == 0 {
            return Err(ConfigError::InvalidLimit("max_frame_size cannot be 0".into()));
        }

        if self.event_capacity == 0 {
            return Err(ConfigError::InvalidLimit("event_capacity cannot be 0".into()));
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
}

/// Humantime serde module for Duration serialization
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub(super) fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|_| "invalid minutes")
        } else {
            s.parse()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration")
        }
    }
}
