//! Configuration type definitions.
//!
//! [`RegistryConfig`] holds the settings of one timer registry: which backend
//! waits for expirations, how long the poll backend may block, and limits.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::error::ConfigError;
use crate::core::schedule::parse_duration;

/// Default upper bound on a single poll call.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Longest poll timeout accepted; the waiter must notice shutdown within a second.
pub const MAX_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Default number of timers a registry accepts.
pub const DEFAULT_MAX_TIMERS: usize = 1000;

/// Default name of the waiter thread.
pub const DEFAULT_THREAD_NAME: &str = "metronome-waiter";

/// Mechanism used to wait for timer expirations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// One timerfd per timer, one thread polling all of them (Linux and Android).
    Poll,
    /// One tokio timer task per timer on a dedicated single-worker runtime.
    Async,
}

impl Default for BackendKind {
    fn default() -> Self {
        if cfg!(any(target_os = "linux", target_os = "android")) {
            BackendKind::Poll
        } else {
            BackendKind::Async
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Poll => write!(f, "poll"),
            BackendKind::Async => write!(f, "async"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "poll" => Ok(BackendKind::Poll),
            "async" => Ok(BackendKind::Async),
            other => Err(ConfigError::InvalidConfig(format!(
                "unknown backend '{}', expected 'poll' or 'async'",
                other
            ))),
        }
    }
}

/// Settings for a timer registry (metronome.yaml).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Backend used to wait for expirations.
    pub backend: BackendKind,
    /// Upper bound on a single poll call (poll backend only).
    #[serde(with = "duration_string")]
    pub poll_timeout: Duration,
    /// Maximum number of live timers.
    pub max_timers: usize,
    /// Name given to the waiter thread.
    pub thread_name: String,
    /// Remove single-shot timers after their callback has run.
    pub auto_cancel_single_shot: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            max_timers: DEFAULT_MAX_TIMERS,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            auto_cancel_single_shot: true,
        }
    }
}

impl RegistryConfig {
    /// Set the backend.
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Set the poll timeout.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Set the maximum number of live timers.
    pub fn with_max_timers(mut self, max: usize) -> Self {
        self.max_timers = max;
        self
    }

    /// Set the waiter thread name.
    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Enable or disable auto-cancellation of fired single-shot timers.
    pub fn with_auto_cancel_single_shot(mut self, enabled: bool) -> Self {
        self.auto_cancel_single_shot = enabled;
        self
    }

    /// Check that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_timeout.is_zero() || self.poll_timeout > MAX_POLL_TIMEOUT {
            return Err(ConfigError::InvalidConfig(format!(
                "poll_timeout must be between 1ns and {:?}, got {:?}",
                MAX_POLL_TIMEOUT, self.poll_timeout
            )));
        }

        if self.max_timers == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_timers cannot be zero".into(),
            ));
        }

        if self.thread_name.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "thread_name cannot be empty".into(),
            ));
        }

        if self.thread_name.contains('\0') {
            return Err(ConfigError::InvalidConfig(
                "thread_name cannot contain NUL characters".into(),
            ));
        }

        Ok(())
    }
}

/// Serde adapter writing durations as strings like `100ms`.
mod duration_string {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let nanos = value.subsec_nanos();
        let text = if nanos % 1_000_000 == 0 {
            format!("{}ms", value.as_millis())
        } else if nanos % 1_000 == 0 {
            format!("{}us", value.as_micros())
        } else {
            format!("{}ns", value.as_nanos())
        };
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
