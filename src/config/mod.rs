//! Configuration loading and parsing.
//!
//! This module provides YAML-based configuration for timer registries.

mod error;
mod types;
mod yaml;

pub use error::ConfigError;
pub use types::{
    BackendKind, DEFAULT_MAX_TIMERS, DEFAULT_POLL_TIMEOUT, DEFAULT_THREAD_NAME, MAX_POLL_TIMEOUT,
    RegistryConfig,
};
pub use yaml::ConfigLoader;
