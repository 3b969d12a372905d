//! YAML configuration parsing.
//!
//! Parses registry settings from YAML files. Every field is optional:
//!
//! ```yaml
//! backend: poll
//! poll_timeout: 50ms
//! max_timers: 256
//! thread_name: audio-clock
//! auto_cancel_single_shot: false
//! ```

use std::path::Path;

use super::error::ConfigError;
use super::types::RegistryConfig;

/// Loader for registry configuration files.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load registry configuration from a file.
    pub fn load_registry_config(path: impl AsRef<Path>) -> Result<RegistryConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse_registry_config(&content)
    }

    /// Parse registry configuration from a YAML string.
    pub fn parse_registry_config(yaml: &str) -> Result<RegistryConfig, ConfigError> {
        // An empty document means "all defaults".
        if yaml.trim().is_empty() {
            return Ok(RegistryConfig::default());
        }

        let config: RegistryConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }
}
