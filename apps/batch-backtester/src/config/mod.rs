//! Application configuration.
//!
//! YAML file with serde defaults for every field, so a missing file or a
//! sparse one still yields a runnable configuration.

mod run;

pub use run::RunSettings;

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::params::StorageFormat;

/// Default configuration file path, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Configuration loading and validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Reading the configuration file failed.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path that was attempted.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not valid YAML for this schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml_bw::Error),

    /// The parsed configuration is semantically invalid.
    #[error("invalid config: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Run sizing and replay window.
    #[serde(default)]
    pub run: RunSettings,

    /// Market-data storage format handed to workers.
    #[serde(default)]
    pub storage_format: StorageFormat,

    /// Capacity of the orchestrator's broadcast event channel.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Number of demo jobs the binary schedules.
    #[serde(default = "default_demo_jobs")]
    pub demo_jobs: usize,
}

fn default_event_capacity() -> usize {
    64
}

fn default_demo_jobs() -> usize {
    12
}

impl Default for Config {
    fn default() -> Self {
        Self {
            run: RunSettings::default(),
            storage_format: StorageFormat::default(),
            event_capacity: default_event_capacity(),
            demo_jobs: default_demo_jobs(),
        }
    }
}

impl Config {
    /// Validate cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] describing the first violated
    /// constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run.batch_size == 0 {
            return Err(ConfigError::Validation(
                "run.batch_size must be greater than zero".to_string(),
            ));
        }
        if self.run.start_time >= self.run.stop_time {
            return Err(ConfigError::Validation(
                "run.start_time must be before run.stop_time".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Validation(
                "event_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load and validate configuration.
///
/// With an explicit `path` the file must exist. Without one, a missing
/// `config.yaml` falls back to defaults.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the file cannot be read or parsed, or if
/// validation fails.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let (path, required) = match path {
        Some(p) => (p, true),
        None => (DEFAULT_CONFIG_PATH, false),
    };

    if !required && !Path::new(path).exists() {
        info!("no config file at {path}, using defaults");
        let config = Config::default();
        config.validate()?;
        return Ok(config);
    }

    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_string(),
        source,
    })?;
    let config: Config = serde_yaml_bw::from_str(&contents)?;
    config.validate()?;

    info!("loaded config from {path}");
    Ok(config)
}
