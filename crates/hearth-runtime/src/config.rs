//! Runtime configuration
//!
//! Parses the `hearth:` section of a YAML config file.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Top level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HearthConfig {
    /// Name of the installation
    #[serde(default = "default_name")]
    pub name: String,

    /// Latitude of the home location, used for sun triggers
    #[serde(default)]
    pub latitude: f64,

    /// Longitude of the home location
    #[serde(default)]
    pub longitude: f64,

    /// Elevation in meters
    #[serde(default)]
    pub elevation_m: i32,

    /// Event bus broadcast channel capacity
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    /// Scheduler polling interval in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Topic prefix for discovery announcements
    #[serde(default = "default_discovery_prefix")]
    pub discovery_prefix: String,

    /// Deadline for condition template renders, in seconds
    #[serde(default = "default_template_timeout_secs")]
    pub template_timeout_secs: u64,
}

fn default_name() -> String {
    "Home".to_string()
}

fn default_bus_capacity() -> usize {
    4096
}

fn default_tick_interval_ms() -> u64 {
    500
}

fn default_discovery_prefix() -> String {
    "hearth".to_string()
}

fn default_template_timeout_secs() -> u64 {
    5
}

impl Default for HearthConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("empty config must deserialize")
    }
}

impl HearthConfig {
    pub fn from_yaml_str(yaml: &str) -> ConfigResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&contents)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn template_timeout(&self) -> Duration {
        Duration::from_secs(self.template_timeout_secs)
    }
}
