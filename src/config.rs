//! Configuration management for Defender.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::Hash;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{DefenderError, Result};
use crate::tracker::{Defender, DefenderBuilder, EVICTION_FACTOR};

/// Prefix for environment variable overrides, e.g. `DEFENDER_MAX`.
pub const ENV_PREFIX: &str = "DEFENDER";

/// Tracker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefenderConfig {
    /// Events allowed per window (token bucket capacity)
    #[serde(default = "default_max")]
    pub max: u32,

    /// Window length in milliseconds (one token accrues per window)
    #[serde(default = "default_duration_ms")]
    pub duration_ms: u64,

    /// Ban length in milliseconds
    #[serde(default = "default_ban_duration_ms")]
    pub ban_duration_ms: u64,

    /// Multiplier applied to the window to get the idle eviction period
    #[serde(default = "default_eviction_factor")]
    pub eviction_factor: u32,
}

impl Default for DefenderConfig {
    fn default() -> Self {
        Self {
            max: default_max(),
            duration_ms: default_duration_ms(),
            ban_duration_ms: default_ban_duration_ms(),
            eviction_factor: default_eviction_factor(),
        }
    }
}

fn default_max() -> u32 {
    10
}

fn default_duration_ms() -> u64 {
    1000
}

fn default_ban_duration_ms() -> u64 {
    60_000
}

fn default_eviction_factor() -> u32 {
    EVICTION_FACTOR
}

impl DefenderConfig {
    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| DefenderError::Config(format!("Failed to parse configuration: {}", e)))
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from an optional file, overridden by `DEFENDER_*`
    /// environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration");
            builder = builder.add_source(::config::File::from(path));
        }

        builder
            .add_source(::config::Environment::with_prefix(ENV_PREFIX))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| DefenderError::Config(format!("Failed to load configuration: {}", e)))
    }

    /// Window length.
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Ban length.
    pub fn ban_duration(&self) -> Duration {
        Duration::from_millis(self.ban_duration_ms)
    }

    /// Check the values without building a tracker.
    pub fn validate(&self) -> Result<()> {
        self.builder::<String>().build().map(|_| ())
    }

    /// Start a tracker builder from this configuration.
    pub fn builder<K>(&self) -> DefenderBuilder<K> {
        DefenderBuilder::new(self.max, self.duration(), self.ban_duration())
            .eviction_factor(self.eviction_factor)
    }

    /// Build a tracker from this configuration.
    pub fn build<K>(&self) -> Result<Defender<K>>
    where
        K: Eq + Hash + Clone + fmt::Debug,
    {
        self.builder().build()
    }
}
