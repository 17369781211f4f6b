//! Configuration module for rowflow
//!
//! This module handles:
//! - Engine settings (`EngineConfig`): queue sizing, wait slices, error
//!   reporting limits, safe mode, thread naming
//! - Topology files (`Topology`): steps, hops and per-step options
//!
//! # Config Location
//!
//! Engine settings are read from the platform config directory:
//! - **Linux**: `~/.config/rowflow/engine.toml`
//! - **macOS**: `~/Library/Application Support/rowflow/engine.toml`
//! - **Windows**: `%APPDATA%\rowflow\engine.toml`
//!
//! The environment variable `ROWFLOW_QUEUE_CAPACITY` overrides the queue
//! capacity from any source.
//!
//! # Example
//!
//! ```ignore
//! use rowflow::config::{EngineConfig, Topology};
//!
//! let config = EngineConfig::load_or_default();
//! let topology = Topology::load("pipelines/orders.toml")?;
//! ```

pub mod topology;

pub use topology::*;

use crate::error::{ResultExt, RowflowError, Result};
use crate::pipeline::queue::DEFAULT_QUEUE_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for config directories
pub const APP_ID: &str = "rowflow";

/// Engine config filename
pub const ENGINE_CONFIG_FILE: &str = "engine.toml";

/// Environment variable overriding `queue_capacity`
pub const ENV_QUEUE_CAPACITY: &str = "ROWFLOW_QUEUE_CAPACITY";

/// Default fan-in wait slice in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 50;

/// Default number of error messages kept in a run result
pub const DEFAULT_MAX_ERROR_MESSAGES: usize = 10;

// ==================== Config Directory ====================

/// Get the rowflow config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Get the path to the engine config file
pub fn engine_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(ENGINE_CONFIG_FILE))
}

// ==================== Engine Config ====================

/// Settings that apply to every pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Rows buffered per queue-pair
    pub queue_capacity: usize,

    /// Longest a fan-in wait sleeps before rechecking the stop flag
    pub poll_interval_ms: u64,

    /// Error messages kept verbatim in the run result
    pub max_error_messages: usize,

    /// Verify every input row against the first row's layout
    pub safe_mode: bool,

    /// Prefix for step thread names (`{prefix}{step}.{copy}`)
    pub thread_name_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_error_messages: DEFAULT_MAX_ERROR_MESSAGES,
            safe_mode: false,
            thread_name_prefix: String::new(),
        }
    }
}

impl EngineConfig {
    /// Load settings from a TOML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read engine config {}", path.display()))?;
        let config: EngineConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse engine config {}", path.display()))?;
        let config = config.with_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the platform config directory, returning defaults on any error
    pub fn load_or_default() -> Self {
        let loaded = match engine_config_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Self::default().with_env_overrides(),
        };
        loaded.unwrap_or_else(|e| {
            tracing::warn!("Failed to load engine config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save settings as TOML, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write engine config {}", path.display()))
    }

    /// Apply `ROWFLOW_QUEUE_CAPACITY` if set.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(raw) = std::env::var(ENV_QUEUE_CAPACITY) {
            let capacity = raw.trim().parse::<usize>().map_err(|e| {
                RowflowError::Config(format!("Invalid {}='{}': {}", ENV_QUEUE_CAPACITY, raw, e))
            })?;
            tracing::debug!(capacity, "queue capacity overridden from environment");
            self.queue_capacity = capacity;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(RowflowError::Config(
                "queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(RowflowError::Config(
                "poll_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_safe_mode(mut self, safe_mode: bool) -> Self {
        self.safe_mode = safe_mode;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis().max(1) as u64;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.queue_capacity, 10_000);
        assert_eq!(config.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.max_error_messages, 10);
        assert!(!config.safe_mode);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str("safe_mode = true").unwrap();
        assert!(config.safe_mode);
        assert_eq!(config.queue_capacity, DEFAULT_QUEUE_CAPACITY);
    }

    #[test]
    fn test_zero_capacity_is_invalid() {
        let config = EngineConfig::default().with_queue_capacity(0);
        assert!(matches!(config.validate(), Err(RowflowError::Config(_))));
    }

    #[test]
    fn test_engine_config_path() {
        if let Some(path) = engine_config_path() {
            assert!(path.ends_with("rowflow/engine.toml"));
        }
    }
}
