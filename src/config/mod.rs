//! Engine configuration.
//!
//! [`EngineConfig`] is plain serde data with defaults for every field, so a
//! config file only needs to name what it changes. Use [`parse_config`] to
//! load one from YAML, JSON or TOML text.

pub mod parser;

pub use parser::{parse_config, ConfigFormat};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// How calculation nodes write function outputs to the value cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheWriteMode {
    /// Each put is visible before it returns.
    Immediate,
    /// Puts are queued on a bounded pool and flushed before a job reports
    /// completion.
    #[default]
    WriteBehind,
}

/// Configuration for the calculation engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub cache_write_mode: CacheWriteMode,
    #[serde(default = "default_write_behind_workers")]
    pub write_behind_workers: usize,
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    #[serde(default = "default_calculation_nodes")]
    pub calculation_nodes: usize,
    #[serde(default = "default_max_job_items")]
    pub max_job_items: usize,
    #[serde(default)]
    pub dump_cache_dir: Option<PathBuf>,
}

fn default_write_behind_workers() -> usize {
    4
}

fn default_poll_timeout_ms() -> u64 {
    5000
}

fn default_calculation_nodes() -> usize {
    2
}

fn default_max_job_items() -> usize {
    64
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            cache_write_mode: CacheWriteMode::default(),
            write_behind_workers: default_write_behind_workers(),
            poll_timeout_ms: default_poll_timeout_ms(),
            calculation_nodes: default_calculation_nodes(),
            max_job_items: default_max_job_items(),
            dump_cache_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.write_behind_workers == 0 {
            return Err(ConfigError::invalid(
                "write_behind_workers",
                "must be greater than zero",
            ));
        }
        if self.poll_timeout_ms == 0 {
            return Err(ConfigError::invalid(
                "poll_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.calculation_nodes == 0 {
            return Err(ConfigError::invalid(
                "calculation_nodes",
                "must be greater than zero",
            ));
        }
        if self.max_job_items == 0 {
            return Err(ConfigError::invalid(
                "max_job_items",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}
