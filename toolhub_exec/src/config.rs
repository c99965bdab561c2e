//! Worker pool configuration.
//!
//! `PoolConfig` can be built in code or loaded from a JSON file; durations
//! are expressed in milliseconds on the wire.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Errors while loading a configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Tunables for [`WorkerPool`](crate::pool::WorkerPool).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    /// Inactivity window after which a worker and its loop are torn down.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
    /// Task queue depth per worker; submitters beyond it wait.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_idle_timeout_ms() -> u64 {
    30_000
}

fn default_queue_capacity() -> usize {
    16
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout_ms(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Loads a `PoolConfig` from a JSON file. Missing fields fall back to
    /// their defaults.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}
