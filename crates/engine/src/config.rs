//! Engine-wide tuning knobs.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Defaults applied when a workflow does not say otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on re-attempts of one step, whatever the step asks for.
    pub max_retry_attempts: u32,
    /// Back-off base used when a retry policy leaves the delay at zero.
    pub retry_base_delay_ms: u64,
    /// Run deadline for workflows that set none; 0 means unbounded.
    pub max_execution_secs: u64,
    /// Approve every approval step on behalf of its first approver.
    pub auto_approve: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: 3,
            retry_base_delay_ms: 100,
            max_execution_secs: 0,
            auto_approve: false,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file; absent keys keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: display.clone(), source })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse { path: display, source })
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn default_max_execution_time(&self) -> Option<Duration> {
        (self.max_execution_secs > 0).then(|| Duration::from_secs(self.max_execution_secs))
    }
}
