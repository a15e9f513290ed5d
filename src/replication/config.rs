//! Replicator configuration
//!
//! Loaded from a JSON file. Every field except `log_path` has a default;
//! the configuration is validated once at load and is immutable afterwards.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mirror::DEFAULT_BUCKET_COUNT;
use crate::observability::{log_event_with_fields, Event};

use super::errors::{ReplicationError, ReplicationResult};

/// Replicator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicatorConfig {
    /// Path of the live job queue log (required)
    pub log_path: PathBuf,

    /// Seconds between polls (default 10)
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Apply `105 … 106` groups atomically (default true)
    #[serde(default = "default_true")]
    pub transactional_grouping: bool,

    /// Skip the probe when mtime and size are unchanged (default true)
    #[serde(default = "default_true")]
    pub precheck_enabled: bool,

    /// Hash buckets per mirror partition (default 2000)
    #[serde(default = "default_bucket_count")]
    pub bucket_count: usize,

    /// Replay rotated predecessor generations before a rebuild (default true)
    #[serde(default = "default_true")]
    pub drain_predecessors: bool,
}

fn default_poll_interval_secs() -> u64 {
    10
}
fn default_true() -> bool {
    true
}
fn default_bucket_count() -> usize {
    DEFAULT_BUCKET_COUNT
}

impl ReplicatorConfig {
    /// Creates a configuration with defaults for `log_path`
    pub fn new(log_path: impl AsRef<Path>) -> Self {
        Self {
            log_path: log_path.as_ref().to_path_buf(),
            poll_interval_secs: default_poll_interval_secs(),
            transactional_grouping: true,
            precheck_enabled: true,
            bucket_count: default_bucket_count(),
            drain_predecessors: true,
        }
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> ReplicationResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ReplicationError::configuration_invalid(format!("Failed to read config: {}", e))
        })?;
        let config = Self::from_json(&content)?;

        log_event_with_fields(
            Event::ConfigLoaded,
            &[
                ("config", path.display().to_string().as_str()),
                ("log_path", config.log_path.display().to_string().as_str()),
            ],
        );
        Ok(config)
    }

    /// Parse and validate configuration JSON
    pub fn from_json(content: &str) -> ReplicationResult<Self> {
        let config: ReplicatorConfig = serde_json::from_str(content).map_err(|e| {
            ReplicationError::configuration_invalid(format!("Invalid config JSON: {}", e))
        })?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ReplicationResult<()> {
        if self.log_path.as_os_str().is_empty() {
            return Err(ReplicationError::configuration_invalid(
                "log_path must not be empty",
            ));
        }

        if self.poll_interval_secs == 0 {
            return Err(ReplicationError::configuration_invalid(
                "poll_interval_secs must be > 0",
            ));
        }

        if self.bucket_count == 0 {
            return Err(ReplicationError::configuration_invalid(
                "bucket_count must be > 0",
            ));
        }

        Ok(())
    }

    /// Poll interval as a duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Path of rotated generation `n`: `<log_path>.<n>`
    pub fn generation_path(&self, generation: u64) -> PathBuf {
        let mut name = self.log_path.clone().into_os_string();
        name.push(format!(".{}", generation));
        PathBuf::from(name)
    }
}
