use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use tabledancer_common::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDancerConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Rows per backfill page and events per replay page.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Outstanding-event backlog at which replay counts as caught up.
    #[serde(default = "default_replay_threshold")]
    pub replay_threshold: usize,

    #[serde(default)]
    pub rest_interval_ms: u64,

    /// Pause between backfill pages; falls back to `rest_interval_ms`.
    #[serde(default)]
    pub copy_rest_interval_ms: Option<u64>,

    #[serde(default = "default_true")]
    pub install_triggers: bool,

    #[serde(default)]
    pub log_level: Option<String>,

    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for TableDancerConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            batch_size: default_batch_size(),
            replay_threshold: default_replay_threshold(),
            rest_interval_ms: 0,
            copy_rest_interval_ms: None,
            install_triggers: true,
            log_level: Some("info".to_string()),
            log_file: None,
        }
    }
}

impl TableDancerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn rest_interval(&self) -> Duration {
        Duration::from_millis(self.rest_interval_ms)
    }

    pub fn copy_rest_interval(&self) -> Duration {
        Duration::from_millis(self.copy_rest_interval_ms.unwrap_or(self.rest_interval_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

fn default_batch_size() -> usize {
    1000
}

fn default_replay_threshold() -> usize {
    20
}

fn default_true() -> bool {
    true
}

fn default_database_path() -> PathBuf {
    PathBuf::from("tabledancer.db")
}

fn default_busy_timeout_ms() -> u64 {
    5000
}
