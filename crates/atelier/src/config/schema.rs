use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::migration::migrator::DEFAULT_JUNK_FILES;
use crate::migration::types::{DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENCY};
use crate::migration::SafetyOptions;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Directory every catalog file path is relative to.
    #[serde(default)]
    pub content_root: Option<String>,
    /// SQLite file; defaults to `~/.atelier/data/atelier.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default)]
    pub migration: MigrationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_pause_poll_interval_ms")]
    pub pause_poll_interval_ms: u64,
    /// Progress is written to the job record every this many items.
    #[serde(default = "default_progress_persist_every")]
    pub progress_persist_every: u64,
    /// File names deleted from an emptied source directory.
    #[serde(default = "default_junk_files")]
    pub junk_files: Vec<String>,
    /// Safety options used when a request doesn't specify its own.
    #[serde(default)]
    pub safety: SafetyOptions,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_pause_poll_interval_ms() -> u64 {
    1000
}

fn default_progress_persist_every() -> u64 {
    25
}

fn default_junk_files() -> Vec<String> {
    DEFAULT_JUNK_FILES.iter().map(|s| s.to_string()).collect()
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
            pause_poll_interval_ms: default_pause_poll_interval_ms(),
            progress_persist_every: default_progress_persist_every(),
            junk_files: default_junk_files(),
            safety: SafetyOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `atelier=debug`.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// The content root, if one is configured and non-blank.
    pub fn content_root_path(&self) -> Option<PathBuf> {
        self.content_root
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
    }

    /// The configured database path, falling back to the per-user default.
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        match self.database_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(PathBuf::from(path)),
            _ => crate::db::default_database_path(),
        }
    }
}
