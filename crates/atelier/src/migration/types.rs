//! Value types shared by the filter builder, the migrator and the orchestrator.

use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Which items a migration touches. Used identically by precheck and run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MigrationFilters {
    /// Substring matched against title, description and owner name.
    pub search: Option<String>,
    /// Match `search` against the title exactly instead.
    pub exact_match: bool,
    /// Substring of the owner's display name.
    pub owner_name: Option<String>,
    /// Inclusive, UTC day boundaries.
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    /// Exact external id. Takes precedence over `search`.
    pub external_id: Option<String>,
}

/// How files reach the canonical directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    #[default]
    Move,
    Copy,
}

impl std::fmt::Display for TransferMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferMode::Move => write!(f, "move"),
            TransferMode::Copy => write!(f, "copy"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SafetyOptions {
    pub transfer_mode: TransferMode,
    /// Copy mode only: compare byte sizes of every copied file.
    pub verify_after_copy: bool,
    /// Remove originals (copy mode), junk files and the emptied source dir.
    pub cleanup_source: bool,
}

impl Default for SafetyOptions {
    fn default() -> Self {
        Self {
            transfer_mode: TransferMode::Move,
            verify_after_copy: true,
            cleanup_source: true,
        }
    }
}

/// Outcome of one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Success,
    Skipped,
    Failed,
}

/// Running totals for a job.
///
/// `success + skipped + failed == processed <= total` holds after every
/// [`MigrationStats::record`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationStats {
    pub total: u64,
    pub processed: u64,
    pub success: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl MigrationStats {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn record(&mut self, status: ItemStatus) {
        self.processed += 1;
        match status {
            ItemStatus::Success => self.success += 1,
            ItemStatus::Skipped => self.skipped += 1,
            ItemStatus::Failed => self.failed += 1,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.success + self.skipped + self.failed == self.processed && self.processed <= self.total
    }

    /// Whole percent processed, clamped to 0..=100. An empty job is 100%.
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let pct = self.processed.saturating_mul(100) / self.total;
        pct.min(100) as u8
    }
}

/// Result of migrating a single item. Never persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationResult {
    pub item_id: i64,
    pub external_id: Option<String>,
    pub status: ItemStatus,
    pub logs: Vec<String>,
}

impl MigrationResult {
    pub fn success(item_id: i64, external_id: Option<String>, logs: Vec<String>) -> Self {
        Self {
            item_id,
            external_id,
            status: ItemStatus::Success,
            logs,
        }
    }

    pub fn skipped(item_id: i64, external_id: Option<String>, logs: Vec<String>) -> Self {
        Self {
            item_id,
            external_id,
            status: ItemStatus::Skipped,
            logs,
        }
    }

    pub fn failed(item_id: i64, external_id: Option<String>, logs: Vec<String>) -> Self {
        Self {
            item_id,
            external_id,
            status: ItemStatus::Failed,
            logs,
        }
    }

    /// `[externalId]`, or `[#id]` when the item has none.
    pub fn log_prefix(&self) -> String {
        match &self.external_id {
            Some(ext) => format!("[{}]", ext),
            None => format!("[#{}]", self.item_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    pub id: i64,
    pub external_id: Option<String>,
    pub logs: Vec<String>,
}

/// What a finished run returns and what a completed job stores.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub stats: MigrationStats,
    pub failed_items: Vec<FailedItem>,
}

/// Counts from a read-only dry run over the same predicate as the run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Precheck {
    pub total: u64,
    pub eligible: u64,
    pub missing_owner: u64,
    pub missing_external_id: u64,
    pub missing_files: u64,
}

pub const DEFAULT_BATCH_SIZE: usize = 200;
/// Upper bound on ids bound into one `IN (...)` clause; SQLite caps bound
/// variables at 32766.
pub const MAX_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_CONCURRENCY: usize = 3;
pub const DEFAULT_PAUSE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Parameters for one orchestrator run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Restrict the run to these item ids. Order and duplicates don't matter.
    pub ids: Option<Vec<i64>>,
    pub batch_size: usize,
    pub concurrency: usize,
    /// Scan mode only: skip items with `id <= start_after_id`.
    pub start_after_id: Option<i64>,
    pub filters: MigrationFilters,
    pub safety: SafetyOptions,
    pub pause_poll_interval: Duration,
}

impl RunOptions {
    /// `batch_size` clamped to `1..=MAX_BATCH_SIZE`.
    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.clamp(1, MAX_BATCH_SIZE)
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            ids: None,
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            start_after_id: None,
            filters: MigrationFilters::default(),
            safety: SafetyOptions::default(),
            pause_poll_interval: DEFAULT_PAUSE_POLL_INTERVAL,
        }
    }
}
