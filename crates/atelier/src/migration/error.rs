use std::path::PathBuf;

use thiserror::Error;

use crate::db::DatabaseError;
use crate::error::StorageError;

use super::types::MigrationReport;

/// Errors that fail a single item. The job keeps going.
#[derive(Error, Debug)]
pub enum ItemError {
    #[error("Storage operation failed: {0}")]
    Storage(#[from] StorageError),

    #[error("Metadata update failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("No related files in source directory '{dir}'")]
    NoRelatedFiles { dir: String },

    /// Catalog rows that the source listing would not relocate: files outside
    /// the source directory or without the external id prefix.
    #[error("{count} file record(s) not covered by the source listing, first: '{first}'")]
    UncoveredFiles { count: usize, first: String },

    #[error("Size mismatch after copying '{name}': source {expected} bytes, copy {actual} bytes")]
    SizeMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },
}

/// Errors that stop a whole job.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// Cancellation was requested. Items finished before the stop are counted
    /// in the partial report.
    #[error(
        "Migration cancelled after {} of {} items",
        .report.stats.processed,
        .report.stats.total
    )]
    Cancelled { report: MigrationReport },

    #[error("Content root is not configured")]
    ContentRootUnset,

    #[error("Content root '{path}' does not exist or is not a directory")]
    ContentRootMissing { path: PathBuf },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Migration worker panicked: {0}")]
    WorkerPanicked(String),

    #[error("Migration job '{0}' not found")]
    JobNotFound(String),

    #[error("Cannot {action} migration job '{id}' while it is {status}")]
    InvalidTransition {
        id: String,
        action: &'static str,
        status: String,
    },

    #[error("Migration job '{0}' is already running in this process")]
    JobAlreadyActive(String),
}

impl MigrationError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, MigrationError::Cancelled { .. })
    }
}
