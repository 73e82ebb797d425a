//! Catalog file migration: eligibility filters, the per-item migrator, the
//! concurrent orchestrator and the background job runner.

pub mod control;
pub mod error;
pub mod filters;
pub mod migrator;
pub mod orchestrator;
pub mod progress;
pub mod runner;
pub mod types;

pub use control::{ControlFlags, JobControl, JobStoreControl, RunState};
pub use error::{ItemError, MigrationError};
pub use migrator::ItemMigrator;
pub use orchestrator::Orchestrator;
pub use progress::{BroadcastProgress, JobProgressSink, NoopProgress, ProgressSink};
pub use runner::{MigrationRequest, MigrationRunner};
pub use types::{
    FailedItem, ItemStatus, MigrationFilters, MigrationReport, MigrationResult, MigrationStats,
    Precheck, RunOptions, SafetyOptions, TransferMode,
};
