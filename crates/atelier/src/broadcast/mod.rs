//! Migration job state and real-time progress streaming.
//!
//! The job store is the persisted side, the broadcaster the live side; the
//! runner feeds both from the same progress callbacks.

pub mod migration_jobs;
pub mod migration_progress;

pub use migration_jobs::{MigrationJob, MigrationJobStore, NewMigrationJob};
pub use migration_progress::{JobStatus, MigrationProgressBroadcaster, MigrationProgressEvent};
