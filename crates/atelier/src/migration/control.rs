//! Pause and cancel signals the orchestrator polls while it runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::broadcast::{JobStatus, MigrationJobStore};

/// Reported by the orchestrator when it enters or leaves a pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Paused,
    Running,
}

/// Source of pause/cancel requests for a running migration.
///
/// Checks must be cheap enough to run before every item.
#[async_trait]
pub trait JobControl: Send + Sync {
    async fn is_cancelled(&self) -> bool;

    async fn is_paused(&self) -> bool;

    /// Called once when a pause begins and once when it ends.
    async fn on_state_change(&self, state: RunState);
}

/// In-memory flags, for runs without a persisted job.
#[derive(Debug, Default)]
pub struct ControlFlags {
    cancelled: AtomicBool,
    paused: AtomicBool,
    transitions: Mutex<Vec<RunState>>,
}

impl ControlFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    /// Every state change reported so far, in order.
    pub fn transitions(&self) -> Vec<RunState> {
        match self.transitions.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl JobControl for ControlFlags {
    async fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    async fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    async fn on_state_change(&self, state: RunState) {
        let mut guard = match self.transitions.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(state);
    }
}

/// Reads pause/cancel requests from the persisted job status.
///
/// A job that vanished or cannot be read counts as cancelled, so a broken
/// job store stops the run instead of letting it continue unsupervised.
#[derive(Debug, Clone)]
pub struct JobStoreControl {
    jobs: MigrationJobStore,
    job_id: String,
}

impl JobStoreControl {
    pub fn new(jobs: MigrationJobStore, job_id: impl Into<String>) -> Self {
        Self {
            jobs,
            job_id: job_id.into(),
        }
    }

    fn status(&self) -> Option<JobStatus> {
        match self.jobs.get_status(&self.job_id) {
            Ok(status) => status,
            Err(e) => {
                log::error!("Failed to read status of job {}: {}", self.job_id, e);
                None
            }
        }
    }
}

#[async_trait]
impl JobControl for JobStoreControl {
    async fn is_cancelled(&self) -> bool {
        !matches!(
            self.status(),
            Some(JobStatus::Pending | JobStatus::Running | JobStatus::Paused)
        )
    }

    async fn is_paused(&self) -> bool {
        self.status() == Some(JobStatus::Paused)
    }

    async fn on_state_change(&self, state: RunState) {
        let message = match state {
            RunState::Paused => "Paused",
            RunState::Running => "Resumed",
        };
        log::info!("Migration job {} {}", self.job_id, message.to_lowercase());
        if let Ok(Some(job)) = self.jobs.get_job(&self.job_id) {
            if let Err(e) = self.jobs.update_progress(&self.job_id, job.progress, message) {
                log::error!("Failed to record state change for job {}: {}", self.job_id, e);
            }
        }
    }
}
