//! Migration job store with persistent database storage.
//!
//! The runner writes progress and terminal states here; the orchestrator's
//! job control polls it for pause and cancel requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::broadcast::migration_progress::JobStatus;
use crate::db::migration_job_repo::{self, MigrationJobRow};
use crate::db::{format_timestamp, parse_timestamp, Database, DatabaseError};
use crate::migration::{MigrationFilters, MigrationReport, SafetyOptions};

const REOPENABLE: &[&str] = &["paused", "failed", "cancelled", "running"];
const CANCELLABLE: &[&str] = &["pending", "running", "paused"];

fn now() -> String {
    format_timestamp(Utc::now())
}

fn parse_status(s: &str, job_id: &str) -> JobStatus {
    JobStatus::parse(s).unwrap_or_else(|| {
        log::warn!(
            "Unknown migration job status '{}' for job {}, treating as failed",
            s,
            job_id
        );
        JobStatus::Failed
    })
}

fn decode<T: serde::de::DeserializeOwned>(
    column: &'static str,
    raw: &str,
) -> Result<T, DatabaseError> {
    serde_json::from_str(raw).map_err(|source| DatabaseError::Json { column, source })
}

fn encode<T: Serialize>(column: &'static str, value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|source| DatabaseError::Json { column, source })
}

/// Settings for a new job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NewMigrationJob {
    pub filters: MigrationFilters,
    pub safety: SafetyOptions,
    pub target_ids: Option<Vec<i64>>,
    pub batch_size: usize,
    pub concurrency: usize,
}

/// A decoded `migration_jobs` row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationJob {
    pub id: String,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub filters: MigrationFilters,
    pub safety: SafetyOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_ids: Option<Vec<i64>>,
    pub batch_size: usize,
    pub concurrency: usize,
    /// Last fully processed scan batch boundary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<MigrationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl MigrationJob {
    fn from_row(row: MigrationJobRow) -> Result<Self, DatabaseError> {
        let target_ids = match row.target_ids.as_deref() {
            Some(raw) => Some(decode("target_ids", raw)?),
            None => None,
        };
        let result = match row.result.as_deref() {
            Some(raw) => Some(decode("result", raw)?),
            None => None,
        };

        Ok(Self {
            status: parse_status(&row.status, &row.id),
            progress: row.progress.clamp(0, 100) as u8,
            message: row.message,
            filters: decode("filters", &row.filters)?,
            safety: decode("safety", &row.safety)?,
            target_ids,
            batch_size: row.batch_size.max(1) as usize,
            concurrency: row.concurrency.max(1) as usize,
            cursor: row.cursor,
            result,
            error: row.error,
            created_at: parse_timestamp(&row.created_at),
            updated_at: parse_timestamp(&row.updated_at),
            completed_at: row.completed_at.as_deref().map(parse_timestamp),
            id: row.id,
        })
    }
}

/// Persistent migration job store backed by rusqlite.
///
/// Cloning is cheap; all clones share one [`Database`].
#[derive(Debug, Clone)]
pub struct MigrationJobStore {
    db: Database,
}

impl MigrationJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a `pending` job with a fresh UUID.
    pub fn create_job(&self, job: &NewMigrationJob) -> Result<MigrationJob, DatabaseError> {
        let created_at = now();
        let target_ids = match &job.target_ids {
            Some(ids) => Some(encode("target_ids", ids)?),
            None => None,
        };
        let row = MigrationJobRow {
            id: Uuid::new_v4().to_string(),
            status: JobStatus::Pending.as_str().to_string(),
            progress: 0,
            message: Some("Queued".to_string()),
            filters: encode("filters", &job.filters)?,
            safety: encode("safety", &job.safety)?,
            target_ids,
            batch_size: job.batch_size.max(1) as i64,
            concurrency: job.concurrency.max(1) as i64,
            cursor: None,
            result: None,
            error: None,
            created_at: created_at.clone(),
            updated_at: created_at,
            completed_at: None,
        };
        migration_job_repo::insert(&self.db, &row)?;
        log::info!("Created migration job {}", row.id);
        MigrationJob::from_row(row)
    }

    pub fn get_job(&self, id: &str) -> Result<Option<MigrationJob>, DatabaseError> {
        migration_job_repo::find_by_id(&self.db, id)?
            .map(MigrationJob::from_row)
            .transpose()
    }

    pub fn get_status(&self, id: &str) -> Result<Option<JobStatus>, DatabaseError> {
        Ok(migration_job_repo::find_status(&self.db, id)?.map(|s| parse_status(&s, id)))
    }

    /// Most recent jobs first.
    pub fn list_jobs(&self, limit: u64) -> Result<Vec<MigrationJob>, DatabaseError> {
        migration_job_repo::list(&self.db, limit)?
            .into_iter()
            .map(MigrationJob::from_row)
            .collect()
    }

    pub fn update_progress(&self, id: &str, percent: u8, message: &str) -> Result<(), DatabaseError> {
        migration_job_repo::update_progress(&self.db, id, i64::from(percent.min(100)), message, &now())
    }

    pub fn set_cursor(&self, id: &str, cursor: i64) -> Result<(), DatabaseError> {
        migration_job_repo::set_cursor(&self.db, id, cursor, &now())
    }

    /// `pending → running`. Returns false for any other current status.
    pub fn mark_running(&self, id: &str) -> Result<bool, DatabaseError> {
        migration_job_repo::transition_status(
            &self.db,
            id,
            &[JobStatus::Pending.as_str()],
            JobStatus::Running.as_str(),
            &now(),
        )
    }

    /// Puts a stopped or interrupted job back to `pending` and clears its
    /// previous outcome. Completed jobs cannot be reopened.
    pub fn reopen(&self, id: &str) -> Result<bool, DatabaseError> {
        let updated_at = now();
        let changed = migration_job_repo::transition_status(
            &self.db,
            id,
            REOPENABLE,
            JobStatus::Pending.as_str(),
            &updated_at,
        )?;
        if changed {
            migration_job_repo::clear_outcome(&self.db, id, &updated_at)?;
        }
        Ok(changed)
    }

    pub fn complete_job(&self, id: &str, report: &MigrationReport) -> Result<(), DatabaseError> {
        let result = encode("result", report)?;
        migration_job_repo::finish(
            &self.db,
            id,
            JobStatus::Completed.as_str(),
            Some(100),
            Some(&result),
            None,
            &now(),
        )
    }

    pub fn fail_job(&self, id: &str, message: &str) -> Result<(), DatabaseError> {
        migration_job_repo::finish(
            &self.db,
            id,
            JobStatus::Failed.as_str(),
            None,
            None,
            Some(message),
            &now(),
        )
    }

    /// Records the partial report of a cancelled run.
    pub fn mark_cancelled(&self, id: &str, report: &MigrationReport) -> Result<(), DatabaseError> {
        let result = encode("result", report)?;
        migration_job_repo::finish(
            &self.db,
            id,
            JobStatus::Cancelled.as_str(),
            Some(i64::from(report.stats.percent())),
            Some(&result),
            None,
            &now(),
        )
    }

    /// `running → paused`. Returns false for any other current status.
    pub fn request_pause(&self, id: &str) -> Result<bool, DatabaseError> {
        migration_job_repo::transition_status(
            &self.db,
            id,
            &[JobStatus::Running.as_str()],
            JobStatus::Paused.as_str(),
            &now(),
        )
    }

    /// `paused → running`. Returns false for any other current status.
    pub fn request_resume(&self, id: &str) -> Result<bool, DatabaseError> {
        migration_job_repo::transition_status(
            &self.db,
            id,
            &[JobStatus::Paused.as_str()],
            JobStatus::Running.as_str(),
            &now(),
        )
    }

    /// Any non-terminal status `→ cancelled`.
    pub fn request_cancel(&self, id: &str) -> Result<bool, DatabaseError> {
        migration_job_repo::transition_status(
            &self.db,
            id,
            CANCELLABLE,
            JobStatus::Cancelled.as_str(),
            &now(),
        )
    }
}
