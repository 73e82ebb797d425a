//! Runs migration jobs in the background and routes control requests.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info_span, Instrument};

use crate::broadcast::{
    JobStatus, MigrationJob, MigrationJobStore, MigrationProgressBroadcaster,
    MigrationProgressEvent, NewMigrationJob,
};
use crate::config::{Config, MigrationConfig};
use crate::db::{CatalogStore, Database, SqliteCatalog};
use crate::error::ConfigError;
use crate::storage::{ContentStore, LocalContentStore};

use super::control::{JobControl, JobStoreControl};
use super::error::MigrationError;
use super::filters;
use super::migrator::ItemMigrator;
use super::orchestrator::Orchestrator;
use super::progress::JobProgressSink;
use super::types::{
    MigrationFilters, MigrationReport, MigrationStats, Precheck, RunOptions, SafetyOptions,
};

/// What to migrate. Unset options fall back to the configured defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MigrationRequest {
    /// Explicit item ids; when set, `filters` only narrows this list.
    pub ids: Option<Vec<i64>>,
    pub filters: MigrationFilters,
    pub safety: Option<SafetyOptions>,
    pub batch_size: Option<usize>,
    pub concurrency: Option<usize>,
}

type ActiveJobs = Arc<Mutex<HashSet<String>>>;

fn lock(active: &ActiveJobs) -> MutexGuard<'_, HashSet<String>> {
    match active.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Marks a job as executing in this process until dropped.
struct ActiveJob {
    active: ActiveJobs,
    id: String,
}

impl ActiveJob {
    fn claim(active: &ActiveJobs, id: &str) -> Result<Self, MigrationError> {
        if !lock(active).insert(id.to_string()) {
            return Err(MigrationError::JobAlreadyActive(id.to_string()));
        }
        Ok(Self {
            active: Arc::clone(active),
            id: id.to_string(),
        })
    }
}

impl Drop for ActiveJob {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.id);
    }
}

/// Owns everything a job needs and spawns its execution on the tokio runtime.
///
/// Cloning is cheap; clones share the job store, broadcaster and the set of
/// jobs currently executing.
#[derive(Clone)]
pub struct MigrationRunner {
    catalog: Arc<dyn CatalogStore>,
    content: Arc<dyn ContentStore>,
    jobs: MigrationJobStore,
    broadcaster: MigrationProgressBroadcaster,
    settings: MigrationConfig,
    content_root: Option<PathBuf>,
    active: ActiveJobs,
}

impl MigrationRunner {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        content: Arc<dyn ContentStore>,
        jobs: MigrationJobStore,
        broadcaster: MigrationProgressBroadcaster,
        settings: MigrationConfig,
        content_root: Option<PathBuf>,
    ) -> Self {
        Self {
            catalog,
            content,
            jobs,
            broadcaster,
            settings,
            content_root,
            active: Arc::default(),
        }
    }

    /// Production constructor: SQLite catalog and job store over `db`, local
    /// filesystem content.
    pub fn from_config(config: &Config, db: Database) -> Self {
        Self::new(
            Arc::new(SqliteCatalog::new(db.clone())),
            Arc::new(LocalContentStore::new()),
            MigrationJobStore::new(db),
            MigrationProgressBroadcaster::default(),
            config.migration.clone(),
            config.content_root_path(),
        )
    }

    /// Opens the configured database (creating and migrating it if needed)
    /// and builds a runner over it.
    pub fn open(config: &Config) -> crate::Result<Self> {
        let path = config
            .resolved_database_path()
            .ok_or_else(|| ConfigError::Validation {
                message: "No database_path configured and no home directory found".to_string(),
            })?;
        let db = Database::open(&path)?;
        log::info!("Opened catalog database");
        Ok(Self::from_config(config, db))
    }

    pub fn jobs(&self) -> &MigrationJobStore {
        &self.jobs
    }

    pub fn broadcaster(&self) -> &MigrationProgressBroadcaster {
        &self.broadcaster
    }

    pub fn precheck(&self, filters: &MigrationFilters) -> Result<Precheck, MigrationError> {
        Ok(filters::precheck(self.catalog.as_ref(), filters)?)
    }

    /// Creates a job and runs it in the background. Returns the job id.
    pub async fn start(&self, request: MigrationRequest) -> Result<String, MigrationError> {
        let job = self.jobs.create_job(&NewMigrationJob {
            filters: request.filters,
            safety: request
                .safety
                .unwrap_or_else(|| self.settings.safety.clone()),
            target_ids: request.ids,
            batch_size: request.batch_size.unwrap_or(self.settings.batch_size),
            concurrency: request.concurrency.unwrap_or(self.settings.concurrency),
        })?;
        self.spawn(job.id.clone(), None);
        Ok(job.id)
    }

    /// Restarts a paused, failed, cancelled or interrupted job.
    ///
    /// Scan jobs continue after their last completed batch. Id-list jobs run
    /// their whole list again; items already migrated are skipped.
    pub async fn resume(&self, job_id: &str) -> Result<(), MigrationError> {
        if lock(&self.active).contains(job_id) {
            return Err(MigrationError::JobAlreadyActive(job_id.to_string()));
        }
        let job = self
            .jobs
            .get_job(job_id)?
            .ok_or_else(|| MigrationError::JobNotFound(job_id.to_string()))?;
        if job.status == JobStatus::Running {
            log::warn!("Migration job {} was interrupted, resuming", job_id);
        }
        if !self.jobs.reopen(job_id)? {
            return Err(self.rejected(job_id, "resume"));
        }

        let start_after_id = match job.target_ids {
            Some(_) => None,
            None => job.cursor,
        };
        self.spawn(job.id, start_after_id);
        Ok(())
    }

    fn spawn(&self, job_id: String, start_after_id: Option<i64>) {
        let runner = self.clone();
        tokio::spawn(async move {
            if let Err(e) = runner.run_job(&job_id, start_after_id).await {
                if !e.is_cancelled() {
                    log::error!("Migration job {} ended: {}", job_id, e);
                }
            }
        });
    }

    /// Runs a pending job to a terminal state and records the outcome.
    pub async fn run_job(
        &self,
        job_id: &str,
        start_after_id: Option<i64>,
    ) -> Result<MigrationReport, MigrationError> {
        let _active = ActiveJob::claim(&self.active, job_id)?;
        let job = self
            .jobs
            .get_job(job_id)?
            .ok_or_else(|| MigrationError::JobNotFound(job_id.to_string()))?;
        if !self.jobs.mark_running(job_id)? {
            return Err(MigrationError::InvalidTransition {
                id: job_id.to_string(),
                action: "start",
                status: job.status.to_string(),
            });
        }
        self.broadcaster.send(MigrationProgressEvent::new(
            job_id,
            JobStatus::Running,
            MigrationStats::default(),
            "Migration started",
        ));

        let span = info_span!("migration_job", job_id = %job_id);
        let outcome = self
            .execute(&job, start_after_id)
            .instrument(span)
            .await;
        self.record_outcome(job_id, &outcome);
        outcome
    }

    async fn execute(
        &self,
        job: &MigrationJob,
        start_after_id: Option<i64>,
    ) -> Result<MigrationReport, MigrationError> {
        let root = self
            .content_root
            .clone()
            .ok_or(MigrationError::ContentRootUnset)?;
        if !self.content.is_dir(&root) {
            return Err(MigrationError::ContentRootMissing { path: root });
        }

        let migrator =
            ItemMigrator::new(Arc::clone(&self.catalog), Arc::clone(&self.content), root)
                .with_junk_files(self.settings.junk_files.clone());
        let orchestrator = Orchestrator::new(Arc::clone(&self.catalog), Arc::new(migrator));

        let options = RunOptions {
            ids: job.target_ids.clone(),
            batch_size: job.batch_size,
            concurrency: job.concurrency,
            start_after_id,
            filters: job.filters.clone(),
            safety: job.safety.clone(),
            pause_poll_interval: Duration::from_millis(self.settings.pause_poll_interval_ms),
        };
        let control: Arc<dyn JobControl> =
            Arc::new(JobStoreControl::new(self.jobs.clone(), &job.id));
        let sink = JobProgressSink::new(
            self.jobs.clone(),
            self.broadcaster.clone(),
            &job.id,
            self.settings.progress_persist_every,
        );

        orchestrator.run(&options, control, &sink).await
    }

    fn record_outcome(&self, job_id: &str, outcome: &Result<MigrationReport, MigrationError>) {
        let (persisted, event) = match outcome {
            Ok(report) => (
                self.jobs.complete_job(job_id, report),
                MigrationProgressEvent::new(
                    job_id,
                    JobStatus::Completed,
                    report.stats,
                    "Migration completed",
                ),
            ),
            Err(MigrationError::Cancelled { report }) => (
                self.jobs.mark_cancelled(job_id, report),
                MigrationProgressEvent::new(
                    job_id,
                    JobStatus::Cancelled,
                    report.stats,
                    "Migration cancelled",
                ),
            ),
            Err(e) => {
                let message = e.to_string();
                (
                    self.jobs.fail_job(job_id, &message),
                    MigrationProgressEvent::failed(job_id, MigrationStats::default(), &message),
                )
            }
        };

        if let Err(e) = persisted {
            log::error!("Failed to record outcome of job {}: {}", job_id, e);
        }
        self.broadcaster.send(event);
    }

    pub fn request_pause(&self, job_id: &str) -> Result<(), MigrationError> {
        if self.jobs.request_pause(job_id)? {
            log::info!("Pause requested for migration job {}", job_id);
            Ok(())
        } else {
            Err(self.rejected(job_id, "pause"))
        }
    }

    pub fn request_resume(&self, job_id: &str) -> Result<(), MigrationError> {
        if self.jobs.request_resume(job_id)? {
            log::info!("Resume requested for migration job {}", job_id);
            Ok(())
        } else {
            Err(self.rejected(job_id, "resume"))
        }
    }

    pub fn request_cancel(&self, job_id: &str) -> Result<(), MigrationError> {
        if self.jobs.request_cancel(job_id)? {
            log::info!("Cancel requested for migration job {}", job_id);
            Ok(())
        } else {
            Err(self.rejected(job_id, "cancel"))
        }
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<MigrationJob>, MigrationError> {
        Ok(self.jobs.get_job(job_id)?)
    }

    pub fn list_jobs(&self, limit: u64) -> Result<Vec<MigrationJob>, MigrationError> {
        Ok(self.jobs.list_jobs(limit)?)
    }

    pub fn is_active(&self, job_id: &str) -> bool {
        lock(&self.active).contains(job_id)
    }

    fn rejected(&self, job_id: &str, action: &'static str) -> MigrationError {
        match self.jobs.get_status(job_id) {
            Ok(Some(status)) => MigrationError::InvalidTransition {
                id: job_id.to_string(),
                action,
                status: status.to_string(),
            },
            Ok(None) => MigrationError::JobNotFound(job_id.to_string()),
            Err(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::artwork_repo::{self, NewArtwork};
    use tempfile::TempDir;
    use tokio::sync::broadcast::Receiver;

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        db: Database,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let root = dir.path().to_path_buf();
            let db = Database::open_in_memory().unwrap();
            artwork_repo::upsert_user(&db, "u1", "Ada").unwrap();
            Self {
                _dir: dir,
                root,
                db,
            }
        }

        fn seed(&self, id: i64) {
            let external_id = format!("a{}", id);
            artwork_repo::insert_artwork(
                &self.db,
                &NewArtwork {
                    id: Some(id),
                    user_id: Some("u1".to_string()),
                    external_id: Some(external_id.clone()),
                    title: format!("Artwork {}", id),
                    created_at: "2026-01-01T00:00:00Z".to_string(),
                    ..Default::default()
                },
            )
            .unwrap();
            let relative = format!("old/{}_p0.jpg", external_id);
            std::fs::create_dir_all(self.root.join("old")).unwrap();
            std::fs::write(self.root.join(&relative), b"data").unwrap();
            artwork_repo::insert_file(&self.db, id, &relative, 4, 0).unwrap();
        }

        fn runner(&self, content_root: Option<PathBuf>) -> MigrationRunner {
            let settings = MigrationConfig {
                pause_poll_interval_ms: 10,
                ..Default::default()
            };
            MigrationRunner::new(
                Arc::new(SqliteCatalog::new(self.db.clone())),
                Arc::new(LocalContentStore::new()),
                MigrationJobStore::new(self.db.clone()),
                MigrationProgressBroadcaster::new(64),
                settings,
                content_root,
            )
        }
    }

    async fn wait_terminal(rx: &mut Receiver<MigrationProgressEvent>) -> MigrationProgressEvent {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let event = rx.recv().await.unwrap();
                if event.status.is_terminal() {
                    return event;
                }
            }
        })
        .await
        .expect("job did not finish")
    }

    #[test]
    fn test_open_creates_database() {
        let dir = TempDir::new().unwrap();
        let config = crate::config::load_config_from_str(&format!(
            r#"{{"version": "1.0", "database_path": {:?}}}"#,
            dir.path().join("data").join("atelier.db")
        ))
        .unwrap();

        let runner = MigrationRunner::open(&config).unwrap();
        assert!(runner.list_jobs(10).unwrap().is_empty());
        assert!(dir.path().join("data").join("atelier.db").exists());
    }

    #[tokio::test]
    async fn test_run_job_completes() {
        let fx = Fixture::new();
        fx.seed(1);
        fx.seed(2);
        let runner = fx.runner(Some(fx.root.clone()));
        let job = runner.jobs().create_job(&NewMigrationJob::default()).unwrap();

        let report = runner.run_job(&job.id, None).await.unwrap();
        assert_eq!(report.stats.total, 2);
        assert_eq!(report.stats.success, 2);
        assert!(fx.root.join("u1/a1/a1_p0.jpg").exists());

        let stored = runner.get_job(&job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.progress, 100);
        assert_eq!(stored.result, Some(report));
        assert_eq!(stored.cursor, Some(2));
        assert!(!runner.is_active(&job.id));
    }

    #[tokio::test]
    async fn test_missing_content_root_fails_job() {
        let fx = Fixture::new();
        fx.seed(1);
        let runner = fx.runner(None);
        let job = runner.jobs().create_job(&NewMigrationJob::default()).unwrap();

        let err = runner.run_job(&job.id, None).await.unwrap_err();
        assert!(matches!(err, MigrationError::ContentRootUnset));

        let stored = runner.get_job(&job.id).unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("Content root is not configured"));
        assert!(fx.root.join("old/a1_p0.jpg").exists());
    }

    #[tokio::test]
    async fn test_nonexistent_content_root_fails_job() {
        let fx = Fixture::new();
        let runner = fx.runner(Some(fx.root.join("missing")));
        let job = runner.jobs().create_job(&NewMigrationJob::default()).unwrap();

        let err = runner.run_job(&job.id, None).await.unwrap_err();
        assert!(matches!(err, MigrationError::ContentRootMissing { .. }));
    }

    #[tokio::test]
    async fn test_start_runs_in_background() {
        let fx = Fixture::new();
        fx.seed(1);
        let runner = fx.runner(Some(fx.root.clone()));
        let mut rx = runner.broadcaster().subscribe();

        let id = runner.start(MigrationRequest::default()).await.unwrap();
        let event = wait_terminal(&mut rx).await;

        assert_eq!(event.job_id, id);
        assert_eq!(event.status, JobStatus::Completed);
        assert_eq!(event.stats.success, 1);
    }

    #[tokio::test]
    async fn test_cancel_before_start_is_not_overridden() {
        let fx = Fixture::new();
        fx.seed(1);
        let runner = fx.runner(Some(fx.root.clone()));
        let job = runner.jobs().create_job(&NewMigrationJob::default()).unwrap();

        runner.request_cancel(&job.id).unwrap();
        let err = runner.run_job(&job.id, None).await.unwrap_err();

        assert!(matches!(err, MigrationError::InvalidTransition { action: "start", .. }));
        assert_eq!(
            runner.jobs().get_status(&job.id).unwrap(),
            Some(JobStatus::Cancelled)
        );
        assert!(fx.root.join("old/a1_p0.jpg").exists());
    }

    #[tokio::test]
    async fn test_control_requests_report_current_status() {
        let fx = Fixture::new();
        let runner = fx.runner(Some(fx.root.clone()));
        let job = runner.jobs().create_job(&NewMigrationJob::default()).unwrap();

        match runner.request_pause(&job.id).unwrap_err() {
            MigrationError::InvalidTransition { action, status, .. } => {
                assert_eq!(action, "pause");
                assert_eq!(status, "pending");
            }
            other => panic!("unexpected error: {}", other),
        }
        assert!(matches!(
            runner.request_resume("missing").unwrap_err(),
            MigrationError::JobNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_resume_rejects_completed_job() {
        let fx = Fixture::new();
        let runner = fx.runner(Some(fx.root.clone()));
        let job = runner.jobs().create_job(&NewMigrationJob::default()).unwrap();
        runner.run_job(&job.id, None).await.unwrap();

        let err = runner.resume(&job.id).await.unwrap_err();
        assert!(matches!(err, MigrationError::InvalidTransition { action: "resume", .. }));
        assert!(matches!(
            runner.resume("missing").await.unwrap_err(),
            MigrationError::JobNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_resume_continues_after_cursor() {
        let fx = Fixture::new();
        fx.seed(1);
        fx.seed(2);
        fx.seed(3);
        let runner = fx.runner(Some(fx.root.clone()));
        let job = runner.jobs().create_job(&NewMigrationJob::default()).unwrap();
        runner.jobs().mark_running(&job.id).unwrap();
        runner.jobs().set_cursor(&job.id, 1).unwrap();
        runner.jobs().fail_job(&job.id, "interrupted").unwrap();

        let mut rx = runner.broadcaster().subscribe();
        runner.resume(&job.id).await.unwrap();
        let event = wait_terminal(&mut rx).await;

        assert_eq!(event.status, JobStatus::Completed);
        assert_eq!(event.stats.total, 2);
        assert_eq!(event.stats.success, 2);
        assert!(fx.root.join("old/a1_p0.jpg").exists());
        assert!(fx.root.join("u1/a3/a3_p0.jpg").exists());
    }
}
