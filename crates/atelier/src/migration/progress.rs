use crate::broadcast::{
    JobStatus, MigrationJobStore, MigrationProgressBroadcaster, MigrationProgressEvent,
};

use super::types::MigrationStats;

/// Receives aggregated stats as the orchestrator makes progress.
///
/// Reporting is best-effort: implementations log their own failures and
/// never fail the migration.
pub trait ProgressSink: Send + Sync {
    /// Called once per finished item with the updated totals and that item's
    /// log lines, already prefixed with `[externalId]` or `[#id]`.
    fn on_progress(&self, stats: &MigrationStats, lines: &[String]);

    /// Called after every fully drained scan batch with the highest id seen.
    fn on_batch_complete(&self, _cursor: i64, _stats: &MigrationStats) {}
}

/// No-op sink for unit tests and fire-and-forget runs.
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn on_progress(&self, _stats: &MigrationStats, _lines: &[String]) {}
}

fn progress_message(stats: &MigrationStats) -> String {
    format!(
        "Processed {} of {} ({} migrated, {} skipped, {} failed)",
        stats.processed, stats.total, stats.success, stats.skipped, stats.failed
    )
}

/// Publishes every callback on the broadcast channel.
pub struct BroadcastProgress {
    job_id: String,
    broadcaster: MigrationProgressBroadcaster,
}

impl BroadcastProgress {
    pub fn new(job_id: &str, broadcaster: MigrationProgressBroadcaster) -> Self {
        Self {
            job_id: job_id.to_string(),
            broadcaster,
        }
    }
}

impl ProgressSink for BroadcastProgress {
    fn on_progress(&self, stats: &MigrationStats, lines: &[String]) {
        self.broadcaster.send(
            MigrationProgressEvent::new(
                &self.job_id,
                JobStatus::Running,
                *stats,
                &progress_message(stats),
            )
            .with_lines(lines.to_vec()),
        );
    }
}

/// Broadcasts every callback and persists progress to the job store every
/// `persist_every` items and at every batch boundary.
pub struct JobProgressSink {
    jobs: MigrationJobStore,
    broadcast: BroadcastProgress,
    job_id: String,
    persist_every: u64,
}

impl JobProgressSink {
    pub fn new(
        jobs: MigrationJobStore,
        broadcaster: MigrationProgressBroadcaster,
        job_id: &str,
        persist_every: u64,
    ) -> Self {
        Self {
            jobs,
            broadcast: BroadcastProgress::new(job_id, broadcaster),
            job_id: job_id.to_string(),
            persist_every: persist_every.max(1),
        }
    }

    fn persist(&self, stats: &MigrationStats) {
        if let Err(e) =
            self.jobs
                .update_progress(&self.job_id, stats.percent(), &progress_message(stats))
        {
            log::error!("Failed to persist progress for job {}: {}", self.job_id, e);
        }
    }
}

impl ProgressSink for JobProgressSink {
    fn on_progress(&self, stats: &MigrationStats, lines: &[String]) {
        self.broadcast.on_progress(stats, lines);
        if stats.processed % self.persist_every == 0 {
            self.persist(stats);
        }
    }

    fn on_batch_complete(&self, cursor: i64, stats: &MigrationStats) {
        if let Err(e) = self.jobs.set_cursor(&self.job_id, cursor) {
            log::error!("Failed to persist cursor for job {}: {}", self.job_id, e);
        }
        self.persist(stats);
    }
}
