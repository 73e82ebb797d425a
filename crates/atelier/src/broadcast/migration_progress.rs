//! Migration progress broadcaster for real-time job status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::migration::MigrationStats;

/// Lifecycle of a migration job.
///
/// `Pending → Running → (Paused ⇄ Running) → Completed | Failed | Cancelled`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "paused" => Some(JobStatus::Paused),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress event for a migration job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationProgressEvent {
    pub job_id: String,
    pub status: JobStatus,
    pub stats: MigrationStats,
    /// Whole percent processed.
    pub progress: u8,
    pub message: String,
    /// Per-item log lines since the previous event, already prefixed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl MigrationProgressEvent {
    pub fn new(job_id: &str, status: JobStatus, stats: MigrationStats, message: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            status,
            stats,
            progress: stats.percent(),
            message: message.to_string(),
            lines: Vec::new(),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_lines(mut self, lines: Vec<String>) -> Self {
        self.lines = lines;
        self
    }

    pub fn failed(job_id: &str, stats: MigrationStats, error: &str) -> Self {
        let mut event = Self::new(job_id, JobStatus::Failed, stats, "Migration failed");
        event.error = Some(error.to_string());
        event
    }
}

/// Broadcasts migration progress events to any number of subscribers.
#[derive(Clone)]
pub struct MigrationProgressBroadcaster {
    sender: Arc<broadcast::Sender<MigrationProgressEvent>>,
}

impl MigrationProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends an event to all subscribers. Never blocks.
    pub fn send(&self, event: MigrationProgressEvent) {
        // No active receivers is fine
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MigrationProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for MigrationProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for MigrationProgressBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationProgressBroadcaster")
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}
