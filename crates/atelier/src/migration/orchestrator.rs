//! Walks the candidate set in batches and runs a bounded pool of workers per
//! batch.
//!
//! Workers pull indexes from a shared counter and send results over a
//! channel; the orchestrator is the only place stats are updated.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::types::Value;
use tokio::sync::mpsc;
use tracing::{info_span, Instrument, Span};

use crate::db::{CatalogItem, CatalogStore, Selection};

use super::control::{JobControl, RunState};
use super::error::MigrationError;
use super::filters;
use super::migrator::ItemMigrator;
use super::progress::ProgressSink;
use super::types::{
    FailedItem, ItemStatus, MigrationReport, MigrationResult, MigrationStats, RunOptions,
    SafetyOptions,
};

/// Shared pause bookkeeping, so workers that pause together report a single
/// Paused/Running pair.
#[derive(Debug, Default)]
struct PauseGate {
    waiting: AtomicUsize,
}

impl PauseGate {
    /// Blocks while paused. Returns false when the run must stop.
    async fn checkpoint(&self, control: &dyn JobControl, poll_interval: Duration) -> bool {
        if control.is_cancelled().await {
            return false;
        }
        if !control.is_paused().await {
            return true;
        }

        if self.waiting.fetch_add(1, Ordering::SeqCst) == 0 {
            log::info!("Migration paused");
            control.on_state_change(RunState::Paused).await;
        }

        let keep_going = loop {
            tokio::time::sleep(poll_interval).await;
            if control.is_cancelled().await {
                break false;
            }
            if !control.is_paused().await {
                break true;
            }
        };

        if self.waiting.fetch_sub(1, Ordering::SeqCst) == 1 && keep_going {
            log::info!("Migration resumed");
            control.on_state_change(RunState::Running).await;
        }
        keep_going
    }
}

/// Owns the totals for one run.
struct Aggregate {
    stats: MigrationStats,
    failed_items: Vec<FailedItem>,
}

impl Aggregate {
    fn new(total: u64) -> Self {
        Self {
            stats: MigrationStats::new(total),
            failed_items: Vec::new(),
        }
    }

    fn record(&mut self, result: MigrationResult, progress: &dyn ProgressSink) {
        self.stats.record(result.status);
        // Items that became eligible after the count was taken.
        if self.stats.processed > self.stats.total {
            self.stats.total = self.stats.processed;
        }

        let prefix = result.log_prefix();
        let lines: Vec<String> = result
            .logs
            .iter()
            .map(|line| format!("{} {}", prefix, line))
            .collect();

        if result.status == ItemStatus::Failed {
            self.failed_items.push(FailedItem {
                id: result.item_id,
                external_id: result.external_id,
                logs: result.logs,
            });
        }

        progress.on_progress(&self.stats, &lines);
    }

    fn report(&self) -> MigrationReport {
        MigrationReport {
            stats: self.stats,
            failed_items: self.failed_items.clone(),
        }
    }

    fn cancelled(&self) -> MigrationError {
        log::info!(
            "Migration cancelled after {} of {} items",
            self.stats.processed,
            self.stats.total
        );
        MigrationError::Cancelled {
            report: self.report(),
        }
    }
}

/// Everything a worker needs, shared across one batch.
#[derive(Clone)]
struct Worker {
    migrator: Arc<ItemMigrator>,
    control: Arc<dyn JobControl>,
    gate: Arc<PauseGate>,
    safety: SafetyOptions,
    poll_interval: Duration,
    ids: Arc<Vec<i64>>,
    next: Arc<AtomicUsize>,
}

impl Worker {
    async fn run(self, worker_id: usize, results: mpsc::UnboundedSender<MigrationResult>) {
        log::debug!("Worker {} started", worker_id);

        loop {
            if !self
                .gate
                .checkpoint(self.control.as_ref(), self.poll_interval)
                .await
            {
                log::debug!("Worker {} stopping: cancelled", worker_id);
                break;
            }

            let index = self.next.fetch_add(1, Ordering::SeqCst);
            let Some(&item_id) = self.ids.get(index) else {
                break;
            };

            let migrator = Arc::clone(&self.migrator);
            let safety = self.safety.clone();
            let span = Span::current();
            let task = move || span.in_scope(|| migrator.migrate(item_id, &safety));
            let result = match tokio::task::spawn_blocking(task).await {
                Ok(result) => result,
                Err(e) => {
                    log::error!("Worker {} item {} panicked: {}", worker_id, item_id, e);
                    MigrationResult::failed(
                        item_id,
                        None,
                        vec![format!("Migration task panicked: {}", e)],
                    )
                }
            };

            if results.send(result).is_err() {
                log::error!("Worker {} failed to send result", worker_id);
                break;
            }
        }

        log::debug!("Worker {} stopped", worker_id);
    }
}

pub struct Orchestrator {
    catalog: Arc<dyn CatalogStore>,
    migrator: Arc<ItemMigrator>,
}

impl Orchestrator {
    pub fn new(catalog: Arc<dyn CatalogStore>, migrator: Arc<ItemMigrator>) -> Self {
        Self { catalog, migrator }
    }

    /// Runs a migration to completion.
    ///
    /// Returns [`MigrationError::Cancelled`] with the partial report when
    /// cancellation is requested; items already in flight finish first.
    pub async fn run(
        &self,
        options: &RunOptions,
        control: Arc<dyn JobControl>,
        progress: &dyn ProgressSink,
    ) -> Result<MigrationReport, MigrationError> {
        let mode = if options.ids.is_some() { "ids" } else { "scan" };
        let span = info_span!("migration_run",
            mode,
            batch_size = options.effective_batch_size(),
            concurrency = options.concurrency,
        );
        async {
            let selection = filters::candidate_selection(&options.filters);
            let gate = Arc::new(PauseGate::default());

            let aggregate = match &options.ids {
                Some(ids) => {
                    self.run_ids(ids, &selection, options, &control, &gate, progress)
                        .await?
                }
                None => {
                    self.run_scan(&selection, options, &control, &gate, progress)
                        .await?
                }
            };

            let report = aggregate.report();
            log::info!(
                "Migration finished: {} processed, {} migrated, {} skipped, {} failed",
                report.stats.processed,
                report.stats.success,
                report.stats.skipped,
                report.stats.failed
            );
            Ok::<_, MigrationError>(report)
        }
        .instrument(span)
        .await
    }

    async fn run_ids(
        &self,
        ids: &[i64],
        selection: &Selection,
        options: &RunOptions,
        control: &Arc<dyn JobControl>,
        gate: &Arc<PauseGate>,
        progress: &dyn ProgressSink,
    ) -> Result<Aggregate, MigrationError> {
        let mut ids = ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let batch_size = options.effective_batch_size();
        // Counted per batch so the bound id list stays under SQLite's
        // variable limit.
        let mut total = 0;
        for chunk in ids.chunks(batch_size) {
            total += self.catalog.count(&selection.clone().with_ids(chunk))?;
        }
        let mut aggregate = Aggregate::new(total);
        log::info!("Migrating {} of {} requested items", total, ids.len());

        for chunk in ids.chunks(batch_size) {
            if !gate
                .checkpoint(control.as_ref(), options.pause_poll_interval)
                .await
            {
                return Err(aggregate.cancelled());
            }

            let items = self.catalog.find_by_ids(selection, chunk)?;
            self.run_batch(items, options, control, gate, &mut aggregate, progress)
                .await?;

            if control.is_cancelled().await {
                return Err(aggregate.cancelled());
            }
        }

        Ok(aggregate)
    }

    async fn run_scan(
        &self,
        selection: &Selection,
        options: &RunOptions,
        control: &Arc<dyn JobControl>,
        gate: &Arc<PauseGate>,
        progress: &dyn ProgressSink,
    ) -> Result<Aggregate, MigrationError> {
        let start_after = options.start_after_id.unwrap_or(0);
        let counted = if start_after > 0 {
            selection
                .clone()
                .and("a.id > ?", [Value::Integer(start_after)])
        } else {
            selection.clone()
        };

        let total = self.catalog.count(&counted)?;
        let mut aggregate = Aggregate::new(total);
        log::info!("Migrating {} eligible items after id {}", total, start_after);

        let mut cursor = start_after;
        loop {
            if !gate
                .checkpoint(control.as_ref(), options.pause_poll_interval)
                .await
            {
                return Err(aggregate.cancelled());
            }

            let items =
                self.catalog
                    .find_candidates(selection, cursor, options.effective_batch_size())?;
            let Some(last_id) = items.last().map(|item| item.id) else {
                break;
            };

            let drained = self
                .run_batch(items, options, control, gate, &mut aggregate, progress)
                .await?;
            if !drained {
                return Err(aggregate.cancelled());
            }

            cursor = last_id;
            progress.on_batch_complete(cursor, &aggregate.stats);

            if control.is_cancelled().await {
                return Err(aggregate.cancelled());
            }
        }

        Ok(aggregate)
    }

    /// Runs one batch. Returns whether every item in it was processed.
    async fn run_batch(
        &self,
        items: Vec<CatalogItem>,
        options: &RunOptions,
        control: &Arc<dyn JobControl>,
        gate: &Arc<PauseGate>,
        aggregate: &mut Aggregate,
        progress: &dyn ProgressSink,
    ) -> Result<bool, MigrationError> {
        if items.is_empty() {
            return Ok(true);
        }

        let ids: Vec<i64> = items.iter().map(|item| item.id).collect();
        let batch_len = ids.len();
        let known: HashMap<i64, Option<String>> = items
            .into_iter()
            .map(|item| (item.id, item.external_id))
            .collect();

        let worker = Worker {
            migrator: Arc::clone(&self.migrator),
            control: Arc::clone(control),
            gate: Arc::clone(gate),
            safety: options.safety.clone(),
            poll_interval: options.pause_poll_interval,
            ids: Arc::new(ids),
            next: Arc::new(AtomicUsize::new(0)),
        };

        let worker_count = options.concurrency.max(1).min(batch_len);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handles: Vec<_> = (0..worker_count)
            .map(|worker_id| {
                tokio::spawn(worker.clone().run(worker_id, tx.clone()).in_current_span())
            })
            .collect();
        drop(tx);

        let mut received = 0usize;
        while let Some(mut result) = rx.recv().await {
            if result.external_id.is_none() {
                result.external_id = known.get(&result.item_id).cloned().flatten();
            }
            aggregate.record(result, progress);
            received += 1;
        }

        for handle in handles {
            if let Err(e) = handle.await {
                return Err(MigrationError::WorkerPanicked(e.to_string()));
            }
        }

        Ok(received == batch_len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::control::ControlFlags;

    #[tokio::test]
    async fn test_gate_passes_when_running() {
        let gate = PauseGate::default();
        let flags = ControlFlags::new();
        assert!(gate.checkpoint(&flags, Duration::from_millis(5)).await);
        assert!(flags.transitions().is_empty());
    }

    #[tokio::test]
    async fn test_gate_stops_when_cancelled() {
        let gate = PauseGate::default();
        let flags = ControlFlags::new();
        flags.cancel();
        assert!(!gate.checkpoint(&flags, Duration::from_millis(5)).await);
    }

    #[tokio::test]
    async fn test_gate_reports_one_pause_pair() {
        let gate = Arc::new(PauseGate::default());
        let flags = Arc::new(ControlFlags::new());
        flags.pause();

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let flags = Arc::clone(&flags);
                tokio::spawn(async move {
                    gate.checkpoint(flags.as_ref(), Duration::from_millis(5))
                        .await
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(50)).await;
        flags.resume();

        for waiter in waiters {
            assert!(waiter.await.unwrap());
        }
        assert_eq!(
            flags.transitions(),
            vec![RunState::Paused, RunState::Running]
        );
    }

    #[tokio::test]
    async fn test_gate_cancel_while_paused() {
        let gate = Arc::new(PauseGate::default());
        let flags = Arc::new(ControlFlags::new());
        flags.pause();

        let waiter = {
            let gate = Arc::clone(&gate);
            let flags = Arc::clone(&flags);
            tokio::spawn(async move {
                gate.checkpoint(flags.as_ref(), Duration::from_millis(5))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        flags.cancel();

        assert!(!waiter.await.unwrap());
        assert_eq!(flags.transitions(), vec![RunState::Paused]);
    }
}
