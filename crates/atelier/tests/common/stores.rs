//! Instrumented doubles for the storage, catalog and progress seams.

#![allow(dead_code)]

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use atelier::db::{CatalogItem, CatalogStore, DatabaseError, FilePathUpdate, Selection};
use atelier::error::StorageError;
use atelier::migration::{ControlFlags, MigrationStats, ProgressSink};
use atelier::storage::{ContentStore, CopyOutcome, DirEntry, LocalContentStore};

/// Local filesystem store that counts writes and can slow down or corrupt
/// transfers.
#[derive(Debug, Default)]
pub struct RecordingStore {
    inner: LocalContentStore,
    writes: AtomicUsize,
    delay: Duration,
    truncate_copies_to: Option<u64>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps this long in every rename and copy.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Truncates every fresh copy to `len` bytes after writing it.
    pub fn truncating_copies(mut self, len: u64) -> Self {
        self.truncate_copies_to = Some(len);
        self
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    fn pause(&self) {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
    }
}

impl ContentStore for RecordingStore {
    fn is_dir(&self, path: &Path) -> bool {
        self.inner.is_dir(path)
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<DirEntry>, StorageError> {
        self.inner.list_dir(path)
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), StorageError> {
        self.record_write();
        self.inner.create_dir_all(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), StorageError> {
        self.record_write();
        self.pause();
        self.inner.rename(from, to)
    }

    fn copy_new(&self, from: &Path, to: &Path) -> Result<CopyOutcome, StorageError> {
        self.record_write();
        self.pause();
        let outcome = self.inner.copy_new(from, to)?;
        if let (CopyOutcome::Copied, Some(len)) = (outcome, self.truncate_copies_to) {
            let file = OpenOptions::new()
                .write(true)
                .open(to)
                .expect("Failed to open copy");
            file.set_len(len).expect("Failed to truncate copy");
        }
        Ok(outcome)
    }

    fn remove_file(&self, path: &Path) -> Result<(), StorageError> {
        self.record_write();
        self.inner.remove_file(path)
    }

    fn remove_empty_dir(&self, path: &Path) -> Result<(), StorageError> {
        self.record_write();
        self.inner.remove_empty_dir(path)
    }

    fn file_size(&self, path: &Path) -> Result<u64, StorageError> {
        self.inner.file_size(path)
    }
}

/// Catalog whose file path updates always fail.
pub struct FailingCatalog {
    inner: Arc<dyn CatalogStore>,
}

impl FailingCatalog {
    pub fn new(inner: Arc<dyn CatalogStore>) -> Self {
        Self { inner }
    }
}

impl CatalogStore for FailingCatalog {
    fn find_item(&self, id: i64) -> Result<Option<CatalogItem>, DatabaseError> {
        self.inner.find_item(id)
    }

    fn count(&self, selection: &Selection) -> Result<u64, DatabaseError> {
        self.inner.count(selection)
    }

    fn find_candidates(
        &self,
        selection: &Selection,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<CatalogItem>, DatabaseError> {
        self.inner.find_candidates(selection, after_id, limit)
    }

    fn find_by_ids(
        &self,
        selection: &Selection,
        ids: &[i64],
    ) -> Result<Vec<CatalogItem>, DatabaseError> {
        self.inner.find_by_ids(selection, ids)
    }

    fn update_file_paths(
        &self,
        item_id: i64,
        _updates: &[FilePathUpdate],
    ) -> Result<(), DatabaseError> {
        Err(DatabaseError::NotFound {
            entity: "artwork_file",
            id: item_id.to_string(),
        })
    }
}

/// What the orchestrator should do to its own control flags from inside a
/// progress callback.
#[derive(Debug, Clone, Copy)]
pub enum Trigger {
    Pause,
    Cancel,
}

/// Records every callback; optionally flips control flags after N items.
#[derive(Default)]
pub struct RecordingSink {
    snapshots: Mutex<Vec<MigrationStats>>,
    lines: Mutex<Vec<String>>,
    batches: Mutex<Vec<i64>>,
    trigger: Option<(u64, Trigger, Arc<ControlFlags>)>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn triggering(after: u64, trigger: Trigger, flags: Arc<ControlFlags>) -> Self {
        Self {
            trigger: Some((after, trigger, flags)),
            ..Self::default()
        }
    }

    pub fn snapshots(&self) -> Vec<MigrationStats> {
        self.snapshots.lock().unwrap().clone()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().clone()
    }

    pub fn batches(&self) -> Vec<i64> {
        self.batches.lock().unwrap().clone()
    }

    pub fn processed(&self) -> u64 {
        self.snapshots().last().map(|s| s.processed).unwrap_or(0)
    }
}

impl ProgressSink for RecordingSink {
    fn on_progress(&self, stats: &MigrationStats, lines: &[String]) {
        self.snapshots.lock().unwrap().push(*stats);
        self.lines.lock().unwrap().extend_from_slice(lines);

        if let Some((after, trigger, flags)) = &self.trigger {
            if stats.processed == *after {
                match trigger {
                    Trigger::Pause => flags.pause(),
                    Trigger::Cancel => flags.cancel(),
                }
            }
        }
    }

    fn on_batch_complete(&self, cursor: i64, _stats: &MigrationStats) {
        self.batches.lock().unwrap().push(cursor);
    }
}
