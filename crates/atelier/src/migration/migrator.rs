//! Relocates one item's files to `<ownerId>/<externalId>` and keeps the
//! catalog rows in step with the filesystem.
//!
//! The metadata transaction is the commit point. Everything before it is
//! undone on failure (renames reversed, fresh copies deleted); cleanup after
//! it is best-effort and only ever produces warnings.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info_span;

use crate::db::{CatalogItem, CatalogStore, FilePathUpdate};
use crate::sanitize;
use crate::storage::{paths, ContentStore, CopyOutcome};

use super::error::ItemError;
use super::types::{MigrationResult, SafetyOptions, TransferMode};

/// Files removed from an emptied source directory before it is deleted.
pub const DEFAULT_JUNK_FILES: &[&str] = &[".DS_Store", "Thumbs.db"];

/// Filesystem changes made so far for one item, in order.
#[derive(Debug, Default)]
struct Journal {
    renamed: Vec<(PathBuf, PathBuf)>,
    copied: Vec<(PathBuf, PathBuf)>,
}

impl Journal {
    fn is_empty(&self) -> bool {
        self.renamed.is_empty() && self.copied.is_empty()
    }
}

/// Where an item's files are and where they should go.
struct Layout<'a> {
    external_id: &'a str,
    source_dir: &'a str,
    source_abs: PathBuf,
    target_dir: String,
    target_abs: PathBuf,
}

pub struct ItemMigrator {
    catalog: Arc<dyn CatalogStore>,
    store: Arc<dyn ContentStore>,
    content_root: PathBuf,
    junk_files: Vec<String>,
}

impl ItemMigrator {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        store: Arc<dyn ContentStore>,
        content_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            catalog,
            store,
            content_root: content_root.into(),
            junk_files: DEFAULT_JUNK_FILES.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Replaces the junk file names removed during cleanup.
    pub fn with_junk_files(mut self, junk_files: Vec<String>) -> Self {
        self.junk_files = junk_files;
        self
    }

    /// Migrates one item. Never returns an error: failures are reported as a
    /// `FAILED` result with the reason in its logs.
    pub fn migrate(&self, item_id: i64, safety: &SafetyOptions) -> MigrationResult {
        let _item_span = info_span!("migrate_item",
            item_id,
            mode = %safety.transfer_mode,
        )
        .entered();
        let mut logs = Vec::new();

        let item = match self.catalog.find_item(item_id) {
            Ok(Some(item)) => item,
            Ok(None) => {
                logs.push("Item not found (incomplete data)".to_string());
                return MigrationResult::failed(item_id, None, logs);
            }
            Err(e) => {
                logs.push(format!("Failed to load item: {}", e));
                return MigrationResult::failed(item_id, None, logs);
            }
        };
        let external_id = item.external_id.clone();

        let (owner, ext) = match (&item.owner, &item.external_id) {
            (Some(owner), Some(ext)) if !item.files.is_empty() => (owner, ext.as_str()),
            _ => {
                logs.push("Incomplete data: owner, external id or files missing".to_string());
                return MigrationResult::failed(item_id, external_id, logs);
            }
        };

        let target_dir = paths::join(&owner.id, ext);
        let first_path = item.files[0].path.as_str();
        if first_path.starts_with(&format!("{}/", target_dir)) {
            logs.push(format!("Already in {}, nothing to do", target_dir));
            return MigrationResult::skipped(item_id, external_id, logs);
        }

        let source_dir = paths::parent_dir(first_path);
        let layout = match self.layout(ext, source_dir, target_dir) {
            Ok(layout) => layout,
            Err(e) => {
                logs.push(format!("Error: {}", e));
                return MigrationResult::failed(item_id, external_id, logs);
            }
        };

        if !self.store.is_dir(&layout.source_abs) {
            let _step = info_span!("self_heal").entered();
            return match self.try_self_heal(&item, &layout) {
                Ok(true) => {
                    logs.push(format!(
                        "Source directory missing but all files are in {}; metadata updated",
                        layout.target_dir
                    ));
                    MigrationResult::success(item_id, external_id, logs)
                }
                Ok(false) => {
                    logs.push(format!("Source directory not found: {}", layout.source_dir));
                    MigrationResult::failed(item_id, external_id, logs)
                }
                Err(e) => {
                    logs.push(format!("Error: {}", e));
                    MigrationResult::failed(item_id, external_id, logs)
                }
            };
        }

        let mut journal = Journal::default();
        let outcome = {
            let _step = info_span!("transfer",
                target = %sanitize::hash_path(&layout.target_abs),
            )
            .entered();
            self.transfer(&item, &layout, safety, &mut journal, &mut logs)
        };

        match outcome {
            Ok(()) => {
                if safety.cleanup_source {
                    let _step = info_span!("cleanup").entered();
                    self.cleanup(&layout, safety, &journal, &mut logs);
                }
                logs.push(format!("Migrated to {}", layout.target_dir));
                log::debug!("Item {} migrated to {}", item_id, layout.target_dir);
                MigrationResult::success(item_id, external_id, logs)
            }
            Err(e) => {
                log::warn!("Item {} failed: {}", item_id, e);
                {
                    let _step = info_span!("rollback").entered();
                    self.rollback(&journal, &mut logs);
                }
                logs.push(format!("Error: {}", e));
                MigrationResult::failed(item_id, external_id, logs)
            }
        }
    }

    fn layout<'a>(
        &self,
        external_id: &'a str,
        source_dir: &'a str,
        target_dir: String,
    ) -> Result<Layout<'a>, ItemError> {
        Ok(Layout {
            external_id,
            source_dir,
            source_abs: paths::resolve(&self.content_root, source_dir)?,
            target_abs: paths::resolve(&self.content_root, &target_dir)?,
            target_dir,
        })
    }

    /// Points every file row at the target when the files were already moved
    /// by an earlier, interrupted run. Makes no filesystem writes.
    fn try_self_heal(&self, item: &CatalogItem, layout: &Layout<'_>) -> Result<bool, ItemError> {
        if !self.store.is_dir(&layout.target_abs) {
            return Ok(false);
        }

        let present: HashSet<String> = self
            .store
            .list_dir(&layout.target_abs)?
            .into_iter()
            .filter(|e| e.is_file)
            .map(|e| e.name)
            .collect();
        let complete = item
            .files
            .iter()
            .all(|f| present.contains(paths::file_name(&f.path)));
        if !complete {
            return Ok(false);
        }

        self.catalog
            .update_file_paths(item.id, &canonical_updates(item, &layout.target_dir))?;
        Ok(true)
    }

    fn transfer(
        &self,
        item: &CatalogItem,
        layout: &Layout<'_>,
        safety: &SafetyOptions,
        journal: &mut Journal,
        logs: &mut Vec<String>,
    ) -> Result<(), ItemError> {
        let related: Vec<String> = self
            .store
            .list_dir(&layout.source_abs)?
            .into_iter()
            .filter(|e| e.is_file && e.name.starts_with(layout.external_id))
            .map(|e| e.name)
            .collect();
        if related.is_empty() {
            return Err(ItemError::NoRelatedFiles {
                dir: layout.source_dir.to_string(),
            });
        }

        let uncovered = uncovered_files(item, layout.source_dir, &related);
        if let Some(first) = uncovered.first() {
            return Err(ItemError::UncoveredFiles {
                count: uncovered.len(),
                first: first.to_string(),
            });
        }

        self.store.create_dir_all(&layout.target_abs)?;

        for name in &related {
            let from = layout.source_abs.join(name);
            let to = layout.target_abs.join(name);
            if from == to {
                continue;
            }

            match safety.transfer_mode {
                TransferMode::Move => {
                    self.store.rename(&from, &to)?;
                    journal.renamed.push((from, to));
                    logs.push(format!("Moved {}", name));
                }
                TransferMode::Copy => match self.store.copy_new(&from, &to)? {
                    CopyOutcome::Copied => {
                        journal.copied.push((from, to));
                        logs.push(format!("Copied {}", name));
                    }
                    CopyOutcome::AlreadyExists => {
                        if safety.verify_after_copy {
                            self.verify_size(&from, &to)?;
                        }
                        logs.push(format!("{} already in target, skipped", name));
                    }
                },
            }
        }

        if safety.transfer_mode == TransferMode::Copy && safety.verify_after_copy {
            for (from, to) in &journal.copied {
                self.verify_size(from, to)?;
            }
            logs.push(format!("Verified {} copies", journal.copied.len()));
        }

        let updates = canonical_updates(item, &layout.target_dir);
        self.catalog.update_file_paths(item.id, &updates)?;
        logs.push(format!("Updated {} file records", updates.len()));
        Ok(())
    }

    fn verify_size(&self, from: &Path, to: &Path) -> Result<(), ItemError> {
        let expected = self.store.file_size(from)?;
        let actual = self.store.file_size(to)?;
        if expected != actual {
            log::warn!(
                "Size mismatch for {}: {} vs {} bytes",
                sanitize::redact_path(to),
                expected,
                actual
            );
            return Err(ItemError::SizeMismatch {
                name: sanitize::redact_path(to),
                expected,
                actual,
            });
        }
        Ok(())
    }

    fn cleanup(
        &self,
        layout: &Layout<'_>,
        safety: &SafetyOptions,
        journal: &Journal,
        logs: &mut Vec<String>,
    ) {
        if safety.transfer_mode == TransferMode::Copy {
            for (from, _) in &journal.copied {
                if let Err(e) = self.store.remove_file(from) {
                    log::warn!("Could not remove original after copy: {}", e);
                    logs.push(format!(
                        "Warning: original {} not removed: {}",
                        sanitize::redact_path(from),
                        e
                    ));
                }
            }
        }

        if layout.source_abs == self.content_root {
            logs.push("Source is the content root, leaving it in place".to_string());
            return;
        }

        let entries = match self.store.list_dir(&layout.source_abs) {
            Ok(entries) => entries,
            Err(e) => {
                logs.push(format!("Warning: could not inspect source directory: {}", e));
                return;
            }
        };

        let mut remaining = 0usize;
        for entry in entries {
            if entry.is_file && self.junk_files.iter().any(|j| *j == entry.name) {
                let path = layout.source_abs.join(&entry.name);
                match self.store.remove_file(&path) {
                    Ok(()) => logs.push(format!("Removed {}", entry.name)),
                    Err(e) => {
                        logs.push(format!("Warning: could not remove {}: {}", entry.name, e));
                        remaining += 1;
                    }
                }
            } else {
                remaining += 1;
            }
        }

        if remaining > 0 {
            logs.push(format!(
                "Source directory {} not empty ({} entries left), keeping it",
                layout.source_dir, remaining
            ));
            return;
        }

        match self.store.remove_empty_dir(&layout.source_abs) {
            Ok(()) => logs.push(format!("Removed empty directory {}", layout.source_dir)),
            Err(e) => {
                log::warn!("Could not remove emptied source directory: {}", e);
                logs.push(format!("Warning: could not remove {}: {}", layout.source_dir, e));
            }
        }
    }

    /// Undoes recorded renames in reverse order and deletes fresh copies.
    fn rollback(&self, journal: &Journal, logs: &mut Vec<String>) {
        if journal.is_empty() {
            return;
        }

        for (from, to) in journal.renamed.iter().rev() {
            if let Err(e) = self.store.rename(to, from) {
                log::warn!("Rollback rename failed: {}", e);
                logs.push(format!(
                    "Warning: could not restore {}: {}",
                    sanitize::redact_path(from),
                    e
                ));
            }
        }

        for (_, to) in &journal.copied {
            if let Err(e) = self.store.remove_file(to) {
                log::warn!("Rollback delete failed: {}", e);
                logs.push(format!(
                    "Warning: could not delete copy {}: {}",
                    sanitize::redact_path(to),
                    e
                ));
            }
        }

        logs.push(format!(
            "Rolled back {} file operations",
            journal.renamed.len() + journal.copied.len()
        ));
    }
}

/// Catalog paths the transfer would leave behind: rows in another directory
/// than the source dir, or whose file is not among `related`.
fn uncovered_files<'a>(
    item: &'a CatalogItem,
    source_dir: &str,
    related: &[String],
) -> Vec<&'a str> {
    item.files
        .iter()
        .map(|f| f.path.as_str())
        .filter(|path| {
            paths::parent_dir(path) != source_dir
                || !related.iter().any(|name| name == paths::file_name(path))
        })
        .collect()
}

/// Every file row of the item, pointed at `<target>/<basename>`.
///
/// Only called once every row is known to be present in the target.
fn canonical_updates(item: &CatalogItem, target_dir: &str) -> Vec<FilePathUpdate> {
    item.files
        .iter()
        .map(|f| FilePathUpdate {
            file_id: f.id,
            new_path: paths::join(target_dir, paths::file_name(&f.path)),
        })
        .collect()
}
