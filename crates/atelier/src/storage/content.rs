//! The content store seam used by the item migrator.

use std::path::Path;

use crate::error::StorageError;

/// A single directory entry as seen by the migrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_file: bool,
}

/// Result of a no-overwrite copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyOutcome {
    /// Bytes were written to a freshly created destination.
    Copied,
    /// The destination already existed and was left untouched.
    AlreadyExists,
}

/// Filesystem operations the migration engine needs.
///
/// All paths are absolute, OS-native paths. Implementations must be safe to
/// share between workers; each worker only touches its own item's files.
pub trait ContentStore: Send + Sync {
    fn is_dir(&self, path: &Path) -> bool;

    /// Lists the entries of a directory (non-recursive).
    fn list_dir(&self, path: &Path) -> Result<Vec<DirEntry>, StorageError>;

    /// Creates a directory and all missing parents. Succeeds if it exists.
    fn create_dir_all(&self, path: &Path) -> Result<(), StorageError>;

    fn rename(&self, from: &Path, to: &Path) -> Result<(), StorageError>;

    /// Copies `from` to `to`, never overwriting an existing destination.
    fn copy_new(&self, from: &Path, to: &Path) -> Result<CopyOutcome, StorageError>;

    fn remove_file(&self, path: &Path) -> Result<(), StorageError>;

    /// Removes a directory only if it is empty.
    fn remove_empty_dir(&self, path: &Path) -> Result<(), StorageError>;

    fn file_size(&self, path: &Path) -> Result<u64, StorageError>;
}
