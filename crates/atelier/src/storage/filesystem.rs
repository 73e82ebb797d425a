use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind};
use std::path::Path;

use crate::error::StorageError;

use super::content::{ContentStore, CopyOutcome, DirEntry};

/// Moves `src` to `dst` with `rename`, falling back to copy + delete when
/// the rename fails (cross-device moves).
fn move_file(src: &Path, dst: &Path) -> Result<(), StorageError> {
    let rename_err = match fs::rename(src, dst) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    if !src.is_file() {
        return Err(StorageError::MoveFile {
            from: src.to_path_buf(),
            to: dst.to_path_buf(),
            source: rename_err,
        });
    }

    copy_and_remove(src, dst)
}

/// Copy + delete. On failure the written destination is removed again, so
/// the only copy left is the source.
fn copy_and_remove(src: &Path, dst: &Path) -> Result<(), StorageError> {
    let result = fs::copy(src, dst).and_then(|_| fs::remove_file(src));
    if let Err(e) = result {
        if dst.exists() {
            if let Err(cleanup) = fs::remove_file(dst) {
                log::warn!(
                    "Failed to remove '{}' after failed move: {}",
                    dst.display(),
                    cleanup
                );
            }
        }
        return Err(StorageError::MoveFile {
            from: src.to_path_buf(),
            to: dst.to_path_buf(),
            source: e,
        });
    }
    Ok(())
}

/// Content store backed by the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalContentStore;

impl LocalContentStore {
    pub fn new() -> Self {
        Self
    }
}

impl ContentStore for LocalContentStore {
    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn list_dir(&self, path: &Path) -> Result<Vec<DirEntry>, StorageError> {
        let read_err = |e| StorageError::ReadDirectory {
            path: path.to_path_buf(),
            source: e,
        };

        let mut entries = Vec::new();
        for entry in fs::read_dir(path).map_err(read_err)? {
            let entry = entry.map_err(read_err)?;
            let is_file = entry.file_type().map(|t| t.is_file()).map_err(read_err)?;
            entries.push(DirEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_file,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), StorageError> {
        if !path.is_dir() {
            fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
                path: path.to_path_buf(),
                source: e,
            })?;
        }
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), StorageError> {
        move_file(from, to)
    }

    fn copy_new(&self, from: &Path, to: &Path) -> Result<CopyOutcome, StorageError> {
        let copy_err = |e| StorageError::CopyFile {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            source: e,
        };

        // Open the source first so a missing source never leaves an empty
        // destination behind.
        let mut source = File::open(from).map_err(copy_err)?;

        // create_new is O_CREAT | O_EXCL: the existence check and the
        // creation are one atomic step.
        let mut destination = match OpenOptions::new().write(true).create_new(true).open(to) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(CopyOutcome::AlreadyExists),
            Err(e) => return Err(copy_err(e)),
        };

        if let Err(e) = io::copy(&mut source, &mut destination).and_then(|_| destination.sync_all())
        {
            drop(destination);
            if let Err(cleanup) = fs::remove_file(to) {
                log::warn!(
                    "Failed to remove partial copy '{}': {}",
                    to.display(),
                    cleanup
                );
            }
            return Err(copy_err(e));
        }

        Ok(CopyOutcome::Copied)
    }

    fn remove_file(&self, path: &Path) -> Result<(), StorageError> {
        fs::remove_file(path).map_err(|e| StorageError::RemoveFile {
            path: path.to_path_buf(),
            source: e,
        })
    }

    fn remove_empty_dir(&self, path: &Path) -> Result<(), StorageError> {
        fs::remove_dir(path).map_err(|e| StorageError::RemoveDirectory {
            path: path.to_path_buf(),
            source: e,
        })
    }

    fn file_size(&self, path: &Path) -> Result<u64, StorageError> {
        fs::metadata(path)
            .map(|m| m.len())
            .map_err(|e| StorageError::Metadata {
                path: path.to_path_buf(),
                source: e,
            })
    }
}
