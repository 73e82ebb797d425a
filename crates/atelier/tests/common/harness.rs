//! Test harness for isolated migration runs.
//!
//! Each `TestHarness` owns a temporary content root and an in-memory
//! SQLite catalog, so tests never share state.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use atelier::db::artwork_repo::{self, NewArtwork};
use atelier::db::{CatalogStore, Database, SqliteCatalog};
use atelier::migration::{ItemMigrator, Orchestrator};
use atelier::storage::{ContentStore, LocalContentStore};

use super::builders::ItemBuilder;

pub struct TestHarness {
    temp_dir: TempDir,
    pub content_root: PathBuf,
    pub db: Database,
    pub catalog: Arc<SqliteCatalog>,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let content_root = temp_dir.path().join("content");
        fs::create_dir_all(&content_root).expect("Failed to create content root");

        let db = Database::open_in_memory().expect("Failed to open database");
        let catalog = Arc::new(SqliteCatalog::new(db.clone()));

        Self {
            temp_dir,
            content_root,
            db,
            catalog,
        }
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.content_root.join(relative)
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.path(relative).exists()
    }

    pub fn read(&self, relative: &str) -> Vec<u8> {
        fs::read(self.path(relative)).expect("Failed to read file")
    }

    pub fn write(&self, relative: &str, content: &[u8]) {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        fs::write(path, content).expect("Failed to write file");
    }

    /// Inserts the item (and its owner) and writes any file contents.
    pub fn insert(&self, item: ItemBuilder) -> i64 {
        if let Some(owner) = &item.owner {
            artwork_repo::upsert_user(&self.db, owner, &format!("Owner {}", owner))
                .expect("Failed to insert user");
        }
        let id = artwork_repo::insert_artwork(
            &self.db,
            &NewArtwork {
                id: Some(item.id),
                user_id: item.owner.clone(),
                external_id: item.external_id.clone(),
                title: item.title.clone(),
                description: item.description.clone(),
                created_at: item.created_at.clone(),
            },
        )
        .expect("Failed to insert artwork");

        for (index, file) in item.files.iter().enumerate() {
            if let Some(content) = &file.content {
                self.write(&file.path, content);
            }
            artwork_repo::insert_file(&self.db, id, &file.path, file.size, index as i64)
                .expect("Failed to insert file");
        }
        id
    }

    /// File paths of an item as stored in the catalog.
    pub fn file_paths(&self, item_id: i64) -> Vec<String> {
        self.catalog
            .find_item(item_id)
            .expect("Failed to load item")
            .map(|item| item.files.into_iter().map(|f| f.path).collect())
            .unwrap_or_default()
    }

    /// Catalog paths of an item that have no file on disk.
    pub fn missing_files(&self, item_id: i64) -> Vec<String> {
        self.file_paths(item_id)
            .into_iter()
            .filter(|p| !self.path(p).is_file())
            .collect()
    }

    pub fn migrator(&self) -> ItemMigrator {
        self.migrator_with(self.catalog.clone(), Arc::new(LocalContentStore::new()))
    }

    pub fn migrator_with(
        &self,
        catalog: Arc<dyn CatalogStore>,
        store: Arc<dyn ContentStore>,
    ) -> ItemMigrator {
        ItemMigrator::new(catalog, store, &self.content_root)
    }

    pub fn orchestrator(&self) -> Orchestrator {
        self.orchestrator_with(Arc::new(LocalContentStore::new()))
    }

    pub fn orchestrator_with(&self, store: Arc<dyn ContentStore>) -> Orchestrator {
        let migrator = self.migrator_with(self.catalog.clone(), store);
        Orchestrator::new(self.catalog.clone(), Arc::new(migrator))
    }

    /// Every file under the content root with its bytes, sorted by path.
    pub fn snapshot(&self) -> Vec<(String, Vec<u8>)> {
        let mut files = Vec::new();
        collect(&self.content_root, &self.content_root, &mut files);
        files.sort();
        files
    }

    /// Every directory under the content root, sorted.
    pub fn directories(&self) -> Vec<String> {
        let mut dirs = Vec::new();
        collect_dirs(&self.content_root, &self.content_root, &mut dirs);
        dirs.sort();
        dirs
    }
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .expect("path under root")
        .to_string_lossy()
        .replace('\\', "/")
}

fn collect(root: &Path, dir: &Path, out: &mut Vec<(String, Vec<u8>)>) {
    for entry in fs::read_dir(dir).expect("Failed to read directory") {
        let path = entry.expect("Failed to read entry").path();
        if path.is_dir() {
            collect(root, &path, out);
        } else {
            let content = fs::read(&path).expect("Failed to read file");
            out.push((relative(root, &path), content));
        }
    }
}

fn collect_dirs(root: &Path, dir: &Path, out: &mut Vec<String>) {
    for entry in fs::read_dir(dir).expect("Failed to read directory") {
        let path = entry.expect("Failed to read entry").path();
        if path.is_dir() {
            out.push(relative(root, &path));
            collect_dirs(root, &path, out);
        }
    }
}
