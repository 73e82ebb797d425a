//! Catalog types and the metadata-store seam used by the migration engine.

use rusqlite::types::Value;
use serde::Serialize;

use super::{artwork_repo, Database, DatabaseError};

/// Owner of an artwork (`users` row).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Owner {
    pub id: String,
    pub name: String,
}

/// A file belonging to an artwork. `path` is relative to the content root
/// and always uses forward slashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub id: i64,
    pub path: String,
    pub size: i64,
    pub sort_index: i64,
}

/// An artwork with its owner and files (ordered by `sort_index`, then id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogItem {
    pub id: i64,
    pub owner: Option<Owner>,
    pub external_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub created_at: String,
    pub files: Vec<FileEntry>,
}

impl CatalogItem {
    /// Has an owner, an external id and at least one file.
    pub fn is_eligible(&self) -> bool {
        self.owner.is_some() && self.external_id.is_some() && !self.files.is_empty()
    }
}

/// New path for one file row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePathUpdate {
    pub file_id: i64,
    pub new_path: String,
}

/// A composable SQL predicate over `artworks a LEFT JOIN users u`.
///
/// Conditions use anonymous `?` placeholders; `params` holds their values in
/// order. Every condition is ANDed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    conditions: Vec<String>,
    params: Vec<Value>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a condition and its bound values.
    pub fn push<I>(&mut self, condition: impl Into<String>, params: I)
    where
        I: IntoIterator<Item = Value>,
    {
        self.conditions.push(condition.into());
        self.params.extend(params);
    }

    /// Builder-style variant of [`Selection::push`].
    pub fn and<I>(mut self, condition: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        self.push(condition, params);
        self
    }

    /// Restricts the selection to the given artwork ids.
    pub fn with_ids(self, ids: &[i64]) -> Self {
        if ids.is_empty() {
            return self.and("0", std::iter::empty());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        self.and(
            format!("a.id IN ({})", placeholders),
            ids.iter().map(|id| Value::Integer(*id)),
        )
    }

    pub fn conditions(&self) -> &[String] {
        &self.conditions
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// `WHERE (c1) AND (c2) ...`, or an empty string when unconstrained.
    pub fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            let joined: Vec<String> = self
                .conditions
                .iter()
                .map(|c| format!("({})", c))
                .collect();
            format!("WHERE {}", joined.join(" AND "))
        }
    }
}

/// Metadata store operations the migration engine needs.
pub trait CatalogStore: Send + Sync {
    /// Loads one item with its owner and files.
    fn find_item(&self, id: i64) -> Result<Option<CatalogItem>, DatabaseError>;

    /// Counts items matching the selection.
    fn count(&self, selection: &Selection) -> Result<u64, DatabaseError>;

    /// Up to `limit` matching items with `id > after_id`, ordered by id.
    fn find_candidates(
        &self,
        selection: &Selection,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<CatalogItem>, DatabaseError>;

    /// Matching items among `ids`, ordered by id.
    fn find_by_ids(
        &self,
        selection: &Selection,
        ids: &[i64],
    ) -> Result<Vec<CatalogItem>, DatabaseError>;

    /// Rewrites file paths of one item. All updates apply or none do.
    fn update_file_paths(
        &self,
        item_id: i64,
        updates: &[FilePathUpdate],
    ) -> Result<(), DatabaseError>;
}

/// SQLite implementation of [`CatalogStore`].
#[derive(Debug, Clone)]
pub struct SqliteCatalog {
    db: Database,
}

impl SqliteCatalog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl CatalogStore for SqliteCatalog {
    fn find_item(&self, id: i64) -> Result<Option<CatalogItem>, DatabaseError> {
        artwork_repo::find_by_id(&self.db, id)
    }

    fn count(&self, selection: &Selection) -> Result<u64, DatabaseError> {
        artwork_repo::count(&self.db, selection)
    }

    fn find_candidates(
        &self,
        selection: &Selection,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<CatalogItem>, DatabaseError> {
        artwork_repo::find_after(&self.db, selection, after_id, limit)
    }

    fn find_by_ids(
        &self,
        selection: &Selection,
        ids: &[i64],
    ) -> Result<Vec<CatalogItem>, DatabaseError> {
        artwork_repo::find_by_ids(&self.db, selection, ids)
    }

    fn update_file_paths(
        &self,
        item_id: i64,
        updates: &[FilePathUpdate],
    ) -> Result<(), DatabaseError> {
        artwork_repo::update_file_paths(&self.db, item_id, updates)
    }
}
