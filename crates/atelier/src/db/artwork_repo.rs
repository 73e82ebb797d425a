//! Artwork repository: queries over `artworks`, `users` and `artwork_files`.

use std::collections::HashMap;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};

use super::catalog::{CatalogItem, FileEntry, FilePathUpdate, Owner, Selection};
use super::{Database, DatabaseError};

const ITEM_COLUMNS: &str =
    "a.id, a.user_id, u.id AS owner_id, u.name AS owner_name, a.external_id, a.title, \
     a.description, a.created_at";

const ITEM_FROM: &str = "FROM artworks a LEFT JOIN users u ON u.id = a.user_id";

/// Fields for inserting a new artwork row.
#[derive(Debug, Clone, Default)]
pub struct NewArtwork {
    /// Explicit id, or `None` to let SQLite assign one.
    pub id: Option<i64>,
    pub user_id: Option<String>,
    pub external_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub created_at: String,
}

fn item_from_row(row: &Row<'_>) -> Result<CatalogItem, rusqlite::Error> {
    let owner_id: Option<String> = row.get("owner_id")?;
    let owner_name: Option<String> = row.get("owner_name")?;
    Ok(CatalogItem {
        id: row.get("id")?,
        owner: owner_id.map(|id| Owner {
            id,
            name: owner_name.unwrap_or_default(),
        }),
        external_id: row.get("external_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        created_at: row.get("created_at")?,
        files: Vec::new(),
    })
}

/// Loads items for `selection` plus an optional SQL suffix (ORDER/LIMIT)
/// and attaches their files with a single extra query.
fn load_items(
    conn: &Connection,
    selection: &Selection,
    suffix: &str,
    suffix_params: &[Value],
) -> Result<Vec<CatalogItem>, DatabaseError> {
    let sql = format!(
        "SELECT {} {} {} {}",
        ITEM_COLUMNS,
        ITEM_FROM,
        selection.where_clause(),
        suffix
    );
    let values = selection.params().iter().chain(suffix_params.iter());

    let mut stmt = conn.prepare(&sql)?;
    let mut items: Vec<CatalogItem> = stmt
        .query_map(params_from_iter(values), item_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    if items.is_empty() {
        return Ok(items);
    }

    let placeholders = vec!["?"; items.len()].join(", ");
    let file_sql = format!(
        "SELECT id, artwork_id, path, size, sort_index FROM artwork_files
         WHERE artwork_id IN ({}) ORDER BY artwork_id, sort_index, id",
        placeholders
    );
    let ids: Vec<i64> = items.iter().map(|i| i.id).collect();

    let mut files_by_item: HashMap<i64, Vec<FileEntry>> = HashMap::new();
    let mut stmt = conn.prepare(&file_sql)?;
    let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
        Ok((
            row.get::<_, i64>("artwork_id")?,
            FileEntry {
                id: row.get("id")?,
                path: row.get("path")?,
                size: row.get("size")?,
                sort_index: row.get("sort_index")?,
            },
        ))
    })?;
    for row in rows {
        let (artwork_id, file) = row?;
        files_by_item.entry(artwork_id).or_default().push(file);
    }

    for item in &mut items {
        item.files = files_by_item.remove(&item.id).unwrap_or_default();
    }
    Ok(items)
}

/// Inserts or replaces an owner.
pub fn upsert_user(db: &Database, id: &str, name: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO users (id, name) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            params![id, name],
        )?;
        Ok(())
    })
}

/// Inserts an artwork row and returns its id.
pub fn insert_artwork(db: &Database, artwork: &NewArtwork) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO artworks (id, user_id, external_id, title, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                artwork.id,
                artwork.user_id,
                artwork.external_id,
                artwork.title,
                artwork.description,
                artwork.created_at,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Inserts a file row for an artwork and returns its id.
pub fn insert_file(
    db: &Database,
    artwork_id: i64,
    path: &str,
    size: i64,
    sort_index: i64,
) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO artwork_files (artwork_id, path, size, sort_index)
             VALUES (?1, ?2, ?3, ?4)",
            params![artwork_id, path, size, sort_index],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Finds an artwork by id, with owner and files.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<CatalogItem>, DatabaseError> {
    db.with_conn(|conn| {
        let selection = Selection::new().and("a.id = ?", [Value::Integer(id)]);
        let mut items = load_items(conn, &selection, "", &[])?;
        Ok(items.pop())
    })
}

/// Counts artworks matching the selection.
pub fn count(db: &Database, selection: &Selection) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!("SELECT COUNT(*) {} {}", ITEM_FROM, selection.where_clause());
        let total: u64 =
            conn.query_row(&sql, params_from_iter(selection.params().iter()), |r| {
                r.get(0)
            })?;
        Ok(total)
    })
}

/// Keyset page: up to `limit` matching artworks with `id > after_id`,
/// ascending by id.
pub fn find_after(
    db: &Database,
    selection: &Selection,
    after_id: i64,
    limit: usize,
) -> Result<Vec<CatalogItem>, DatabaseError> {
    let page = selection
        .clone()
        .and("a.id > ?", [Value::Integer(after_id)]);
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    db.with_conn(|conn| {
        load_items(
            conn,
            &page,
            "ORDER BY a.id ASC LIMIT ?",
            &[Value::Integer(limit)],
        )
    })
}

/// Matching artworks among `ids`, ascending by id.
pub fn find_by_ids(
    db: &Database,
    selection: &Selection,
    ids: &[i64],
) -> Result<Vec<CatalogItem>, DatabaseError> {
    let scoped = selection.clone().with_ids(ids);
    db.with_conn(|conn| load_items(conn, &scoped, "ORDER BY a.id ASC", &[]))
}

/// Rewrites file paths for one artwork inside a single transaction.
///
/// Every update must hit a row that belongs to `artwork_id`; otherwise the
/// whole transaction is rolled back.
pub fn update_file_paths(
    db: &Database,
    artwork_id: i64,
    updates: &[FilePathUpdate],
) -> Result<(), DatabaseError> {
    db.transaction(|tx| {
        let mut stmt =
            tx.prepare("UPDATE artwork_files SET path = ?1 WHERE id = ?2 AND artwork_id = ?3")?;
        for update in updates {
            let changed = stmt.execute(params![update.new_path, update.file_id, artwork_id])?;
            if changed == 0 {
                return Err(DatabaseError::NotFound {
                    entity: "artwork file",
                    id: update.file_id.to_string(),
                });
            }
        }
        Ok(())
    })
}
