//! Migration job repository: CRUD operations for the `migration_jobs` table.

use rusqlite::{params, params_from_iter, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw migration job row from the database.
///
/// `filters`, `safety`, `target_ids` and `result` hold JSON text; decoding
/// them is the job store's concern.
#[derive(Debug, Clone, PartialEq)]
pub struct MigrationJobRow {
    pub id: String,
    pub status: String,
    pub progress: i64,
    pub message: Option<String>,
    pub filters: String,
    pub safety: String,
    pub target_ids: Option<String>,
    pub batch_size: i64,
    pub concurrency: i64,
    pub cursor: Option<i64>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl MigrationJobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            status: row.get("status")?,
            progress: row.get("progress")?,
            message: row.get("message")?,
            filters: row.get("filters")?,
            safety: row.get("safety")?,
            target_ids: row.get("target_ids")?,
            batch_size: row.get("batch_size")?,
            concurrency: row.get("concurrency")?,
            cursor: row.get("cursor")?,
            result: row.get("result")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &MigrationJobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO migration_jobs (id, status, progress, message, filters, safety,
             target_ids, batch_size, concurrency, cursor, result, error, created_at,
             updated_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                job.id,
                job.status,
                job.progress,
                job.message,
                job.filters,
                job.safety,
                job.target_ids,
                job.batch_size,
                job.concurrency,
                job.cursor,
                job.result,
                job.error,
                job.created_at,
                job.updated_at,
                job.completed_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<MigrationJobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM migration_jobs WHERE id = ?1",
                params![id],
                MigrationJobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Returns the status column only.
pub fn find_status(db: &Database, id: &str) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let status = conn
            .query_row(
                "SELECT status FROM migration_jobs WHERE id = ?1",
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(status)
    })
}

/// Most recent jobs first.
pub fn list(db: &Database, limit: u64) -> Result<Vec<MigrationJobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM migration_jobs ORDER BY created_at DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], MigrationJobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Updates progress percent and message.
pub fn update_progress(
    db: &Database,
    id: &str,
    progress: i64,
    message: &str,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE migration_jobs SET progress = ?2, message = ?3, updated_at = ?4
             WHERE id = ?1",
            params![id, progress, message, updated_at],
        )?;
        Ok(())
    })
}

/// Stores the resume cursor.
pub fn set_cursor(
    db: &Database,
    id: &str,
    cursor: i64,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE migration_jobs SET cursor = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, cursor, updated_at],
        )?;
        Ok(())
    })
}

/// Sets `status` to `to` only if the current status is one of `from`.
///
/// Returns whether a row changed. The check and the write happen in one
/// statement so concurrent requests cannot both win.
pub fn transition_status(
    db: &Database,
    id: &str,
    from: &[&str],
    to: &str,
    updated_at: &str,
) -> Result<bool, DatabaseError> {
    if from.is_empty() {
        return Ok(false);
    }
    db.with_conn(|conn| {
        let placeholders = vec!["?"; from.len()].join(", ");
        let sql = format!(
            "UPDATE migration_jobs SET status = ?, updated_at = ?
             WHERE id = ? AND status IN ({})",
            placeholders
        );
        let values = [to, updated_at, id].into_iter().chain(from.iter().copied());
        let changed = conn.execute(&sql, params_from_iter(values))?;
        Ok(changed > 0)
    })
}

/// Writes a terminal status with its result or error.
pub fn finish(
    db: &Database,
    id: &str,
    status: &str,
    progress: Option<i64>,
    result: Option<&str>,
    error: Option<&str>,
    completed_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE migration_jobs SET status = ?2, progress = COALESCE(?3, progress),
             result = COALESCE(?4, result), error = ?5, updated_at = ?6, completed_at = ?6
             WHERE id = ?1",
            params![id, status, progress, result, error, completed_at],
        )?;
        Ok(())
    })
}

/// Clears the outcome of a previous attempt before a job is restarted.
pub fn clear_outcome(db: &Database, id: &str, updated_at: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE migration_jobs SET error = NULL, completed_at = NULL, updated_at = ?2
             WHERE id = ?1",
            params![id, updated_at],
        )?;
        Ok(())
    })
}
