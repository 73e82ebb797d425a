//! Turns [`MigrationFilters`] into a [`Selection`] and runs the precheck.
//!
//! The same selection drives the precheck counts and the candidate queries,
//! so a precheck's `eligible` always equals the run's `total`.

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use rusqlite::types::Value;

use crate::db::{format_timestamp, CatalogStore, DatabaseError, Selection};

use super::types::{MigrationFilters, Precheck};

const OWNER_PRESENT: &str = "u.id IS NOT NULL";
const OWNER_MISSING: &str = "u.id IS NULL";
const EXTERNAL_ID_PRESENT: &str = "a.external_id IS NOT NULL";
const EXTERNAL_ID_MISSING: &str = "a.external_id IS NULL";
const HAS_FILES: &str = "EXISTS (SELECT 1 FROM artwork_files f WHERE f.artwork_id = a.id)";
const NO_FILES: &str = "NOT EXISTS (SELECT 1 FROM artwork_files f WHERE f.artwork_id = a.id)";

/// Escapes `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` pattern.
fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn contains_pattern(term: &str) -> Value {
    Value::Text(format!("%{}%", escape_like(term)))
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

fn start_of_day(date: NaiveDate) -> Value {
    let dt = Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));
    Value::Text(format_timestamp(dt))
}

/// The user-filter part of the predicate, without eligibility.
pub fn filter_selection(filters: &MigrationFilters) -> Selection {
    let mut selection = Selection::new();

    if let Some(external_id) = non_blank(&filters.external_id) {
        selection.push(
            "a.external_id = ?",
            [Value::Text(external_id.to_string())],
        );
    } else if let Some(search) = non_blank(&filters.search) {
        if filters.exact_match {
            selection.push("a.title = ?", [Value::Text(search.to_string())]);
        } else {
            let pattern = contains_pattern(search);
            selection.push(
                "a.title LIKE ? ESCAPE '\\' OR a.description LIKE ? ESCAPE '\\' \
                 OR u.name LIKE ? ESCAPE '\\'",
                [pattern.clone(), pattern.clone(), pattern],
            );
        }
    }

    if let Some(owner_name) = non_blank(&filters.owner_name) {
        selection.push(
            "u.name LIKE ? ESCAPE '\\'",
            [contains_pattern(owner_name)],
        );
    }

    if let Some(start) = filters.start_date {
        selection.push("a.created_at >= ?", [start_of_day(start)]);
    }

    // `end_date` is inclusive: everything before the next day's midnight.
    if let Some(end) = filters.end_date {
        if let Some(next_day) = end.succ_opt() {
            selection.push("a.created_at < ?", [start_of_day(next_day)]);
        }
    }

    selection
}

/// Adds the eligibility predicate: owner, external id and at least one file.
pub fn with_eligibility(selection: Selection) -> Selection {
    selection
        .and(OWNER_PRESENT, std::iter::empty())
        .and(EXTERNAL_ID_PRESENT, std::iter::empty())
        .and(HAS_FILES, std::iter::empty())
}

/// The predicate the orchestrator runs on: user filters plus eligibility.
pub fn candidate_selection(filters: &MigrationFilters) -> Selection {
    with_eligibility(filter_selection(filters))
}

/// Read-only counts over the same predicate as the run.
pub fn precheck(
    catalog: &dyn CatalogStore,
    filters: &MigrationFilters,
) -> Result<Precheck, DatabaseError> {
    let base = filter_selection(filters);
    let count_with = |condition: &str| {
        catalog.count(&base.clone().and(condition, std::iter::empty()))
    };

    let precheck = Precheck {
        total: catalog.count(&base)?,
        eligible: catalog.count(&with_eligibility(base.clone()))?,
        missing_owner: count_with(OWNER_MISSING)?,
        missing_external_id: count_with(EXTERNAL_ID_MISSING)?,
        missing_files: count_with(NO_FILES)?,
    };

    log::debug!(
        "Precheck: total={} eligible={} missing_owner={} missing_external_id={} missing_files={}",
        precheck.total,
        precheck.eligible,
        precheck.missing_owner,
        precheck.missing_external_id,
        precheck.missing_files
    );

    Ok(precheck)
}
