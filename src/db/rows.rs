//! Mirrored rows and column schema (directory database)
//!
//! Rows are stored as JSON arrays of strings keyed by a stable integer ID.
//! The positional index of a row is its rank in ascending ID order; it is
//! derived on demand and never stored.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::diesel_schema::{directory_rows, directory_schema};
use super::models::{current_timestamp, StoredRow};
use crate::error::DirectoryError;

/// A row with its cells decoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub id: i64,
    pub values: Vec<String>,
}

impl Row {
    fn decode(stored: StoredRow) -> Result<Self, DirectoryError> {
        let values: Vec<String> = serde_json::from_str(&stored.data).map_err(|e| {
            DirectoryError::Internal(format!("Row {} holds invalid JSON: {}", stored.id, e))
        })?;
        Ok(Self {
            id: stored.id,
            values,
        })
    }
}

/// Search parameters for browsing rows
#[derive(Debug, Clone, Deserialize)]
pub struct RowQuery {
    #[serde(default)]
    pub search: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    100
}

impl Default for RowQuery {
    fn default() -> Self {
        Self {
            search: None,
            limit: default_limit(),
            offset: 0,
        }
    }
}

/// A row together with its current positional index
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexedRow {
    pub index: usize,
    #[serde(flatten)]
    pub row: Row,
}

// ============================================================================
// Column schema
// ============================================================================

/// Current column names; empty before the first import
pub fn get_columns(conn: &mut SqliteConnection) -> Result<Vec<String>, DirectoryError> {
    let json: Option<String> = directory_schema::table
        .filter(directory_schema::id.eq(1))
        .select(directory_schema::columns_json)
        .first(conn)
        .optional()
        .map_err(|e| DirectoryError::query("load column schema", e))?;

    match json {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(Vec::new()),
    }
}

pub fn set_columns(conn: &mut SqliteConnection, columns: &[String]) -> Result<(), DirectoryError> {
    let json = serde_json::to_string(columns)?;
    let now = current_timestamp();

    diesel::replace_into(directory_schema::table)
        .values((
            directory_schema::id.eq(1),
            directory_schema::columns_json.eq(&json),
            directory_schema::updated_at.eq(&now),
        ))
        .execute(conn)
        .map_err(|e| DirectoryError::query("store column schema", e))?;

    Ok(())
}

// ============================================================================
// Read Operations
// ============================================================================

pub fn get_row(conn: &mut SqliteConnection, row_id: i64) -> Result<Option<Row>, DirectoryError> {
    directory_rows::table
        .filter(directory_rows::id.eq(row_id))
        .select(StoredRow::as_select())
        .first::<StoredRow>(conn)
        .optional()
        .map_err(|e| DirectoryError::query("load row", e))?
        .map(Row::decode)
        .transpose()
}

/// Load a row, failing with NotFound when absent
pub fn require_row(conn: &mut SqliteConnection, row_id: i64) -> Result<Row, DirectoryError> {
    get_row(conn, row_id)?.ok_or_else(|| DirectoryError::NotFound(format!("row {}", row_id)))
}

/// All rows in ascending ID order
pub fn list_rows(conn: &mut SqliteConnection) -> Result<Vec<Row>, DirectoryError> {
    directory_rows::table
        .select(StoredRow::as_select())
        .order(directory_rows::id.asc())
        .load::<StoredRow>(conn)
        .map_err(|e| DirectoryError::query("list rows", e))?
        .into_iter()
        .map(Row::decode)
        .collect()
}

/// Case-insensitive substring search across every cell
pub fn search_rows(
    conn: &mut SqliteConnection,
    query: &RowQuery,
) -> Result<Vec<IndexedRow>, DirectoryError> {
    let needle = query
        .search
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty());

    let rows = list_rows(conn)?;
    Ok(rows
        .into_iter()
        .enumerate()
        .filter(|(_, row)| match &needle {
            Some(needle) => row.values.iter().any(|v| v.to_lowercase().contains(needle)),
            None => true,
        })
        .skip(query.offset)
        .take(query.limit)
        .map(|(index, row)| IndexedRow { index, row })
        .collect())
}

/// Resolve a positional index to the row ID currently at that position
pub fn row_id_at(conn: &mut SqliteConnection, index: usize) -> Result<Option<i64>, DirectoryError> {
    directory_rows::table
        .select(directory_rows::id)
        .order(directory_rows::id.asc())
        .offset(index as i64)
        .first(conn)
        .optional()
        .map_err(|e| DirectoryError::query("resolve row index", e))
}

/// Current positional index of a row ID
pub fn row_index_of(conn: &mut SqliteConnection, row_id: i64) -> Result<Option<usize>, DirectoryError> {
    let exists: bool = diesel::select(diesel::dsl::exists(
        directory_rows::table.filter(directory_rows::id.eq(row_id)),
    ))
    .get_result(conn)
    .map_err(|e| DirectoryError::query("check row", e))?;

    if !exists {
        return Ok(None);
    }

    let before: i64 = directory_rows::table
        .filter(directory_rows::id.lt(row_id))
        .count()
        .get_result(conn)
        .map_err(|e| DirectoryError::query("resolve row position", e))?;

    Ok(Some(before as usize))
}

// ============================================================================
// Write Operations
// ============================================================================

/// Append a row and return its new ID
pub fn insert_row(conn: &mut SqliteConnection, values: &[String]) -> Result<i64, DirectoryError> {
    let json = serde_json::to_string(values)?;

    diesel::insert_into(directory_rows::table)
        .values(directory_rows::data.eq(&json))
        .execute(conn)
        .map_err(|e| DirectoryError::query("insert row", e))?;

    let id = diesel::select(diesel::dsl::sql::<diesel::sql_types::BigInt>("last_insert_rowid()"))
        .get_result::<i64>(conn)
        .map_err(|e| DirectoryError::query("read inserted row id", e))?;

    debug!("Inserted row {}", id);
    Ok(id)
}

/// Overwrite one cell by position, padding short rows with empty cells
pub fn update_cell(
    conn: &mut SqliteConnection,
    row_id: i64,
    position: usize,
    value: &str,
) -> Result<Row, DirectoryError> {
    let mut row = require_row(conn, row_id)?;
    if row.values.len() <= position {
        row.values.resize(position + 1, String::new());
    }
    row.values[position] = value.to_string();

    let json = serde_json::to_string(&row.values)?;
    diesel::update(directory_rows::table.filter(directory_rows::id.eq(row_id)))
        .set(directory_rows::data.eq(&json))
        .execute(conn)
        .map_err(|e| DirectoryError::query("update row", e))?;

    debug!("Updated row {} cell {}", row_id, position);
    Ok(row)
}

pub fn delete_row(conn: &mut SqliteConnection, row_id: i64) -> Result<(), DirectoryError> {
    let deleted = diesel::delete(directory_rows::table.filter(directory_rows::id.eq(row_id)))
        .execute(conn)
        .map_err(|e| DirectoryError::query("delete row", e))?;

    if deleted == 0 {
        return Err(DirectoryError::NotFound(format!("row {}", row_id)));
    }
    debug!("Deleted row {}", row_id);
    Ok(())
}

/// Replace the column schema and every row in one transaction
pub fn replace_all(
    conn: &mut SqliteConnection,
    columns: &[String],
    rows: &[Vec<String>],
) -> Result<usize, DirectoryError> {
    conn.immediate_transaction(|conn| {
        set_columns(conn, columns)?;
        diesel::delete(directory_rows::table)
            .execute(conn)
            .map_err(|e| DirectoryError::query("clear rows", e))?;
        for values in rows {
            insert_row(conn, values)?;
        }
        Ok(rows.len())
    })
}
