//! Pending changes (directory database)
//!
//! Storage primitives only; the review state machine lives in
//! [`crate::workflow`].

use std::fmt;
use std::str::FromStr;

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use super::diesel_schema::pending_changes;
use super::models::{NewPendingChange, PendingChangeRow};
use crate::error::DirectoryError;

/// Row ID recorded for changes that add a new row
pub const NEW_ROW_ID: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Edit,
    Add,
    Delete,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Edit => "edit",
            ChangeType::Add => "add",
            ChangeType::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "edit" => Ok(ChangeType::Edit),
            "add" => Ok(ChangeType::Add),
            "delete" => Ok(ChangeType::Delete),
            other => Err(DirectoryError::Validation(format!("unknown change type '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Pending,
    Approved,
    Rejected,
}

impl ChangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::Pending => "pending",
            ChangeStatus::Approved => "approved",
            ChangeStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ChangeStatus::Pending)
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeStatus {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ChangeStatus::Pending),
            "approved" => Ok(ChangeStatus::Approved),
            "rejected" => Ok(ChangeStatus::Rejected),
            other => Err(DirectoryError::Validation(format!("unknown change status '{}'", other))),
        }
    }
}

/// A proposed row mutation and its review record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    pub id: i64,
    pub directory_id: String,
    /// [`NEW_ROW_ID`] for additions
    pub row_id: i64,
    /// Empty for additions and deletions
    pub column_name: String,
    pub old_value: String,
    /// For additions: the JSON array of the whole new row
    pub new_value: String,
    pub change_type: ChangeType,
    pub submitted_by: String,
    pub status: ChangeStatus,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<String>,
    pub reason: Option<String>,
    /// Column names at submission time
    pub column_schema: Vec<String>,
    pub submitted_at: String,
}

impl TryFrom<PendingChangeRow> for PendingChange {
    type Error = DirectoryError;

    fn try_from(row: PendingChangeRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            directory_id: row.directory_id,
            row_id: row.row_id,
            column_name: row.column_name,
            old_value: row.old_value,
            new_value: row.new_value,
            change_type: row.change_type.parse()?,
            submitted_by: row.submitted_by,
            status: row.status.parse()?,
            reviewed_by: row.reviewed_by,
            reviewed_at: row.reviewed_at,
            reason: row.reason,
            column_schema: serde_json::from_str(&row.column_schema_json)?,
            submitted_at: row.submitted_at,
        })
    }
}

/// Insert a change and return its ID
pub fn insert_change(
    conn: &mut SqliteConnection,
    change: &NewPendingChange<'_>,
) -> Result<i64, DirectoryError> {
    diesel::insert_into(pending_changes::table)
        .values(change)
        .execute(conn)
        .map_err(|e| DirectoryError::query("insert pending change", e))?;

    diesel::select(diesel::dsl::sql::<diesel::sql_types::BigInt>("last_insert_rowid()"))
        .get_result::<i64>(conn)
        .map_err(|e| DirectoryError::query("read pending change id", e))
}

pub fn get_change(
    conn: &mut SqliteConnection,
    change_id: i64,
) -> Result<Option<PendingChange>, DirectoryError> {
    pending_changes::table
        .filter(pending_changes::id.eq(change_id))
        .select(PendingChangeRow::as_select())
        .first::<PendingChangeRow>(conn)
        .optional()
        .map_err(|e| DirectoryError::query("load pending change", e))?
        .map(PendingChange::try_from)
        .transpose()
}

/// Changes in a directory with the given status, oldest first
pub fn list_by_status(
    conn: &mut SqliteConnection,
    directory_id: &str,
    status: ChangeStatus,
) -> Result<Vec<PendingChange>, DirectoryError> {
    pending_changes::table
        .filter(pending_changes::directory_id.eq(directory_id))
        .filter(pending_changes::status.eq(status.as_str()))
        .select(PendingChangeRow::as_select())
        .order(pending_changes::id.asc())
        .load::<PendingChangeRow>(conn)
        .map_err(|e| DirectoryError::query("list pending changes", e))?
        .into_iter()
        .map(PendingChange::try_from)
        .collect()
}

/// Changes submitted by one user, newest first
pub fn list_by_submitter(
    conn: &mut SqliteConnection,
    directory_id: &str,
    submitted_by: &str,
) -> Result<Vec<PendingChange>, DirectoryError> {
    pending_changes::table
        .filter(pending_changes::directory_id.eq(directory_id))
        .filter(pending_changes::submitted_by.eq(submitted_by))
        .select(PendingChangeRow::as_select())
        .order(pending_changes::id.desc())
        .load::<PendingChangeRow>(conn)
        .map_err(|e| DirectoryError::query("list submitted changes", e))?
        .into_iter()
        .map(PendingChange::try_from)
        .collect()
}

/// Move a change out of `pending`. Returns the number of rows updated,
/// which is 0 when the change was no longer pending.
pub fn mark_reviewed(
    conn: &mut SqliteConnection,
    change_id: i64,
    status: ChangeStatus,
    reviewed_by: &str,
    reviewed_at: &str,
    reason: Option<&str>,
) -> Result<usize, DirectoryError> {
    diesel::update(
        pending_changes::table
            .filter(pending_changes::id.eq(change_id))
            .filter(pending_changes::status.eq(ChangeStatus::Pending.as_str())),
    )
    .set((
        pending_changes::status.eq(status.as_str()),
        pending_changes::reviewed_by.eq(Some(reviewed_by)),
        pending_changes::reviewed_at.eq(Some(reviewed_at)),
        pending_changes::reason.eq(reason),
    ))
    .execute(conn)
    .map_err(|e| DirectoryError::query("update pending change status", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing() {
        assert_eq!("approved".parse::<ChangeStatus>().unwrap(), ChangeStatus::Approved);
        assert!("done".parse::<ChangeStatus>().is_err());
        assert!(ChangeStatus::Rejected.is_terminal());
        assert!(!ChangeStatus::Pending.is_terminal());
    }

    #[test]
    fn test_change_type_display() {
        assert_eq!(ChangeType::Delete.to_string(), "delete");
        assert_eq!("add".parse::<ChangeType>().unwrap(), ChangeType::Add);
    }
}
