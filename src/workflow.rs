//! Pending-change workflow
//!
//! ```text
//! submit ──► pending ──approve──► approved   (row mutation applied)
//!               │
//!               └────reject───► rejected
//! ```
//!
//! Both outcomes are terminal. A review re-reads the change inside the
//! same immediate transaction that updates its status and applies it, so two
//! concurrent approvals cannot both succeed and a failed apply leaves the
//! change pending.
//!
//! Callers authorize reviews before invoking the workflow; the workflow only
//! enforces the state machine.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::auth::AuthResolver;
use crate::context::RequestContext;
use crate::db::models::NewPendingChange;
use crate::db::pending_changes::{self, ChangeStatus, ChangeType, PendingChange, NEW_ROW_ID};
use crate::db::{current_timestamp, rows, Directory, Store};
use crate::error::DirectoryError;
use crate::sheets::SheetOp;

/// A column addressed by position or by name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnRef {
    Index(usize),
    Name(String),
}

impl ColumnRef {
    /// Position of the column within a schema
    pub fn position_in(&self, columns: &[String]) -> Result<usize, DirectoryError> {
        match self {
            ColumnRef::Index(i) if *i < columns.len() => Ok(*i),
            ColumnRef::Index(i) => Err(DirectoryError::Validation(format!(
                "column index {} is out of range ({} columns)",
                i,
                columns.len()
            ))),
            ColumnRef::Name(name) => columns
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| DirectoryError::Validation(format!("unknown column '{}'", name))),
        }
    }
}

impl From<usize> for ColumnRef {
    fn from(index: usize) -> Self {
        ColumnRef::Index(index)
    }
}

impl From<&str> for ColumnRef {
    fn from(name: &str) -> Self {
        ColumnRef::Name(name.to_string())
    }
}

/// A change as proposed by a gated moderator. Values arrive sanitized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposedChange {
    Edit {
        row_id: i64,
        column: ColumnRef,
        new_value: String,
    },
    Add {
        values: Vec<String>,
    },
    Delete {
        row_id: i64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewAction {
    Approve,
    Reject,
}

impl ReviewAction {
    fn resulting_status(&self) -> ChangeStatus {
        match self {
            ReviewAction::Approve => ChangeStatus::Approved,
            ReviewAction::Reject => ChangeStatus::Rejected,
        }
    }
}

impl fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewAction::Approve => f.write_str("approve"),
            ReviewAction::Reject => f.write_str("reject"),
        }
    }
}

impl FromStr for ReviewAction {
    type Err = DirectoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "approve" => Ok(ReviewAction::Approve),
            "reject" => Ok(ReviewAction::Reject),
            other => Err(DirectoryError::Validation(format!("unknown review action '{}'", other))),
        }
    }
}

// =============================================================================
// Row mutations
// =============================================================================

/// A row mutation ready to commit, addressed by stable row ID
#[derive(Debug, Clone, Copy)]
pub(crate) enum RowMutation<'a> {
    SetCell {
        row_id: i64,
        position: usize,
        value: &'a str,
    },
    Insert {
        values: &'a [String],
    },
    Remove {
        row_id: i64,
    },
}

/// Result of a committed mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AppliedMutation {
    pub row_id: i64,
    pub sheet_op: SheetOp,
}

/// Apply a mutation on a directory connection.
///
/// The sheet position is computed here so that it reflects the row order
/// inside the caller's transaction.
pub(crate) fn apply_mutation(
    conn: &mut SqliteConnection,
    mutation: RowMutation<'_>,
) -> Result<AppliedMutation, DirectoryError> {
    match mutation {
        RowMutation::SetCell {
            row_id,
            position,
            value,
        } => {
            let index = rows::row_index_of(conn, row_id)?
                .ok_or_else(|| DirectoryError::NotFound(format!("row {}", row_id)))?;
            rows::update_cell(conn, row_id, position, value)?;
            Ok(AppliedMutation {
                row_id,
                sheet_op: SheetOp::UpdateCell {
                    row: index,
                    column: position,
                    value: value.to_string(),
                },
            })
        }
        RowMutation::Insert { values } => {
            let row_id = rows::insert_row(conn, values)?;
            Ok(AppliedMutation {
                row_id,
                sheet_op: SheetOp::AppendRow {
                    values: values.to_vec(),
                },
            })
        }
        RowMutation::Remove { row_id } => {
            let index = rows::row_index_of(conn, row_id)?
                .ok_or_else(|| DirectoryError::NotFound(format!("row {}", row_id)))?;
            rows::delete_row(conn, row_id)?;
            Ok(AppliedMutation {
                row_id,
                sheet_op: SheetOp::DeleteRow { row: index },
            })
        }
    }
}

// =============================================================================
// Workflow
// =============================================================================

/// Result of reviewing a change
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewOutcome {
    pub change: PendingChange,
    /// Row touched by an approval
    pub applied_row_id: Option<i64>,
    /// Write-back for an approval; `None` for rejections
    pub sheet_op: Option<SheetOp>,
}

pub struct PendingChangeWorkflow {
    store: Arc<Store>,
    resolver: Arc<AuthResolver>,
}

impl PendingChangeWorkflow {
    pub fn new(store: Arc<Store>, resolver: Arc<AuthResolver>) -> Self {
        Self { store, resolver }
    }

    /// Record a proposed change against the current schema
    pub fn submit(
        &self,
        directory: &Directory,
        submitted_by: &str,
        proposed: &ProposedChange,
    ) -> Result<PendingChange, DirectoryError> {
        let mut conn = self.store.directory_conn(directory)?;

        let change_id = conn.immediate_transaction(|conn| {
            let columns = rows::get_columns(conn)?;
            let column_schema_json = serde_json::to_string(&columns)?;

            let (row_id, column_name, old_value, new_value, change_type) = match proposed {
                ProposedChange::Edit {
                    row_id,
                    column,
                    new_value,
                } => {
                    let position = column.position_in(&columns)?;
                    let row = rows::require_row(conn, *row_id)?;
                    let old_value = row.values.get(position).cloned().unwrap_or_default();
                    (*row_id, columns[position].clone(), old_value, new_value.clone(), ChangeType::Edit)
                }
                ProposedChange::Add { values } => (
                    NEW_ROW_ID,
                    String::new(),
                    String::new(),
                    serde_json::to_string(values)?,
                    ChangeType::Add,
                ),
                ProposedChange::Delete { row_id } => {
                    let row = rows::require_row(conn, *row_id)?;
                    (
                        *row_id,
                        String::new(),
                        serde_json::to_string(&row.values)?,
                        String::new(),
                        ChangeType::Delete,
                    )
                }
            };

            let now = current_timestamp();
            pending_changes::insert_change(
                conn,
                &NewPendingChange {
                    directory_id: &directory.id,
                    row_id,
                    column_name: &column_name,
                    old_value: &old_value,
                    new_value: &new_value,
                    change_type: change_type.as_str(),
                    submitted_by,
                    status: ChangeStatus::Pending.as_str(),
                    column_schema_json: &column_schema_json,
                    submitted_at: &now,
                },
            )
        })?;

        let change = self.require_change(&mut conn, directory, change_id)?;
        info!(
            "Submitted {} change {} in {} by {}",
            change.change_type, change.id, directory.id, submitted_by
        );
        Ok(change)
    }

    /// Approve or reject a pending change.
    ///
    /// A change that is no longer pending is a Conflict and nothing is applied.
    pub fn process_approval(
        &self,
        directory: &Directory,
        change_id: i64,
        reviewer: &str,
        action: ReviewAction,
        reason: Option<&str>,
    ) -> Result<ReviewOutcome, DirectoryError> {
        let mut conn = self.store.directory_conn(directory)?;

        let applied = conn.immediate_transaction(|conn| {
            let change = self.require_change(conn, directory, change_id)?;
            if change.status.is_terminal() {
                return Err(DirectoryError::Conflict(format!(
                    "change {} is already {}",
                    change_id, change.status
                )));
            }

            let now = current_timestamp();
            let updated = pending_changes::mark_reviewed(
                conn,
                change_id,
                action.resulting_status(),
                reviewer,
                &now,
                reason,
            )?;
            if updated == 0 {
                return Err(DirectoryError::Conflict(format!(
                    "change {} is no longer pending",
                    change_id
                )));
            }

            match action {
                ReviewAction::Approve => apply_change(conn, &change).map(Some),
                ReviewAction::Reject => Ok(None),
            }
        })?;

        let change = self.require_change(&mut conn, directory, change_id)?;
        info!(
            "Change {} in {} {} by {}",
            change_id, directory.id, change.status, reviewer
        );

        Ok(ReviewOutcome {
            change,
            applied_row_id: applied.as_ref().map(|a| a.row_id),
            sheet_op: applied.map(|a| a.sheet_op),
        })
    }

    /// Pending changes in a directory, oldest first.
    ///
    /// With no reviewer every pending change is returned. With a reviewer,
    /// only the changes that reviewer may approve.
    pub fn get_pending_changes(
        &self,
        directory: &Directory,
        reviewer: Option<&RequestContext>,
    ) -> Result<Vec<PendingChange>, DirectoryError> {
        let pending = {
            let mut conn = self.store.directory_conn(directory)?;
            pending_changes::list_by_status(&mut conn, &directory.id, ChangeStatus::Pending)?
        };

        let reviewer = match reviewer {
            Some(ctx) => ctx,
            None => return Ok(pending),
        };

        let mut eligible = Vec::with_capacity(pending.len());
        for change in pending {
            if self.resolver.can_approve_change(reviewer, directory, &change)? {
                eligible.push(change);
            }
        }
        debug!(
            "{} of the pending changes in {} are reviewable by {}",
            eligible.len(),
            directory.id,
            reviewer.email()
        );
        Ok(eligible)
    }

    /// Changes a user submitted, newest first
    pub fn submitted_by(
        &self,
        directory: &Directory,
        email: &str,
    ) -> Result<Vec<PendingChange>, DirectoryError> {
        let mut conn = self.store.directory_conn(directory)?;
        pending_changes::list_by_submitter(&mut conn, &directory.id, email)
    }

    fn require_change(
        &self,
        conn: &mut SqliteConnection,
        directory: &Directory,
        change_id: i64,
    ) -> Result<PendingChange, DirectoryError> {
        pending_changes::get_change(conn, change_id)?
            .filter(|change| change.directory_id == directory.id)
            .ok_or_else(|| {
                DirectoryError::NotFound(format!("pending change {} in {}", change_id, directory.id))
            })
    }
}

/// Apply an approved change. Edits resolve their column through the schema
/// captured at submission.
fn apply_change(
    conn: &mut SqliteConnection,
    change: &PendingChange,
) -> Result<AppliedMutation, DirectoryError> {
    match change.change_type {
        ChangeType::Edit => {
            let position = ColumnRef::Name(change.column_name.clone()).position_in(&change.column_schema)?;
            apply_mutation(
                conn,
                RowMutation::SetCell {
                    row_id: change.row_id,
                    position,
                    value: &change.new_value,
                },
            )
        }
        ChangeType::Add => {
            let values: Vec<String> = serde_json::from_str(&change.new_value).map_err(|e| {
                DirectoryError::Internal(format!("change {} holds an invalid row: {}", change.id, e))
            })?;
            apply_mutation(conn, RowMutation::Insert { values: &values })
        }
        ChangeType::Delete => apply_mutation(
            conn,
            RowMutation::Remove {
                row_id: change.row_id,
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns() -> Vec<String> {
        vec!["Name".into(), "City".into(), "Score".into()]
    }

    #[test]
    fn test_column_ref_resolution() {
        assert_eq!(ColumnRef::from("City").position_in(&columns()).unwrap(), 1);
        assert_eq!(ColumnRef::Index(2).position_in(&columns()).unwrap(), 2);
        assert!(ColumnRef::Index(3).position_in(&columns()).is_err());
        assert!(ColumnRef::from("Country").position_in(&columns()).is_err());
    }

    #[test]
    fn test_column_ref_deserializes_untagged() {
        let by_index: ColumnRef = serde_json::from_str("1").unwrap();
        let by_name: ColumnRef = serde_json::from_str("\"City\"").unwrap();
        assert_eq!(by_index, ColumnRef::Index(1));
        assert_eq!(by_name, ColumnRef::Name("City".into()));
    }

    #[test]
    fn test_review_action_parsing() {
        assert_eq!("approve".parse::<ReviewAction>().unwrap(), ReviewAction::Approve);
        assert_eq!(" Reject ".parse::<ReviewAction>().unwrap(), ReviewAction::Reject);
        assert!("maybe".parse::<ReviewAction>().is_err());
        assert_eq!(ReviewAction::Approve.resulting_status(), ChangeStatus::Approved);
    }
}
