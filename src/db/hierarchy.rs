//! Moderator hierarchy - who appointed whom (system database)
//!
//! Append-only. An edge is written only when a moderator appoints another
//! moderator, and read only to decide whether a moderator may remove one.

use diesel::prelude::*;
use tracing::debug;

use super::diesel_schema::moderator_hierarchy;
use super::models::{current_timestamp, NewHierarchyEdge};
use crate::error::DirectoryError;

/// Record that `parent_email` appointed `child_email`. Duplicate edges are ignored.
pub fn record_appointment(
    conn: &mut SqliteConnection,
    parent_email: &str,
    child_email: &str,
    directory_id: &str,
) -> Result<(), DirectoryError> {
    let now = current_timestamp();
    diesel::insert_or_ignore_into(moderator_hierarchy::table)
        .values(&NewHierarchyEdge {
            parent_email,
            child_email,
            directory_id,
            created_at: &now,
        })
        .execute(conn)
        .map_err(|e| DirectoryError::query("insert moderator hierarchy edge", e))?;

    debug!("Hierarchy edge {} -> {} in {}", parent_email, child_email, directory_id);
    Ok(())
}

pub fn is_appointed_by(
    conn: &mut SqliteConnection,
    parent_email: &str,
    child_email: &str,
    directory_id: &str,
) -> Result<bool, DirectoryError> {
    diesel::select(diesel::dsl::exists(
        moderator_hierarchy::table
            .filter(moderator_hierarchy::parent_email.eq(parent_email))
            .filter(moderator_hierarchy::child_email.eq(child_email))
            .filter(moderator_hierarchy::directory_id.eq(directory_id)),
    ))
    .get_result(conn)
    .map_err(|e| DirectoryError::query("check moderator hierarchy", e))
}
