//! Diesel model definitions for database tables
//!
//! - Queryable structs: for SELECT queries (reading data)
//! - Insertable structs: for INSERT queries (writing data)

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use super::diesel_schema::*;

// ============================================================================
// Timestamp Helpers (SQLite stores timestamps as TEXT)
// ============================================================================

/// Get current UTC timestamp as RFC 3339 string for SQLite TEXT columns
pub fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

// ============================================================================
// Admins & profiles
// ============================================================================

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = admins)]
pub struct NewAdmin<'a> {
    pub email: &'a str,
    pub created_at: &'a str,
}

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = user_profiles)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UserProfile {
    pub email: String,
    pub username: String,
    pub auth_provider: String,
    pub updated_at: String,
}

// ============================================================================
// Directories
// ============================================================================

/// Directory record from the system database
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = directories)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Directory {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Database file of the directory, relative to the directories dir
    pub storage_ref: String,
    /// Backing spreadsheet; `None` for local-only directories
    pub sheet_id: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = directories)]
pub struct NewDirectoryRow<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub storage_ref: &'a str,
    pub sheet_id: Option<&'a str>,
    pub created_at: &'a str,
}

#[derive(Debug, Clone, Queryable, Selectable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = directory_owners)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DirectoryOwner {
    pub directory_id: String,
    pub user_email: String,
    pub role: String,
    pub created_at: String,
}

// ============================================================================
// Moderators
// ============================================================================

/// Moderator row; never hard-deleted, `is_active` flips to false on removal
#[derive(Debug, Clone, PartialEq, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = moderators)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Moderator {
    pub id: i64,
    pub user_email: String,
    pub username: String,
    pub auth_provider: String,
    pub directory_id: String,
    pub appointed_by: String,
    pub appointed_by_type: String,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = moderator_domains)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ModeratorDomainRow {
    pub moderator_email: String,
    pub directory_id: String,
    pub row_filter_json: String,
    pub can_edit: bool,
    pub can_approve: bool,
    pub requires_approval: bool,
    pub updated_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = moderator_hierarchy)]
pub struct NewHierarchyEdge<'a> {
    pub parent_email: &'a str,
    pub child_email: &'a str,
    pub directory_id: &'a str,
    pub created_at: &'a str,
}

// ============================================================================
// Directory database
// ============================================================================

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = directory_rows)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct StoredRow {
    pub id: i64,
    /// JSON array of cell strings
    pub data: String,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = pending_changes)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct PendingChangeRow {
    pub id: i64,
    pub directory_id: String,
    pub row_id: i64,
    pub column_name: String,
    pub old_value: String,
    pub new_value: String,
    pub change_type: String,
    pub submitted_by: String,
    pub status: String,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<String>,
    pub reason: Option<String>,
    pub column_schema_json: String,
    pub submitted_at: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = pending_changes)]
pub struct NewPendingChange<'a> {
    pub directory_id: &'a str,
    pub row_id: i64,
    pub column_name: &'a str,
    pub old_value: &'a str,
    pub new_value: &'a str,
    pub change_type: &'a str,
    pub submitted_by: &'a str,
    pub status: &'a str,
    pub column_schema_json: &'a str,
    pub submitted_at: &'a str,
}
