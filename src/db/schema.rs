//! Database schema definitions
//!
//! Two kinds of database share this module: the single system database and
//! one database per directory. Each tracks its own `schema_version`.

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::sql_types::Integer;
use tracing::info;

use crate::error::DirectoryError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Which database a schema belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaKind {
    System,
    Directory,
}

impl SchemaKind {
    fn ddl(self) -> &'static str {
        match self {
            SchemaKind::System => SYSTEM_SCHEMA,
            SchemaKind::Directory => DIRECTORY_SCHEMA,
        }
    }
}

#[derive(QueryableByName)]
struct VersionRow {
    #[diesel(sql_type = Integer)]
    version: i32,
}

/// Initialize the database schema
pub fn init_schema(conn: &mut SqliteConnection, kind: SchemaKind) -> Result<(), DirectoryError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new {:?} database schema v{}", kind, SCHEMA_VERSION);
        conn.immediate_transaction(|conn| {
            conn.batch_execute(kind.ddl())
                .map_err(|e| DirectoryError::query("create tables", e))?;
            set_schema_version(conn, SCHEMA_VERSION)
        })?;
    } else if current_version > SCHEMA_VERSION {
        return Err(DirectoryError::Config(format!(
            "database schema v{} is newer than supported v{}",
            current_version, SCHEMA_VERSION
        )));
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &mut SqliteConnection) -> Result<i32, DirectoryError> {
    conn.batch_execute("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
        .map_err(|e| DirectoryError::query("create schema_version table", e))?;

    let rows: Vec<VersionRow> = diesel::sql_query("SELECT version FROM schema_version LIMIT 1")
        .load(conn)
        .map_err(|e| DirectoryError::query("read schema_version", e))?;

    Ok(rows.first().map(|r| r.version).unwrap_or(0))
}

fn set_schema_version(conn: &mut SqliteConnection, version: i32) -> Result<(), DirectoryError> {
    diesel::sql_query("DELETE FROM schema_version")
        .execute(conn)
        .map_err(|e| DirectoryError::query("clear schema_version", e))?;
    diesel::sql_query("INSERT INTO schema_version (version) VALUES (?)")
        .bind::<Integer, _>(version)
        .execute(conn)
        .map_err(|e| DirectoryError::query("set schema_version", e))?;
    Ok(())
}

const SYSTEM_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS admins (
    email TEXT PRIMARY KEY NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_profiles (
    email TEXT PRIMARY KEY NOT NULL,
    username TEXT NOT NULL,
    auth_provider TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS directories (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    storage_ref TEXT NOT NULL UNIQUE,
    sheet_id TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS directory_owners (
    directory_id TEXT NOT NULL REFERENCES directories(id) ON DELETE CASCADE,
    user_email TEXT NOT NULL,
    role TEXT NOT NULL DEFAULT 'owner',
    created_at TEXT NOT NULL,
    PRIMARY KEY (directory_id, user_email)
);

CREATE TABLE IF NOT EXISTS moderators (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_email TEXT NOT NULL,
    username TEXT NOT NULL,
    auth_provider TEXT NOT NULL,
    directory_id TEXT NOT NULL REFERENCES directories(id) ON DELETE CASCADE,
    appointed_by TEXT NOT NULL,
    appointed_by_type TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (user_email, directory_id)
);

CREATE INDEX IF NOT EXISTS idx_moderators_directory ON moderators(directory_id, is_active);

CREATE TABLE IF NOT EXISTS moderator_domains (
    moderator_email TEXT NOT NULL,
    directory_id TEXT NOT NULL REFERENCES directories(id) ON DELETE CASCADE,
    row_filter_json TEXT NOT NULL,
    can_edit INTEGER NOT NULL DEFAULT 0,
    can_approve INTEGER NOT NULL DEFAULT 0,
    requires_approval INTEGER NOT NULL DEFAULT 1,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (moderator_email, directory_id)
);

CREATE TABLE IF NOT EXISTS moderator_hierarchy (
    parent_email TEXT NOT NULL,
    child_email TEXT NOT NULL,
    directory_id TEXT NOT NULL REFERENCES directories(id) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    PRIMARY KEY (parent_email, child_email, directory_id)
);
"#;

const DIRECTORY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS directory_schema (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    columns_json TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS directory_rows (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    data TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pending_changes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    directory_id TEXT NOT NULL,
    row_id INTEGER NOT NULL,
    column_name TEXT NOT NULL DEFAULT '',
    old_value TEXT NOT NULL DEFAULT '',
    new_value TEXT NOT NULL DEFAULT '',
    change_type TEXT NOT NULL CHECK (change_type IN ('edit', 'add', 'delete')),
    submitted_by TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'approved', 'rejected')),
    reviewed_by TEXT,
    reviewed_at TEXT,
    reason TEXT,
    column_schema_json TEXT NOT NULL,
    submitted_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_pending_changes_status ON pending_changes(directory_id, status);
"#;
