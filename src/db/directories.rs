//! Directory records and directory ownership (system database)

use diesel::prelude::*;
use tracing::info;

use super::diesel_schema::{directories, directory_owners, moderator_domains, moderator_hierarchy, moderators};
use super::models::{current_timestamp, Directory, DirectoryOwner, NewDirectoryRow};
use crate::error::DirectoryError;

/// Default role recorded for the creator of a directory
pub const OWNER_ROLE: &str = "owner";

/// Input for creating a directory record
#[derive(Debug, Clone)]
pub struct CreateDirectoryInput<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub description: Option<&'a str>,
    pub storage_ref: &'a str,
    pub sheet_id: Option<&'a str>,
    pub owner_email: &'a str,
}

/// Directory IDs end up in file names, so keep them to a safe alphabet
pub fn validate_directory_id(id: &str) -> Result<(), DirectoryError> {
    if id.is_empty() || id.len() > 64 {
        return Err(DirectoryError::Validation(
            "directory id must be 1-64 characters".into(),
        ));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(DirectoryError::Validation(format!(
            "directory id '{}' may only contain letters, digits, '-' and '_'",
            id
        )));
    }
    Ok(())
}

/// Create the directory record and its owner record together
pub fn create_directory(
    conn: &mut SqliteConnection,
    input: &CreateDirectoryInput<'_>,
) -> Result<Directory, DirectoryError> {
    validate_directory_id(input.id)?;
    let now = current_timestamp();

    conn.immediate_transaction(|conn| {
        diesel::insert_into(directories::table)
            .values(&NewDirectoryRow {
                id: input.id,
                name: input.name,
                description: input.description,
                storage_ref: input.storage_ref,
                sheet_id: input.sheet_id,
                created_at: &now,
            })
            .execute(conn)
            .map_err(|e| DirectoryError::query("insert directory", e))?;

        diesel::insert_into(directory_owners::table)
            .values(&DirectoryOwner {
                directory_id: input.id.to_string(),
                user_email: input.owner_email.to_string(),
                role: OWNER_ROLE.to_string(),
                created_at: now.clone(),
            })
            .execute(conn)
            .map_err(|e| DirectoryError::query("insert directory owner", e))?;

        get_directory(conn, input.id)?
            .ok_or_else(|| DirectoryError::Internal("Failed to retrieve created directory".into()))
    })
    .map(|directory| {
        info!("Created directory {} owned by {}", directory.id, input.owner_email);
        directory
    })
}

pub fn get_directory(
    conn: &mut SqliteConnection,
    directory_id: &str,
) -> Result<Option<Directory>, DirectoryError> {
    directories::table
        .filter(directories::id.eq(directory_id))
        .select(Directory::as_select())
        .first(conn)
        .optional()
        .map_err(|e| DirectoryError::query("load directory", e))
}

pub fn list_directories(conn: &mut SqliteConnection) -> Result<Vec<Directory>, DirectoryError> {
    directories::table
        .select(Directory::as_select())
        .order(directories::created_at.asc())
        .load(conn)
        .map_err(|e| DirectoryError::query("list directories", e))
}

pub fn set_sheet_id(
    conn: &mut SqliteConnection,
    directory_id: &str,
    sheet_id: Option<&str>,
) -> Result<(), DirectoryError> {
    let updated = diesel::update(directories::table.filter(directories::id.eq(directory_id)))
        .set(directories::sheet_id.eq(sheet_id))
        .execute(conn)
        .map_err(|e| DirectoryError::query("update directory sheet", e))?;

    if updated == 0 {
        return Err(DirectoryError::NotFound(format!("directory {}", directory_id)));
    }
    Ok(())
}

/// Delete a directory and everything that hangs off it in the system database
pub fn delete_directory(
    conn: &mut SqliteConnection,
    directory_id: &str,
) -> Result<bool, DirectoryError> {
    conn.immediate_transaction(|conn| {
        diesel::delete(moderator_hierarchy::table.filter(moderator_hierarchy::directory_id.eq(directory_id)))
            .execute(conn)
            .map_err(|e| DirectoryError::query("delete moderator hierarchy", e))?;
        diesel::delete(moderator_domains::table.filter(moderator_domains::directory_id.eq(directory_id)))
            .execute(conn)
            .map_err(|e| DirectoryError::query("delete moderator domains", e))?;
        diesel::delete(moderators::table.filter(moderators::directory_id.eq(directory_id)))
            .execute(conn)
            .map_err(|e| DirectoryError::query("delete moderators", e))?;
        diesel::delete(directory_owners::table.filter(directory_owners::directory_id.eq(directory_id)))
            .execute(conn)
            .map_err(|e| DirectoryError::query("delete directory owners", e))?;

        let deleted = diesel::delete(directories::table.filter(directories::id.eq(directory_id)))
            .execute(conn)
            .map_err(|e| DirectoryError::query("delete directory", e))?;

        Ok(deleted > 0)
    })
}

// ============================================================================
// Owners
// ============================================================================

pub fn is_owner(
    conn: &mut SqliteConnection,
    directory_id: &str,
    email: &str,
) -> Result<bool, DirectoryError> {
    diesel::select(diesel::dsl::exists(
        directory_owners::table
            .filter(directory_owners::directory_id.eq(directory_id))
            .filter(directory_owners::user_email.eq(email)),
    ))
    .get_result(conn)
    .map_err(|e| DirectoryError::query("check directory owner", e))
}

pub fn add_owner(
    conn: &mut SqliteConnection,
    directory_id: &str,
    email: &str,
    role: &str,
) -> Result<bool, DirectoryError> {
    let inserted = diesel::insert_or_ignore_into(directory_owners::table)
        .values(&DirectoryOwner {
            directory_id: directory_id.to_string(),
            user_email: email.to_string(),
            role: role.to_string(),
            created_at: current_timestamp(),
        })
        .execute(conn)
        .map_err(|e| DirectoryError::query("insert directory owner", e))?;

    Ok(inserted > 0)
}

/// Remove an owner. The last remaining owner cannot be removed.
pub fn remove_owner(
    conn: &mut SqliteConnection,
    directory_id: &str,
    email: &str,
) -> Result<bool, DirectoryError> {
    conn.immediate_transaction(|conn| {
        if !is_owner(conn, directory_id, email)? {
            return Ok(false);
        }

        let remaining: i64 = directory_owners::table
            .filter(directory_owners::directory_id.eq(directory_id))
            .count()
            .get_result(conn)
            .map_err(|e| DirectoryError::query("count directory owners", e))?;
        if remaining <= 1 {
            return Err(DirectoryError::Conflict(format!(
                "cannot remove the last owner of directory {}",
                directory_id
            )));
        }

        diesel::delete(
            directory_owners::table
                .filter(directory_owners::directory_id.eq(directory_id))
                .filter(directory_owners::user_email.eq(email)),
        )
        .execute(conn)
        .map_err(|e| DirectoryError::query("delete directory owner", e))?;

        Ok(true)
    })
}

pub fn list_owners(
    conn: &mut SqliteConnection,
    directory_id: &str,
) -> Result<Vec<DirectoryOwner>, DirectoryError> {
    directory_owners::table
        .filter(directory_owners::directory_id.eq(directory_id))
        .select(DirectoryOwner::as_select())
        .order(directory_owners::created_at.asc())
        .load(conn)
        .map_err(|e| DirectoryError::query("list directory owners", e))
}
