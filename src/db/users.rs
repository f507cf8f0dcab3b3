//! Platform admins and user profiles (system database)

use diesel::prelude::*;
use diesel::sql_types::Text;
use tracing::info;

use super::diesel_schema::{admins, user_profiles};
use super::models::{current_timestamp, NewAdmin, UserProfile};
use crate::error::DirectoryError;

pub fn is_admin(conn: &mut SqliteConnection, email: &str) -> Result<bool, DirectoryError> {
    diesel::select(diesel::dsl::exists(admins::table.filter(admins::email.eq(email))))
        .get_result(conn)
        .map_err(|e| DirectoryError::query("check admin", e))
}

/// Add a platform admin. Returns false if the email already was one.
pub fn add_admin(conn: &mut SqliteConnection, email: &str) -> Result<bool, DirectoryError> {
    let now = current_timestamp();
    let inserted = diesel::insert_or_ignore_into(admins::table)
        .values(&NewAdmin {
            email,
            created_at: &now,
        })
        .execute(conn)
        .map_err(|e| DirectoryError::query("insert admin", e))?;

    if inserted > 0 {
        info!("Added platform admin {}", email);
    }
    Ok(inserted > 0)
}

pub fn remove_admin(conn: &mut SqliteConnection, email: &str) -> Result<bool, DirectoryError> {
    let deleted = diesel::delete(admins::table.filter(admins::email.eq(email)))
        .execute(conn)
        .map_err(|e| DirectoryError::query("delete admin", e))?;

    if deleted > 0 {
        info!("Removed platform admin {}", email);
    }
    Ok(deleted > 0)
}

pub fn list_admins(conn: &mut SqliteConnection) -> Result<Vec<String>, DirectoryError> {
    admins::table
        .select(admins::email)
        .order(admins::email.asc())
        .load(conn)
        .map_err(|e| DirectoryError::query("list admins", e))
}

/// Insert or refresh the profile of a user
pub fn upsert_profile(
    conn: &mut SqliteConnection,
    email: &str,
    username: &str,
    auth_provider: &str,
) -> Result<(), DirectoryError> {
    let now = current_timestamp();

    diesel::sql_query(
        r#"
        INSERT INTO user_profiles (email, username, auth_provider, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(email) DO UPDATE SET
            username = excluded.username,
            auth_provider = excluded.auth_provider,
            updated_at = excluded.updated_at
        "#,
    )
    .bind::<Text, _>(email)
    .bind::<Text, _>(username)
    .bind::<Text, _>(auth_provider)
    .bind::<Text, _>(&now)
    .execute(conn)
    .map_err(|e| DirectoryError::query("upsert user profile", e))?;

    Ok(())
}

pub fn get_profile(
    conn: &mut SqliteConnection,
    email: &str,
) -> Result<Option<UserProfile>, DirectoryError> {
    user_profiles::table
        .filter(user_profiles::email.eq(email))
        .select(UserProfile::as_select())
        .first(conn)
        .optional()
        .map_err(|e| DirectoryError::query("load user profile", e))
}
