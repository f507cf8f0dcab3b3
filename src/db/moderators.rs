//! Moderator domain store (system database)
//!
//! A moderator is appointed per directory. Alongside the moderator row each
//! appointment writes a domain row holding the moderator's permissions and
//! row scope, a refreshed user profile, and (when the appointer is itself a
//! moderator) a hierarchy edge. All of these commit together or not at all.
//!
//! A moderator appointer may only re-appoint moderators they appointed
//! themselves; anyone else's existing record is left untouched.

use diesel::prelude::*;
use diesel::sql_types::{Bool, Text};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::diesel_schema::{moderator_domains, moderators};
use super::models::{current_timestamp, Moderator, ModeratorDomainRow};
use super::{hierarchy, users};
use crate::error::DirectoryError;
use crate::filters::RowScope;

/// Permission record for one moderator in one directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeratorDomain {
    pub moderator_email: String,
    pub directory_id: String,
    pub scope: RowScope,
    pub can_edit: bool,
    pub can_approve: bool,
    pub requires_approval: bool,
}

impl TryFrom<ModeratorDomainRow> for ModeratorDomain {
    type Error = DirectoryError;

    fn try_from(row: ModeratorDomainRow) -> Result<Self, Self::Error> {
        let scope = RowScope::from_json(&row.row_filter_json).map_err(|e| {
            DirectoryError::Internal(format!(
                "Stored row filter for {} in {} is unreadable: {}",
                row.moderator_email, row.directory_id, e
            ))
        })?;
        Ok(Self {
            moderator_email: row.moderator_email,
            directory_id: row.directory_id,
            scope,
            can_edit: row.can_edit,
            can_approve: row.can_approve,
            requires_approval: row.requires_approval,
        })
    }
}

/// Input for appointing (or re-appointing) a moderator
#[derive(Debug, Clone)]
pub struct AppointModeratorInput<'a> {
    pub email: &'a str,
    pub username: &'a str,
    pub auth_provider: &'a str,
    pub directory_id: &'a str,
    pub appointed_by: &'a str,
    /// Role the appointer held: "admin", "owner" or "moderator"
    pub appointed_by_type: &'a str,
    pub scope: &'a RowScope,
    pub can_edit: bool,
    pub can_approve: bool,
    pub requires_approval: bool,
}

impl AppointModeratorInput<'_> {
    fn appointed_by_moderator(&self) -> bool {
        self.appointed_by_type == "moderator"
    }
}

/// Upsert profile, moderator, domain and (for moderator appointers) the
/// hierarchy edge in one transaction.
pub fn appoint_moderator(
    conn: &mut SqliteConnection,
    input: &AppointModeratorInput<'_>,
) -> Result<Moderator, DirectoryError> {
    let row_filter_json = input.scope.to_json()?;

    let moderator = conn.immediate_transaction(|conn| {
        if input.appointed_by_moderator() {
            require_own_appointee(conn, input)?;
        }
        users::upsert_profile(conn, input.email, input.username, input.auth_provider)?;
        upsert_moderator(conn, input)?;
        upsert_domain(conn, input, &row_filter_json)?;
        if input.appointed_by_moderator() {
            hierarchy::record_appointment(conn, input.appointed_by, input.email, input.directory_id)?;
        }
        get_moderator(conn, input.email, input.directory_id)?
            .ok_or_else(|| DirectoryError::Internal("Failed to retrieve appointed moderator".into()))
    })?;

    info!(
        "Appointed moderator {} in {} (by {} {})",
        input.email, input.directory_id, input.appointed_by_type, input.appointed_by
    );
    Ok(moderator)
}

/// A moderator may overwrite an existing record only for someone they appointed
fn require_own_appointee(
    conn: &mut SqliteConnection,
    input: &AppointModeratorInput<'_>,
) -> Result<(), DirectoryError> {
    if get_moderator(conn, input.email, input.directory_id)?.is_none() {
        return Ok(());
    }
    if hierarchy::is_appointed_by(conn, input.appointed_by, input.email, input.directory_id)? {
        return Ok(());
    }
    warn!(
        "{} may not re-appoint {} in {}: not their appointee",
        input.appointed_by, input.email, input.directory_id
    );
    Err(DirectoryError::Unauthorized)
}

fn upsert_moderator(
    conn: &mut SqliteConnection,
    input: &AppointModeratorInput<'_>,
) -> Result<(), DirectoryError> {
    let now = current_timestamp();

    diesel::sql_query(
        r#"
        INSERT INTO moderators (user_email, username, auth_provider, directory_id, appointed_by, appointed_by_type, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)
        ON CONFLICT(user_email, directory_id) DO UPDATE SET
            username = excluded.username,
            auth_provider = excluded.auth_provider,
            appointed_by = excluded.appointed_by,
            appointed_by_type = excluded.appointed_by_type,
            is_active = 1,
            updated_at = excluded.updated_at
        "#,
    )
    .bind::<Text, _>(input.email)
    .bind::<Text, _>(input.username)
    .bind::<Text, _>(input.auth_provider)
    .bind::<Text, _>(input.directory_id)
    .bind::<Text, _>(input.appointed_by)
    .bind::<Text, _>(input.appointed_by_type)
    .bind::<Text, _>(&now)
    .bind::<Text, _>(&now)
    .execute(conn)
    .map_err(|e| DirectoryError::query("upsert moderator", e))?;

    Ok(())
}

fn upsert_domain(
    conn: &mut SqliteConnection,
    input: &AppointModeratorInput<'_>,
    row_filter_json: &str,
) -> Result<(), DirectoryError> {
    let now = current_timestamp();

    diesel::sql_query(
        r#"
        INSERT INTO moderator_domains (moderator_email, directory_id, row_filter_json, can_edit, can_approve, requires_approval, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(moderator_email, directory_id) DO UPDATE SET
            row_filter_json = excluded.row_filter_json,
            can_edit = excluded.can_edit,
            can_approve = excluded.can_approve,
            requires_approval = excluded.requires_approval,
            updated_at = excluded.updated_at
        "#,
    )
    .bind::<Text, _>(input.email)
    .bind::<Text, _>(input.directory_id)
    .bind::<Text, _>(row_filter_json)
    .bind::<Bool, _>(input.can_edit)
    .bind::<Bool, _>(input.can_approve)
    .bind::<Bool, _>(input.requires_approval)
    .bind::<Text, _>(&now)
    .execute(conn)
    .map_err(|e| DirectoryError::query("upsert moderator domain", e))?;

    Ok(())
}

/// Soft-delete: flip `is_active` off. Returns false if there was no active moderator.
pub fn remove_moderator(
    conn: &mut SqliteConnection,
    email: &str,
    directory_id: &str,
) -> Result<bool, DirectoryError> {
    let now = current_timestamp();
    let updated = diesel::update(
        moderators::table
            .filter(moderators::user_email.eq(email))
            .filter(moderators::directory_id.eq(directory_id))
            .filter(moderators::is_active.eq(true)),
    )
    .set((moderators::is_active.eq(false), moderators::updated_at.eq(&now)))
    .execute(conn)
    .map_err(|e| DirectoryError::query("deactivate moderator", e))?;

    if updated > 0 {
        info!("Deactivated moderator {} in {}", email, directory_id);
    }
    Ok(updated > 0)
}

pub fn get_moderator(
    conn: &mut SqliteConnection,
    email: &str,
    directory_id: &str,
) -> Result<Option<Moderator>, DirectoryError> {
    moderators::table
        .filter(moderators::user_email.eq(email))
        .filter(moderators::directory_id.eq(directory_id))
        .select(Moderator::as_select())
        .first(conn)
        .optional()
        .map_err(|e| DirectoryError::query("load moderator", e))
}

pub fn is_active_moderator(
    conn: &mut SqliteConnection,
    email: &str,
    directory_id: &str,
) -> Result<bool, DirectoryError> {
    diesel::select(diesel::dsl::exists(
        moderators::table
            .filter(moderators::user_email.eq(email))
            .filter(moderators::directory_id.eq(directory_id))
            .filter(moderators::is_active.eq(true)),
    ))
    .get_result(conn)
    .map_err(|e| DirectoryError::query("check moderator", e))
}

/// Load a moderator's domain. A missing record is NotFound, never a
/// zero-permission default.
pub fn get_domain(
    conn: &mut SqliteConnection,
    email: &str,
    directory_id: &str,
) -> Result<ModeratorDomain, DirectoryError> {
    let row = moderator_domains::table
        .filter(moderator_domains::moderator_email.eq(email))
        .filter(moderator_domains::directory_id.eq(directory_id))
        .select(ModeratorDomainRow::as_select())
        .first::<ModeratorDomainRow>(conn)
        .optional()
        .map_err(|e| DirectoryError::query("load moderator domain", e))?
        .ok_or_else(|| {
            DirectoryError::NotFound(format!("moderator domain for {} in {}", email, directory_id))
        })?;

    ModeratorDomain::try_from(row)
}

/// Active moderators of a directory in appointment order
pub fn list_active_moderators(
    conn: &mut SqliteConnection,
    directory_id: &str,
) -> Result<Vec<Moderator>, DirectoryError> {
    moderators::table
        .filter(moderators::directory_id.eq(directory_id))
        .filter(moderators::is_active.eq(true))
        .select(Moderator::as_select())
        .order(moderators::id.asc())
        .load(conn)
        .map_err(|e| DirectoryError::query("list moderators", e))
}
