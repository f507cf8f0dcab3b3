//! Authorization resolver
//!
//! Answers "who is this caller in this directory" and the boolean gates the
//! write paths call before mutating anything. Admin and owner membership go
//! through the injected [`PermissionCache`]; moderator state is always read
//! from the store.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::cache::{CacheKey, PermissionCache};
use super::{Role, UserType};
use crate::context::RequestContext;
use crate::db::moderators::{self, ModeratorDomain};
use crate::db::pending_changes::{ChangeType, PendingChange};
use crate::db::rows::{self, Row};
use crate::db::{directories, hierarchy, users, Directory, Store};
use crate::error::DirectoryError;
use crate::filters::{materialize_row, RowScope};

/// Rows a moderator may touch, resolved against current data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "row_ids", rename_all = "snake_case")]
pub enum RowsAllowed {
    All,
    /// Exactly these row IDs; empty means no rows
    Only(Vec<i64>),
}

impl RowsAllowed {
    pub fn contains(&self, row_id: i64) -> bool {
        match self {
            RowsAllowed::All => true,
            RowsAllowed::Only(ids) => ids.contains(&row_id),
        }
    }
}

/// Resolved permissions of one moderator in one directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeratorPermissions {
    pub can_edit: bool,
    pub can_approve: bool,
    pub requires_approval: bool,
    pub rows_allowed: RowsAllowed,
}

pub struct AuthResolver {
    store: Arc<Store>,
    cache: Arc<dyn PermissionCache>,
}

impl AuthResolver {
    pub fn new(store: Arc<Store>, cache: Arc<dyn PermissionCache>) -> Self {
        Self { store, cache }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    // =========================================================================
    // Membership
    // =========================================================================

    pub fn is_admin(&self, email: &str) -> Result<bool, DirectoryError> {
        if email.is_empty() {
            return Ok(false);
        }

        let key = CacheKey::admin(email);
        if let Some(allowed) = self.cache.get(&key) {
            return Ok(allowed);
        }

        debug!("Permission cache miss: admin check for {}", email);
        let mut conn = self.store.system_conn()?;
        let allowed = users::is_admin(&mut conn, email)?;
        self.cache.set(key, allowed);
        Ok(allowed)
    }

    pub fn is_owner(&self, directory_id: &str, email: &str) -> Result<bool, DirectoryError> {
        if email.is_empty() {
            return Ok(false);
        }

        let key = CacheKey::owner(directory_id, email);
        if let Some(allowed) = self.cache.get(&key) {
            return Ok(allowed);
        }

        debug!("Permission cache miss: owner check for {} in {}", email, directory_id);
        let mut conn = self.store.system_conn()?;
        let allowed = directories::is_owner(&mut conn, directory_id, email)?;
        self.cache.set(key, allowed);
        Ok(allowed)
    }

    /// Resolve the caller's role; the first matching tier wins
    pub fn resolve_role(
        &self,
        ctx: &RequestContext,
        directory_id: &str,
    ) -> Result<Role, DirectoryError> {
        if ctx.is_anonymous() {
            return Ok(Role::Anonymous);
        }
        if self.is_admin(ctx.email())? {
            return Ok(Role::Admin);
        }
        if self.is_owner(directory_id, ctx.email())? {
            return Ok(Role::Owner);
        }

        let mut conn = self.store.system_conn()?;
        if moderators::is_active_moderator(&mut conn, ctx.email(), directory_id)? {
            return Ok(Role::Moderator);
        }
        Ok(Role::Anonymous)
    }

    pub fn user_type(
        &self,
        ctx: &RequestContext,
        directory_id: &str,
    ) -> Result<UserType, DirectoryError> {
        Ok(self.resolve_role(ctx, directory_id)?.user_type())
    }

    // =========================================================================
    // Moderator domains
    // =========================================================================

    /// Domain of an active moderator; `None` when the user is not one
    pub fn moderator_domain(
        &self,
        email: &str,
        directory_id: &str,
    ) -> Result<Option<ModeratorDomain>, DirectoryError> {
        let mut conn = self.store.system_conn()?;
        if !moderators::is_active_moderator(&mut conn, email, directory_id)? {
            return Ok(None);
        }
        match moderators::get_domain(&mut conn, email, directory_id) {
            Ok(domain) => Ok(Some(domain)),
            Err(e) if e.is_not_found() => {
                warn!("Active moderator {} in {} has no domain record", email, directory_id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Whether a moderator's row scope covers one row.
    ///
    /// Fails with NotFound when the row does not exist.
    pub fn can_access_row(
        &self,
        email: &str,
        directory: &Directory,
        row_id: i64,
    ) -> Result<bool, DirectoryError> {
        let domain = match self.moderator_domain(email, &directory.id)? {
            Some(domain) => domain,
            None => return Ok(false),
        };
        if domain.scope.is_empty() {
            return Ok(false);
        }

        let mut conn = self.store.directory_conn(directory)?;
        let row = rows::require_row(&mut conn, row_id)?;
        if domain.scope.is_all() {
            return Ok(true);
        }
        let columns = rows::get_columns(&mut conn)?;
        Ok(domain.scope.allows(&materialize_row(&columns, &row.values)))
    }

    /// Every row the moderator may touch, in ID order
    pub fn accessible_rows(
        &self,
        email: &str,
        directory: &Directory,
    ) -> Result<Vec<Row>, DirectoryError> {
        let domain = match self.moderator_domain(email, &directory.id)? {
            Some(domain) => domain,
            None => return Ok(Vec::new()),
        };
        self.rows_in_scope(directory, &domain.scope)
    }

    fn rows_in_scope(
        &self,
        directory: &Directory,
        scope: &RowScope,
    ) -> Result<Vec<Row>, DirectoryError> {
        if scope.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.store.directory_conn(directory)?;
        let all = rows::list_rows(&mut conn)?;
        if scope.is_all() {
            return Ok(all);
        }

        let columns = rows::get_columns(&mut conn)?;
        Ok(all
            .into_iter()
            .filter(|row| scope.allows(&materialize_row(&columns, &row.values)))
            .collect())
    }

    /// Resolved permissions of an active moderator.
    ///
    /// A user with no active appointment or no domain record is NotFound.
    pub fn moderator_permissions(
        &self,
        email: &str,
        directory: &Directory,
    ) -> Result<ModeratorPermissions, DirectoryError> {
        let domain = self.moderator_domain(email, &directory.id)?.ok_or_else(|| {
            DirectoryError::NotFound(format!("moderator {} in {}", email, directory.id))
        })?;

        let rows_allowed = match &domain.scope {
            RowScope::All => RowsAllowed::All,
            scope => RowsAllowed::Only(
                self.rows_in_scope(directory, scope)?
                    .into_iter()
                    .map(|row| row.id)
                    .collect(),
            ),
        };

        Ok(ModeratorPermissions {
            can_edit: domain.can_edit,
            can_approve: domain.can_approve,
            requires_approval: domain.requires_approval,
            rows_allowed,
        })
    }

    // =========================================================================
    // Gates
    // =========================================================================

    pub fn can_appoint_moderator(
        &self,
        ctx: &RequestContext,
        role: Role,
        directory_id: &str,
    ) -> Result<bool, DirectoryError> {
        match role {
            Role::Admin => Ok(true),
            Role::Owner => self.is_owner(directory_id, ctx.email()),
            Role::Moderator => Ok(self
                .moderator_domain(ctx.email(), directory_id)?
                .map(|domain| domain.can_approve)
                .unwrap_or(false)),
            Role::Anonymous => Ok(false),
        }
    }

    pub fn can_remove_moderator(
        &self,
        ctx: &RequestContext,
        role: Role,
        target_email: &str,
        directory_id: &str,
    ) -> Result<bool, DirectoryError> {
        match role {
            Role::Admin => Ok(true),
            Role::Owner => self.is_owner(directory_id, ctx.email()),
            Role::Moderator => {
                let mut conn = self.store.system_conn()?;
                hierarchy::is_appointed_by(&mut conn, ctx.email(), target_email, directory_id)
            }
            Role::Anonymous => Ok(false),
        }
    }

    /// Whether the caller may approve or reject a change.
    ///
    /// Admins and owners may review anything. A moderator needs `can_approve`,
    /// must not be the submitter, and the targeted row (for additions, the
    /// proposed row) must fall inside their scope.
    pub fn can_approve_change(
        &self,
        ctx: &RequestContext,
        directory: &Directory,
        change: &PendingChange,
    ) -> Result<bool, DirectoryError> {
        let role = self.resolve_role(ctx, &directory.id)?;
        if role.is_owner_tier() {
            return Ok(true);
        }
        if role != Role::Moderator {
            return Ok(false);
        }

        let domain = match self.moderator_domain(ctx.email(), &directory.id)? {
            Some(domain) => domain,
            None => return Ok(false),
        };
        if !domain.can_approve || change.submitted_by == ctx.email() {
            return Ok(false);
        }
        if domain.scope.is_empty() {
            return Ok(false);
        }

        match change.change_type {
            ChangeType::Add => {
                if domain.scope.is_all() {
                    return Ok(true);
                }
                let values: Vec<String> = match serde_json::from_str(&change.new_value) {
                    Ok(values) => values,
                    Err(e) => {
                        warn!("Pending change {} has an unreadable row: {}", change.id, e);
                        return Ok(false);
                    }
                };
                Ok(domain
                    .scope
                    .allows(&materialize_row(&change.column_schema, &values)))
            }
            ChangeType::Edit | ChangeType::Delete => {
                let mut conn = self.store.directory_conn(directory)?;
                let row = match rows::get_row(&mut conn, change.row_id)? {
                    Some(row) => row,
                    None => return Ok(false),
                };
                if domain.scope.is_all() {
                    return Ok(true);
                }
                let columns = rows::get_columns(&mut conn)?;
                Ok(domain.scope.allows(&materialize_row(&columns, &row.values)))
            }
        }
    }

    // =========================================================================
    // Cache maintenance
    // =========================================================================

    pub fn invalidate_user(&self, email: &str) {
        debug!("Invalidating cached permissions for {}", email);
        self.cache.invalidate_user(email);
    }

    pub fn clear_cache(&self) {
        debug!("Clearing permission cache");
        self.cache.clear();
    }
}
