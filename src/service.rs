//! Directory service
//!
//! The write-path entry point for callers. Every operation takes the
//! caller's [`RequestContext`], resolves their role, checks the matching
//! gate and only then touches storage. Row mutations that commit locally are
//! mirrored to the backing sheet in the background.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::auth::{AuthResolver, ModeratorPermissions, PermissionCache, Role, TtlPermissionCache, UserType};
use crate::config::{Config, WriteLimits};
use crate::context::{normalize_email, RequestContext};
use crate::db::directories::{self, CreateDirectoryInput, OWNER_ROLE};
use crate::db::models::DirectoryOwner;
use crate::db::moderators::{self, AppointModeratorInput};
use crate::db::pending_changes::PendingChange;
use crate::db::rows::{self, IndexedRow, Row, RowQuery};
use crate::db::{users, Directory, Moderator, Store};
use crate::error::DirectoryError;
use crate::filters::{materialize_row, RowScope};
use crate::sheets::{SheetClientProvider, SheetSync};
use crate::workflow::{apply_mutation, ColumnRef, PendingChangeWorkflow, ProposedChange, ReviewAction, RowMutation};

/// Request to create a directory
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewDirectory {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sheet_id: Option<String>,
    /// Initial column schema; replaced by the header on import
    #[serde(default)]
    pub columns: Vec<String>,
}

/// Request to appoint a moderator
#[derive(Debug, Clone, Deserialize)]
pub struct AppointRequest {
    pub email: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub auth_provider: Option<String>,
    pub scope: RowScope,
    #[serde(default)]
    pub can_edit: bool,
    #[serde(default)]
    pub can_approve: bool,
    #[serde(default)]
    pub requires_approval: bool,
}

/// What happened to a row write
#[derive(Debug)]
pub enum WriteOutcome {
    /// Committed to the row store
    Applied {
        row_id: i64,
        write_back: Option<JoinHandle<()>>,
    },
    /// Queued for review
    Queued(PendingChange),
}

impl WriteOutcome {
    pub fn is_queued(&self) -> bool {
        matches!(self, WriteOutcome::Queued(_))
    }

    /// Wait for the background write-back, if any
    pub async fn settle(self) -> Self {
        match self {
            WriteOutcome::Applied { row_id, write_back } => {
                if let Some(handle) = write_back {
                    if let Err(e) = handle.await {
                        warn!("Sheet write-back task for row {} failed: {}", row_id, e);
                    }
                }
                WriteOutcome::Applied {
                    row_id,
                    write_back: None,
                }
            }
            queued => queued,
        }
    }
}

/// Result of a review
#[derive(Debug)]
pub struct ReviewResult {
    pub change: PendingChange,
    pub write_back: Option<JoinHandle<()>>,
}

/// Summary of a sheet import
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub columns: Vec<String>,
    pub rows: usize,
}

/// How a write is routed for the caller
enum WriteRoute {
    Direct,
    Review,
}

pub struct DirectoryService {
    store: Arc<Store>,
    resolver: Arc<AuthResolver>,
    workflow: PendingChangeWorkflow,
    sync: SheetSync,
    limits: WriteLimits,
}

impl DirectoryService {
    pub fn new(
        store: Arc<Store>,
        cache: Arc<dyn PermissionCache>,
        sync: SheetSync,
        limits: WriteLimits,
    ) -> Self {
        let resolver = Arc::new(AuthResolver::new(store.clone(), cache));
        let workflow = PendingChangeWorkflow::new(store.clone(), resolver.clone());
        Self {
            store,
            resolver,
            workflow,
            sync,
            limits,
        }
    }

    /// Open storage with a TTL permission cache and no sheet provider
    pub fn open(config: &Config) -> Result<Self, DirectoryError> {
        Self::open_with_sheets(config, None)
    }

    pub fn open_with_sheets(
        config: &Config,
        provider: Option<Arc<dyn SheetClientProvider>>,
    ) -> Result<Self, DirectoryError> {
        let store = Arc::new(Store::open(config)?);
        let cache: Arc<dyn PermissionCache> =
            Arc::new(TtlPermissionCache::new(config.permission_cache_ttl()));
        let sync = SheetSync::new(provider, config.sheet_sync.clone());
        Ok(Self::new(store, cache, sync, config.limits))
    }

    pub fn resolver(&self) -> &AuthResolver {
        &self.resolver
    }

    pub fn workflow(&self) -> &PendingChangeWorkflow {
        &self.workflow
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn user_type(&self, ctx: &RequestContext, directory_id: &str) -> Result<UserType, DirectoryError> {
        self.resolver.user_type(ctx, directory_id)
    }

    fn require_admin(&self, ctx: &RequestContext) -> Result<(), DirectoryError> {
        if self.resolver.is_admin(ctx.email())? {
            Ok(())
        } else {
            warn!("{} denied: admin required", ctx);
            Err(DirectoryError::Unauthorized)
        }
    }

    /// Role of the caller; admins and owners only
    fn require_owner_tier(&self, ctx: &RequestContext, directory_id: &str) -> Result<Role, DirectoryError> {
        let role = self.resolver.resolve_role(ctx, directory_id)?;
        if role.is_owner_tier() {
            Ok(role)
        } else {
            warn!("{} denied: owner required in {}", ctx, directory_id);
            Err(DirectoryError::Unauthorized)
        }
    }

    // =========================================================================
    // Admins
    // =========================================================================

    /// Add an admin without an authorization check. For operator tooling.
    pub fn bootstrap_admin(&self, email: &str) -> Result<bool, DirectoryError> {
        let email = normalize_email(email);
        let mut conn = self.store.system_conn()?;
        let added = users::add_admin(&mut conn, &email)?;
        self.resolver.invalidate_user(&email);
        Ok(added)
    }

    pub fn add_admin(&self, ctx: &RequestContext, email: &str) -> Result<bool, DirectoryError> {
        self.require_admin(ctx)?;
        self.bootstrap_admin(email)
    }

    pub fn remove_admin(&self, ctx: &RequestContext, email: &str) -> Result<bool, DirectoryError> {
        self.require_admin(ctx)?;
        let email = normalize_email(email);
        let mut conn = self.store.system_conn()?;
        let removed = users::remove_admin(&mut conn, &email)?;
        self.resolver.invalidate_user(&email);
        Ok(removed)
    }

    pub fn list_admins(&self, ctx: &RequestContext) -> Result<Vec<String>, DirectoryError> {
        self.require_admin(ctx)?;
        let mut conn = self.store.system_conn()?;
        users::list_admins(&mut conn)
    }

    // =========================================================================
    // Directories
    // =========================================================================

    /// Create a directory owned by the caller
    pub fn create_directory(
        &self,
        ctx: &RequestContext,
        request: &NewDirectory,
    ) -> Result<Directory, DirectoryError> {
        if ctx.is_anonymous() {
            return Err(DirectoryError::Unauthorized);
        }
        let name = sanitize_cell(&request.name);
        if name.is_empty() {
            return Err(DirectoryError::Validation("directory name is required".into()));
        }
        let columns = self.sanitize_values(&request.columns)?;

        let id = uuid::Uuid::new_v4().to_string();
        let storage_ref = format!("{}.db", id);

        let directory = {
            let mut conn = self.store.system_conn()?;
            users::upsert_profile(&mut conn, ctx.email(), &ctx.username, &ctx.auth_provider)?;
            directories::create_directory(
                &mut conn,
                &CreateDirectoryInput {
                    id: &id,
                    name: &name,
                    description: request.description.as_deref(),
                    storage_ref: &storage_ref,
                    sheet_id: request.sheet_id.as_deref(),
                    owner_email: ctx.email(),
                },
            )?
        };
        self.resolver.invalidate_user(ctx.email());

        let initialized = self
            .store
            .directory_conn(&directory)
            .and_then(|mut conn| rows::set_columns(&mut conn, &columns));
        if let Err(e) = initialized {
            warn!("Rolling back directory {}: {}", directory.id, e);
            let mut conn = self.store.system_conn()?;
            directories::delete_directory(&mut conn, &directory.id)?;
            self.store.drop_directory_database(&directory)?;
            return Err(e);
        }

        Ok(directory)
    }

    pub fn get_directory(&self, directory_id: &str) -> Result<Directory, DirectoryError> {
        self.store.directory(directory_id)
    }

    pub fn list_directories(&self) -> Result<Vec<Directory>, DirectoryError> {
        let mut conn = self.store.system_conn()?;
        directories::list_directories(&mut conn)
    }

    /// Delete a directory, its moderation state and its database
    pub fn delete_directory(&self, ctx: &RequestContext, directory_id: &str) -> Result<(), DirectoryError> {
        self.require_owner_tier(ctx, directory_id)?;
        let directory = self.store.directory(directory_id)?;

        {
            let mut conn = self.store.system_conn()?;
            directories::delete_directory(&mut conn, directory_id)?;
        }
        self.store.drop_directory_database(&directory)?;
        self.sync.forget(directory_id);
        self.resolver.clear_cache();

        info!("Deleted directory {} ({})", directory_id, ctx);
        Ok(())
    }

    pub fn set_sheet_id(
        &self,
        ctx: &RequestContext,
        directory_id: &str,
        sheet_id: Option<&str>,
    ) -> Result<Directory, DirectoryError> {
        self.require_owner_tier(ctx, directory_id)?;
        let mut conn = self.store.system_conn()?;
        directories::set_sheet_id(&mut conn, directory_id, sheet_id)?;
        drop(conn);
        self.store.directory(directory_id)
    }

    pub fn add_owner(&self, ctx: &RequestContext, directory_id: &str, email: &str) -> Result<bool, DirectoryError> {
        self.require_owner_tier(ctx, directory_id)?;
        let email = normalize_email(email);
        let mut conn = self.store.system_conn()?;
        let added = directories::add_owner(&mut conn, directory_id, &email, OWNER_ROLE)?;
        self.resolver.invalidate_user(&email);
        Ok(added)
    }

    pub fn remove_owner(&self, ctx: &RequestContext, directory_id: &str, email: &str) -> Result<bool, DirectoryError> {
        self.require_owner_tier(ctx, directory_id)?;
        let email = normalize_email(email);
        let mut conn = self.store.system_conn()?;
        let removed = directories::remove_owner(&mut conn, directory_id, &email)?;
        self.resolver.invalidate_user(&email);
        Ok(removed)
    }

    pub fn list_owners(&self, directory_id: &str) -> Result<Vec<DirectoryOwner>, DirectoryError> {
        let mut conn = self.store.system_conn()?;
        directories::list_owners(&mut conn, directory_id)
    }

    // =========================================================================
    // Import
    // =========================================================================

    /// Replace the directory's schema and rows with the backing sheet
    pub async fn import_from_sheet(
        &self,
        ctx: &RequestContext,
        directory_id: &str,
    ) -> Result<ImportSummary, DirectoryError> {
        self.require_owner_tier(ctx, directory_id)?;
        let directory = self.store.directory(directory_id)?;

        let mut fetched = self.sync.fetch_rows(&directory).await?.into_iter();
        let columns: Vec<String> = fetched
            .next()
            .ok_or_else(|| DirectoryError::Validation("sheet has no header row".into()))?
            .iter()
            .map(|c| c.trim().to_string())
            .collect();
        let data: Vec<Vec<String>> = fetched.collect();

        let mut conn = self.store.directory_conn(&directory)?;
        let count = rows::replace_all(&mut conn, &columns, &data)?;
        info!("Imported {} rows into {}", count, directory_id);

        Ok(ImportSummary { columns, rows: count })
    }

    // =========================================================================
    // Rows
    // =========================================================================

    pub fn columns(&self, directory_id: &str) -> Result<Vec<String>, DirectoryError> {
        let directory = self.store.directory(directory_id)?;
        let mut conn = self.store.directory_conn(&directory)?;
        rows::get_columns(&mut conn)
    }

    pub fn rows(&self, directory_id: &str, query: &RowQuery) -> Result<Vec<IndexedRow>, DirectoryError> {
        let directory = self.store.directory(directory_id)?;
        let mut conn = self.store.directory_conn(&directory)?;
        rows::search_rows(&mut conn, query)
    }

    pub fn row(&self, directory_id: &str, row_id: i64) -> Result<Row, DirectoryError> {
        let directory = self.store.directory(directory_id)?;
        let mut conn = self.store.directory_conn(&directory)?;
        rows::require_row(&mut conn, row_id)
    }

    pub fn row_id_at(&self, directory_id: &str, index: usize) -> Result<Option<i64>, DirectoryError> {
        let directory = self.store.directory(directory_id)?;
        let mut conn = self.store.directory_conn(&directory)?;
        rows::row_id_at(&mut conn, index)
    }

    pub fn row_index_of(&self, directory_id: &str, row_id: i64) -> Result<Option<usize>, DirectoryError> {
        let directory = self.store.directory(directory_id)?;
        let mut conn = self.store.directory_conn(&directory)?;
        rows::row_index_of(&mut conn, row_id)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Route a write for the caller: direct for admins, owners and ungated
    /// moderators, review for gated moderators. `row_id` is checked against
    /// the moderator's scope; `proposed_row` covers additions.
    fn route_write(
        &self,
        ctx: &RequestContext,
        directory: &Directory,
        row_id: Option<i64>,
        proposed_row: Option<&[String]>,
    ) -> Result<WriteRoute, DirectoryError> {
        let role = self.resolver.resolve_role(ctx, &directory.id)?;
        if role.is_owner_tier() {
            return Ok(WriteRoute::Direct);
        }
        if role != Role::Moderator {
            warn!("{} denied: not a moderator of {}", ctx, directory.id);
            return Err(DirectoryError::Unauthorized);
        }

        let domain = self
            .resolver
            .moderator_domain(ctx.email(), &directory.id)?
            .ok_or(DirectoryError::Unauthorized)?;
        if !domain.can_edit {
            warn!("{} denied: no edit permission in {}", ctx, directory.id);
            return Err(DirectoryError::Unauthorized);
        }

        let in_scope = match (row_id, proposed_row) {
            (Some(row_id), _) => self.resolver.can_access_row(ctx.email(), directory, row_id)?,
            (None, Some(values)) => {
                let mut conn = self.store.directory_conn(directory)?;
                let columns = rows::get_columns(&mut conn)?;
                domain.scope.allows(&materialize_row(&columns, values))
            }
            (None, None) => false,
        };
        if !in_scope {
            warn!("{} denied: row outside moderator scope in {}", ctx, directory.id);
            return Err(DirectoryError::Unauthorized);
        }

        Ok(if domain.requires_approval {
            WriteRoute::Review
        } else {
            WriteRoute::Direct
        })
    }

    fn commit(&self, directory: &Directory, mutation: RowMutation<'_>) -> Result<WriteOutcome, DirectoryError> {
        let mut conn = self.store.directory_conn(directory)?;
        let applied = conn.immediate_transaction(|conn| apply_mutation(conn, mutation))?;
        let write_back = self.sync.dispatch(directory, applied.sheet_op);
        Ok(WriteOutcome::Applied {
            row_id: applied.row_id,
            write_back,
        })
    }

    /// Correct one cell of a row
    pub fn submit_correction(
        &self,
        ctx: &RequestContext,
        directory_id: &str,
        row_id: i64,
        column: ColumnRef,
        value: &str,
    ) -> Result<WriteOutcome, DirectoryError> {
        let directory = self.store.directory(directory_id)?;
        let value = self.sanitize_value(value)?;

        match self.route_write(ctx, &directory, Some(row_id), None)? {
            WriteRoute::Review => {
                let change = self.workflow.submit(
                    &directory,
                    ctx.email(),
                    &ProposedChange::Edit {
                        row_id,
                        column,
                        new_value: value,
                    },
                )?;
                Ok(WriteOutcome::Queued(change))
            }
            WriteRoute::Direct => {
                let position = {
                    let mut conn = self.store.directory_conn(&directory)?;
                    column.position_in(&rows::get_columns(&mut conn)?)?
                };
                let outcome = self.commit(
                    &directory,
                    RowMutation::SetCell {
                        row_id,
                        position,
                        value: &value,
                    },
                )?;
                info!("Row {} in {} corrected by {}", row_id, directory_id, ctx);
                Ok(outcome)
            }
        }
    }

    /// Add a row. Values are padded or truncated to the schema width.
    pub fn add_row(
        &self,
        ctx: &RequestContext,
        directory_id: &str,
        values: &[String],
    ) -> Result<WriteOutcome, DirectoryError> {
        let directory = self.store.directory(directory_id)?;
        let mut values = self.sanitize_values(values)?;

        let width = {
            let mut conn = self.store.directory_conn(&directory)?;
            rows::get_columns(&mut conn)?.len()
        };
        if width == 0 {
            return Err(DirectoryError::Validation(format!(
                "directory {} has no columns yet",
                directory_id
            )));
        }
        values.resize(width, String::new());

        match self.route_write(ctx, &directory, None, Some(&values))? {
            WriteRoute::Review => {
                let change = self
                    .workflow
                    .submit(&directory, ctx.email(), &ProposedChange::Add { values })?;
                Ok(WriteOutcome::Queued(change))
            }
            WriteRoute::Direct => {
                let outcome = self.commit(&directory, RowMutation::Insert { values: &values })?;
                info!("Row added to {} by {}", directory_id, ctx);
                Ok(outcome)
            }
        }
    }

    pub fn delete_row(
        &self,
        ctx: &RequestContext,
        directory_id: &str,
        row_id: i64,
    ) -> Result<WriteOutcome, DirectoryError> {
        let directory = self.store.directory(directory_id)?;

        match self.route_write(ctx, &directory, Some(row_id), None)? {
            WriteRoute::Review => {
                let change = self
                    .workflow
                    .submit(&directory, ctx.email(), &ProposedChange::Delete { row_id })?;
                Ok(WriteOutcome::Queued(change))
            }
            WriteRoute::Direct => {
                let outcome = self.commit(&directory, RowMutation::Remove { row_id })?;
                info!("Row {} deleted from {} by {}", row_id, directory_id, ctx);
                Ok(outcome)
            }
        }
    }

    fn sanitize_value(&self, value: &str) -> Result<String, DirectoryError> {
        let value = sanitize_cell(value);
        if value.chars().count() > self.limits.max_cell_length {
            return Err(DirectoryError::Validation(format!(
                "cell exceeds {} characters",
                self.limits.max_cell_length
            )));
        }
        Ok(value)
    }

    fn sanitize_values(&self, values: &[String]) -> Result<Vec<String>, DirectoryError> {
        if values.len() > self.limits.max_columns {
            return Err(DirectoryError::Validation(format!(
                "row exceeds {} columns",
                self.limits.max_columns
            )));
        }
        values.iter().map(|v| self.sanitize_value(v)).collect()
    }

    // =========================================================================
    // Moderators
    // =========================================================================

    pub fn appoint_moderator(
        &self,
        ctx: &RequestContext,
        directory_id: &str,
        request: &AppointRequest,
    ) -> Result<Moderator, DirectoryError> {
        let role = self.resolver.resolve_role(ctx, directory_id)?;
        if !self.resolver.can_appoint_moderator(ctx, role, directory_id)? {
            warn!("{} denied: cannot appoint moderators in {}", ctx, directory_id);
            return Err(DirectoryError::Unauthorized);
        }

        let email = normalize_email(&request.email);
        if email.is_empty() || !email.contains('@') {
            return Err(DirectoryError::Validation(format!("invalid email '{}'", request.email)));
        }
        if email == ctx.email() {
            return Err(DirectoryError::Validation("cannot appoint yourself".into()));
        }

        let directory = self.store.directory(directory_id)?;
        let columns = {
            let mut conn = self.store.directory_conn(&directory)?;
            rows::get_columns(&mut conn)?
        };
        request.scope.validate(&columns)?;

        let username = request
            .username
            .clone()
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
        let auth_provider = request.auth_provider.as_deref().unwrap_or("google");

        let mut conn = self.store.system_conn()?;
        moderators::appoint_moderator(
            &mut conn,
            &AppointModeratorInput {
                email: &email,
                username: &username,
                auth_provider,
                directory_id,
                appointed_by: ctx.email(),
                appointed_by_type: role.as_str(),
                scope: &request.scope,
                can_edit: request.can_edit,
                can_approve: request.can_approve,
                requires_approval: request.requires_approval,
            },
        )
    }

    pub fn remove_moderator(
        &self,
        ctx: &RequestContext,
        directory_id: &str,
        email: &str,
    ) -> Result<bool, DirectoryError> {
        let email = normalize_email(email);
        let role = self.resolver.resolve_role(ctx, directory_id)?;
        if !self
            .resolver
            .can_remove_moderator(ctx, role, &email, directory_id)?
        {
            warn!("{} denied: cannot remove {} in {}", ctx, email, directory_id);
            return Err(DirectoryError::Unauthorized);
        }

        let mut conn = self.store.system_conn()?;
        moderators::remove_moderator(&mut conn, &email, directory_id)
    }

    /// Active moderators in appointment order
    pub fn moderators(&self, directory_id: &str) -> Result<Vec<Moderator>, DirectoryError> {
        let mut conn = self.store.system_conn()?;
        moderators::list_active_moderators(&mut conn, directory_id)
    }

    pub fn moderator_permissions(
        &self,
        directory_id: &str,
        email: &str,
    ) -> Result<ModeratorPermissions, DirectoryError> {
        let directory = self.store.directory(directory_id)?;
        self.resolver
            .moderator_permissions(&normalize_email(email), &directory)
    }

    /// Rows the caller may write as a moderator
    pub fn accessible_rows(&self, ctx: &RequestContext, directory_id: &str) -> Result<Vec<Row>, DirectoryError> {
        let directory = self.store.directory(directory_id)?;
        self.resolver.accessible_rows(ctx.email(), &directory)
    }

    // =========================================================================
    // Pending changes
    // =========================================================================

    /// Pending changes the caller may review
    pub fn pending_changes(
        &self,
        ctx: &RequestContext,
        directory_id: &str,
    ) -> Result<Vec<PendingChange>, DirectoryError> {
        let directory = self.store.directory(directory_id)?;
        match self.resolver.resolve_role(ctx, directory_id)? {
            role if role.is_owner_tier() => self.workflow.get_pending_changes(&directory, None),
            Role::Moderator => self.workflow.get_pending_changes(&directory, Some(ctx)),
            _ => Err(DirectoryError::Unauthorized),
        }
    }

    /// Changes the caller submitted
    pub fn my_changes(&self, ctx: &RequestContext, directory_id: &str) -> Result<Vec<PendingChange>, DirectoryError> {
        if ctx.is_anonymous() {
            return Err(DirectoryError::Unauthorized);
        }
        let directory = self.store.directory(directory_id)?;
        self.workflow.submitted_by(&directory, ctx.email())
    }

    /// Approve or reject a pending change
    pub fn review_change(
        &self,
        ctx: &RequestContext,
        directory_id: &str,
        change_id: i64,
        action: ReviewAction,
        reason: Option<&str>,
    ) -> Result<ReviewResult, DirectoryError> {
        let directory = self.store.directory(directory_id)?;
        let change = {
            let mut conn = self.store.directory_conn(&directory)?;
            crate::db::pending_changes::get_change(&mut conn, change_id)?
                .filter(|c| c.directory_id == directory.id)
                .ok_or_else(|| DirectoryError::NotFound(format!("pending change {}", change_id)))?
        };

        if !self.resolver.can_approve_change(ctx, &directory, &change)? {
            warn!("{} denied: cannot review change {} in {}", ctx, change_id, directory_id);
            return Err(DirectoryError::Unauthorized);
        }

        let reason = reason.map(sanitize_cell).filter(|r| !r.is_empty());
        let outcome = self.workflow.process_approval(
            &directory,
            change_id,
            ctx.email(),
            action,
            reason.as_deref(),
        )?;

        let write_back = outcome
            .sheet_op
            .and_then(|op| self.sync.dispatch(&directory, op));
        Ok(ReviewResult {
            change: outcome.change,
            write_back,
        })
    }
}

/// Trim a cell and strip control characters
pub fn sanitize_cell(value: &str) -> String {
    value
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}
