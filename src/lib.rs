//! sheetdir - moderation and row-access engine for spreadsheet-mirrored directories
//!
//! A directory mirrors one spreadsheet into a local SQLite database. Users
//! browse and search its rows; admins, owners and moderators correct them.
//! Moderators are scoped to the rows their filters select and may be gated
//! behind a review queue.
//!
//! ## Components
//!
//! - [`filters`] - declarative row filters and their evaluation
//! - [`auth`] - role resolution, permission gates, permission cache
//! - [`db`] - system and per-directory SQLite stores
//! - [`workflow`] - pending-change review state machine
//! - [`sheets`] - spreadsheet collaborator and background write-back
//! - [`service`] - the write-path entry point tying these together
//!
//! ## Usage
//!
//! ```no_run
//! use sheetdir::{Config, DirectoryService, NewDirectory, RequestContext};
//!
//! # fn main() -> sheetdir::Result<()> {
//! let config = Config::with_storage_dir("/tmp/sheetdir");
//! let service = DirectoryService::open(&config)?;
//!
//! let owner = RequestContext::from_email("owner@example.com");
//! let directory = service.create_directory(
//!     &owner,
//!     &NewDirectory {
//!         name: "Clinics".into(),
//!         columns: vec!["Name".into(), "City".into()],
//!         ..Default::default()
//!     },
//! )?;
//! # let _ = directory;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod filters;
pub mod service;
pub mod sheets;
pub mod workflow;

pub use auth::{AuthResolver, ModeratorPermissions, PermissionCache, Role, RowsAllowed, UserType};
pub use config::Config;
pub use context::RequestContext;
pub use db::{Directory, Moderator, Store};
pub use error::{DirectoryError, Result};
pub use filters::{ColumnId, Control, Filter, RangeFilter, RowScope};
pub use service::{AppointRequest, DirectoryService, NewDirectory, WriteOutcome};
pub use sheets::{SheetClient, SheetClientProvider, SheetOp, SheetSync};
pub use workflow::{ColumnRef, PendingChangeWorkflow, ProposedChange, ReviewAction};
