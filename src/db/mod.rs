//! SQLite storage for directories, moderation state and mirrored rows
//!
//! ## Architecture
//!
//! - `system.db` holds identity and permission state: admins, profiles,
//!   directories, owners, moderators, moderator domains, hierarchy edges
//! - each directory gets its own database holding its column schema, its
//!   rows and its pending changes, so approving a change and mutating the
//!   row it targets commit in one SQLite transaction
//!
//! Every database is reached through an r2d2 pool. Directory pools are
//! opened lazily and kept in a registry keyed by directory ID.
//!
//! ## Tables
//!
//! System: `admins`, `user_profiles`, `directories`, `directory_owners`,
//! `moderators`, `moderator_domains`, `moderator_hierarchy`
//!
//! Directory: `directory_schema`, `directory_rows`, `pending_changes`

pub mod diesel_schema;
pub mod directories;
pub mod hierarchy;
pub mod models;
pub mod moderators;
pub mod pending_changes;
pub mod rows;
pub mod schema;
pub mod users;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::DirectoryError;
use schema::SchemaKind;

pub use models::{current_timestamp, Directory, Moderator};

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Per-connection SQLite settings applied when a pooled connection is opened
#[derive(Debug, Clone, Copy)]
pub struct ConnectionOptions {
    pub busy_timeout: Duration,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        // busy_timeout first so the WAL switch waits on concurrent openers
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {}; PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL; PRAGMA foreign_keys = ON;",
            self.busy_timeout.as_millis()
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Open a pool for one database file and make sure its schema exists
pub fn open_pool(
    path: &Path,
    max_size: u32,
    options: ConnectionOptions,
    kind: SchemaKind,
) -> Result<DbPool, DirectoryError> {
    info!("Opening SQLite database at {:?}", path);

    let manager = ConnectionManager::<SqliteConnection>::new(path.to_string_lossy());
    let pool = Pool::builder()
        .max_size(max_size.max(1))
        .min_idle(Some(1))
        .connection_customizer(Box::new(options))
        .build(manager)
        .map_err(|e| {
            DirectoryError::Connection(format!("Failed to open {}: {}", path.display(), e))
        })?;

    let mut conn = pool.get()?;
    schema::init_schema(&mut conn, kind)?;

    Ok(pool)
}

/// Handle on every database the service uses
pub struct Store {
    system: DbPool,
    directories_dir: PathBuf,
    pool_size: u32,
    options: ConnectionOptions,
    /// directory ID -> pool for that directory's database
    directory_pools: RwLock<HashMap<String, DbPool>>,
}

impl Store {
    /// Open (or create) the storage tree described by the config
    pub fn open(config: &Config) -> Result<Self, DirectoryError> {
        std::fs::create_dir_all(&config.storage_dir)?;
        std::fs::create_dir_all(config.directories_dir())?;

        let options = ConnectionOptions {
            busy_timeout: config.busy_timeout(),
        };
        let system = open_pool(
            &config.system_db_path(),
            config.pool_size,
            options,
            SchemaKind::System,
        )?;

        Ok(Self {
            system,
            directories_dir: config.directories_dir(),
            pool_size: config.pool_size,
            options,
            directory_pools: RwLock::new(HashMap::new()),
        })
    }

    /// Get a connection to the system database
    pub fn system_conn(&self) -> Result<DbConn, DirectoryError> {
        Ok(self.system.get()?)
    }

    /// Load a directory record, failing with NotFound when absent
    pub fn directory(&self, directory_id: &str) -> Result<Directory, DirectoryError> {
        let mut conn = self.system_conn()?;
        directories::get_directory(&mut conn, directory_id)?
            .ok_or_else(|| DirectoryError::NotFound(format!("directory {}", directory_id)))
    }

    fn directory_path(&self, storage_ref: &str) -> Result<PathBuf, DirectoryError> {
        let file = Path::new(storage_ref);
        if file.components().count() != 1 || file.is_absolute() {
            return Err(DirectoryError::Internal(format!(
                "Invalid storage reference: {}",
                storage_ref
            )));
        }
        Ok(self.directories_dir.join(file))
    }

    /// Look up the pool for a directory, opening it on first use
    pub fn directory_pool(&self, directory: &Directory) -> Result<DbPool, DirectoryError> {
        {
            let pools = self
                .directory_pools
                .read()
                .map_err(|e| DirectoryError::Internal(format!("Lock poisoned: {}", e)))?;
            if let Some(pool) = pools.get(&directory.id) {
                return Ok(pool.clone());
            }
        }

        let mut pools = self
            .directory_pools
            .write()
            .map_err(|e| DirectoryError::Internal(format!("Lock poisoned: {}", e)))?;

        // Another request may have opened it while we waited for the write lock
        if let Some(pool) = pools.get(&directory.id) {
            return Ok(pool.clone());
        }

        let path = self.directory_path(&directory.storage_ref)?;
        let pool = open_pool(&path, self.pool_size, self.options, SchemaKind::Directory)?;
        debug!("Opened pool for directory {}", directory.id);
        pools.insert(directory.id.clone(), pool.clone());
        Ok(pool)
    }

    /// Get a connection to a directory's database
    pub fn directory_conn(&self, directory: &Directory) -> Result<DbConn, DirectoryError> {
        let pool = self.directory_pool(directory)?;
        Ok(pool.get()?)
    }

    /// Number of directory pools currently open
    pub fn open_directory_pools(&self) -> usize {
        self.directory_pools
            .read()
            .map(|pools| pools.len())
            .unwrap_or_default()
    }

    /// Close a directory's pool and delete its database files
    pub fn drop_directory_database(&self, directory: &Directory) -> Result<(), DirectoryError> {
        {
            let mut pools = self
                .directory_pools
                .write()
                .map_err(|e| DirectoryError::Internal(format!("Lock poisoned: {}", e)))?;
            pools.remove(&directory.id);
        }

        let path = self.directory_path(&directory.storage_ref)?;
        for suffix in ["", "-wal", "-shm"] {
            let file = PathBuf::from(format!("{}{}", path.display(), suffix));
            match std::fs::remove_file(&file) {
                Ok(()) => debug!("Removed {:?}", file),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {:?}: {}", file, e),
            }
        }
        Ok(())
    }
}
