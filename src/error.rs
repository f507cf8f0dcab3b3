//! Error types for sheetdir

use diesel::result::DatabaseErrorKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Deliberately carries no detail about which check failed.
    #[error("Permission denied")]
    Unauthorized,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Sheet sync error: {0}")]
    SheetSync(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DirectoryError {
    /// Wrap a diesel error with the name of the operation that produced it.
    pub fn query(operation: &str, err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::DatabaseError(kind, info) => match kind {
                DatabaseErrorKind::UniqueViolation
                | DatabaseErrorKind::ForeignKeyViolation
                | DatabaseErrorKind::NotNullViolation
                | DatabaseErrorKind::CheckViolation => {
                    DirectoryError::Constraint(format!("{}: {}", operation, info.message()))
                }
                DatabaseErrorKind::ClosedConnection => {
                    DirectoryError::Connection(format!("{}: {}", operation, info.message()))
                }
                _ => DirectoryError::Database(format!("{}: {}", operation, info.message())),
            },
            diesel::result::Error::NotFound => {
                DirectoryError::NotFound(operation.to_string())
            }
            other => DirectoryError::Database(format!("{}: {}", operation, other)),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DirectoryError::NotFound(_))
    }
}

// Transactions surface begin/commit/rollback failures through this impl.
impl From<diesel::result::Error> for DirectoryError {
    fn from(err: diesel::result::Error) -> Self {
        DirectoryError::query("transaction", err)
    }
}

impl From<diesel::r2d2::PoolError> for DirectoryError {
    fn from(err: diesel::r2d2::PoolError) -> Self {
        DirectoryError::Connection(format!("Failed to get connection: {}", err))
    }
}

pub type Result<T, E = DirectoryError> = std::result::Result<T, E>;
