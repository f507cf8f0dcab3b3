//! Authorization for directory writes
//!
//! A user's [`Role`] in a directory is resolved in a fixed order: platform
//! admin, then directory owner, then active moderator, then anonymous. The
//! externally visible [`UserType`] collapses admins and owners into one tier.

pub mod cache;
pub mod resolver;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use cache::{CacheKey, CheckKind, NoopPermissionCache, PermissionCache, TtlPermissionCache};
pub use resolver::{AuthResolver, ModeratorPermissions, RowsAllowed};

/// Role of a user within one directory, ordered by privilege
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Role {
    #[default]
    Anonymous = 0,
    Moderator = 1,
    Owner = 2,
    Admin = 3,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Anonymous => "anonymous",
            Role::Moderator => "moderator",
            Role::Owner => "owner",
            Role::Admin => "admin",
        }
    }

    /// Admins and owners write directly and review any change
    pub fn is_owner_tier(&self) -> bool {
        *self >= Role::Owner
    }

    pub fn user_type(&self) -> UserType {
        match self {
            Role::Admin | Role::Owner => UserType::Owner,
            Role::Moderator => UserType::Moderator,
            Role::Anonymous => UserType::None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role as reported to callers outside the core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    None,
    Moderator,
    Owner,
}
