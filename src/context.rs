//! Request context passed explicitly through every service call
//!
//! Carries the caller's identity from the HTTP boundary into the
//! authorization resolver. Nothing in the crate reads identity from
//! ambient or thread-local state.

/// Normalize an email for storage and comparison
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Identity of the caller for one request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestContext {
    /// Normalized email; empty for anonymous callers
    pub email: String,
    pub username: String,
    /// Identity provider that authenticated the caller (e.g. "google")
    pub auth_provider: String,
}

impl RequestContext {
    /// Context for an authenticated user
    pub fn user(email: &str, username: impl Into<String>, auth_provider: impl Into<String>) -> Self {
        Self {
            email: normalize_email(email),
            username: username.into(),
            auth_provider: auth_provider.into(),
        }
    }

    /// Context for a caller with only an email (operator tooling, tests)
    pub fn from_email(email: &str) -> Self {
        let email = normalize_email(email);
        let username = email.split('@').next().unwrap_or_default().to_string();
        Self {
            email,
            username,
            auth_provider: "local".to_string(),
        }
    }

    pub fn anonymous() -> Self {
        Self {
            email: String::new(),
            username: String::new(),
            auth_provider: String::new(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.email.is_empty()
    }

    pub fn email(&self) -> &str {
        &self.email
    }
}

impl std::fmt::Display for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_anonymous() {
            write!(f, "RequestContext(anonymous)")
        } else {
            write!(f, "RequestContext({})", self.email)
        }
    }
}
