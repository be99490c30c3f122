//! Authentication and session management.
//!
//! Provides password hashing, JWT issuance and validation, the session and
//! user store interfaces with their adapters, and the authentication service
//! that orchestrates them.

pub mod events;
pub mod jwt;
pub mod password;
pub mod queries;
pub mod service;
pub mod sessions;
pub mod users;

use thiserror::Error;

pub use service::AuthService;

/// Authentication and authorization errors.
///
/// Every variant except `DbError` and `Internal` is a domain error and keeps
/// its meaning all the way to the RPC boundary.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account disabled")]
    AccountDisabled,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Permission denied: {resource}:{action}")]
    PermissionDenied { resource: String, action: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    DbError(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub(crate) fn permission_denied(resource: &str, action: &str) -> Self {
        AuthError::PermissionDenied {
            resource: resource.to_string(),
            action: action.to_string(),
        }
    }

    /// True for store misses, as opposed to infrastructure failures.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AuthError::NotFound(_))
    }
}

/// Normalise a username or email: trim whitespace and lowercase.
pub fn normalize_identifier(raw: &str) -> String {
    raw.trim().to_lowercase()
}
