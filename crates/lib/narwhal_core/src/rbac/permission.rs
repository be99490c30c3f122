//! Permission tuples and the resource/action catalogue.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::auth::AuthError;

/// Wildcard token, valid as resource or action.
pub const WILDCARD: &str = "*";

/// Resources governed by the policy engine.
pub mod resources {
    pub const LIBRARY: &str = "library";
    pub const MEDIA: &str = "media";
    pub const METADATA: &str = "metadata";
    pub const SCAN: &str = "scan";
    pub const STREAMING: &str = "streaming";
    pub const USER: &str = "user";
    pub const ROLE: &str = "role";
    pub const SESSION: &str = "session";
    pub const SYSTEM: &str = "system";

    pub const ALL: &[&str] = &[
        LIBRARY, MEDIA, METADATA, SCAN, STREAMING, USER, ROLE, SESSION, SYSTEM,
    ];
}

/// Actions governed by the policy engine.
pub mod actions {
    pub const READ: &str = "read";
    pub const WRITE: &str = "write";
    pub const DELETE: &str = "delete";
    pub const ADMIN: &str = "admin";

    pub const ALL: &[&str] = &[READ, WRITE, DELETE, ADMIN];
}

/// A `(resource, action)` pair, written `resource:action`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Permission {
    pub resource: String,
    pub action: String,
}

impl Permission {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
        }
    }

    /// Whether this granted permission satisfies a request for
    /// `(resource, action)`.
    pub fn matches(&self, resource: &str, action: &str) -> bool {
        (self.resource == WILDCARD || self.resource == resource)
            && (self.action == WILDCARD || self.action == action)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource, self.action)
    }
}

impl FromStr for Permission {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (resource, action) = s
            .split_once(':')
            .ok_or_else(|| AuthError::BadRequest(format!("permission '{s}' is not resource:action")))?;
        let (resource, action) = (resource.trim(), action.trim());
        if resource.is_empty() || action.is_empty() {
            return Err(AuthError::BadRequest(format!(
                "permission '{s}' has an empty resource or action"
            )));
        }
        Ok(Permission::new(resource, action))
    }
}
