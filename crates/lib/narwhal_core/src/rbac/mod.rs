//! Role-based access control.
//!
//! Roles carry `(resource, action)` permissions, may inherit from parent
//! roles, and are granted to users. `*` is a wildcard in either position.

pub mod defaults;
pub mod dsl;
pub mod engine;
pub mod permission;

use std::path::Path;

pub use engine::{PolicyEngine, PolicySnapshot, Role};
pub use permission::{Permission, WILDCARD};

use crate::auth::AuthError;
use crate::config::RbacBackend;

/// Role name that bypasses ownership checks when allowed.
pub const ADMIN_ROLE: &str = "admin";
/// Role granted to newly created principals.
pub const USER_ROLE: &str = "user";
pub const GUEST_ROLE: &str = "guest";

/// Build a policy engine for the configured backend.
pub fn load_engine(
    backend: RbacBackend,
    policy_file: Option<&Path>,
) -> Result<PolicyEngine, AuthError> {
    match backend {
        RbacBackend::Builtin => Ok(PolicyEngine::with_defaults()),
        RbacBackend::PolicyDsl => {
            let path = policy_file.ok_or_else(|| {
                AuthError::BadRequest("policy-dsl backend requires a policy file".into())
            })?;
            let text = std::fs::read_to_string(path).map_err(|e| {
                AuthError::Internal(format!("read policy file {}: {e}", path.display()))
            })?;
            let snapshot = dsl::parse(&text)?;
            PolicyEngine::from_snapshot(snapshot)
        }
    }
}
