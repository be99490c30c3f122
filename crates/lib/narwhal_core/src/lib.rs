//! # narwhal_core
//!
//! Authentication and authorization core for Narwhal: password hashing,
//! token issuance, sessions, and the RBAC policy engine.

pub mod auth;
pub mod config;
pub mod migrate;
pub mod models;
pub mod rbac;
pub mod uuid;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
