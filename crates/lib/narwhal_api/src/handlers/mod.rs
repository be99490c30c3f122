//! RPC handlers, one module per service.

pub mod auth;
pub mod health;
pub mod roles;
pub mod users;
