//! Request-boundary middleware.

pub mod auth;
pub mod methods;

pub use auth::{AuthContext, AuthorizationLayer};
pub use methods::MethodTable;
