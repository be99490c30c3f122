//! # narwhal_api
//!
//! RPC surface of the Narwhal auth core. Every method is a `POST` to
//! `/<package>.<Service>/<Method>` carrying a JSON message; failures carry a
//! `grpc-status` header alongside the HTTP status.

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod models;

use std::sync::Arc;

use axum::Router;
use axum::http::header::AUTHORIZATION;
use axum::routing::{get, post};
use narwhal_core::auth::AuthService;
use tower_http::cors::{Any, CorsLayer};
use tower_http::sensitive_headers::SetSensitiveRequestHeadersLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{auth, health, roles, users};
use crate::middleware::methods::{HEALTH_CHECK, method_path};
use crate::middleware::{AuthorizationLayer, MethodTable};

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    /// Method table consulted by the authorization gate.
    pub methods: Arc<MethodTable>,
}

impl AppState {
    /// State with the standard method table.
    pub fn new(auth: Arc<AuthService>) -> Self {
        Self {
            auth,
            methods: Arc::new(MethodTable::standard()),
        }
    }
}

/// Builds the router for the auth, user, role and health services.
pub fn router(state: AppState) -> Router {
    router_with(state, Router::new())
}

/// Builds the router and mounts additional media services behind the same
/// gate. Their permissions come from the state's method table.
pub fn router_with(state: AppState, services: Router<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let gate = AuthorizationLayer::new(state.auth.clone(), state.methods.clone());

    let rpc = |service: &str, method: &str| method_path(service, method);

    Router::new()
        // AuthService
        .route(&rpc("AuthService", "Login"), post(auth::login))
        .route(&rpc("AuthService", "RefreshToken"), post(auth::refresh_token))
        .route(&rpc("AuthService", "Logout"), post(auth::logout))
        .route(&rpc("AuthService", "LogoutAll"), post(auth::logout_all))
        .route(&rpc("AuthService", "ValidateToken"), post(auth::validate_token))
        .route(&rpc("AuthService", "ChangePassword"), post(auth::change_password))
        .route(
            &rpc("AuthService", "RequestPasswordReset"),
            post(auth::request_password_reset),
        )
        .route(&rpc("AuthService", "Me"), post(auth::me))
        // UserService
        .route(&rpc("UserService", "CreateUser"), post(users::create_user))
        .route(&rpc("UserService", "GetUser"), post(users::get_user))
        .route(&rpc("UserService", "UpdateProfile"), post(users::update_profile))
        .route(&rpc("UserService", "SetUserActive"), post(users::set_user_active))
        .route(&rpc("UserService", "DeleteUser"), post(users::delete_user))
        .route(&rpc("UserService", "ListSessions"), post(users::list_sessions))
        .route(&rpc("UserService", "RevokeSession"), post(users::revoke_session))
        .route(&rpc("UserService", "AssignRole"), post(users::assign_role))
        .route(&rpc("UserService", "RevokeRole"), post(users::revoke_role))
        // RoleService
        .route(&rpc("RoleService", "ListRoles"), post(roles::list_roles))
        .route(&rpc("RoleService", "CreateRole"), post(roles::create_role))
        .route(&rpc("RoleService", "DeleteRole"), post(roles::delete_role))
        .route(&rpc("RoleService", "AddPermission"), post(roles::add_permission))
        .route(&rpc("RoleService", "RemovePermission"), post(roles::remove_permission))
        .route(&rpc("RoleService", "AddParent"), post(roles::add_parent))
        .route(&rpc("RoleService", "CheckPermission"), post(roles::check_permission))
        // Health
        .route(HEALTH_CHECK, get(health::check).post(health::check))
        .merge(services)
        .layer(gate)
        .layer(TraceLayer::new_for_http())
        .layer(SetSensitiveRequestHeadersLayer::new([AUTHORIZATION]))
        .layer(cors)
        .with_state(state)
}
