//! `narwhal.v1.UserService` handlers.

use axum::Json;
use axum::extract::State;

use crate::AppState;
use crate::error::AppResult;
use crate::extract::Rpc;
use crate::middleware::AuthContext;
use crate::models::{
    CreateUserRequest, Empty, ListSessionsRequest, ListSessionsResponse, RevokeSessionRequest,
    RoleGrantRequest, SessionResponse, SetUserActiveRequest, UpdateProfileRequest, UserIdRequest,
    UserResponse,
};

pub async fn create_user(
    State(state): State<AppState>,
    Rpc(body): Rpc<CreateUserRequest>,
) -> AppResult<Json<UserResponse>> {
    let user = state
        .auth
        .create_user(&body.username, &body.email, &body.password, body.roles)
        .await?;
    Ok(Json(user.into()))
}

/// Owners and admins only.
pub async fn get_user(
    State(state): State<AppState>,
    ctx: AuthContext,
    Rpc(body): Rpc<UserIdRequest>,
) -> AppResult<Json<UserResponse>> {
    ctx.require_owner(state.auth.policy(), body.user_id, true)?;
    let user = state.auth.get_user(body.user_id).await?;
    Ok(Json(user.into()))
}

/// Owners and admins only.
pub async fn update_profile(
    State(state): State<AppState>,
    ctx: AuthContext,
    Rpc(body): Rpc<UpdateProfileRequest>,
) -> AppResult<Json<UserResponse>> {
    ctx.require_owner(state.auth.policy(), body.user_id, true)?;
    let user = state
        .auth
        .update_profile(body.user_id, body.username.as_deref(), body.email.as_deref())
        .await?;
    Ok(Json(user.into()))
}

pub async fn set_user_active(
    State(state): State<AppState>,
    Rpc(body): Rpc<SetUserActiveRequest>,
) -> AppResult<Json<Empty>> {
    state.auth.set_active(body.user_id, body.active).await?;
    Ok(Json(Empty {}))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Rpc(body): Rpc<UserIdRequest>,
) -> AppResult<Json<Empty>> {
    state.auth.delete_user(body.user_id).await?;
    Ok(Json(Empty {}))
}

/// Sessions of the caller, or of another user for admins.
pub async fn list_sessions(
    State(state): State<AppState>,
    ctx: AuthContext,
    Rpc(body): Rpc<ListSessionsRequest>,
) -> AppResult<Json<ListSessionsResponse>> {
    let user_id = body.user_id.unwrap_or(ctx.user_id);
    ctx.require_owner(state.auth.policy(), user_id, true)?;
    let sessions = state
        .auth
        .list_sessions(user_id)
        .await?
        .into_iter()
        .map(|s| SessionResponse::new(s, ctx.session_id))
        .collect();
    Ok(Json(ListSessionsResponse { sessions }))
}

pub async fn revoke_session(
    State(state): State<AppState>,
    Rpc(body): Rpc<RevokeSessionRequest>,
) -> AppResult<Json<Empty>> {
    state.auth.revoke_session(body.session_id).await?;
    Ok(Json(Empty {}))
}

pub async fn assign_role(
    State(state): State<AppState>,
    Rpc(body): Rpc<RoleGrantRequest>,
) -> AppResult<Json<Empty>> {
    state.auth.assign_role(body.user_id, &body.role).await?;
    Ok(Json(Empty {}))
}

pub async fn revoke_role(
    State(state): State<AppState>,
    Rpc(body): Rpc<RoleGrantRequest>,
) -> AppResult<Json<Empty>> {
    state.auth.revoke_role(body.user_id, &body.role).await?;
    Ok(Json(Empty {}))
}
