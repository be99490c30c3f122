//! `narwhal.v1.AuthService` handlers.

use axum::Json;
use axum::extract::State;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::extract::{ClientMeta, Rpc};
use crate::middleware::AuthContext;
use crate::models::{
    ChangePasswordRequest, Empty, LoginRequest, LogoutAllResponse, LogoutRequest,
    PasswordResetRequest, RefreshRequest, TokenResponse, UserResponse, ValidateTokenRequest,
    ValidateTokenResponse,
};

/// `Login` — authenticate with username or email and open a session.
pub async fn login(
    State(state): State<AppState>,
    meta: ClientMeta,
    Rpc(body): Rpc<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    let pair = state
        .auth
        .login(&body.identifier, &body.password, meta.into_client_info(body.device))
        .await?;
    Ok(Json(pair.into()))
}

/// `RefreshToken` — exchange a refresh token for a fresh access token.
pub async fn refresh_token(
    State(state): State<AppState>,
    Rpc(body): Rpc<RefreshRequest>,
) -> AppResult<Json<TokenResponse>> {
    let pair = state.auth.refresh(&body.refresh_token).await?;
    Ok(Json(pair.into()))
}

/// `Logout` — end the caller's current (or named) session.
pub async fn logout(
    State(state): State<AppState>,
    ctx: AuthContext,
    Rpc(body): Rpc<LogoutRequest>,
) -> AppResult<Json<Empty>> {
    let session_id = body.session_id.or(ctx.session_id).ok_or_else(|| {
        AppError::InvalidArgument("sessionId is required for sessionless tokens".into())
    })?;
    state.auth.logout(ctx.user_id, session_id).await?;
    Ok(Json(Empty {}))
}

/// `LogoutAll` — end every session of the caller.
pub async fn logout_all(
    State(state): State<AppState>,
    ctx: AuthContext,
) -> AppResult<Json<LogoutAllResponse>> {
    let sessions_ended = state.auth.logout_all(ctx.user_id).await?;
    Ok(Json(LogoutAllResponse { sessions_ended }))
}

/// `ValidateToken` — check an access token on behalf of another service.
pub async fn validate_token(
    State(state): State<AppState>,
    _ctx: AuthContext,
    Rpc(body): Rpc<ValidateTokenRequest>,
) -> AppResult<Json<ValidateTokenResponse>> {
    let claims = state.auth.validate_token(&body.token).await?;
    Ok(Json(claims.into()))
}

/// `ChangePassword` — replace the caller's password; ends all sessions.
pub async fn change_password(
    State(state): State<AppState>,
    ctx: AuthContext,
    Rpc(body): Rpc<ChangePasswordRequest>,
) -> AppResult<Json<Empty>> {
    state
        .auth
        .change_password(ctx.user_id, &body.old_password, &body.new_password)
        .await?;
    Ok(Json(Empty {}))
}

/// `RequestPasswordReset` — always succeeds.
pub async fn request_password_reset(
    State(state): State<AppState>,
    Rpc(body): Rpc<PasswordResetRequest>,
) -> AppResult<Json<Empty>> {
    state.auth.request_password_reset(&body.email).await?;
    Ok(Json(Empty {}))
}

/// `Me` — the caller's profile.
pub async fn me(State(state): State<AppState>, ctx: AuthContext) -> AppResult<Json<UserResponse>> {
    let user = state.auth.get_user(ctx.user_id).await?;
    Ok(Json(user.into()))
}
