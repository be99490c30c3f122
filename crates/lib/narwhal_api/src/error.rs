//! RPC error types and their transport mapping.

use axum::{
    Json,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use narwhal_core::auth::AuthError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Response header carrying the numeric gRPC status code.
pub const GRPC_STATUS: &str = "grpc-status";

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Transport status codes surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    InvalidArgument,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    Unauthenticated,
    Internal,
}

impl Code {
    /// Numeric gRPC status code.
    pub fn grpc(self) -> u16 {
        match self {
            Code::InvalidArgument => 3,
            Code::NotFound => 5,
            Code::AlreadyExists => 6,
            Code::PermissionDenied => 7,
            Code::Internal => 13,
            Code::Unauthenticated => 16,
        }
    }

    pub fn http_status(self) -> StatusCode {
        match self {
            Code::InvalidArgument => StatusCode::BAD_REQUEST,
            Code::NotFound => StatusCode::NOT_FOUND,
            Code::AlreadyExists => StatusCode::CONFLICT,
            Code::PermissionDenied => StatusCode::FORBIDDEN,
            Code::Unauthenticated => StatusCode::UNAUTHORIZED,
            Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Code::InvalidArgument => "invalid_argument",
            Code::NotFound => "not_found",
            Code::AlreadyExists => "already_exists",
            Code::PermissionDenied => "permission_denied",
            Code::Unauthenticated => "unauthenticated",
            Code::Internal => "internal",
        }
    }
}

/// Error body returned by every failing call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Application-level errors with transport status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> Code {
        match self {
            AppError::InvalidArgument(_) => Code::InvalidArgument,
            AppError::NotFound(_) => Code::NotFound,
            AppError::AlreadyExists(_) => Code::AlreadyExists,
            AppError::PermissionDenied(_) => Code::PermissionDenied,
            AppError::Unauthenticated(_) => Code::Unauthenticated,
            AppError::Internal(_) => Code::Internal,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let message = match self {
            AppError::Internal(detail) => {
                tracing::error!(%detail, "Internal error");
                "Internal server error".to_string()
            }
            AppError::InvalidArgument(m)
            | AppError::NotFound(m)
            | AppError::AlreadyExists(m)
            | AppError::PermissionDenied(m)
            | AppError::Unauthenticated(m) => m,
        };
        let body = Json(ErrorResponse {
            error: code.as_str().to_string(),
            message,
        });
        let mut response = (code.http_status(), body).into_response();
        response
            .headers_mut()
            .insert(GRPC_STATUS, HeaderValue::from(code.grpc()));
        response
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidCredentials => AppError::Unauthenticated("Invalid credentials".into()),
            AuthError::AccountDisabled => AppError::PermissionDenied("Account disabled".into()),
            AuthError::InvalidToken(msg) => AppError::Unauthenticated(format!("Invalid token: {msg}")),
            AuthError::PermissionDenied { resource, action } => {
                AppError::PermissionDenied(format!("Missing permission {resource}:{action}"))
            }
            AuthError::Forbidden(msg) => AppError::PermissionDenied(msg),
            AuthError::NotFound(msg) => AppError::NotFound(msg),
            AuthError::Conflict(msg) => AppError::AlreadyExists(msg),
            AuthError::BadRequest(msg) => AppError::InvalidArgument(msg),
            AuthError::DbError(e) => AppError::Internal(format!("database: {e}")),
            AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}
