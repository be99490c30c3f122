//! Authorization gate: bearer extraction, token validation, principal
//! binding, and per-method permission checks.
//!
//! Runs as a tower layer over the whole router, so every call (streaming
//! ones included) is authenticated and authorized before its handler sees
//! the request. The principal is only inserted once every check has passed;
//! a request dropped mid-validation never reaches the handler.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    extract::FromRequestParts,
    http::{HeaderMap, Request, header, request::Parts},
    response::{IntoResponse, Response},
};
use narwhal_core::auth::AuthService;
use narwhal_core::models::auth::TokenClaims;
use narwhal_core::rbac::{ADMIN_ROLE, Permission, PolicyEngine};
use narwhal_core::uuid::parse_id;
use tower::{Layer, Service};
use uuid::Uuid;

use super::methods::MethodTable;
use crate::error::{AppError, AppResult};

const BEARER_PREFIX: &str = "Bearer ";

// =============================================================================
// AuthContext
// =============================================================================

/// Authenticated principal bound to the request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub username: String,
    pub email: String,
    /// Effective roles from the access token.
    pub roles: Vec<String>,
    /// `None` for sessionless tokens.
    pub session_id: Option<Uuid>,
    pub claims: TokenClaims,
}

impl AuthContext {
    pub fn from_claims(claims: TokenClaims) -> AppResult<Self> {
        let user_id = parse_id(&claims.sub)
            .ok_or_else(|| AppError::Unauthenticated("token subject is not a user id".into()))?;
        let session_id = if claims.session_id.is_empty() {
            None
        } else {
            Some(parse_id(&claims.session_id).ok_or_else(|| {
                AppError::Unauthenticated("token session is not a session id".into())
            })?)
        };
        Ok(Self {
            user_id,
            username: claims.username.clone(),
            email: claims.email.clone(),
            roles: claims.roles.clone(),
            session_id,
            claims,
        })
    }

    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == ADMIN_ROLE)
    }

    /// Fine-grained check for handlers that decide after reading input.
    pub fn require_permission(
        &self,
        policy: &PolicyEngine,
        resource: &str,
        action: &str,
    ) -> AppResult<()> {
        Ok(policy.enforce(&self.roles, resource, action)?)
    }

    pub fn require_any(&self, policy: &PolicyEngine, permissions: &[Permission]) -> AppResult<()> {
        Ok(policy.enforce_any(&self.roles, permissions)?)
    }

    pub fn require_all(&self, policy: &PolicyEngine, permissions: &[Permission]) -> AppResult<()> {
        Ok(policy.enforce_all(&self.roles, permissions)?)
    }

    /// Per-row ownership gate.
    pub fn require_owner(
        &self,
        policy: &PolicyEngine,
        owner: Uuid,
        allow_admin: bool,
    ) -> AppResult<()> {
        Ok(policy.check_ownership(
            &self.user_id.to_string(),
            &owner.to_string(),
            &self.roles,
            allow_admin,
        )?)
    }
}

impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or_else(|| AppError::Unauthenticated("Authentication required".into()))
    }
}

// =============================================================================
// AuthorizationLayer
// =============================================================================

/// Layer installing the authorization gate.
#[derive(Clone)]
pub struct AuthorizationLayer {
    auth: Arc<AuthService>,
    methods: Arc<MethodTable>,
}

impl AuthorizationLayer {
    pub fn new(auth: Arc<AuthService>, methods: Arc<MethodTable>) -> Self {
        Self { auth, methods }
    }
}

impl<S> Layer<S> for AuthorizationLayer {
    type Service = Authorization<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Authorization {
            inner,
            auth: self.auth.clone(),
            methods: self.methods.clone(),
        }
    }
}

// =============================================================================
// Authorization
// =============================================================================

/// Middleware service produced by [`AuthorizationLayer`].
#[derive(Clone)]
pub struct Authorization<S> {
    inner: S,
    auth: Arc<AuthService>,
    methods: Arc<MethodTable>,
}

impl<S> Service<Request<Body>> for Authorization<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let auth = self.auth.clone();
        let methods = self.methods.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let path = req.uri().path().to_owned();
            if methods.is_anonymous(&path) {
                return inner.call(req).await;
            }

            let outcome = authorize(&auth, &methods, &path, req.headers()).await;
            match outcome {
                Ok(ctx) => {
                    req.extensions_mut().insert(ctx);
                    inner.call(req).await
                }
                Err(e) => {
                    tracing::debug!(method = %path, error = %e, "Call rejected by gate");
                    Ok(e.into_response())
                }
            }
        })
    }
}

async fn authorize(
    auth: &AuthService,
    methods: &MethodTable,
    path: &str,
    headers: &HeaderMap,
) -> AppResult<AuthContext> {
    let token = bearer_token(headers)
        .ok_or_else(|| AppError::Unauthenticated("Missing bearer credential".into()))?;
    let claims = auth.validate_token(token).await?;
    let ctx = AuthContext::from_claims(claims)?;

    if let Some(required) = methods.permission(path) {
        auth.policy()
            .enforce(&ctx.roles, &required.resource, &required.action)?;
    }
    Ok(ctx)
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Extracts the bearer token from the Authorization header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
