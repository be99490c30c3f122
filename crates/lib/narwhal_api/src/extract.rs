//! Request extractors for RPC handlers.

use std::net::SocketAddr;

use axum::{
    Json,
    extract::{ConnectInfo, FromRequest, FromRequestParts, Request},
    http::{HeaderMap, header, request::Parts},
};
use narwhal_core::models::auth::ClientInfo;
use serde::de::DeserializeOwned;

use crate::error::AppError;

/// JSON request message. Malformed bodies become `InvalidArgument`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rpc<T>(pub T);

impl<S, T> FromRequest<S> for Rpc<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(message) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| AppError::InvalidArgument(rejection.body_text()))?;
        Ok(Rpc(message))
    }
}

/// Caller address and user agent, for session attribution.
#[derive(Debug, Clone, Default)]
pub struct ClientMeta {
    pub remote_addr: String,
    pub user_agent: String,
}

impl ClientMeta {
    fn from_parts(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let header_str = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };
        let remote_addr = header_str("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .or_else(|| header_str("x-real-ip"))
            .map(str::to_string)
            .or_else(|| peer.map(|p| p.ip().to_string()))
            .unwrap_or_default();
        let user_agent = header_str(header::USER_AGENT.as_str())
            .unwrap_or_default()
            .to_string();
        Self {
            remote_addr,
            user_agent,
        }
    }

    /// Session attribution with a caller-supplied device label.
    pub fn into_client_info(self, device: Option<String>) -> ClientInfo {
        ClientInfo {
            device: device.unwrap_or_default(),
            remote_addr: self.remote_addr,
            user_agent: self.user_agent,
        }
    }
}

impl<S> FromRequestParts<S> for ClientMeta
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0);
        Ok(ClientMeta::from_parts(&parts.headers, peer))
    }
}
