//! Shared harness: an in-memory service behind the full router.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::routing::post;
use axum::{Json, Router};
use narwhal_api::middleware::methods::method_path;
use narwhal_api::{AppState, router_with};
use narwhal_core::auth::AuthService;
use narwhal_core::auth::events::TracingPublisher;
use narwhal_core::auth::sessions::MemorySessionStore;
use narwhal_core::auth::users::MemoryUserStore;
use narwhal_core::config::AuthConfig;
use narwhal_core::models::auth::User;
use narwhal_core::rbac::PolicyEngine;
use serde_json::{Value, json};
use tower::ServiceExt;

pub const PASSWORD: &str = "p@ssw0rd";

pub struct Harness {
    pub app: Router,
    pub auth: Arc<AuthService>,
}

pub fn config() -> AuthConfig {
    let mut config = AuthConfig::with_secrets("access-secret-for-tests", "refresh-secret-for-tests");
    config.hash_cost = 4;
    config
}

pub fn harness() -> Harness {
    harness_with(config())
}

pub fn harness_with(config: AuthConfig) -> Harness {
    let auth = Arc::new(
        AuthService::new(
            &config,
            Arc::new(MemoryUserStore::new()),
            Arc::new(MemorySessionStore::new()),
            Arc::new(PolicyEngine::with_defaults()),
            Arc::new(TracingPublisher),
        )
        .unwrap(),
    );
    let media = Router::new()
        .route(
            &method_path("MediaService", "GetMedia"),
            post(|| async { Json(json!({ "id": "m-1", "title": "Heat" })) }),
        )
        .route(
            &method_path("LibraryService", "DeleteLibrary"),
            post(|| async { Json(json!({})) }),
        );
    let app = router_with(AppState::new(auth.clone()), media);
    Harness { app, auth }
}

impl Harness {
    pub async fn user(&self, username: &str, roles: &[&str]) -> User {
        self.auth
            .create_user(
                username,
                &format!("{username}@example.com"),
                PASSWORD,
                roles.iter().map(|r| r.to_string()).collect(),
            )
            .await
            .unwrap()
    }

    /// POST an RPC message; returns status and parsed body.
    pub async fn call(
        &self,
        service: &str,
        method: &str,
        bearer: Option<&str>,
        body: Value,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder()
            .method("POST")
            .uri(method_path(service, method))
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = bearer {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = req.body(Body::from(body.to_string())).unwrap();

        let resp = self.app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    /// Log in and return the token response body.
    pub async fn login(&self, identifier: &str, device: &str) -> Value {
        let (status, body) = self
            .call(
                "AuthService",
                "Login",
                None,
                json!({ "identifier": identifier, "password": PASSWORD, "device": device }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body
    }
}

pub fn access(tokens: &Value) -> &str {
    tokens["accessToken"].as_str().unwrap()
}

pub fn refresh(tokens: &Value) -> &str {
    tokens["refreshToken"].as_str().unwrap()
}

pub fn short_access_config() -> AuthConfig {
    let mut config = config();
    config.access_ttl = Duration::from_secs(1);
    config.refresh_ttl = Duration::from_secs(3600);
    config
}
