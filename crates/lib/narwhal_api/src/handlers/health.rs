//! `grpc.health.v1.Health` handler.

use axum::Json;

use crate::models::HealthResponse;

/// Liveness check. Anonymous.
pub async fn check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "SERVING".into(),
        version: narwhal_core::version().into(),
    })
}
