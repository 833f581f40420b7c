//! Liveness endpoint for load balancers and orchestration probes.

use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// GET /health — reports that the order service is up and identifies the
/// build answering.
pub async fn check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "order-api",
        version: env!("CARGO_PKG_VERSION"),
    })
}
