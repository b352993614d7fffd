//! Health check endpoint for container orchestration.
//!
//! Provides a simple liveness probe that returns 200 OK when the worker is running.
//! Used by load balancers and orchestrators to verify the service is alive.

use axum::Json;
use serde::Serialize;

/// Body of `GET /health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
}

impl HealthStatus {
    pub const OK: Self = Self { status: "ok" };
}

/// Health check handler.
///
/// This is a liveness probe - it only checks that the worker can respond to HTTP.
pub async fn health() -> Json<HealthStatus> {
    Json(HealthStatus::OK)
}
