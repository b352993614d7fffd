//! Root status endpoint.

use axum::Json;
use serde::Serialize;

use crate::config::SERVICE_NAME;

/// Body of `GET /`. Field order is part of the response contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RootStatus {
    pub status: &'static str,
    pub service: &'static str,
}

impl RootStatus {
    pub const HEALTHY: Self = Self {
        status: "healthy",
        service: SERVICE_NAME,
    };
}

pub async fn index() -> Json<RootStatus> {
    Json(RootStatus::HEALTHY)
}
