use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Service name reported by the health endpoint.
const SERVICE_NAME: &str = "doculaboration-api";

#[derive(Serialize)]
pub struct RootResponse {
    pub message: &'static str,
}

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
}

/// GET / -- liveness banner.
async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Doculaboration API is running",
    })
}

/// GET /health
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: SERVICE_NAME,
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
}
