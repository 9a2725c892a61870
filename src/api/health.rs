//! Health check and status endpoints

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use super::ApiState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Service status response
#[derive(Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub model: String,
    pub sessions: usize,
}

/// Liveness check: is the service running?
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Model in use and live session count
async fn status(State(state): State<Arc<ApiState>>) -> Json<StatusResponse> {
    let sessions = state.session_count().await;

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        model: state.model_name.clone(),
        sessions,
    })
}

/// Build health router (liveness only, no state needed)
pub fn router() -> Router {
    Router::new().route("/health", get(health))
}

/// Build status router
pub fn status_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/status", get(status))
        .with_state(state)
}
