//! Health and status routes.

use axum::{Json, Router, extract::State, routing::get};
use chrono::Utc;

use crate::api::models::{HealthResponse, StatusResponse};
use crate::api::server::AppState;

/// Create the health router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status))
}

/// Health check endpoint.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let now = Utc::now();
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: now,
        metrics_count: state.registry.live_count(now),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// Per-metric live sample counts and registry configuration.
async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let now = Utc::now();
    let metrics_by_name = state.registry.counts_by_name(now);
    let total_metrics = metrics_by_name.values().sum();

    Json(StatusResponse {
        status: "running".to_string(),
        timestamp: now,
        metrics_by_name,
        ttl_seconds: state.registry.ttl_seconds(),
        total_metrics,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}
