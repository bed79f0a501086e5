//! API route modules.
//!
//! Organizes routes by resource type.

pub mod device;
pub mod health;
pub mod metrics;

use axum::Router;

use crate::api::error::ApiError;
use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(metrics::router())
        .merge(health::router())
        .merge(device::router())
        .fallback(not_found)
        .with_state(state)
}

async fn not_found() -> ApiError {
    ApiError::not_found("Not Found")
}
