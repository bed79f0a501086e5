//! Metric ingestion and Prometheus scrape routes.

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;
use tracing::{debug, info};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{IngestRequest, IngestResponse};
use crate::api::server::AppState;
use crate::error::Error;
use crate::metrics::{CONTENT_TYPE, DEFAULT_JOB, DEFAULT_SOURCE, ingest_batch};

/// Create the metrics router.
pub fn router() -> Router<AppState> {
    Router::new().route("/metrics", get(scrape_metrics).post(ingest_metrics))
}

/// Serve every live sample in Prometheus text format.
async fn scrape_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.registry.snapshot(Utc::now());
    let body = state.exporter.export(&snapshot, Utc::now());

    debug!(lines = body.lines().count(), "Served metric lines");

    ([(header::CONTENT_TYPE, CONTENT_TYPE)], body)
}

/// Ingest a batch of metrics pushed by a device.
async fn ingest_metrics(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<IngestResponse>> {
    if body.is_empty() {
        return Err(ApiError::bad_request("Empty request body"));
    }

    let request: IngestRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) if e.is_data() => {
            return Err(ApiError::bad_request(format!("Invalid request format: {}", e))
                .with_details(serde_json::json!({
                    "expected": {"device_serial": "string", "job": "string", "metrics": "[...]"}
                })));
        }
        Err(e) => return Err(Error::from(e).into()),
    };

    let device_serial = request
        .device_serial
        .unwrap_or_else(|| DEFAULT_SOURCE.to_string());
    let job = request.job.unwrap_or_else(|| DEFAULT_JOB.to_string());
    let timestamp = Utc::now();

    let outcome = ingest_batch(
        &state.registry,
        &device_serial,
        &job,
        &request.metrics,
        timestamp,
    );

    info!(
        device_serial = %device_serial,
        job = %job,
        processed = outcome.processed,
        skipped = outcome.skipped,
        "Processed metrics from device"
    );

    Ok(Json(IngestResponse {
        status: "success".to_string(),
        processed_metrics: outcome.processed,
        skipped_metrics: outcome.skipped,
        device_serial,
        timestamp: outcome.timestamp,
    }))
}
