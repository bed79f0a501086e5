//! Device replacement check routes.
//!
//! The only endpoint exposed to browsers, so the only one with CORS headers.

use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderName, Method, StatusCode},
    routing::get,
};
use tower_http::cors::{Any, CorsLayer};

use crate::analysis::ReplacementDecision;
use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;

const MISSING_SERIAL: &str = "Device serial number required in URL path";

/// Create the device replacement router.
///
/// Any path below `/device-replacement/` is accepted; the last segment is
/// the device serial.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/device-replacement", get(no_serial).options(preflight))
        .route("/device-replacement/", get(no_serial).options(preflight))
        .route(
            "/device-replacement/{*path}",
            get(check_device).options(preflight),
        )
        .layer(cors_layer())
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([HeaderName::from_static("content-type")])
        .max_age(Duration::from_secs(24 * 60 * 60))
}

/// Serial named by a request path below `/device-replacement/`.
fn serial_from_path(path: &str) -> Option<&str> {
    let serial = path.rsplit('/').next().unwrap_or_default().trim();
    (!serial.is_empty()).then_some(serial)
}

/// Evaluate whether a device should be replaced.
async fn check_device(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> ApiResult<Json<ReplacementDecision>> {
    let Some(device_serial) = serial_from_path(&path) else {
        return Err(ApiError::bad_request(MISSING_SERIAL));
    };

    Ok(Json(state.evaluator.evaluate(device_serial).await))
}

async fn no_serial() -> ApiError {
    ApiError::bad_request(MISSING_SERIAL)
}

/// Plain `OPTIONS` without CORS request headers still gets a 200.
async fn preflight() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::{Body, to_bytes};
    use axum::http::{HeaderMap, Request as HttpRequest, header};
    use chrono::Utc;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::analysis::{
        CPU_METRIC, FALLBACK_REASON, MEMORY_METRIC, QueryError, ReplacementEvaluator,
        ThresholdConfig, TimeSeriesQuery,
    };
    use crate::api::routes::create_router;
    use crate::metrics::{LabelSet, MetricsRegistry, SOURCE_LABEL, Sample};

    struct FixedAverages {
        cpu: f64,
        memory: f64,
    }

    #[async_trait]
    impl TimeSeriesQuery for FixedAverages {
        async fn query_scalar(&self, query: &str) -> Result<Option<f64>, QueryError> {
            if query.contains(CPU_METRIC) {
                Ok(Some(self.cpu))
            } else {
                Ok(Some(self.memory))
            }
        }
    }

    fn state_with(cpu: f64, memory: f64) -> AppState {
        let registry = Arc::new(MetricsRegistry::default());
        let evaluator = ReplacementEvaluator::new(
            Arc::new(FixedAverages { cpu, memory }),
            registry.clone(),
            ThresholdConfig::default(),
        );
        AppState::new(registry, Arc::new(evaluator))
    }

    fn healthy_app() -> Router {
        create_router(state_with(50.0, 50.0))
    }

    async fn send(app: Router, request: HttpRequest<Body>) -> (StatusCode, HeaderMap, Vec<u8>) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, bytes.to_vec())
    }

    fn get(uri: &str) -> HttpRequest<Body> {
        HttpRequest::builder()
            .uri(uri)
            .header(header::ORIGIN, "http://dashboard.local")
            .body(Body::empty())
            .unwrap()
    }

    fn header_str(headers: &HeaderMap, name: HeaderName) -> Option<&str> {
        headers.get(name).and_then(|v| v.to_str().ok())
    }

    #[test]
    fn test_serial_from_path() {
        assert_eq!(serial_from_path("DEV-1"), Some("DEV-1"));
        assert_eq!(serial_from_path("site/rack/DEV-2"), Some("DEV-2"));
        assert_eq!(serial_from_path(" DEV-3 "), Some("DEV-3"));
        assert_eq!(serial_from_path("DEV-1/"), None);
        assert_eq!(serial_from_path(" "), None);
    }

    #[tokio::test]
    async fn high_cpu_recommends_replacement() {
        let app = create_router(state_with(90.0, 50.0));
        let (status, headers, body) = send(app, get("/device-replacement/DEV-1")).await;

        assert_eq!(status, StatusCode::OK);
        let origin = header_str(&headers, header::ACCESS_CONTROL_ALLOW_ORIGIN);
        assert_eq!(origin, Some("*"));

        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["replace_device"], true);
        assert_eq!(body["device_serial"], "DEV-1");
        assert_eq!(body["analysis_window_minutes"], 10);
        assert_eq!(body["thresholds"]["cpu_high"], 80.0);
        assert_eq!(body["thresholds"]["memory_low"], 10.0);
        assert_eq!(body["metrics"]["avg_cpu"], 90.0);
        let first_reason = body["reasons"][0].as_str().unwrap();
        assert!(first_reason.contains("High CPU usage"));
    }

    #[tokio::test]
    async fn nested_path_uses_last_segment() {
        let app = create_router(state_with(90.0, 50.0));
        let (status, headers, body) = send(app, get("/device-replacement/site-a/DEV-7")).await;

        assert_eq!(status, StatusCode::OK);
        let origin = header_str(&headers, header::ACCESS_CONTROL_ALLOW_ORIGIN);
        assert_eq!(origin, Some("*"));

        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["device_serial"], "DEV-7");
    }

    #[tokio::test]
    async fn unreachable_backend_falls_back_to_registry() {
        let state = AppState::for_tests();
        let mut labels = LabelSet::new();
        labels.insert(SOURCE_LABEL.to_string(), "DEV-9".to_string());
        state
            .registry
            .upsert(Sample::new(MEMORY_METRIC, 95.0, labels, Utc::now()));

        let app = create_router(state);
        let (status, _, body) = send(app, get("/device-replacement/DEV-9")).await;
        assert_eq!(status, StatusCode::OK);

        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["replace_device"], true);
        assert_eq!(body["degraded"], true);
        let reasons: Vec<&str> = body["reasons"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r.as_str().unwrap())
            .collect();
        assert!(reasons.contains(&FALLBACK_REASON));
    }

    #[tokio::test]
    async fn missing_serial_is_bad_request_with_cors() {
        for uri in [
            "/device-replacement/",
            "/device-replacement",
            "/device-replacement/%20",
            "/device-replacement/DEV-1/",
        ] {
            let (status, headers, _) = send(healthy_app(), get(uri)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "uri: {uri}");
            let origin = header_str(&headers, header::ACCESS_CONTROL_ALLOW_ORIGIN);
            assert!(origin.is_some(), "uri: {uri}");
        }
    }

    #[tokio::test]
    async fn preflight_returns_cors_headers() {
        let request = HttpRequest::builder()
            .method(Method::OPTIONS)
            .uri("/device-replacement/DEV-1")
            .header(header::ORIGIN, "http://dashboard.local")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .body(Body::empty())
            .unwrap();
        let (status, headers, _) = send(healthy_app(), request).await;

        assert_eq!(status, StatusCode::OK);
        let origin = header_str(&headers, header::ACCESS_CONTROL_ALLOW_ORIGIN);
        assert_eq!(origin, Some("*"));
        assert!(headers.contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
        let max_age = header_str(&headers, header::ACCESS_CONTROL_MAX_AGE);
        assert_eq!(max_age, Some("86400"));

        let plain = HttpRequest::builder()
            .method(Method::OPTIONS)
            .uri("/device-replacement/DEV-1")
            .body(Body::empty())
            .unwrap();
        let (status, _, _) = send(healthy_app(), plain).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn other_endpoints_have_no_cors_headers() {
        let (status, headers, _) = send(healthy_app(), get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!headers.contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
    }
}
