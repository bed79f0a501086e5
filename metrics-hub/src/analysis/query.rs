//! Time-series query client.
//!
//! The evaluator reads windowed averages from the Prometheus instance that
//! scrapes this collector. The backend sits behind [`TimeSeriesQuery`] so
//! it can be swapped out when Prometheus is not deployed.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};
use crate::utils::http_client::build_query_client;

/// Default Prometheus base URL.
pub const DEFAULT_PROMETHEUS_URL: &str = "http://prometheus:9090";

/// Default per-query timeout.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Failure of a single time-series query.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The backend could not be reached or did not answer in time.
    #[error("query backend unavailable: {0}")]
    Unavailable(String),

    #[error("query backend returned HTTP {0}")]
    Status(u16),

    #[error("invalid query response: {0}")]
    InvalidResponse(String),

    #[error("query failed: {0}")]
    QueryFailed(String),
}

impl QueryError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, QueryError::Unavailable(_))
    }
}

/// Instant-query interface of a time-series database.
#[async_trait]
pub trait TimeSeriesQuery: Send + Sync {
    /// Evaluate `query` and return the first sample of the result vector,
    /// or `None` when the result is empty.
    async fn query_scalar(&self, query: &str) -> std::result::Result<Option<f64>, QueryError>;
}

/// Build `avg_over_time(<metric>{<label>="<value>"}[<minutes>m])`.
pub fn avg_over_time_query(metric: &str, label: &str, value: &str, window_minutes: u64) -> String {
    format!(
        "avg_over_time({metric}{{{label}=\"{}\"}}[{window_minutes}m])",
        escape_promql_string(value)
    )
}

fn escape_promql_string(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Configuration for the Prometheus query client.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_PROMETHEUS_URL.to_string(),
            timeout: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PromResponse {
    status: String,
    #[serde(default)]
    data: Option<PromData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PromData {
    #[serde(default)]
    result: Vec<PromVectorSample>,
}

#[derive(Debug, Deserialize)]
struct PromVectorSample {
    value: (f64, String),
}

/// Prometheus HTTP API client (`/api/v1/query`).
#[derive(Debug, Clone)]
pub struct PrometheusClient {
    client: reqwest::Client,
    endpoint: Url,
    timeout: Duration,
}

impl PrometheusClient {
    pub fn new(config: &QueryConfig) -> Result<Self> {
        let mut base = Url::parse(&config.base_url).map_err(|e| {
            Error::config(format!("Invalid Prometheus URL '{}': {}", config.base_url, e))
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let endpoint = base
            .join("api/v1/query")
            .map_err(|e| Error::config(format!("Invalid Prometheus URL: {}", e)))?;

        Ok(Self {
            client: build_query_client(config.timeout),
            endpoint,
            timeout: config.timeout,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn send(&self, query: &str) -> std::result::Result<Option<f64>, QueryError> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[("query", query)])
            .send()
            .await
            .map_err(|e| QueryError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(QueryError::Status(status.as_u16()));
        }

        let body: PromResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                QueryError::Unavailable(e.to_string())
            } else {
                QueryError::InvalidResponse(e.to_string())
            }
        })?;

        if body.status != "success" {
            return Err(QueryError::QueryFailed(
                body.error.unwrap_or_else(|| body.status.clone()),
            ));
        }

        let Some(first) = body.data.and_then(|d| d.result.into_iter().next()) else {
            return Ok(None);
        };

        let value = first
            .value
            .1
            .parse::<f64>()
            .map_err(|e| QueryError::InvalidResponse(format!("{}: {}", first.value.1, e)))?;

        Ok(value.is_finite().then_some(value))
    }
}

#[async_trait]
impl TimeSeriesQuery for PrometheusClient {
    async fn query_scalar(&self, query: &str) -> std::result::Result<Option<f64>, QueryError> {
        debug!(endpoint = %self.endpoint, query, "Querying Prometheus");
        match tokio::time::timeout(self.timeout, self.send(query)).await {
            Ok(result) => result,
            Err(_) => Err(QueryError::Unavailable(format!(
                "timed out after {}s",
                self.timeout.as_secs_f64()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{CPU_METRIC, MEMORY_METRIC};

    use axum::Router;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use serde_json::json;
    use std::collections::HashMap;
    use tokio::net::TcpListener;

    async fn prometheus_handler(
        Query(params): Query<HashMap<String, String>>,
    ) -> impl IntoResponse {
        let query = params.get("query").cloned().unwrap_or_default();
        if query.contains("total_cpu_usage_percent") {
            axum::Json(json!({
                "status": "success",
                "data": {
                    "resultType": "vector",
                    "result": [{"metric": {}, "value": [1700000000.0, "91.5"]}]
                }
            }))
            .into_response()
        } else if query.contains("total_memory_usage_percent") {
            axum::Json(json!({
                "status": "success",
                "data": {"resultType": "vector", "result": []}
            }))
            .into_response()
        } else if query.contains("broken") {
            (StatusCode::BAD_REQUEST, "bad query").into_response()
        } else {
            axum::Json(json!({"status": "error", "error": "parse error"})).into_response()
        }
    }

    async fn spawn_prometheus() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/prom/api/v1/query", get(prometheus_handler));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/prom")
    }

    fn client(base_url: &str, timeout: Duration) -> PrometheusClient {
        PrometheusClient::new(&QueryConfig {
            base_url: base_url.to_string(),
            timeout,
        })
        .unwrap()
    }

    #[test]
    fn test_avg_over_time_query() {
        assert_eq!(
            avg_over_time_query("total_cpu_usage_percent", "device_serial", "DEV-1", 10),
            "avg_over_time(total_cpu_usage_percent{device_serial=\"DEV-1\"}[10m])"
        );
        assert_eq!(
            avg_over_time_query("m", "device_serial", "a\"b\\c", 5),
            "avg_over_time(m{device_serial=\"a\\\"b\\\\c\"}[5m])"
        );
    }

    #[test]
    fn test_endpoint_building() {
        let c = client("http://prometheus:9090", DEFAULT_QUERY_TIMEOUT);
        assert_eq!(c.endpoint().as_str(), "http://prometheus:9090/api/v1/query");

        let c = client("http://host/prefix", DEFAULT_QUERY_TIMEOUT);
        assert_eq!(c.endpoint().as_str(), "http://host/prefix/api/v1/query");

        let invalid = QueryConfig {
            base_url: "not a url".to_string(),
            timeout: DEFAULT_QUERY_TIMEOUT,
        };
        assert!(PrometheusClient::new(&invalid).is_err());
    }

    #[tokio::test]
    async fn test_query_scalar_against_server() {
        let base = spawn_prometheus().await;
        let c = client(&base, Duration::from_secs(5));

        let cpu_query = avg_over_time_query(CPU_METRIC, "device_serial", "DEV-1", 10);
        let cpu = c.query_scalar(&cpu_query).await.unwrap();
        assert_eq!(cpu, Some(91.5));

        let memory_query = avg_over_time_query(MEMORY_METRIC, "device_serial", "DEV-1", 10);
        let mem = c.query_scalar(&memory_query).await.unwrap();
        assert_eq!(mem, None);

        let err = c.query_scalar("broken").await.unwrap_err();
        assert!(matches!(err, QueryError::Status(400)));

        let err = c.query_scalar("other").await.unwrap_err();
        assert!(matches!(err, QueryError::QueryFailed(ref msg) if msg == "parse error"));
        assert!(!err.is_unavailable());
    }

    #[tokio::test]
    async fn test_query_scalar_unreachable() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let c = client(&format!("http://{addr}"), Duration::from_secs(2));
        let err = c.query_scalar("up").await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_query_scalar_times_out() {
        // Accepts connections but never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let c = client(&format!("http://{addr}"), Duration::from_secs(1));
        let started = std::time::Instant::now();
        let err = c.query_scalar("up").await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(err.is_unavailable(), "unexpected error: {err}");
        assert!(elapsed >= Duration::from_millis(900));
        assert!(elapsed < Duration::from_secs(3));
    }
}
