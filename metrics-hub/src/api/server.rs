//! API server setup and configuration.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::{DefaultBodyLimit, Request};
use axum::http::{Method, Response};
use axum::response::IntoResponse;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::analysis::ReplacementEvaluator;
use crate::api::error::ApiError;
use crate::api::routes;
use crate::error::{Error, Result};
use crate::metrics::{MetricsRegistry, PrometheusExporter};

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Server bind address
    pub bind_address: String,
    /// Server port
    pub port: u16,
    /// Request body size limit in bytes
    pub body_limit: usize,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            body_limit: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server start time for uptime calculation
    pub start_time: Instant,
    /// Sample store shared with the cleanup task
    pub registry: Arc<MetricsRegistry>,
    /// Device replacement evaluator
    pub evaluator: Arc<ReplacementEvaluator>,
    /// Prometheus text encoder
    pub exporter: PrometheusExporter,
}

impl AppState {
    pub fn new(registry: Arc<MetricsRegistry>, evaluator: Arc<ReplacementEvaluator>) -> Self {
        Self {
            start_time: Instant::now(),
            registry,
            evaluator,
            exporter: PrometheusExporter::new(),
        }
    }
}

#[cfg(test)]
impl AppState {
    /// State with a default registry and a time-series backend that is never reachable.
    pub(crate) fn for_tests() -> Self {
        use crate::analysis::{QueryError, ThresholdConfig, TimeSeriesQuery};

        struct Offline;

        #[async_trait::async_trait]
        impl TimeSeriesQuery for Offline {
            async fn query_scalar(
                &self,
                _query: &str,
            ) -> std::result::Result<Option<f64>, QueryError> {
                Err(QueryError::Unavailable("offline".to_string()))
            }
        }

        let registry = Arc::new(MetricsRegistry::default());
        let evaluator = ReplacementEvaluator::new(
            Arc::new(Offline),
            registry.clone(),
            ThresholdConfig::default(),
        );
        Self::new(registry, Arc::new(evaluator))
    }
}

/// Scrape and health traffic is logged at debug level only.
fn is_quiet(req: &Request) -> bool {
    let path = req.uri().path();
    path == "/health" || (path == "/metrics" && req.method() == Method::GET)
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response<axum::body::Body> {
    let reason = err
        .downcast_ref::<&'static str>()
        .map(|s| (*s).to_string())
        .or_else(|| err.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "<non-string panic payload>".to_string());
    tracing::error!(reason = %reason, "Request handler panicked");
    ApiError::internal("Internal Server Error").into_response()
}

/// API server.
pub struct ApiServer {
    config: ApiServerConfig,
    state: AppState,
    cancel_token: CancellationToken,
}

impl ApiServer {
    /// Create with the given state.
    pub fn with_state(config: ApiServerConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token for shutdown.
    pub fn with_cancel_token(mut self, cancel_token: CancellationToken) -> Self {
        self.cancel_token = cancel_token;
        self
    }

    /// Get the cancellation token for graceful shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Build the router with all middleware and routes.
    pub fn build_router(&self) -> Router {
        let mut router = routes::create_router(self.state.clone())
            .layer(DefaultBodyLimit::max(self.config.body_limit))
            .layer(CatchPanicLayer::custom(handle_panic));

        // Add tracing
        router = router.layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request| {
                    let level = if is_quiet(req) {
                        tracing::Level::DEBUG
                    } else {
                        tracing::Level::INFO
                    };
                    let mut make_span = tower_http::trace::DefaultMakeSpan::new().level(level);
                    use tower_http::trace::MakeSpan;
                    make_span.make_span(req)
                })
                .on_request(|req: &Request, span: &Span| {
                    if span.is_disabled() {
                        return;
                    }
                    let mut on_request =
                        tower_http::trace::DefaultOnRequest::new().level(tracing::Level::INFO);
                    use tower_http::trace::OnRequest;
                    on_request.on_request(req, span);
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &Span| {
                        if span.is_disabled() {
                            return;
                        }
                        let on_response =
                            tower_http::trace::DefaultOnResponse::new().level(tracing::Level::INFO);
                        use tower_http::trace::OnResponse;
                        on_response.on_response(res, latency, span);
                    },
                )
                .on_failure(
                    |class: tower_http::classify::ServerErrorsFailureClass,
                     latency: Duration,
                     span: &Span| {
                        let mut on_failure =
                            tower_http::trace::DefaultOnFailure::new().level(tracing::Level::ERROR);
                        use tower_http::trace::OnFailure;
                        on_failure.on_failure(class, latency, span);
                    },
                ),
        );
        router
    }

    /// Start the server.
    pub async fn run(&self) -> Result<()> {
        // Accepts host names as well as IPv4 and IPv6 literals.
        let host = self.config.bind_address.as_str();
        let listener = TcpListener::bind((host, self.config.port)).await?;
        let addr = listener.local_addr()?;
        tracing::info!("Metrics server listening on http://{}", addr);
        tracing::info!("  POST /metrics - Ingest metrics from devices");
        tracing::info!("  GET  /metrics - Prometheus scrape endpoint");
        tracing::info!("  GET  /health  - Health check");
        tracing::info!("  GET  /status  - Detailed status");
        tracing::info!("  GET  /device-replacement/{{serial}} - Replacement check");

        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let router = self.build_router();
        let cancel_token = self.cancel_token.clone();

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel_token.cancelled().await;
                tracing::info!("Metrics server shutting down...");
            })
            .await
            .map_err(|e| Error::ApiError(format!("Server error: {}", e)))?;

        Ok(())
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        self.cancel_token.cancel();
    }
}
