use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use metrics_hub::analysis::{PrometheusClient, ReplacementEvaluator};
use metrics_hub::api::{ApiServer, AppState};
use metrics_hub::config::Args;
use metrics_hub::logging;
use metrics_hub::metrics::{CleanupTask, MetricsRegistry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables before clap reads them
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let logging_options = args.logging_options();
    let _log_guard = logging::init_logging(&logging_options)?;

    let registry_config = args.registry_config()?;
    let threshold_config = args.threshold_config()?;
    let query_config = args.query_config();

    let registry = Arc::new(MetricsRegistry::new(registry_config.ttl));
    let prometheus = PrometheusClient::new(&query_config)
        .context("Failed to create Prometheus query client")?;
    info!(
        endpoint = %prometheus.endpoint(),
        window_minutes = threshold_config.window_minutes(),
        "Device replacement checks use Prometheus"
    );
    let evaluator =
        ReplacementEvaluator::new(Arc::new(prometheus), registry.clone(), threshold_config);

    let cancel_token = CancellationToken::new();

    let cleanup_handle = CleanupTask::new(registry.clone(), registry_config.cleanup_interval)
        .start(cancel_token.child_token());
    let retention_handle = logging_options
        .log_dir
        .clone()
        .map(|dir| logging::start_retention_cleanup(dir, cancel_token.child_token()));

    let server = ApiServer::with_state(
        args.server_config(),
        AppState::new(registry, Arc::new(evaluator)),
    )
    .with_cancel_token(cancel_token.clone());

    info!(
        ttl_secs = registry_config.ttl.as_secs(),
        debug = logging_options.debug,
        "Starting metrics-hub v{}",
        env!("CARGO_PKG_VERSION")
    );

    {
        let cancel_token = cancel_token.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
                return;
            }
            info!("Received Ctrl-C, shutting down");
            cancel_token.cancel();
        });
    }

    let result = server.run().await;

    // The server may have stopped on its own; make sure background tasks stop too.
    cancel_token.cancel();
    let _ = cleanup_handle.await;
    if let Some(handle) = retention_handle {
        let _ = handle.await;
    }

    result.context("Metrics server failed")?;
    info!("Shutdown complete");
    Ok(())
}
