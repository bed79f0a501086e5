//! Process configuration.
//!
//! Every option is a command-line flag that can also be supplied through an
//! environment variable. `main` loads a `.env` file first.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::analysis::{DEFAULT_PROMETHEUS_URL, MetricBounds, QueryConfig, ThresholdConfig};
use crate::api::ApiServerConfig;
use crate::error::{Error, Result};
use crate::logging::LoggingOptions;
use crate::metrics::RegistryConfig;

const DEFAULT_BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Push-model metrics collector with a Prometheus scrape endpoint.
#[derive(Parser, Debug, Clone)]
#[command(name = "metrics-hub", version, about)]
pub struct Args {
    /// Address to bind the HTTP server to
    #[arg(long, env = "METRICS_HUB_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "METRICS_HUB_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Seconds after which a sample is considered stale
    #[arg(long, env = "METRICS_HUB_TTL", default_value_t = 300)]
    pub ttl: u64,

    /// Base URL of the Prometheus server used for windowed averages
    #[arg(long, env = "PROMETHEUS_URL", default_value = DEFAULT_PROMETHEUS_URL)]
    pub prometheus_url: String,

    /// Enable debug logging
    #[arg(long, env = "METRICS_HUB_DEBUG")]
    pub debug: bool,

    /// Seconds between expiry sweeps
    #[arg(long, env = "METRICS_HUB_CLEANUP_INTERVAL", default_value_t = 60)]
    pub cleanup_interval: u64,

    /// Timeout in seconds for each Prometheus query
    #[arg(long, env = "METRICS_HUB_QUERY_TIMEOUT", default_value_t = 5)]
    pub query_timeout: u64,

    /// Maximum request body size in bytes
    #[arg(
        long,
        env = "METRICS_HUB_BODY_LIMIT",
        default_value_t = DEFAULT_BODY_LIMIT
    )]
    pub body_limit: usize,

    /// Directory for daily-rotated log files
    #[arg(long, env = "METRICS_HUB_LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    #[arg(long, env = "METRICS_HUB_CPU_HIGH", default_value_t = 80.0)]
    pub cpu_high: f64,

    #[arg(long, env = "METRICS_HUB_CPU_LOW", default_value_t = 5.0)]
    pub cpu_low: f64,

    #[arg(long, env = "METRICS_HUB_MEMORY_HIGH", default_value_t = 85.0)]
    pub memory_high: f64,

    #[arg(long, env = "METRICS_HUB_MEMORY_LOW", default_value_t = 10.0)]
    pub memory_low: f64,

    /// Averaging window in minutes for device replacement checks
    #[arg(long, env = "METRICS_HUB_ANALYSIS_WINDOW", default_value_t = 10)]
    pub analysis_window: u64,

    /// Maximum sample age in seconds used when Prometheus is unreachable
    #[arg(long, env = "METRICS_HUB_FALLBACK_WINDOW", default_value_t = 120)]
    pub fallback_window: u64,
}

impl Args {
    pub fn server_config(&self) -> ApiServerConfig {
        ApiServerConfig {
            bind_address: self.host.clone(),
            port: self.port,
            body_limit: self.body_limit,
        }
    }

    pub fn registry_config(&self) -> Result<RegistryConfig> {
        if self.ttl == 0 {
            return Err(Error::config("TTL must be at least one second"));
        }
        if self.cleanup_interval == 0 {
            return Err(Error::config("cleanup interval must be at least one second"));
        }
        Ok(RegistryConfig {
            ttl: Duration::from_secs(self.ttl),
            cleanup_interval: Duration::from_secs(self.cleanup_interval),
        })
    }

    pub fn threshold_config(&self) -> Result<ThresholdConfig> {
        let window_secs = self
            .analysis_window
            .checked_mul(60)
            .ok_or_else(|| Error::config("analysis window is too large"))?;
        let config = ThresholdConfig {
            cpu: MetricBounds::new(self.cpu_high, self.cpu_low),
            memory: MetricBounds::new(self.memory_high, self.memory_low),
            window: Duration::from_secs(window_secs),
            fallback_window: Duration::from_secs(self.fallback_window),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn query_config(&self) -> QueryConfig {
        QueryConfig {
            base_url: self.prometheus_url.clone(),
            timeout: Duration::from_secs(self.query_timeout),
        }
    }

    pub fn logging_options(&self) -> LoggingOptions {
        LoggingOptions {
            debug: self.debug,
            log_dir: self.log_dir.clone(),
        }
    }
}
