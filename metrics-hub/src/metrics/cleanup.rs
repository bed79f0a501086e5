//! Periodic expiry sweep.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::registry::MetricsRegistry;

/// Background task evicting expired samples on a fixed period.
pub struct CleanupTask {
    registry: Arc<MetricsRegistry>,
    interval: Duration,
}

impl CleanupTask {
    pub fn new(registry: Arc<MetricsRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Spawn the sweep loop; it runs until `cancel_token` is cancelled.
    pub fn start(self, cancel_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run_loop(cancel_token).await })
    }

    async fn run_loop(&self, cancel_token: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;

        let interval_secs = self.interval.as_secs();
        info!(interval_secs, "Metric cleanup task started");

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    debug!("Metric cleanup task shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.run_once();
                }
            }
        }
    }

    /// Run one sweep, isolating any panic so the loop survives it.
    ///
    /// Returns the number of evicted samples, or `None` if the sweep panicked.
    pub fn run_once(&self) -> Option<usize> {
        let registry = &self.registry;
        match std::panic::catch_unwind(AssertUnwindSafe(|| registry.evict_expired(Utc::now()))) {
            Ok(0) => {
                debug!("Metric cleanup found nothing to evict");
                Some(0)
            }
            Ok(evicted) => {
                let remaining = registry.len();
                info!(evicted, remaining, "Evicted expired metrics");
                Some(evicted)
            }
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&'static str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "<non-string panic payload>".to_string());
                error!(reason = %reason, "Metric cleanup sweep panicked; retrying next tick");
                None
            }
        }
    }
}
