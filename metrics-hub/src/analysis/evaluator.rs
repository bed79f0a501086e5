//! Device replacement evaluator.
//!
//! Decides whether a device needs attention from its CPU and memory
//! utilization. The primary path averages each metric over the analysis
//! window via the time-series backend. When the backend is unreachable the
//! evaluator falls back to the raw samples still held in the registry, which
//! is weaker (no averaging) and is flagged in the result.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::query::{QueryError, TimeSeriesQuery, avg_over_time_query};
use super::thresholds::{Breach, MetricBounds, ThresholdConfig, ThresholdSummary};
use crate::metrics::{MetricsRegistry, SOURCE_LABEL};

/// Metric carrying total CPU utilization in percent.
pub const CPU_METRIC: &str = "total_cpu_usage_percent";

/// Metric carrying total memory utilization in percent.
pub const MEMORY_METRIC: &str = "total_memory_usage_percent";

/// Reason added once when any metric was judged from registry samples.
pub const FALLBACK_REASON: &str = "Used current metrics (Prometheus unavailable)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resource {
    Cpu,
    Memory,
}

impl Resource {
    fn metric_name(self) -> &'static str {
        match self {
            Resource::Cpu => CPU_METRIC,
            Resource::Memory => MEMORY_METRIC,
        }
    }

    fn display_name(self) -> &'static str {
        match self {
            Resource::Cpu => "CPU",
            Resource::Memory => "memory",
        }
    }

    fn average_key(self) -> &'static str {
        match self {
            Resource::Cpu => "avg_cpu",
            Resource::Memory => "avg_memory",
        }
    }

    fn current_key(self) -> &'static str {
        match self {
            Resource::Cpu => "current_cpu",
            Resource::Memory => "current_memory",
        }
    }

    fn bounds(self, config: &ThresholdConfig) -> MetricBounds {
        match self {
            Resource::Cpu => config.cpu,
            Resource::Memory => config.memory,
        }
    }

    fn describe(self, breach: Breach, value: f64, threshold: f64) -> String {
        let kind = match breach {
            Breach::High => "High",
            Breach::Low => "Unusually low",
        };
        format!(
            "{kind} {} usage: {value:.1}% (threshold: {threshold:.1}%)",
            self.display_name()
        )
    }
}

/// Outcome of a replacement check for one device.
#[derive(Debug, Clone, Serialize)]
pub struct ReplacementDecision {
    pub replace_device: bool,
    pub device_serial: String,
    pub timestamp: DateTime<Utc>,
    pub analysis_window_minutes: u64,
    pub thresholds: ThresholdSummary,
    /// Values the decision was based on (`avg_*` or `current_*`).
    pub metrics: BTreeMap<String, f64>,
    /// Human-readable triggers, plus the fallback annotation when used.
    pub reasons: Vec<String>,
    /// True when at least one metric was judged from registry samples.
    pub degraded: bool,
    /// Why a metric had insufficient data.
    pub notes: Vec<String>,
}

#[derive(Default)]
struct Accumulator {
    metrics: BTreeMap<String, f64>,
    reasons: Vec<String>,
    notes: Vec<String>,
    degraded: bool,
}

/// CPU/memory threshold evaluator with registry fallback.
pub struct ReplacementEvaluator {
    query: Arc<dyn TimeSeriesQuery>,
    registry: Arc<MetricsRegistry>,
    config: ThresholdConfig,
}

impl ReplacementEvaluator {
    pub fn new(
        query: Arc<dyn TimeSeriesQuery>,
        registry: Arc<MetricsRegistry>,
        config: ThresholdConfig,
    ) -> Self {
        Self {
            query,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &ThresholdConfig {
        &self.config
    }

    /// Evaluate `device_serial`. Never fails; missing data only weakens the answer.
    pub async fn evaluate(&self, device_serial: &str) -> ReplacementDecision {
        let window_minutes = self.config.window_minutes();
        let cpu_query =
            avg_over_time_query(CPU_METRIC, SOURCE_LABEL, device_serial, window_minutes);
        let memory_query =
            avg_over_time_query(MEMORY_METRIC, SOURCE_LABEL, device_serial, window_minutes);

        let (cpu, memory) = tokio::join!(
            self.query.query_scalar(&cpu_query),
            self.query.query_scalar(&memory_query)
        );

        let now = Utc::now();
        let mut acc = Accumulator::default();
        self.apply(&mut acc, Resource::Cpu, cpu, device_serial, now);
        self.apply(&mut acc, Resource::Memory, memory, device_serial, now);

        if acc.degraded {
            acc.reasons.push(FALLBACK_REASON.to_string());
        }

        let replace_device = acc.reasons.iter().any(|r| r != FALLBACK_REASON);

        info!(
            device_serial,
            replace_device,
            degraded = acc.degraded,
            "Device replacement check"
        );
        if !acc.reasons.is_empty() {
            info!(device_serial, reasons = %acc.reasons.join(", "), "Replacement reasons");
        }

        ReplacementDecision {
            replace_device,
            device_serial: device_serial.to_string(),
            timestamp: now,
            analysis_window_minutes: window_minutes,
            thresholds: self.config.summary(),
            metrics: acc.metrics,
            reasons: acc.reasons,
            degraded: acc.degraded,
            notes: acc.notes,
        }
    }

    fn apply(
        &self,
        acc: &mut Accumulator,
        resource: Resource,
        result: Result<Option<f64>, QueryError>,
        device_serial: &str,
        now: DateTime<Utc>,
    ) {
        let bounds = resource.bounds(&self.config);
        match result {
            Ok(Some(average)) => {
                acc.metrics.insert(resource.average_key().to_string(), average);
                if let Some(breach) = bounds.classify(average) {
                    acc.reasons.push(resource.describe(
                        breach,
                        average,
                        bounds.threshold_for(breach),
                    ));
                }
            }
            Ok(None) => {
                acc.notes.push(format!(
                    "No {} data for the last {} minutes",
                    resource.display_name(),
                    self.config.window_minutes()
                ));
            }
            Err(e) if e.is_unavailable() => {
                warn!(
                    device_serial,
                    metric = resource.metric_name(),
                    error = %e,
                    "Could not reach Prometheus; using registry samples"
                );
                acc.degraded = true;
                self.apply_fallback(acc, resource, device_serial, now);
            }
            Err(e) => {
                warn!(
                    device_serial,
                    metric = resource.metric_name(),
                    error = %e,
                    "Time-series query failed"
                );
                acc.notes.push(format!("{} query failed: {}", resource.display_name(), e));
            }
        }
    }

    fn apply_fallback(
        &self,
        acc: &mut Accumulator,
        resource: Resource,
        device_serial: &str,
        now: DateTime<Utc>,
    ) {
        let max_age = TimeDelta::from_std(self.config.fallback_window).unwrap_or(TimeDelta::MAX);
        let recent = self.registry.recent_samples(
            resource.metric_name(),
            SOURCE_LABEL,
            device_serial,
            max_age,
            now,
        );

        let Some(latest) = recent.first() else {
            acc.notes.push(format!(
                "No recent {} samples in registry",
                resource.display_name()
            ));
            return;
        };
        acc.metrics
            .insert(resource.current_key().to_string(), latest.value);

        let bounds = resource.bounds(&self.config);
        let breach = recent
            .iter()
            .find_map(|s| bounds.classify(s.value).map(|b| (b, s.value)));
        if let Some((breach, value)) = breach {
            acc.reasons.push(format!(
                "{} [current value]",
                resource.describe(breach, value, bounds.threshold_for(breach))
            ));
        }
    }
}
