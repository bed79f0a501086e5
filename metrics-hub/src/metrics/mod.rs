//! Metric storage and exposition.
//!
//! Agents push samples which are kept in memory for a fixed time-to-live and
//! re-exposed in Prometheus text format.
//!
//! # Example
//!
//! ```ignore
//! use metrics_hub::metrics::{MetricsRegistry, PrometheusExporter, ingest_batch};
//!
//! let registry = MetricsRegistry::default();
//! let items = vec![serde_json::json!({"name": "total_cpu_usage_percent", "value": 42.5})];
//! ingest_batch(&registry, "DEV-1", "device-metrics", &items, chrono::Utc::now());
//!
//! let now = chrono::Utc::now();
//! let text = PrometheusExporter::new().export(&registry.snapshot(now), now);
//! ```

mod cleanup;
mod exposition;
mod ingest;
mod registry;
mod sample;

pub use cleanup::CleanupTask;
pub use exposition::{CONTENT_TYPE, PrometheusExporter, format_value};
pub use ingest::{
    DEFAULT_JOB, DEFAULT_SOURCE, IngestOutcome, JOB_LABEL, MetricDescriptor, SOURCE_LABEL,
    ingest_batch,
};
pub use registry::{
    DEFAULT_CLEANUP_INTERVAL, DEFAULT_TTL, MetricFamily, MetricsRegistry, RegistryConfig,
    RegistrySnapshot,
};
pub use sample::{
    LabelSet, MetricKind, Sample, SampleError, is_valid_label_name, is_valid_metric_name,
};
