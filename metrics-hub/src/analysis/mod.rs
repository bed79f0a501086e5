//! Device health analysis.
//!
//! Classifies a device as needing replacement from windowed CPU and memory
//! averages, falling back to the collector's own recent samples when the
//! time-series backend cannot be reached.

mod evaluator;
mod query;
mod thresholds;

pub use evaluator::{
    CPU_METRIC, FALLBACK_REASON, MEMORY_METRIC, ReplacementDecision, ReplacementEvaluator,
};
pub use query::{
    DEFAULT_PROMETHEUS_URL, DEFAULT_QUERY_TIMEOUT, PrometheusClient, QueryConfig, QueryError,
    TimeSeriesQuery, avg_over_time_query,
};
pub use thresholds::{Breach, MetricBounds, ThresholdConfig, ThresholdSummary};
