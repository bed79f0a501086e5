//! Sample value type.
//!
//! A [`Sample`] is one observation of a metric: name, value, label set,
//! capture time and descriptive metadata. Samples are immutable once built;
//! a newer observation of the same series replaces the old one in the
//! registry instead of mutating it.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, TimeDelta, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Label key/value pairs identifying one series under a metric name.
///
/// Ordered by key so that two label sets with the same pairs compare equal
/// and render identically regardless of how they were received.
pub type LabelSet = BTreeMap<String, String>;

static METRIC_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").expect("valid metric name regex"));

static LABEL_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("valid label name regex"));

/// Check a metric name against the exposition format grammar.
pub fn is_valid_metric_name(name: &str) -> bool {
    METRIC_NAME_RE.is_match(name)
}

/// Check a label name against the exposition format grammar.
pub fn is_valid_label_name(name: &str) -> bool {
    LABEL_NAME_RE.is_match(name)
}

/// Metric kind as announced in the `# TYPE` line.
///
/// The registry stores every kind the same way; the kind only affects how the
/// family is described to scrapers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    #[default]
    Gauge,
    Counter,
    Info,
    Untyped,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
            MetricKind::Info => "info",
            MetricKind::Untyped => "untyped",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = SampleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            "info" => Ok(MetricKind::Info),
            "untyped" => Ok(MetricKind::Untyped),
            _ => Err(SampleError::UnknownKind(s.to_string())),
        }
    }
}

/// Reasons a single pushed metric item is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SampleError {
    #[error("metric item is not an object")]
    NotAnObject,

    #[error("missing metric name")]
    MissingName,

    #[error("invalid metric name '{0}'")]
    InvalidName(String),

    #[error("missing value for metric '{0}'")]
    MissingValue(String),

    #[error("value for metric '{name}' is not numeric: {value}")]
    NonNumericValue { name: String, value: String },

    #[error("labels for metric '{0}' must be an object")]
    InvalidLabels(String),

    #[error("invalid label name '{label}' on metric '{name}'")]
    InvalidLabelName { name: String, label: String },

    #[error("label '{label}' on metric '{name}' has a non-scalar value")]
    InvalidLabelValue { name: String, label: String },

    #[error("unknown metric type '{0}'")]
    UnknownKind(String),
}

/// One metric observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub name: String,
    pub value: f64,
    pub labels: LabelSet,
    /// Receipt time at the collector, not the agent's clock.
    pub timestamp: DateTime<Utc>,
    pub help: String,
    pub kind: MetricKind,
}

impl Sample {
    /// Create a gauge sample with no help text.
    pub fn new(
        name: impl Into<String>,
        value: f64,
        labels: LabelSet,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            name: name.into(),
            value,
            labels,
            timestamp,
            help: String::new(),
            kind: MetricKind::Gauge,
        }
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    pub fn with_kind(mut self, kind: MetricKind) -> Self {
        self.kind = kind;
        self
    }

    /// Time elapsed since the sample was captured.
    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.timestamp
    }

    /// A sample is expired once its age strictly exceeds the ttl.
    pub fn is_expired(&self, now: DateTime<Utc>, ttl: TimeDelta) -> bool {
        self.age(now) > ttl
    }

    /// Capture time in milliseconds since the Unix epoch.
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    /// Value of a single label, if present.
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}
