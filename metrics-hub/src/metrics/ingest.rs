//! Batch ingestion.
//!
//! Turns the loosely-typed metric items pushed by agents into [`Sample`]s.
//! Items are validated one by one: a bad item is logged and skipped, the
//! rest of the batch is still stored.

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use super::registry::MetricsRegistry;
use super::sample::{
    LabelSet, MetricKind, Sample, SampleError, is_valid_label_name, is_valid_metric_name,
};

/// Label injected with the pushing agent's identity.
pub const SOURCE_LABEL: &str = "device_serial";

/// Label injected with the batch's job name.
pub const JOB_LABEL: &str = "job";

/// Source identity used when a batch does not name one.
pub const DEFAULT_SOURCE: &str = "unknown";

/// Job used when a batch does not name one.
pub const DEFAULT_JOB: &str = "device-metrics";

/// One validated metric item, before server-side labels are attached.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDescriptor {
    pub name: String,
    pub value: f64,
    pub labels: LabelSet,
    pub help: String,
    pub kind: MetricKind,
}

impl MetricDescriptor {
    /// Validate a raw JSON item.
    pub fn from_value(item: &Value) -> Result<Self, SampleError> {
        let obj = item.as_object().ok_or(SampleError::NotAnObject)?;

        let name = match obj.get("name") {
            Some(Value::String(name)) => name.clone(),
            _ => return Err(SampleError::MissingName),
        };
        if !is_valid_metric_name(&name) {
            return Err(SampleError::InvalidName(name));
        }

        let value = match obj.get("value") {
            None | Some(Value::Null) => return Err(SampleError::MissingValue(name)),
            Some(raw) => parse_value(raw).ok_or_else(|| SampleError::NonNumericValue {
                name: name.clone(),
                value: raw.to_string(),
            })?,
        };

        let labels = match obj.get("labels") {
            None | Some(Value::Null) => LabelSet::new(),
            Some(Value::Object(raw)) => {
                let mut labels = LabelSet::new();
                for (key, raw_value) in raw {
                    if !is_valid_label_name(key) {
                        return Err(SampleError::InvalidLabelName {
                            name,
                            label: key.clone(),
                        });
                    }
                    let label_value = match raw_value {
                        Value::String(s) => s.clone(),
                        Value::Number(n) => n.to_string(),
                        Value::Bool(b) => b.to_string(),
                        _ => {
                            return Err(SampleError::InvalidLabelValue {
                                name,
                                label: key.clone(),
                            });
                        }
                    };
                    labels.insert(key.clone(), label_value);
                }
                labels
            }
            Some(_) => return Err(SampleError::InvalidLabels(name)),
        };

        let help = match obj.get("help") {
            Some(Value::String(help)) => help.clone(),
            _ => String::new(),
        };

        let kind = match obj.get("type") {
            Some(Value::String(kind)) => kind.parse()?,
            None | Some(Value::Null) => MetricKind::default(),
            Some(other) => return Err(SampleError::UnknownKind(other.to_string())),
        };

        Ok(Self {
            name,
            value,
            labels,
            help,
            kind,
        })
    }

    /// Build the stored sample, attaching the batch's source and job labels.
    ///
    /// The injected labels override any same-named label sent by the agent.
    pub fn into_sample(self, source: &str, job: &str, timestamp: DateTime<Utc>) -> Sample {
        let mut labels = self.labels;
        labels.insert(SOURCE_LABEL.to_string(), source.to_string());
        labels.insert(JOB_LABEL.to_string(), job.to_string());

        Sample::new(self.name, self.value, labels, timestamp)
            .with_help(self.help)
            .with_kind(self.kind)
    }
}

fn parse_value(raw: &Value) -> Option<f64> {
    match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_float_text(s.trim()),
        _ => None,
    }
}

fn parse_float_text(s: &str) -> Option<f64> {
    match s.to_ascii_lowercase().as_str() {
        "nan" => Some(f64::NAN),
        "inf" | "+inf" | "infinity" | "+infinity" => Some(f64::INFINITY),
        "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
        _ => s.parse::<f64>().ok().filter(|v| v.is_finite()),
    }
}

/// Result of ingesting one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub processed: usize,
    pub skipped: usize,
    pub timestamp: DateTime<Utc>,
}

/// Validate and store a batch of raw items for one source.
///
/// Every accepted item shares the single `timestamp` captured for the batch.
pub fn ingest_batch(
    registry: &MetricsRegistry,
    source: &str,
    job: &str,
    items: &[Value],
    timestamp: DateTime<Utc>,
) -> IngestOutcome {
    let mut processed = 0;
    let mut skipped = 0;

    for (index, item) in items.iter().enumerate() {
        match MetricDescriptor::from_value(item) {
            Ok(descriptor) => {
                debug!(
                    device_serial = %source,
                    metric = %descriptor.name,
                    value = descriptor.value,
                    "Accepted metric"
                );
                registry.upsert(descriptor.into_sample(source, job, timestamp));
                processed += 1;
            }
            Err(e) => {
                warn!(device_serial = %source, index, error = %e, "Skipping invalid metric");
                skipped += 1;
            }
        }
    }

    IngestOutcome {
        processed,
        skipped,
        timestamp,
    }
}
