//! API request and response models (DTOs).
//!
//! # Model Categories
//!
//! - **Ingestion**: metric batches pushed by agents
//! - **Health**: liveness and registry status

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Ingestion
// ============================================================================

/// Batch of metrics pushed by one agent.
///
/// # Request Format
///
/// ```json
/// {
///     "device_serial": "DEV-1",
///     "job": "device-metrics",
///     "metrics": [
///         {
///             "name": "total_cpu_usage_percent",
///             "value": 42.5,
///             "labels": {},
///             "help": "...",
///             "type": "gauge"
///         }
///     ]
/// }
/// ```
///
/// Items stay untyped here; each one is validated on its own so a bad item
/// does not reject the batch.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub device_serial: Option<String>,
    #[serde(default)]
    pub job: Option<String>,
    pub metrics: Vec<serde_json::Value>,
}

/// Result of an ingestion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub status: String,
    pub processed_metrics: usize,
    pub skipped_metrics: usize,
    pub device_serial: String,
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Health
// ============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    /// Live samples across all metric names.
    pub metrics_count: usize,
    pub version: String,
    pub uptime_secs: u64,
}

/// Detailed registry status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub metrics_by_name: BTreeMap<String, usize>,
    pub ttl_seconds: i64,
    pub total_metrics: usize,
    pub version: String,
    pub uptime_secs: u64,
}
