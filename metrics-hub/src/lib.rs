//! metrics-hub: a push-model metrics collector.
//!
//! Devices POST batches of samples, which are held in memory for a fixed
//! TTL and re-exposed for Prometheus to scrape. A device replacement check
//! classifies devices from windowed CPU and memory averages.

pub mod analysis;
pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod utils;

pub use error::{Error, Result};
