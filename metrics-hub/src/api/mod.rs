//! HTTP API.
//!
//! Ingestion, Prometheus scraping, health/status and the device
//! replacement check.

pub mod error;
pub mod models;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};
