//! Threshold configuration and classification.

use std::time::Duration;

use serde::Serialize;

use crate::error::{Error, Result};

/// Upper and lower bounds for one utilization percentage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricBounds {
    /// Values at or above this signal overload.
    pub high: f64,
    /// Values at or below this signal an idle or broken device.
    pub low: f64,
}

/// Which side of the bounds a value fell on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Breach {
    High,
    Low,
}

impl MetricBounds {
    pub const fn new(high: f64, low: f64) -> Self {
        Self { high, low }
    }

    /// Classify a value; `None` when it lies strictly between the bounds.
    pub fn classify(&self, value: f64) -> Option<Breach> {
        if value >= self.high {
            Some(Breach::High)
        } else if value <= self.low {
            Some(Breach::Low)
        } else {
            None
        }
    }

    /// The bound a breach was measured against.
    pub fn threshold_for(&self, breach: Breach) -> f64 {
        match breach {
            Breach::High => self.high,
            Breach::Low => self.low,
        }
    }

    fn validate(&self, what: &str) -> Result<()> {
        if !self.high.is_finite() || !self.low.is_finite() {
            return Err(Error::config(format!("{what} thresholds must be finite")));
        }
        if self.low >= self.high {
            return Err(Error::config(format!(
                "{what} low threshold ({}) must be below the high threshold ({})",
                self.low, self.high
            )));
        }
        Ok(())
    }
}

/// Thresholds and windows used by the replacement evaluator.
///
/// The degraded registry fallback applies the same bounds as the windowed
/// averages.
#[derive(Debug, Clone)]
pub struct ThresholdConfig {
    pub cpu: MetricBounds,
    pub memory: MetricBounds,
    /// Averaging window for the time-series query.
    pub window: Duration,
    /// Maximum sample age considered by the registry fallback.
    pub fallback_window: Duration,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            cpu: MetricBounds::new(80.0, 5.0),
            memory: MetricBounds::new(85.0, 10.0),
            window: Duration::from_secs(10 * 60),
            fallback_window: Duration::from_secs(2 * 60),
        }
    }
}

impl ThresholdConfig {
    pub fn validate(&self) -> Result<()> {
        self.cpu.validate("CPU")?;
        self.memory.validate("Memory")?;
        if self.window.as_secs() < 60 {
            return Err(Error::config("analysis window must be at least one minute"));
        }
        if self.fallback_window.is_zero() {
            return Err(Error::config("fallback window must be positive"));
        }
        Ok(())
    }

    pub fn window_minutes(&self) -> u64 {
        self.window.as_secs() / 60
    }

    pub fn summary(&self) -> ThresholdSummary {
        ThresholdSummary {
            cpu_high: self.cpu.high,
            cpu_low: self.cpu.low,
            memory_high: self.memory.high,
            memory_low: self.memory.low,
        }
    }
}

/// Thresholds echoed back in evaluation results.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdSummary {
    pub cpu_high: f64,
    pub cpu_low: f64,
    pub memory_high: f64,
    pub memory_low: f64,
}
