//! Prometheus text exposition encoder.
//!
//! Renders a registry snapshot in the line-oriented text format scraped by
//! Prometheus. Expiry is checked again at encode time, so a snapshot that
//! went stale between capture and encoding never leaks expired series.

use std::fmt::Write;

use chrono::{DateTime, Utc};

use super::registry::{MetricFamily, RegistrySnapshot};
use super::sample::Sample;

/// Content type of the exposition output.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Prometheus text format encoder.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusExporter;

impl PrometheusExporter {
    pub fn new() -> Self {
        Self
    }

    /// Encode every sample of `snapshot` still live at `now`.
    ///
    /// An empty result is the empty string; otherwise the output ends with a
    /// newline.
    pub fn export(&self, snapshot: &RegistrySnapshot, now: DateTime<Utc>) -> String {
        let mut output = String::new();

        for family in &snapshot.families {
            let live: Vec<&Sample> = family
                .samples
                .iter()
                .filter(|s| !s.is_expired(now, snapshot.ttl))
                .collect();
            if live.is_empty() {
                continue;
            }
            self.write_family(&mut output, family, &live);
        }

        output
    }

    fn write_family(&self, output: &mut String, family: &MetricFamily, samples: &[&Sample]) {
        if !family.help.is_empty() {
            let help = escape_help(&family.help);
            let _ = writeln!(output, "# HELP {} {}", family.name, help);
        }
        let _ = writeln!(output, "# TYPE {} {}", family.name, family.kind);

        for sample in samples {
            self.write_sample(output, &family.name, sample);
        }
    }

    fn write_sample(&self, output: &mut String, name: &str, sample: &Sample) {
        output.push_str(name);

        if !sample.labels.is_empty() {
            let labels_str = sample
                .labels
                .iter()
                .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
                .collect::<Vec<_>>()
                .join(",");
            output.push('{');
            output.push_str(&labels_str);
            output.push('}');
        }

        let _ = writeln!(
            output,
            " {} {}",
            format_value(sample.value),
            sample.timestamp_millis()
        );
    }
}

/// Format a sample value the way Prometheus parses it.
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else {
        value.to_string()
    }
}

fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}
