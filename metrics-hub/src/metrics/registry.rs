//! In-memory sample registry.
//!
//! Holds the latest sample of every series pushed by agents, grouped by
//! metric name. Every operation takes the same lock for the duration of the
//! map operation only; callers get owned copies back and never iterate the
//! live structure.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use super::sample::{LabelSet, MetricKind, Sample};

/// Default sample time-to-live (5 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default period of the expiry sweep (1 minute).
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for the registry and its cleanup sweep.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Age after which a sample is considered stale.
    pub ttl: Duration,
    /// Interval between expiry sweeps.
    pub cleanup_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

#[derive(Debug, Default)]
struct Family {
    help: String,
    kind: MetricKind,
    series: BTreeMap<LabelSet, Sample>,
}

/// All live samples sharing one metric name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricFamily {
    pub name: String,
    pub help: String,
    pub kind: MetricKind,
    pub samples: Vec<Sample>,
}

/// Point-in-time copy of the registry.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    pub taken_at: DateTime<Utc>,
    pub ttl: TimeDelta,
    pub families: Vec<MetricFamily>,
}

impl RegistrySnapshot {
    /// Total number of samples across all families.
    pub fn sample_count(&self) -> usize {
        self.families.iter().map(|f| f.samples.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }
}

/// Concurrent store of the current sample per (name, label set).
#[derive(Debug)]
pub struct MetricsRegistry {
    families: Mutex<BTreeMap<String, Family>>,
    ttl: TimeDelta,
}

impl MetricsRegistry {
    /// Create a registry whose samples expire after `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            families: Mutex::new(BTreeMap::new()),
            ttl: TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX),
        }
    }

    pub fn ttl(&self) -> TimeDelta {
        self.ttl
    }

    pub fn ttl_seconds(&self) -> i64 {
        self.ttl.num_seconds()
    }

    /// Insert a sample, replacing any sample with the same name and label set.
    ///
    /// The family's help text and kind follow the most recent sample.
    pub fn upsert(&self, sample: Sample) {
        let mut families = self.families.lock();
        let family = families.entry(sample.name.clone()).or_default();
        family.help.clone_from(&sample.help);
        family.kind = sample.kind;
        family.series.insert(sample.labels.clone(), sample);
    }

    /// Copy of every sample still live at `now`.
    pub fn snapshot(&self, now: DateTime<Utc>) -> RegistrySnapshot {
        let families = self.families.lock();
        let families = families
            .iter()
            .filter_map(|(name, family)| {
                let samples: Vec<Sample> = family
                    .series
                    .values()
                    .filter(|s| !s.is_expired(now, self.ttl))
                    .cloned()
                    .collect();
                (!samples.is_empty()).then(|| MetricFamily {
                    name: name.clone(),
                    help: family.help.clone(),
                    kind: family.kind,
                    samples,
                })
            })
            .collect();

        RegistrySnapshot {
            taken_at: now,
            ttl: self.ttl,
            families,
        }
    }

    /// Number of live samples per metric name; names with none are omitted.
    pub fn counts_by_name(&self, now: DateTime<Utc>) -> BTreeMap<String, usize> {
        let families = self.families.lock();
        families
            .iter()
            .filter_map(|(name, family)| {
                let live = family
                    .series
                    .values()
                    .filter(|s| !s.is_expired(now, self.ttl))
                    .count();
                (live > 0).then(|| (name.clone(), live))
            })
            .collect()
    }

    /// Number of live samples across all names.
    pub fn live_count(&self, now: DateTime<Utc>) -> usize {
        self.counts_by_name(now).values().sum()
    }

    /// Live samples of `name` whose `label` equals `value` and whose age is
    /// below `max_age`.
    ///
    /// Expired samples are never returned, even when `max_age` exceeds the
    /// TTL. Returned newest first.
    pub fn recent_samples(
        &self,
        name: &str,
        label: &str,
        value: &str,
        max_age: TimeDelta,
        now: DateTime<Utc>,
    ) -> Vec<Sample> {
        let mut samples: Vec<Sample> = {
            let families = self.families.lock();
            let Some(family) = families.get(name) else {
                return Vec::new();
            };
            family
                .series
                .values()
                .filter(|s| {
                    s.label(label) == Some(value)
                        && s.age(now) < max_age
                        && !s.is_expired(now, self.ttl)
                })
                .cloned()
                .collect()
        };
        samples.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        samples
    }

    /// Remove every sample expired at `now`, dropping names left empty.
    ///
    /// Returns the number of samples removed.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let mut families = self.families.lock();
        let mut evicted = 0;

        families.retain(|name, family| {
            let before = family.series.len();
            family.series.retain(|_, s| !s.is_expired(now, self.ttl));
            let removed = before - family.series.len();
            if removed > 0 {
                debug!(metric = %name, removed, "Evicted expired samples");
            }
            evicted += removed;
            !family.series.is_empty()
        });

        evicted
    }

    /// Number of stored samples, expired or not.
    pub fn len(&self) -> usize {
        self.families.lock().values().map(|f| f.series.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.families.lock().is_empty()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_upsert_replaces_same_series() {
        let registry = MetricsRegistry::default();
        let series = labels(&[("device_serial", "DEV-1")]);

        registry.upsert(Sample::new("cpu", 10.0, series.clone(), ts(100)));
        registry.upsert(Sample::new("cpu", 20.0, series, ts(110)));

        let snapshot = registry.snapshot(ts(120));
        assert_eq!(snapshot.families.len(), 1);
        assert_eq!(snapshot.families[0].samples.len(), 1);
        assert_eq!(snapshot.families[0].samples[0].value, 20.0);
        assert_eq!(snapshot.families[0].samples[0].timestamp, ts(110));
    }

    #[test]
    fn test_upsert_keeps_distinct_series() {
        let registry = MetricsRegistry::default();
        registry.upsert(Sample::new("cpu", 1.0, labels(&[("core", "0")]), ts(100)));
        registry.upsert(Sample::new("cpu", 2.0, labels(&[("core", "1")]), ts(100)));
        registry.upsert(Sample::new("cpu", 3.0, LabelSet::new(), ts(100)));

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.counts_by_name(ts(100)).get("cpu"), Some(&3));
    }

    #[test]
    fn test_family_metadata_follows_latest_sample() {
        let registry = MetricsRegistry::default();
        registry.upsert(Sample::new("m", 1.0, labels(&[("a", "1")]), ts(1)).with_help("old"));
        registry.upsert(
            Sample::new("m", 1.0, labels(&[("a", "2")]), ts(2))
                .with_help("new")
                .with_kind(MetricKind::Counter),
        );

        let snapshot = registry.snapshot(ts(3));
        assert_eq!(snapshot.families[0].help, "new");
        assert_eq!(snapshot.families[0].kind, MetricKind::Counter);
    }

    #[test]
    fn test_snapshot_excludes_expired() {
        let registry = MetricsRegistry::new(Duration::from_secs(60));
        registry.upsert(Sample::new("old", 1.0, LabelSet::new(), ts(0)));
        registry.upsert(Sample::new("new", 1.0, LabelSet::new(), ts(100)));

        let snapshot = registry.snapshot(ts(120));
        let names: Vec<&str> = snapshot.families.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["new"]);
        assert_eq!(snapshot.sample_count(), 1);
        // Still stored until a sweep runs.
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_evict_expired_drops_empty_names() {
        let registry = MetricsRegistry::new(Duration::from_secs(1));
        registry.upsert(Sample::new("cpu", 42.0, labels(&[("device_serial", "DEV-1")]), ts(0)));

        let evicted = registry.evict_expired(ts(2));
        assert_eq!(evicted, 1);
        assert!(registry.counts_by_name(ts(2)).get("cpu").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_evict_expired_is_idempotent() {
        let registry = MetricsRegistry::new(Duration::from_secs(10));
        registry.upsert(Sample::new("a", 1.0, labels(&[("k", "1")]), ts(0)));
        registry.upsert(Sample::new("a", 1.0, labels(&[("k", "2")]), ts(15)));
        registry.upsert(Sample::new("b", 1.0, LabelSet::new(), ts(15)));

        assert_eq!(registry.evict_expired(ts(20)), 1);
        let first = registry.snapshot(ts(20)).families;

        assert_eq!(registry.evict_expired(ts(20)), 0);
        let second = registry.snapshot(ts(20)).families;

        assert_eq!(first, second);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_counts_by_name_omits_fully_expired() {
        let registry = MetricsRegistry::new(Duration::from_secs(10));
        registry.upsert(Sample::new("stale", 1.0, LabelSet::new(), ts(0)));
        registry.upsert(Sample::new("fresh", 1.0, labels(&[("x", "1")]), ts(50)));
        registry.upsert(Sample::new("fresh", 1.0, labels(&[("x", "2")]), ts(50)));

        let counts = registry.counts_by_name(ts(55));
        assert_eq!(counts.len(), 1);
        assert_eq!(counts.get("fresh"), Some(&2));
        assert_eq!(registry.live_count(ts(55)), 2);
    }

    #[test]
    fn test_recent_samples_filters_by_label_and_age() {
        let registry = MetricsRegistry::default();
        registry.upsert(Sample::new(
            "mem",
            50.0,
            labels(&[("device_serial", "DEV-1"), ("job", "a")]),
            ts(100),
        ));
        registry.upsert(Sample::new(
            "mem",
            95.0,
            labels(&[("device_serial", "DEV-1"), ("job", "b")]),
            ts(200),
        ));
        registry.upsert(Sample::new(
            "mem",
            99.0,
            labels(&[("device_serial", "DEV-2")]),
            ts(200),
        ));

        let recent = registry.recent_samples(
            "mem",
            "device_serial",
            "DEV-1",
            TimeDelta::seconds(120),
            ts(210),
        );
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].value, 95.0);

        let recent = registry.recent_samples(
            "mem",
            "device_serial",
            "DEV-1",
            TimeDelta::seconds(60),
            ts(210),
        );
        assert_eq!(recent.len(), 1);

        let minute = TimeDelta::seconds(60);
        let other = registry.recent_samples("cpu", "device_serial", "DEV-1", minute, ts(210));
        assert!(other.is_empty());
    }

    #[test]
    fn test_recent_samples_skip_expired() {
        let registry = MetricsRegistry::new(Duration::from_secs(30));
        registry.upsert(Sample::new("mem", 95.0, labels(&[("device_serial", "DEV-1")]), ts(0)));

        // The lookback window is longer than the TTL.
        let window = TimeDelta::seconds(120);
        let at_ttl = registry.recent_samples("mem", "device_serial", "DEV-1", window, ts(30));
        assert_eq!(at_ttl.len(), 1);
        let past_ttl = registry.recent_samples("mem", "device_serial", "DEV-1", window, ts(31));
        assert!(past_ttl.is_empty());
    }

    #[test]
    fn test_concurrent_upserts_on_distinct_series() {
        let registry = Arc::new(MetricsRegistry::default());
        let now = Utc::now();

        let handles: Vec<_> = (0..32)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    let worker = i.to_string();
                    registry.upsert(Sample::new(
                        "cpu",
                        i as f64,
                        labels(&[("worker", worker.as_str())]),
                        now,
                    ));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = registry.snapshot(now);
        assert_eq!(snapshot.sample_count(), 32);
        for sample in &snapshot.families[0].samples {
            let worker: usize = sample.label("worker").unwrap().parse().unwrap();
            assert_eq!(sample.value, worker as f64);
        }
    }
}
