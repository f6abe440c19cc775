//! Per-target metrics sink exposed through a Prometheus registry.
//!
//! The scrape task is the only writer: each successful scrape swaps in a new
//! [`MetricSet`] wholesale. The exporter reads whatever snapshot is current
//! while it renders, so it never observes a half-updated segment.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use log::warn;
use once_cell::sync::Lazy;
use prometheus::core::{Collector, Desc};
use prometheus::proto::{self, LabelPair, Metric, MetricFamily, MetricType};
use prometheus::{Gauge, GaugeVec, Opts};
use regex::Regex;

use super::extract::{extract, sample_count, MetricSample, MetricSet};
use crate::domain::{ConfigError, ParseError};

static METRIC_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").expect("metric name pattern is valid"));
static LABEL_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("label name pattern is valid"));

const SEGMENT_HELP: &str = "Metric from screeps memory segment.";

/// Segment kind label on `watcher_segment_size`
pub const SEGMENT_KIND_METRICS: &str = "metrics";
pub const SEGMENT_KIND_PROFILE: &str = "profile";

/// Metrics sink for one watch target.
///
/// Cheap to clone: clones share the same snapshot and gauges, so one clone
/// can be registered while the scrape task keeps another.
#[derive(Clone)]
pub struct SegmentCollector {
    inner: Arc<Inner>,
}

struct Inner {
    namespace: String,
    const_labels: BTreeMap<String, String>,
    samples: ArcSwap<MetricSet>,
    metric_count: Gauge,
    segment_size: GaugeVec,
    last_updated: Gauge,
    now: fn() -> SystemTime,
}

impl SegmentCollector {
    /// Create a sink whose exposed metrics all carry `const_labels`.
    ///
    /// # Errors
    /// Returns `ConfigError::Registration` when a label name is invalid.
    pub fn new(
        namespace: &str,
        const_labels: BTreeMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let labels: HashMap<String, String> =
            const_labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let opts = |name: &str, help: &str| {
            Opts::new(name, help)
                .namespace(namespace)
                .subsystem("watcher")
                .const_labels(labels.clone())
        };
        let registration = |source| ConfigError::Registration {
            what: format!("{namespace} segment collector"),
            source,
        };

        let metric_count =
            Gauge::with_opts(opts("metric_count", "Number of metrics in the memory segment."))
                .map_err(registration)?;
        let segment_size =
            GaugeVec::new(opts("segment_size", "Size of the memory segment in bytes."), &["type"])
                .map_err(registration)?;
        let last_updated = Gauge::with_opts(opts(
            "last_updated_unix_s",
            "Timestamp in unix seconds of the last memory update.",
        ))
        .map_err(registration)?;

        Ok(Self {
            inner: Arc::new(Inner {
                namespace: namespace.to_string(),
                const_labels,
                samples: ArcSwap::from_pointee(MetricSet::new()),
                metric_count,
                segment_size,
                last_updated,
                now: SystemTime::now,
            }),
        })
    }

    /// Replace the clock used for `last_updated_unix_s`. Only valid before
    /// the collector is shared.
    #[must_use]
    pub fn with_clock(mut self, now: fn() -> SystemTime) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.now = now;
        }
        self
    }

    /// Extract the decoded metrics segment and publish it.
    ///
    /// On a parse failure the previous snapshot stays in place.
    ///
    /// # Errors
    /// Returns `ParseError` when the decoded segment is not a JSON object.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_metric_memory(&self, decoded: &[u8]) -> Result<usize, ParseError> {
        self.record_segment_size(SEGMENT_KIND_METRICS, decoded.len());

        let metrics = extract(decoded)?;
        let count = sample_count(&metrics);

        let updated = (self.inner.now)()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.inner.metric_count.set(count as f64);
        self.inner.last_updated.set(updated as f64);
        self.inner.samples.store(Arc::new(metrics));
        Ok(count)
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn record_segment_size(&self, kind: &str, bytes: usize) {
        self.inner.segment_size.with_label_values(&[kind]).set(bytes as f64);
    }

    /// Current published samples.
    pub fn snapshot(&self) -> Arc<MetricSet> {
        self.inner.samples.load_full()
    }

    fn family(&self, name: &str, samples: &[MetricSample]) -> Option<MetricFamily> {
        let full_name = format!("{}_{name}", self.inner.namespace);
        if !METRIC_NAME.is_match(&full_name) {
            warn!("Skipping segment metric with invalid name {full_name:?}");
            return None;
        }

        let mut family = MetricFamily::default();
        family.set_name(full_name);
        family.set_help(SEGMENT_HELP.to_string());
        family.set_field_type(MetricType::GAUGE);

        for sample in samples {
            match self.metric(sample) {
                Some(metric) => family.mut_metric().push(metric),
                None => warn!(
                    "Skipping segment metric {name:?} with invalid labels {:?}",
                    sample.labels
                ),
            }
        }

        if family.get_metric().is_empty() {
            None
        } else {
            Some(family)
        }
    }

    fn metric(&self, sample: &MetricSample) -> Option<Metric> {
        let mut labels = self.inner.const_labels.clone();
        for (key, value) in &sample.labels {
            if !LABEL_NAME.is_match(key) || key.starts_with("__") {
                return None;
            }
            // A segment label may never shadow a target label
            if self.inner.const_labels.contains_key(key) {
                return None;
            }
            labels.insert(key.clone(), value.clone());
        }

        let mut metric = Metric::default();
        for (key, value) in labels {
            let mut pair = LabelPair::default();
            pair.set_name(key);
            pair.set_value(value);
            metric.mut_label().push(pair);
        }

        // Truncated so repeated renders of the same segment are stable
        let mut gauge = proto::Gauge::default();
        gauge.set_value((sample.value * 10_000.0).trunc() / 10_000.0);
        metric.set_gauge(gauge);
        Some(metric)
    }
}

impl Collector for SegmentCollector {
    fn desc(&self) -> Vec<&Desc> {
        let mut descs = self.inner.metric_count.desc();
        descs.extend(self.inner.segment_size.desc());
        descs.extend(self.inner.last_updated.desc());
        descs
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let snapshot = self.inner.samples.load();
        let mut families: Vec<MetricFamily> = snapshot
            .iter()
            .filter_map(|(name, samples)| self.family(name, samples))
            .collect();

        families.extend(self.inner.last_updated.collect());
        families.extend(self.inner.segment_size.collect());
        families.extend(self.inner.metric_count.collect());
        families
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, Registry, TextEncoder};
    use std::time::Duration;

    fn fixed_clock() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_609_459_200)
    }

    fn collector() -> SegmentCollector {
        let labels =
            BTreeMap::from([("shard".to_string(), "shard3".to_string())]);
        SegmentCollector::new("test", labels).unwrap().with_clock(fixed_clock)
    }

    fn render(registry: &Registry) -> String {
        let mut out = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_set_metric_memory_replaces_snapshot() {
        let collector = collector();
        assert_eq!(collector.set_metric_memory(br#"{"cpu":{"bucket":3,"used":1.5}}"#).unwrap(), 2);
        assert_eq!(collector.snapshot().len(), 2);

        assert_eq!(collector.set_metric_memory(br#"{"gcl":{"level":8}}"#).unwrap(), 1);
        let snapshot = collector.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key("gcl_level"));
    }

    #[test]
    fn test_parse_failure_keeps_previous_snapshot() {
        let collector = collector();
        collector.set_metric_memory(br#"{"cpu":{"bucket":3}}"#).unwrap();
        assert!(collector.set_metric_memory(b"garbage").is_err());
        assert!(collector.snapshot().contains_key("cpu_bucket"));
    }

    #[test]
    fn test_exposition() {
        let collector = collector();
        collector
            .set_metric_memory(br#"{"cpu":{"bucket":3,"used{kind=creeps}":1.234567}}"#)
            .unwrap();

        let registry = Registry::new();
        registry.register(Box::new(collector.clone())).unwrap();
        let text = render(&registry);

        assert!(text.contains("test_cpu_bucket{shard=\"shard3\"} 3"), "{text}");
        assert!(text.contains("test_cpu_used{kind=\"creeps\",shard=\"shard3\"} 1.2345"), "{text}");
        assert!(text.contains("test_watcher_metric_count{shard=\"shard3\"} 2"), "{text}");
        assert!(text.contains("test_watcher_last_updated_unix_s{shard=\"shard3\"} 1609459200"));
        assert!(text.contains("test_watcher_segment_size{shard=\"shard3\",type=\"metrics\"}"));
    }

    #[test]
    fn test_invalid_names_are_skipped() {
        let collector = collector();
        collector
            .set_metric_memory(br#"{"bad-name":{"x":1},"ok":{"x{bad-label=1}":2,"y":3}}"#)
            .unwrap();

        let registry = Registry::new();
        registry.register(Box::new(collector)).unwrap();
        let text = render(&registry);

        assert!(!text.contains("bad"), "{text}");
        assert!(text.contains("test_ok_y{shard=\"shard3\"} 3"), "{text}");
    }

    #[test]
    fn test_label_clashing_with_target_label_is_skipped() {
        let collector = collector();
        collector
            .set_metric_memory(br#"{"cpu":{"used{shard=shard0}":1,"bucket":3}}"#)
            .unwrap();

        let registry = Registry::new();
        registry.register(Box::new(collector)).unwrap();
        let text = render(&registry);

        assert!(!text.contains("test_cpu_used"), "{text}");
        assert!(!text.contains("shard0"), "{text}");
        assert!(text.contains("test_cpu_bucket{shard=\"shard3\"} 3"), "{text}");
    }

    #[test]
    fn test_targets_with_distinct_labels_register_together() {
        let registry = Registry::new();
        for shard in ["shard0", "shard1"] {
            let labels = BTreeMap::from([("shard".to_string(), shard.to_string())]);
            let collector = SegmentCollector::new("test", labels).unwrap();
            registry.register(Box::new(collector)).unwrap();
        }
    }
}
