//! Flatten a stats segment into labeled samples.
//!
//! The bot writes a nested JSON object; every numeric leaf becomes one
//! sample named by its path. Any path level may carry labels inline:
//!
//! ```text
//! {"creeps": {"cpu{role=harvester,room=W1N1}": 1.25}}
//!     └──► creeps_cpu{role="harvester",room="W1N1"} 1.25
//! ```
//!
//! Labels are only parsed once, at the leaf, from the fully accumulated name.
//! The scrape interval is long so the cost does not matter.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

use crate::domain::ParseError;

static LABEL_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{[^}]*\}").expect("label pattern is valid"));

/// One numeric leaf of a stats segment.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

/// Samples grouped by their label-stripped name.
pub type MetricSet = BTreeMap<String, Vec<MetricSample>>;

/// Walk decoded segment JSON and collect every numeric leaf.
///
/// Non-object values at the top level are ignored.
///
/// # Errors
/// Returns `ParseError::Json` when the payload is not a JSON object.
pub fn extract(decoded: &[u8]) -> Result<MetricSet, ParseError> {
    let stats: Map<String, Value> = serde_json::from_slice(decoded)?;

    let mut metrics = MetricSet::new();
    for (key, value) in &stats {
        if let Value::Object(children) = value {
            walk(&mut metrics, key, children);
        }
    }
    Ok(metrics)
}

/// Total number of samples across all names.
pub fn sample_count(metrics: &MetricSet) -> usize {
    metrics.values().map(Vec::len).sum()
}

fn walk(out: &mut MetricSet, parent: &str, data: &Map<String, Value>) {
    let parent = parent.replace('.', "_");
    for (key, value) in data {
        let path = format!("{parent}_{key}");
        let value = match value {
            Value::Object(children) => {
                walk(out, &path, children);
                continue;
            }
            Value::Number(number) => match number.as_f64() {
                Some(value) => value,
                None => continue,
            },
            _ => continue,
        };

        let (name, labels) = split_labels(&path);
        out.entry(name.clone()).or_default().push(MetricSample { name, labels, value });
    }
}

/// Remove every `{k=v,...}` block from `path`, returning the bare name and
/// the union of the blocks' labels. Later blocks win on duplicate keys.
fn split_labels(path: &str) -> (String, BTreeMap<String, String>) {
    let mut labels = BTreeMap::new();
    for block in LABEL_BLOCK.find_iter(path) {
        let pairs = block.as_str().trim_start_matches('{').trim_end_matches('}');
        for pair in pairs.split(',') {
            let mut parts = pair.split('=');
            // Exactly one '=' or the pair is dropped
            if let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) {
                labels.insert(key.to_string(), value.to_string());
            }
        }
    }

    let name = LABEL_BLOCK.replace_all(path, "").into_owned();
    (name, labels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn only(metrics: &MetricSet, name: &str) -> MetricSample {
        let samples = &metrics[name];
        assert_eq!(samples.len(), 1, "expected one sample for {name}");
        samples[0].clone()
    }

    #[test]
    fn test_simple_leaf() {
        let metrics = extract(br#"{"a":{"b":5}}"#).unwrap();
        assert_eq!(metrics.len(), 1);
        let sample = only(&metrics, "a_b");
        assert!((sample.value - 5.0).abs() < f64::EPSILON);
        assert!(sample.labels.is_empty());
    }

    #[test]
    fn test_inline_labels() {
        let metrics = extract(br#"{"a":{"b{x=1,y=2}":5}}"#).unwrap();
        let sample = only(&metrics, "a_b");
        assert_eq!(sample.labels.len(), 2);
        assert_eq!(sample.labels["x"], "1");
        assert_eq!(sample.labels["y"], "2");
    }

    #[test]
    fn test_labels_accumulate_across_levels() {
        let metrics = extract(br#"{"room{name=W1N1}":{"creep{role=miner}":{"cpu":0.5}}}"#).unwrap();
        let sample = only(&metrics, "room_creep_cpu");
        assert_eq!(sample.labels["name"], "W1N1");
        assert_eq!(sample.labels["role"], "miner");
    }

    #[test]
    fn test_same_name_distinct_labels() {
        let metrics =
            extract(br#"{"creeps":{"cpu{name=a}":1,"cpu{name=b}":2,"cpu{name=c}":3}}"#).unwrap();
        assert_eq!(metrics["creeps_cpu"].len(), 3);
        assert_eq!(sample_count(&metrics), 3);
    }

    #[test]
    fn test_malformed_pairs_are_dropped() {
        let metrics = extract(br#"{"a":{"b{x=1,broken,y=2=3,}":5}}"#).unwrap();
        let sample = only(&metrics, "a_b");
        assert_eq!(sample.labels.len(), 1);
        assert_eq!(sample.labels["x"], "1");
    }

    #[test]
    fn test_dots_in_parent_become_underscores() {
        let metrics = extract(br#"{"gcl.level":{"progress":{"total":7}}}"#).unwrap();
        assert!(metrics.contains_key("gcl_level_progress_total"));
    }

    #[test]
    fn test_non_numeric_leaves_and_top_level_values_are_ignored() {
        let metrics =
            extract(br#"{"tick":123,"a":{"s":"text","t":true,"n":null,"l":[1],"ok":1.5}}"#).unwrap();
        assert_eq!(metrics.len(), 1);
        assert!(metrics.contains_key("a_ok"));
    }

    #[test]
    fn test_integer_widths() {
        let metrics = extract(br#"{"a":{"big":18446744073709551615,"neg":-4}}"#).unwrap();
        assert_eq!(sample_count(&metrics), 2);
        assert!((only(&metrics, "a_neg").value + 4.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_non_object_payload_is_a_parse_error() {
        assert!(extract(b"[1,2,3]").is_err());
        assert!(extract(b"{nope").is_err());
    }
}
