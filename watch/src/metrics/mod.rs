//! Stats segment metrics
//!
//! - `extract`: flatten decoded segment JSON into labeled samples
//! - `collector`: per-target sink that publishes the latest samples to Prometheus

pub mod collector;
pub mod extract;

pub use collector::SegmentCollector;
pub use extract::{extract, MetricSample, MetricSet};
