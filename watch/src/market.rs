//! Market history stats.
//!
//! `GET /api/game/market/stats` returns roughly two weeks of daily summaries
//! per resource. Only today's entry is exported; older days never change.

use std::collections::HashMap;

use chrono::NaiveDate;
use prometheus::{GaugeVec, Opts, Registry};
use serde::Deserialize;

use crate::domain::{ConfigError, ParseError};

/// Envelope of `/api/game/market/stats`.
#[derive(Debug, Clone, Deserialize)]
pub struct StatsResponse {
    #[serde(default)]
    pub ok: i64,
    #[serde(default)]
    pub stats: Vec<Stats>,
}

/// One day of one resource.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    #[serde(rename = "_id", default)]
    pub id: String,
    pub resource_type: String,
    /// `YYYY-MM-DD`, server time (UTC)
    pub date: String,
    #[serde(default)]
    pub transactions: i64,
    #[serde(default)]
    pub volume: i64,
    #[serde(default)]
    pub avg_price: f64,
    #[serde(default)]
    pub stddev_price: f64,
}

impl Stats {
    pub fn day(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.date, "%Y-%m-%d").ok()
    }
}

/// # Errors
/// Returns `ParseError::Json` for malformed bodies and `ParseError::NotOk`
/// when the server reports `ok != 1`.
pub fn parse_market_response(data: &[u8]) -> Result<StatsResponse, ParseError> {
    let response: StatsResponse = serde_json::from_slice(data)?;
    if response.ok != 1 {
        return Err(ParseError::NotOk(response.ok));
    }
    Ok(response)
}

impl StatsResponse {
    /// Entry for `today`. Entries with unparseable dates are skipped.
    ///
    /// # Errors
    /// Returns `ParseError::NoStatsForToday` when no entry matches.
    pub fn today(&self, today: NaiveDate) -> Result<&Stats, ParseError> {
        self.stats
            .iter()
            .find(|stat| stat.day() == Some(today))
            .ok_or_else(|| ParseError::NoStatsForToday(today.format("%Y-%m-%d").to_string()))
    }
}

/// Daily market gauges for one server, labeled by resource and shard.
pub struct MarketGauges {
    avg_price: GaugeVec,
    std_dev_price: GaugeVec,
    transaction_count: GaugeVec,
    volume: GaugeVec,
}

impl MarketGauges {
    /// Create and register the gauges.
    ///
    /// # Errors
    /// Returns `ConfigError::Registration` when the gauges clash with
    /// existing ones in `registry`.
    pub fn register(
        registry: &Registry,
        const_labels: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let registration =
            |source| ConfigError::Registration { what: "market gauges".to_string(), source };
        let gauge = |name: &str, help: &str| -> Result<GaugeVec, ConfigError> {
            let opts = Opts::new(name, help)
                .namespace("screeps")
                .subsystem("market")
                .const_labels(const_labels.clone());
            let gauge = GaugeVec::new(opts, &["resource_type", "shard"]).map_err(registration)?;
            registry.register(Box::new(gauge.clone())).map_err(registration)?;
            Ok(gauge)
        };

        Ok(Self {
            avg_price: gauge("resource_daily_avg_price", "Average price of the resource for the day")?,
            std_dev_price: gauge(
                "resource_daily_std_dev_price",
                "Standard Deviation of the resource for the day",
            )?,
            transaction_count: gauge(
                "resource_daily_transaction_count",
                "Total transactions for the day",
            )?,
            volume: gauge("resource_daily_volume", "Total volume")?,
        })
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn set(&self, stats: &Stats, shard: &str) {
        let labels = [stats.resource_type.as_str(), shard];
        self.avg_price.with_label_values(&labels).set(stats.avg_price);
        self.std_dev_price.with_label_values(&labels).set(stats.stddev_price);
        self.transaction_count.with_label_values(&labels).set(stats.transactions as f64);
        self.volume.with_label_values(&labels).set(stats.volume as f64);
    }
}
