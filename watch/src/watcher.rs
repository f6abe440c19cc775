//! # Scrape Scheduler
//!
//! One [`Watcher`] per configured server. It owns three independent loops:
//!
//! ```text
//! watch_metrics   every metrics_scrape_interval (1m)
//!   └─ for each target: scrape_metrics ─► SegmentCollector
//!                       scrape_profile ─► Converter ─► ProfileSink
//! watch_market    every market_scrape_interval (4h)
//!   └─ for each market: market_stats ─► MarketGauges
//! watch_websocket until cancelled
//!   └─ ScreepsSocket::run
//! ```
//!
//! Rate limits are per resource class and shared by the loops through the
//! client's [`RateLimiter`](crate::ratelimit::RateLimiter). A blocked class
//! skips whole ticks; the ticker keeps its cadence.
//!
//! A failing target is logged and never stops the others.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use log::{debug, error, info, warn};
use prometheus::Registry;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::client::ApiClient;
use crate::config::{MarketTarget, ServerOptions};
use crate::domain::{ConfigError, ResourceClass, ScrapeError, SegmentId};
use crate::market::MarketGauges;
use crate::metrics::collector::{SegmentCollector, SEGMENT_KIND_PROFILE};
use crate::profiling::{parse_profile_nodes, profile_name, Converter, ProfileSink};
use crate::ratelimit::RateLimiter;
use crate::socket::{ConsoleHook, ScreepsSocket};

/// Namespace of segment metrics
pub const MEMORY_NAMESPACE: &str = "screeps_memory";

/// One shard's metric and profile segments.
pub struct WatchTarget {
    pub shard: String,
    pub metrics_segment: Option<SegmentId>,
    pub profile_segment: Option<SegmentId>,
    collector: SegmentCollector,
}

impl WatchTarget {
    pub fn collector(&self) -> &SegmentCollector {
        &self.collector
    }
}

/// Result of one successful scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeOutcome {
    /// Metric samples or profile samples
    pub count: usize,
    pub raw_size: usize,
    pub decoded_size: usize,
}

pub struct Watcher {
    name: String,
    client: ApiClient,
    targets: Vec<WatchTarget>,
    markets: Vec<MarketTarget>,
    market_gauges: Option<MarketGauges>,
    socket: Option<ScreepsSocket>,
    profile_sink: Option<Arc<dyn ProfileSink>>,
    min_self_cost_nanos: Option<i64>,
    metrics_interval: Duration,
    market_interval: Duration,
}

impl Watcher {
    /// Build a watcher and register its metrics in `registry`.
    ///
    /// # Errors
    /// Returns `ConfigError` for an invalid server entry or metrics that
    /// clash with ones already registered.
    pub fn new(opts: &ServerOptions, registry: &Registry) -> Result<Self, ConfigError> {
        let base = opts.base_url()?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("screeps-watch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ConfigError::Pusher)?;
        let client =
            ApiClient::new(base, http, opts.auth_method(), Arc::new(RateLimiter::new()));

        let server_labels = HashMap::from([
            ("username".to_string(), opts.username.clone()),
            ("server".to_string(), opts.name.clone()),
        ]);

        let mut targets = Vec::with_capacity(opts.targets.len());
        for target in &opts.targets {
            let shard = target.shard().to_string();
            let mut labels: BTreeMap<String, String> =
                server_labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            labels.insert("shard".to_string(), shard.clone());
            labels.extend(target.constant_labels.clone());

            let collector = SegmentCollector::new(MEMORY_NAMESPACE, labels)?;
            registry.register(Box::new(collector.clone())).map_err(|source| {
                ConfigError::Registration { what: format!("target shard={shard:?}"), source }
            })?;

            targets.push(WatchTarget {
                shard,
                metrics_segment: target.metrics_segment(),
                profile_segment: target.profile_segment(),
                collector,
            });
        }

        let market_gauges = if opts.markets.is_empty() {
            None
        } else {
            Some(MarketGauges::register(registry, &server_labels)?)
        };

        let socket = if opts.websocket_channels.is_empty() {
            None
        } else {
            Some(ScreepsSocket::new(
                client.clone(),
                opts.websocket_channels.clone(),
                registry,
                &server_labels,
            )?)
        };

        Ok(Self {
            name: opts.name.clone(),
            client,
            targets,
            markets: opts.markets.clone(),
            market_gauges,
            socket,
            profile_sink: None,
            min_self_cost_nanos: opts.profile_min_self_cost_ns.filter(|&nanos| nanos > 0),
            metrics_interval: opts.metrics_interval(),
            market_interval: opts.market_interval(),
        })
    }

    #[must_use]
    pub fn with_profile_sink(mut self, sink: Arc<dyn ProfileSink>) -> Self {
        self.profile_sink = Some(sink);
        self
    }

    #[must_use]
    pub fn with_console_hook(mut self, hook: ConsoleHook) -> Self {
        self.socket = self.socket.map(|socket| socket.with_console_hook(hook));
        self
    }

    /// Wait between websocket sessions, 10s unless set.
    #[must_use]
    pub fn with_socket_backoff(mut self, backoff: Duration) -> Self {
        self.socket = self.socket.map(|socket| socket.with_backoff(backoff));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn targets(&self) -> &[WatchTarget] {
        &self.targets
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Start the three loops. They stop when `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        let metrics = {
            let watcher = Arc::clone(&self);
            let cancel = cancel.clone();
            tokio::spawn(async move { watcher.watch_metrics(cancel).await })
        };
        let market = {
            let watcher = Arc::clone(&self);
            let cancel = cancel.clone();
            tokio::spawn(async move { watcher.watch_market(cancel).await })
        };
        let websocket = {
            let cancel = cancel.clone();
            tokio::spawn(async move { self.watch_websocket(cancel).await })
        };
        vec![metrics, market, websocket]
    }

    // ========================================================================
    // Memory segments
    // ========================================================================

    pub async fn watch_metrics(&self, cancel: CancellationToken) {
        let mut ticker = interval(self.metrics_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                () = cancel.cancelled() => return,
                () = self.scrape_targets() => {}
            }
        }
    }

    /// One round over all targets.
    pub async fn scrape_targets(&self) {
        for target in &self.targets {
            if self.skip_blocked(ResourceClass::MemorySegment) {
                return;
            }

            let metrics = match target.metrics_segment {
                Some(segment) => self
                    .scrape_metrics(target, segment)
                    .await
                    .map_err(|err| self.log_failure("metrics", target, segment, &err))
                    .ok(),
                None => None,
            };
            // The metrics poll may have just hit the rate limit
            let profile = match target.profile_segment {
                Some(_) if self.skip_blocked(ResourceClass::MemorySegment) => None,
                Some(segment) => self
                    .scrape_profile(target, segment)
                    .await
                    .map_err(|err| self.log_failure("profile", target, segment, &err))
                    .ok(),
                None => None,
            };

            info!(
                "scrape target complete server={} shard={} metrics_segment={} metric_count={} \
                 metric_segment_size={} profile_segment={} profile_count={} profile_segment_size={}",
                self.name,
                target.shard,
                Field(target.metrics_segment),
                Field(metrics.map(|m| m.count)),
                Field(metrics.map(|m| m.raw_size)),
                Field(target.profile_segment),
                Field(profile.map(|p| p.count)),
                Field(profile.map(|p| p.raw_size)),
            );
        }
    }

    /// Fetch the stats segment and replace the target's published samples.
    ///
    /// # Errors
    /// Any fetch, decode or parse failure; the previous samples stay.
    pub async fn scrape_metrics(
        &self,
        target: &WatchTarget,
        segment: SegmentId,
    ) -> Result<ScrapeOutcome, ScrapeError> {
        let fetch = self.client.memory_segment(segment, &target.shard).await?;
        let count = target.collector.set_metric_memory(&fetch.decoded)?;
        Ok(ScrapeOutcome { count, raw_size: fetch.raw_size, decoded_size: fetch.decoded.len() })
    }

    /// Fetch the profile segment, convert it and push it to the sink.
    ///
    /// # Errors
    /// Any fetch, decode, parse or push failure.
    pub async fn scrape_profile(
        &self,
        target: &WatchTarget,
        segment: SegmentId,
    ) -> Result<ScrapeOutcome, ScrapeError> {
        let fetch = self.client.memory_segment(segment, &target.shard).await?;
        target.collector.record_segment_size(SEGMENT_KIND_PROFILE, fetch.decoded.len());

        let ticks = parse_profile_nodes(&fetch.decoded)?;
        let mut converter = Converter::new(SystemTime::now());
        if let Some(nanos) = self.min_self_cost_nanos {
            converter = converter.with_min_self_cost(nanos);
        }
        let artifact = converter.convert(&ticks);

        let name = profile_name(&self.name, &target.shard);
        match &self.profile_sink {
            Some(sink) => sink.push(&name, &artifact).await?,
            None => debug!("No profiling backend configured, dropping profile {name}"),
        }

        Ok(ScrapeOutcome {
            count: artifact.samples().len(),
            raw_size: fetch.raw_size,
            decoded_size: fetch.decoded.len(),
        })
    }

    fn log_failure(&self, kind: &str, target: &WatchTarget, segment: SegmentId, err: &ScrapeError) {
        error!(
            "Failed to scrape {kind} segment server={} shard={} segment={segment} class={}: {err}",
            self.name,
            target.shard,
            ResourceClass::MemorySegment,
        );
    }

    fn skip_blocked(&self, class: ResourceClass) -> bool {
        let limiter = self.client.limiter();
        if !limiter.is_blocked(class, SystemTime::now()) {
            return false;
        }
        let reset = limiter
            .blocked_until(class)
            .and_then(|until| until.duration_since(SystemTime::now()).ok())
            .unwrap_or_default();
        warn!(
            "Rate limit hit, skipping scrape server={} class={class} reset_in={}s",
            self.name,
            reset.as_secs()
        );
        true
    }

    // ========================================================================
    // Market
    // ========================================================================

    pub async fn watch_market(&self, cancel: CancellationToken) {
        let Some(gauges) = &self.market_gauges else {
            info!("No market targets configured for server {}, skipping market scrape", self.name);
            return;
        };

        let mut ticker = interval(self.market_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                () = cancel.cancelled() => return,
                () = self.scrape_markets(gauges) => {}
            }
        }
    }

    async fn scrape_markets(&self, gauges: &MarketGauges) {
        for market in &self.markets {
            if self.skip_blocked(ResourceClass::Market) {
                return;
            }
            let stats = self
                .client
                .market_stats(&market.resource_type, Some(&market.shard))
                .await
                .and_then(|response| Ok(response.today(Utc::now().date_naive())?.clone()));
            match stats {
                Ok(stats) => gauges.set(&stats, &market.shard),
                Err(err) => error!(
                    "Failed to scrape market server={} resource_type={} shard={} class={}: {err}",
                    self.name,
                    market.resource_type,
                    market.shard,
                    ResourceClass::Market,
                ),
            }
        }
        info!("scrape markets complete server={}", self.name);
    }

    // ========================================================================
    // Websocket
    // ========================================================================

    pub async fn watch_websocket(&self, cancel: CancellationToken) {
        match &self.socket {
            Some(socket) => socket.run(cancel).await,
            None => info!("No websocket channels configured for server {}, skipping", self.name),
        }
    }
}

/// Optional log field, `-` when absent.
struct Field<T>(Option<T>);

impl<T: fmt::Display> fmt::Display for Field<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(value) => value.fmt(f),
            None => f.write_str("-"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WatchConfig;

    fn options(extra: &str) -> ServerOptions {
        let yaml = format!(
            "servers:\n  - name: mmo\n    url: http://127.0.0.1:1\n    username: me\n    token: t\n\
             \x20   targets:\n      - {{ shard: shard0, metrics_segment: 1 }}\n      - {{ metrics_segment: 2 }}\n{extra}"
        );
        WatchConfig::from_yaml_str(&yaml).unwrap().servers.remove(0)
    }

    #[test]
    fn test_targets() {
        let registry = Registry::new();
        let watcher = Watcher::new(&options(""), &registry).unwrap();
        assert_eq!(watcher.name(), "mmo");
        let shards: Vec<&str> = watcher.targets().iter().map(|t| t.shard.as_str()).collect();
        assert_eq!(shards, vec!["shard0", "none"]);
        assert_eq!(watcher.targets()[1].metrics_segment, Some(SegmentId(2)));
        assert!(watcher.socket.is_none());
        assert!(watcher.market_gauges.is_none());
    }

    #[test]
    fn test_optional_loops_register_metrics() {
        let registry = Registry::new();
        let opts = options(
            "    websocket_channels: [console, cpu]\n    markets:\n      - { resource_type: energy }\n",
        );
        let watcher = Watcher::new(&opts, &registry).unwrap();
        assert!(watcher.socket.is_some());
        assert!(watcher.market_gauges.is_some());

        // Same server twice clashes on the server level gauges
        assert!(Watcher::new(&opts, &registry).is_err());
    }

    #[test]
    fn test_field_display() {
        assert_eq!(Field(Some(3)).to_string(), "3");
        assert_eq!(Field::<u32>(None).to_string(), "-");
    }
}
