//! # screeps-watch - Screeps Telemetry Exporter
//!
//! screeps-watch polls a Screeps game server for the data a bot publishes
//! about itself and re-exposes it to standard observability tooling:
//! memory segment stats become Prometheus gauges, per-tick CPU cost trees
//! become pprof profiles pushed to Pyroscope, and console output from the
//! websocket feed lands in the process log.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Screeps Game Server                         │
//! │     HTTP API (/api/user/memory-segment, /api/game/market/..)    │
//! │     SockJS websocket (/socket/<n>/<id>/websocket)               │
//! └──────────┬──────────────────────────────────────┬───────────────┘
//!            │ polled segments                      │ pushed frames
//!            ▼                                      ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Watcher (one per server)                       │
//! │                                                                 │
//! │  ┌────────────┐   ┌─────────────┐   ┌──────────────────────┐    │
//! │  │  segment   │──▶│  metrics    │──▶│ SegmentCollector     │──┐ │
//! │  │  decode    │   │  extract    │   │ (ArcSwap snapshot)   │  │ │
//! │  └────────────┘   └─────────────┘   └──────────────────────┘  │ │
//! │        │                                                      │ │
//! │        ▼                                                      │ │
//! │  ┌────────────┐   ┌─────────────┐   ┌──────────────────────┐  │ │
//! │  │ profiling  │──▶│  Converter  │──▶│ ProfileSink          │  │ │
//! │  │ node parse │   │  + encode   │   │ (Pyroscope /ingest)  │  │ │
//! │  └────────────┘   └─────────────┘   └──────────────────────┘  │ │
//! │                                                               │ │
//! │  ┌────────────┐   ┌─────────────┐                             │ │
//! │  │ socket     │──▶│ console log │   RateLimiter shared by     │ │
//! │  │ protocol   │   │ cpu gauges  │──┐ every polling loop       │ │
//! │  └────────────┘   └─────────────┘  │                          │ │
//! └────────────────────────────────────┼──────────────────────────┼─┘
//!                                      ▼                          ▼
//!                          ┌──────────────────────────────────────────┐
//!                          │  prometheus::Registry  ──▶  GET /metrics │
//!                          └──────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! ### Ingestion
//!
//! - [`segment`]: memory segment envelope (`{"data": "gz:<base64>"}`)
//! - [`metrics`]: flatten stats JSON into labeled samples and publish them
//! - [`profiling`]: cost trees → flat pprof samples → Pyroscope
//! - [`market`]: daily market stats for configured resources
//!
//! ### Remote API
//!
//! - [`client`]: authenticated HTTP client for one server
//! - [`auth`]: static token and password sign-in strategies
//! - [`ratelimit`]: per resource class `429` bookkeeping
//! - [`socket`]: SockJS framing, session state machine and driver
//!
//! ### Orchestration
//!
//! - [`watcher`]: per-server scrape loops
//! - [`exporter`]: `/metrics` HTTP endpoint
//! - [`config`] / [`cli`]: YAML config and command line
//! - [`domain`]: ID newtypes and the error taxonomy
//!
//! ## Concurrency
//!
//! Every server runs three tokio tasks (segments, market, websocket). They
//! share only the server's rate limiter and the per-target snapshots; all
//! waits race a `CancellationToken` so Ctrl-C stops everything promptly.
//!
//! ## Key Concepts
//!
//! - **Segment**: one of 100 per-user 100 KB memory blobs readable over HTTP
//! - **Tick**: one game turn; the bot samples its CPU cost tree per tick
//! - **Self cost**: a node's CPU time excluding its children
//! - **Shard**: an independent world partition of the same server

pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod domain;
pub mod exporter;
pub mod market;
pub mod metrics;
pub mod profiling;
pub mod ratelimit;
pub mod segment;
pub mod socket;
pub mod watcher;
