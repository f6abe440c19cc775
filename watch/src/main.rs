//! # screeps-watch - Main Entry Point
//!
//! Three subcommands:
//! - **watch**: scrape every configured server until Ctrl-C, serving `/metrics`
//! - **pull-segment**: fetch and decode one memory segment, print it
//! - **convert-profile**: offline profile dump → gzipped pprof file

use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use prometheus::Registry;
use tokio_util::sync::CancellationToken;

use screeps_watch::cli::{Args, Command};
use screeps_watch::client::ApiClient;
use screeps_watch::config::WatchConfig;
use screeps_watch::domain::{ConfigError, SegmentId};
use screeps_watch::exporter;
use screeps_watch::profiling::encode::encode;
use screeps_watch::profiling::{parse_profile_nodes, Converter, ProfileSink, PyroscopePusher};
use screeps_watch::ratelimit::RateLimiter;
use screeps_watch::watcher::Watcher;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.chain().any(|cause| cause.is::<ConfigError>()) {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

fn init_logger(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    init_logger(&args.log_level);

    match args.command {
        Command::Watch { config, listen } => watch(&config, listen).await,
        Command::PullSegment { config, segment, server, shard, pretty } => {
            pull_segment(&config, SegmentId(segment), server.as_deref(), &shard, pretty).await
        }
        Command::ConvertProfile { input, output, min_self_cost_ns } => {
            convert_profile(&input, &output, min_self_cost_ns)
        }
    }
}

async fn watch(config_path: &Path, listen: Option<SocketAddr>) -> Result<()> {
    let config = WatchConfig::from_file(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    if config.servers.is_empty() {
        warn!("No servers configured in {}", config_path.display());
    }

    let sink: Option<Arc<dyn ProfileSink>> = if config.pyroscope.address.is_empty() {
        None
    } else {
        let pusher = PyroscopePusher::new(&config.pyroscope.address)
            .context("Could not create profiling pusher")?;
        info!("Pushing profiles to {}", pusher.ingest_url());
        Some(Arc::new(pusher))
    };

    let registry = Registry::new();
    let cancel = CancellationToken::new();
    let mut handles = Vec::new();

    for server in &config.servers {
        let mut watcher = Watcher::new(server, &registry)
            .with_context(|| format!("Failed to set up server {:?}", server.name))?;
        if let Some(sink) = &sink {
            watcher = watcher.with_profile_sink(Arc::clone(sink));
        }
        info!("Watching server {} ({} targets)", watcher.name(), watcher.targets().len());
        handles.extend(Arc::new(watcher).spawn(&cancel));
    }

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl-C, shutting down"),
            Err(err) => warn!("Failed to listen for Ctrl-C: {err}"),
        }
        shutdown.cancel();
    });

    let listen = listen.unwrap_or(config.listen);
    let served = exporter::serve(listen, registry, cancel.clone()).await;
    cancel.cancel();
    for handle in handles {
        let _ = handle.await;
    }
    served.with_context(|| format!("Metrics server on {listen} failed"))
}

async fn pull_segment(
    config_path: &Path,
    segment: SegmentId,
    server: Option<&str>,
    shard: &str,
    pretty: bool,
) -> Result<()> {
    let config = WatchConfig::from_file(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let opts = config
        .server(server)
        .with_context(|| format!("No server named {:?} in config", server.unwrap_or_default()))?;

    let client = ApiClient::new(
        opts.base_url()?,
        reqwest::Client::new(),
        opts.auth_method(),
        Arc::new(RateLimiter::new()),
    );
    let fetch = client
        .memory_segment(segment, shard)
        .await
        .with_context(|| format!("Failed to pull segment {segment} shard={shard}"))?;
    info!("Segment {segment}: {} bytes raw, {} bytes decoded", fetch.raw_size, fetch.decoded.len());

    let mut stdout = std::io::stdout().lock();
    match serde_json::from_slice::<serde_json::Value>(&fetch.decoded) {
        Ok(value) if pretty => writeln!(stdout, "{}", serde_json::to_string_pretty(&value)?)?,
        _ => {
            stdout.write_all(&fetch.decoded)?;
            writeln!(stdout)?;
        }
    }
    Ok(())
}

fn convert_profile(input: &Path, output: &Path, min_self_cost_ns: Option<i64>) -> Result<()> {
    let data =
        std::fs::read(input).with_context(|| format!("Failed to read {}", input.display()))?;
    let ticks = parse_profile_nodes(&data)
        .with_context(|| format!("Failed to parse profile {}", input.display()))?;

    let mut converter = Converter::new(SystemTime::now());
    if let Some(nanos) = min_self_cost_ns {
        converter = converter.with_min_self_cost(nanos);
    }
    let artifact = converter.convert(&ticks);
    let bytes = encode(&artifact).context("Failed to encode profile")?;
    std::fs::write(output, &bytes)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "✓ {} ticks → {} samples, {} functions ({} bytes)",
        ticks.len(),
        artifact.samples().len(),
        artifact.functions().len(),
        bytes.len()
    );
    println!("  Output: {}", output.display());
    Ok(())
}
