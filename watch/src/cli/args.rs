//! CLI argument definitions

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "screeps-watch",
    version,
    about = "Export Screeps memory segments, market stats and CPU profiles",
    after_help = "\
EXAMPLES:
    screeps-watch watch --config config.yaml             Run the exporter
    screeps-watch pull-segment --config config.yaml --segment 98 --pretty
    screeps-watch convert-profile profile.json --output cpu.pprof"
)]
pub struct Args {
    /// Log level, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scrape every configured server and serve /metrics
    Watch {
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,

        /// Exporter address, overrides `listen` from the config
        #[arg(long)]
        listen: Option<SocketAddr>,
    },

    /// Fetch and decode one memory segment, print it to stdout
    PullSegment {
        #[arg(short, long, default_value = "config.yaml")]
        config: PathBuf,

        #[arg(long)]
        segment: u32,

        /// Server name from the config (default: first server)
        #[arg(long)]
        server: Option<String>,

        #[arg(long, default_value = "none")]
        shard: String,

        /// Pretty print JSON payloads
        #[arg(long)]
        pretty: bool,
    },

    /// Convert a profile segment dump to a gzipped pprof file
    ConvertProfile {
        /// JSON array of per-tick cost trees
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Drop frames with a self cost below this many nanoseconds
        #[arg(long)]
        min_self_cost_ns: Option<i64>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_defaults() {
        let args = Args::try_parse_from(["screeps-watch", "watch"]).unwrap();
        assert_eq!(args.log_level, "info");
        let Command::Watch { config, listen } = args.command else {
            panic!("expected watch");
        };
        assert_eq!(config, PathBuf::from("config.yaml"));
        assert_eq!(listen, None);
    }

    #[test]
    fn test_pull_segment() {
        let args = Args::try_parse_from([
            "screeps-watch",
            "pull-segment",
            "--segment",
            "98",
            "--shard",
            "shard3",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(args.log_level, "debug");
        let Command::PullSegment { segment, shard, pretty, .. } = args.command else {
            panic!("expected pull-segment");
        };
        assert_eq!(segment, 98);
        assert_eq!(shard, "shard3");
        assert!(!pretty);
    }

    #[test]
    fn test_convert_profile_requires_output() {
        assert!(Args::try_parse_from(["screeps-watch", "convert-profile", "in.json"]).is_err());
    }
}
