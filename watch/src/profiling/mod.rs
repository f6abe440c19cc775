//! CPU profile pipeline
//!
//! ```text
//! segment JSON ──► node::parse_profile_nodes ──► convert::Converter
//!                                                     │
//!                          push::ProfileSink ◄── encode::encode (gzipped pprof)
//! ```

pub mod convert;
pub mod encode;
pub mod node;
pub mod push;

pub use convert::{ConversionArtifact, Converter};
pub use node::{parse_profile_nodes, ProfileNode};
pub use push::{ProfileSink, PyroscopePusher};

/// Name an artifact is pushed under
pub fn profile_name(server: &str, shard: &str) -> String {
    format!("screeps_{server}_{shard}")
}
