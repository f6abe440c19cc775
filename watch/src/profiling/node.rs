//! Per-tick CPU cost trees as written by the in-game profiler.
//!
//! Two encodings exist. The verbose one:
//!
//! ```json
//! [{"key": "main", "start": 0.1, "cpu": 10.5, "um": 1700000000000, "children": [...]}]
//! ```
//!
//! and the minified one the bot uses to fit a segment's 100 KB limit:
//!
//! ```json
//! [{"k": "main", "s": 0.1, "u": 10.5, "um": 1700000000000, "c": [...]}]
//! ```
//!
//! Both deserialize into [`ProfileNode`].

use serde::{Deserialize, Deserializer};

use crate::domain::ParseError;

/// One function invocation's total (self + descendants) cost for one tick.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProfileNode {
    #[serde(alias = "k")]
    pub key: String,

    /// Offset into the tick, milliseconds
    #[serde(default, alias = "s")]
    pub start: f64,

    /// Cost in milliseconds
    #[serde(default, rename = "cpu", alias = "u")]
    pub cpu_cost: f64,

    #[serde(default, alias = "c", deserialize_with = "nullable_children")]
    pub children: Vec<ProfileNode>,

    /// Wall clock of the sampled tick, unix milliseconds
    #[serde(default, rename = "um")]
    pub unix_milli: Option<i64>,
}

impl ProfileNode {
    /// Self cost in nanoseconds: own cost minus the children's.
    ///
    /// Not clamped, a malformed tree yields a negative value.
    #[allow(clippy::cast_possible_truncation)]
    pub fn self_cost_nanos(&self) -> i64 {
        let children: f64 = self.children.iter().map(|child| child.cpu_cost).sum();
        ((self.cpu_cost - children) * 1e6) as i64
    }

    /// Tick timestamp in unix nanoseconds, if the profiler recorded one.
    pub fn unix_nanos(&self) -> Option<i64> {
        self.unix_milli.filter(|&ms| ms > 0).map(|ms| ms.saturating_mul(1_000_000))
    }
}

fn nullable_children<'de, D>(deserializer: D) -> Result<Vec<ProfileNode>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<ProfileNode>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parse a profile segment (one tree per sampled tick).
///
/// Nesting is capped by `serde_json`'s recursion limit (128 levels of
/// arrays and objects, so roughly 60 frames deep per tick).
///
/// # Errors
/// Returns `ParseError::Json` for anything but an array of nodes, including
/// trees nested past that limit.
pub fn parse_profile_nodes(data: &[u8]) -> Result<Vec<ProfileNode>, ParseError> {
    Ok(serde_json::from_slice(data)?)
}
