//! # Cost Tree → Flat Samples
//!
//! Converts per-tick cost trees into the flat sample list pprof expects.
//!
//! ## Sample Semantics
//!
//! Every node, at every depth, contributes exactly one sample:
//!
//! ```text
//! tick (10ms)                 sample [tick]             6ms
//! ├── loop (3ms)              sample [loop, tick]       2ms
//! │   └── creep.run (1ms)     sample [creep.run, loop, tick] 1ms
//! └── market (1ms)            sample [market, tick]     1ms
//! ```
//!
//! The value of a sample is the node's *self* cost, so summing a flame graph
//! column gives back the node's total. Stacks are leaf first.
//!
//! ## Identity
//!
//! Function and location IDs are interned by name and scoped to one
//! [`Converter`]. They start at 1 and only grow; a fresh converter starts
//! over.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use super::node::ProfileNode;
use crate::domain::{FunctionId, LocationId};

/// Key given to every tick's root frame
pub const TICK_FRAME: &str = "tick";

/// Function table entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub id: FunctionId,
    pub name: String,
    pub system_name: String,
}

/// Location table entry, one per function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub id: LocationId,
    pub function_id: FunctionId,
}

/// One node of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// Leaf first: `locations[0]` is the node itself, the last is `tick`
    pub locations: Vec<LocationId>,
    pub self_cost_nanos: i64,
    pub count: i64,
}

/// Finished conversion, ready for encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionArtifact {
    functions: Vec<Function>,
    locations: Vec<Location>,
    samples: Vec<Sample>,
    pub start_time_nanos: i64,
    pub duration_nanos: i64,
}

impl ConversionArtifact {
    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }
}

/// Incremental converter.
///
/// Holds the function/location arena and the name index while ticks are
/// added; [`Converter::finish`] hands the tables over to the artifact.
pub struct Converter {
    functions: Vec<Function>,
    locations: Vec<Location>,
    index: HashMap<String, usize>,
    samples: Vec<Sample>,
    created_at_nanos: i64,
    first_tick_nanos: Option<i64>,
    last_tick_nanos: Option<i64>,
    min_self_cost_nanos: Option<i64>,
}

impl Default for Converter {
    fn default() -> Self {
        Self::new(SystemTime::now())
    }
}

impl Converter {
    /// `created_at` is the profile start when no tick carries a timestamp.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn new(created_at: SystemTime) -> Self {
        let created_at_nanos =
            created_at.duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as i64).unwrap_or_default();
        Self {
            functions: Vec::new(),
            locations: Vec::new(),
            index: HashMap::new(),
            samples: Vec::new(),
            created_at_nanos,
            first_tick_nanos: None,
            last_tick_nanos: None,
            min_self_cost_nanos: None,
        }
    }

    /// Skip children (and their subtrees) whose self cost is below
    /// `nanos`. Roots are always kept.
    #[must_use]
    pub fn with_min_self_cost(mut self, nanos: i64) -> Self {
        self.min_self_cost_nanos = Some(nanos);
        self
    }

    /// Convert a whole batch in one go.
    pub fn convert(mut self, batch: &[ProfileNode]) -> ConversionArtifact {
        self.add_ticks(batch);
        self.finish()
    }

    pub fn add_ticks(&mut self, ticks: &[ProfileNode]) {
        for tick in ticks {
            self.add_tick(tick);
        }
    }

    /// Add one sampled tick. Its root is recorded as [`TICK_FRAME`]
    /// whatever its real key, so all ticks share one top frame.
    pub fn add_tick(&mut self, tick: &ProfileNode) {
        if let Some(at) = tick.unix_nanos() {
            self.first_tick_nanos = Some(self.first_tick_nanos.map_or(at, |first| first.min(at)));
            self.last_tick_nanos = Some(self.last_tick_nanos.map_or(at, |last| last.max(at)));
        }

        // Explicit work list, stack use stays flat for trees built in code
        // as well as parsed ones.
        let mut pending: Vec<(&ProfileNode, &str, Vec<LocationId>)> =
            vec![(tick, TICK_FRAME, Vec::new())];

        while let Some((node, key, ancestors)) = pending.pop() {
            let location = self.intern(key);

            let mut stack = Vec::with_capacity(ancestors.len() + 1);
            stack.push(location);
            stack.extend_from_slice(&ancestors);

            // Reverse so children are visited in their recorded order
            for child in node.children.iter().rev() {
                if self.keeps(child) {
                    pending.push((child, child.key.as_str(), stack.clone()));
                }
            }

            self.samples.push(Sample {
                locations: stack,
                self_cost_nanos: node.self_cost_nanos(),
                count: 1,
            });
        }
    }

    /// Intern a function name, returning its location.
    ///
    /// A known name returns the existing ID; a new name allocates the next
    /// one and appends a function and its location.
    pub fn intern(&mut self, name: &str) -> LocationId {
        if let Some(&slot) = self.index.get(name) {
            return self.locations[slot].id;
        }

        let slot = self.functions.len();
        let id = slot as u64 + 1;
        let function_id = FunctionId(id);
        let location_id = LocationId(id);

        self.functions.push(Function {
            id: function_id,
            name: name.to_string(),
            system_name: name.to_string(),
        });
        self.locations.push(Location { id: location_id, function_id });
        self.index.insert(name.to_string(), slot);
        location_id
    }

    pub fn finish(self) -> ConversionArtifact {
        let (start_time_nanos, duration_nanos) = match (self.first_tick_nanos, self.last_tick_nanos)
        {
            (Some(first), Some(last)) => (first, last - first),
            _ => (self.created_at_nanos, 0),
        };

        ConversionArtifact {
            functions: self.functions,
            locations: self.locations,
            samples: self.samples,
            start_time_nanos,
            duration_nanos,
        }
    }

    fn keeps(&self, child: &ProfileNode) -> bool {
        self.min_self_cost_nanos.map_or(true, |min| child.self_cost_nanos() >= min)
    }
}
