//! ID newtypes and API resource classes.
//!
//! Function and location IDs share a numbering in script profiles but live
//! in separate pprof tables, so they get separate types.

use std::fmt;

/// Function table ID (1-based)
///
/// Scoped to a single converter; zero is reserved by the pprof format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u64);

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn#{}", self.0)
    }
}

/// Location table ID (1-based)
///
/// Locations are 1:1 with functions for script profiles, so a location
/// carries the same number as its function. Still a distinct type: the
/// pprof format keeps the two tables separate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocationId(pub u64);

impl fmt::Display for LocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loc#{}", self.0)
    }
}

/// Memory segment number on the remote server (0..=99)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SegmentId(pub u32);

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Class of rate-limited API resource.
///
/// Each class carries its own "blocked until" timestamp: a 429 from the
/// market API must never stall memory segment polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    MemorySegment,
    Market,
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceClass::MemorySegment => f.write_str("memory-segment"),
            ResourceClass::Market => f.write_str("market"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(FunctionId(3).to_string(), "fn#3");
        assert_eq!(LocationId(3).to_string(), "loc#3");
        assert_eq!(ResourceClass::MemorySegment.to_string(), "memory-segment");
        assert_eq!(ResourceClass::Market.to_string(), "market");
    }
}
