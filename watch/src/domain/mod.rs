//! Shared vocabulary of screeps-watch
//!
//! - [`types`]: segment, function and location IDs plus the rate limit classes
//! - [`errors`]: one error enum per failure domain, folded into [`ScrapeError`]
//!   for the scrape loops

pub mod errors;
pub mod types;

pub use types::{FunctionId, LocationId, ResourceClass, SegmentId};

pub use errors::{
    AuthError, ConfigError, DecodeError, ParseError, ProtocolError, PushError, ScrapeError,
    TransportError,
};
