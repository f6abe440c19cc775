//! Websocket feed
//!
//! - `frame`: SockJS frames and the double-encoded payload unwrapping
//! - `console`: console channel payloads, forwarded to the log
//! - `protocol`: pure session state machine (auth, subscribe, routing)
//! - `session`: async driver with reconnect backoff

pub mod console;
pub mod frame;
pub mod protocol;
pub mod session;

pub use console::{ConsoleHook, ConsoleLevel, ConsoleLine, ConsolePayload};
pub use protocol::{SessionEvent, SessionProtocol, SessionState};
pub use session::{socket_url, ScreepsSocket};
