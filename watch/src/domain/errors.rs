//! Error taxonomy of screeps-watch.
//!
//! Every failure stays confined to the task/target that produced it; none of
//! these are fatal to the process except `ConfigError` at startup.

use std::time::{SystemTime, UNIX_EPOCH};

use reqwest::StatusCode;
use thiserror::Error;

use super::types::ResourceClass;

/// Malformed memory segment envelope.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Failed to parse segment envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("Segment payload is empty")]
    EmptyPayload,

    #[error("Failed to base64 decode segment payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Failed to gunzip segment payload: {0}")]
    Gzip(#[source] std::io::Error),
}

/// Malformed JSON in a decoded payload.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Non-ok return in response: {0}")]
    NotOk(i64),

    #[error("No market stats for {0}")]
    NoStatsForToday(String),
}

/// HTTP and websocket I/O failures. Retried on the next tick or reconnect.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {url}")]
    Status { status: StatusCode, url: String },

    #[error("Failed to build request url: {0}")]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Sign-in request failed: {0}")]
    SignIn(#[from] reqwest::Error),

    #[error("Server {0} rejected the credentials")]
    Rejected(String),

    #[error("Failed to build sign-in url: {0}")]
    Url(#[from] url::ParseError),

    #[error("Credentials are not a valid header value: {0}")]
    Header(#[from] reqwest::header::InvalidHeaderValue),
}

/// Unexpected websocket traffic. Closes the session and triggers backoff.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Server closed the session: {code} {reason}")]
    ServerClosed { code: i64, reason: String },

    #[error("Websocket authentication rejected: {0}")]
    AuthRejected(String),

    #[error("Failed to get token to auth websocket: {0}")]
    Token(#[source] AuthError),

    #[error("Websocket stream ended")]
    StreamEnded,

    #[error("Failed to decode websocket payload: {0}")]
    Payload(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Invalid configuration. Fatal at construction time, never retried.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Missing url field for server {0:?}")]
    MissingUrl(String),

    #[error("Invalid url for server {server:?}: {source}")]
    InvalidUrl {
        server: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Unsupported url scheme {0:?}, expected http or https")]
    UnsupportedScheme(String),

    #[error("No targets configured for {0:?}")]
    NoTargets(String),

    #[error("Cannot provide both token and password fields for {0:?}")]
    ConflictingCredentials(String),

    #[error("Failed to register metrics for {what}: {source}")]
    Registration {
        what: String,
        #[source]
        source: prometheus::Error,
    },

    #[error("Failed to create profiling pusher: {0}")]
    Pusher(#[source] reqwest::Error),
}

/// Failure pushing a profile to the profiling backend.
#[derive(Error, Debug)]
pub enum PushError {
    #[error("Failed to encode profile: {0}")]
    Encode(#[source] std::io::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Everything that can go wrong in one scrape of one target.
#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("{class} API rate limited until unix time {}", unix_secs(.until))]
    RateLimited { class: ResourceClass, until: SystemTime },

    #[error(transparent)]
    Push(#[from] PushError),
}

fn unix_secs(at: &SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_rate_limited_display() {
        let err = ScrapeError::RateLimited {
            class: ResourceClass::Market,
            until: UNIX_EPOCH + Duration::from_secs(1_700_000_000),
        };
        assert_eq!(err.to_string(), "market API rate limited until unix time 1700000000");
    }

    #[test]
    fn test_config_error_names_the_server() {
        let err = ConfigError::ConflictingCredentials("mmo".to_string());
        assert!(err.to_string().contains("\"mmo\""));
    }

    #[test]
    fn test_decode_error_wraps_into_scrape_error() {
        let err: ScrapeError = DecodeError::EmptyPayload.into();
        assert_eq!(err.to_string(), "Segment payload is empty");
    }
}
