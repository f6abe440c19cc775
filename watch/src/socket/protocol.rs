//! Websocket session state machine.
//!
//! Pure: takes text frames, returns what the driver should do. No I/O
//! happens here, which keeps the handshake testable without a server.
//!
//! ```text
//! Disconnected ─► Dialing ─► Connected ──o──► Authenticating ──"auth ok"──► Subscribing
//!                    ▲                                                        │ first
//!                    │                                                        ▼ payload
//!                    └──── backoff ◄──── Closed ◄──── any error ◄──────── Streaming
//! ```
//!
//! A new [`SessionProtocol`] is built for every connection, so a redial
//! always starts unauthenticated with nothing subscribed.

use std::collections::BTreeMap;
use std::fmt;

use log::{debug, error, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::console::{parse_console, ConsolePayload};
use super::frame::{batch_payload, close_reason, decode_element, outbound, parse_frame, Frame};
use crate::domain::ProtocolError;

static CHANNEL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<kind>user):(?P<id>[a-f0-9]+)/(?P<name>.*)$").expect("channel pattern is valid")
});

/// Channel names accepted in `websocket_channels`
pub const KNOWN_CHANNELS: [&str; 2] = ["console", "cpu"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Dialing,
    Connected,
    Authenticating,
    Subscribing,
    Streaming,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Dialing => "dialing",
            Self::Connected => "connected",
            Self::Authenticating => "authenticating",
            Self::Subscribing => "subscribing",
            Self::Streaming => "streaming",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Work for the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Fetch a token and send [`SessionProtocol::auth_message`]
    Authenticate,
    /// Text frame to write as is
    Send(String),
    Console(ConsolePayload),
    Cpu { cpu: Option<f64>, memory: Option<f64> },
}

pub struct SessionProtocol {
    subscriptions: BTreeMap<String, bool>,
    state: SessionState,
}

impl SessionProtocol {
    /// Session for a freshly opened connection. Unknown channel names are
    /// warned about and dropped.
    pub fn new(user_id: &str, channels: &[String]) -> Self {
        let mut subscriptions = BTreeMap::new();
        for channel in channels {
            if KNOWN_CHANNELS.contains(&channel.as_str()) {
                subscriptions.insert(format!("user:{user_id}/{channel}"), false);
            } else {
                warn!("Unknown websocket channel {channel:?}, ignoring");
            }
        }
        Self { subscriptions, state: SessionState::Connected }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Channel → subscribe sent
    pub fn subscriptions(&self) -> &BTreeMap<String, bool> {
        &self.subscriptions
    }

    /// Wire text of the auth request.
    pub fn auth_message(&mut self, token: &str) -> String {
        self.state = SessionState::Authenticating;
        outbound(&format!("auth {token}"))
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Handle one text frame.
    ///
    /// # Errors
    /// Errors close the session: a server close frame or rejected auth.
    /// Undecodable messages are logged and skipped.
    pub fn handle_frame(&mut self, data: &str) -> Result<Vec<SessionEvent>, ProtocolError> {
        let mut events = Vec::new();
        let Some(frame) = parse_frame(data) else {
            return Ok(events);
        };

        match frame {
            Frame::Heartbeat => {}
            Frame::Open => events.push(SessionEvent::Authenticate),
            Frame::Array(body) => match batch_payload(body) {
                Ok(messages) => {
                    for message in messages {
                        match message {
                            Ok(message) => self.handle_message(message, &mut events)?,
                            Err(err) => error!("Failed to decode websocket message: {err}"),
                        }
                    }
                }
                Err(err) => error!("Failed to batch payload: {err}"),
            },
            Frame::Message(body) => match decode_element(body) {
                Ok(message) => self.handle_message(message, &mut events)?,
                Err(err) => error!("Failed to decode websocket message: {err}"),
            },
            Frame::Close(body) => {
                self.close();
                let (code, reason) = close_reason(body)?;
                return Err(ProtocolError::ServerClosed { code, reason });
            }
            Frame::Unknown(kind, body) => info!("Unknown websocket frame type {kind:?}: {body}"),
        }
        Ok(events)
    }

    fn handle_message(
        &mut self,
        message: Value,
        events: &mut Vec<SessionEvent>,
    ) -> Result<(), ProtocolError> {
        match message {
            Value::String(text) => self.handle_text(&text, events),
            Value::Array(mut parts) if parts.len() == 2 => {
                let payload = parts.pop().unwrap_or_default();
                match parts.pop() {
                    Some(Value::String(channel)) => self.route(&channel, &payload, events),
                    other => error!("Unknown message type in slice index 0: {other:?}"),
                }
                Ok(())
            }
            Value::Array(parts) => {
                error!("Unknown slice message of len {}: {}", parts.len(), Value::Array(parts));
                Ok(())
            }
            other => {
                info!("Unknown websocket message: {other}");
                Ok(())
            }
        }
    }

    fn handle_text(&mut self, text: &str, events: &mut Vec<SessionEvent>) -> Result<(), ProtocolError> {
        if text.starts_with("auth ok") {
            self.state = SessionState::Subscribing;
            for (channel, subscribed) in &mut self.subscriptions {
                if !*subscribed {
                    events.push(SessionEvent::Send(outbound(&format!("subscribe {channel}"))));
                    *subscribed = true;
                }
            }
            info!("Websocket authenticated, subscribing to {} channels", self.subscriptions.len());
        } else if text.starts_with("auth failed") {
            self.close();
            return Err(ProtocolError::AuthRejected(text.to_string()));
        } else {
            // protocol, time and package announcements
            debug!("Websocket server says {text:?}");
        }
        Ok(())
    }

    fn route(&mut self, channel: &str, payload: &Value, events: &mut Vec<SessionEvent>) {
        let Some(captures) = CHANNEL.captures(channel) else {
            error!("Failed to match channel {channel:?}");
            return;
        };

        let event = match &captures["name"] {
            "console" => match parse_console(payload) {
                Ok(console) => SessionEvent::Console(console),
                Err(err) => {
                    error!("Handle console payload failed for user {}: {err}", &captures["id"]);
                    return;
                }
            },
            "cpu" => SessionEvent::Cpu {
                cpu: payload.get("cpu").and_then(Value::as_f64),
                memory: payload.get("memory").and_then(Value::as_f64),
            },
            name => {
                error!("Unknown channel type={} name={name}", &captures["kind"]);
                return;
            }
        };

        self.state = SessionState::Streaming;
        events.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::console::ConsoleLevel;

    fn session() -> SessionProtocol {
        SessionProtocol::new("abc123", &["console".into(), "cpu".into(), "rooms".into()])
    }

    #[test]
    fn test_channels() {
        let session = session();
        assert_eq!(session.state(), SessionState::Connected);
        let channels: Vec<&String> = session.subscriptions().keys().collect();
        assert_eq!(channels, vec!["user:abc123/console", "user:abc123/cpu"]);
        assert!(session.subscriptions().values().all(|subscribed| !subscribed));
    }

    #[test]
    fn test_heartbeat_is_a_no_op() {
        let mut session = session();
        assert!(session.handle_frame("h").unwrap().is_empty());
        assert!(session.handle_frame("").unwrap().is_empty());
        assert_eq!(session.state(), SessionState::Connected);
    }

    #[test]
    fn test_handshake() {
        let mut session = session();
        assert_eq!(session.handle_frame("o").unwrap(), vec![SessionEvent::Authenticate]);
        assert_eq!(session.auth_message("tok"), r#"["auth tok"]"#);
        assert_eq!(session.state(), SessionState::Authenticating);

        let events = session.handle_frame(r#"a["auth ok tok"]"#).unwrap();
        assert_eq!(
            events,
            vec![
                SessionEvent::Send(r#"["subscribe user:abc123/console"]"#.into()),
                SessionEvent::Send(r#"["subscribe user:abc123/cpu"]"#.into()),
            ]
        );
        assert_eq!(session.state(), SessionState::Subscribing);

        // Already subscribed channels are not requested twice
        assert!(session.handle_frame(r#"a["auth ok tok"]"#).unwrap().is_empty());
    }

    #[test]
    fn test_auth_failed_closes() {
        let mut session = session();
        let err = session.handle_frame(r#"a["auth failed"]"#).unwrap_err();
        assert!(matches!(err, ProtocolError::AuthRejected(_)));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_double_encoded_console_frame() {
        let mut session = session();
        let frame = r#"a["[\"user:abc123/console\",{\"messages\":{\"log\":[\"ERR boom\"]},\"shard\":\"shard3\"}]"]"#;
        let events = session.handle_frame(frame).unwrap();

        let [SessionEvent::Console(console)] = events.as_slice() else {
            panic!("expected one console event, got {events:?}");
        };
        assert_eq!(console.lines.len(), 1);
        assert_eq!(console.lines[0].level, ConsoleLevel::Error);
        assert_eq!(console.lines[0].text, "boom");
        assert_eq!(console.shard, "shard3");
        assert_eq!(session.state(), SessionState::Streaming);
    }

    #[test]
    fn test_cpu_message() {
        let mut session = session();
        let events =
            session.handle_frame(r#"m["user:abc123/cpu",{"cpu":12.5,"memory":2048}]"#).unwrap();
        assert_eq!(events, vec![SessionEvent::Cpu { cpu: Some(12.5), memory: Some(2048.0) }]);
    }

    #[test]
    fn test_unroutable_messages_are_skipped() {
        let mut session = session();
        let frame = r#"a["[\"user:abc123/room\",{}]","[\"room:W1N1\",{}]","[1,2,3]","time 1"]"#;
        assert!(session.handle_frame(frame).unwrap().is_empty());
        assert!(session.handle_frame("a{not an array").unwrap().is_empty());
        assert!(session.handle_frame("x?").unwrap().is_empty());
    }

    #[test]
    fn test_close_frame() {
        let mut session = session();
        let err = session.handle_frame(r#"c[3000,"Go away!"]"#).unwrap_err();
        assert!(
            matches!(err, ProtocolError::ServerClosed { code: 3000, ref reason } if reason == "Go away!")
        );
        assert_eq!(session.state(), SessionState::Closed);
    }
}
