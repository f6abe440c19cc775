//! SockJS framing.
//!
//! Every text frame starts with a one character type:
//!
//! | prefix | meaning |
//! |---|---|
//! | `o` | session open |
//! | `h` | heartbeat |
//! | `a` | JSON array of messages |
//! | `m` | one JSON message |
//! | `c` | close, `[code, "reason"]` |
//!
//! The game server JSON-encodes each message a second time before putting
//! it in the array, except plain strings which are encoded once. Decoding
//! therefore tries the unquoted text first and falls back to the raw
//! element.

use serde_json::value::RawValue;
use serde_json::Value;

use crate::domain::ProtocolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    Open,
    Heartbeat,
    Array(&'a str),
    Message(&'a str),
    Close(&'a str),
    Unknown(char, &'a str),
}

/// Split a text frame into its type and body. `None` for an empty frame.
pub fn parse_frame(data: &str) -> Option<Frame<'_>> {
    let mut chars = data.chars();
    let kind = chars.next()?;
    let body = chars.as_str();
    Some(match kind {
        'o' => Frame::Open,
        'h' => Frame::Heartbeat,
        'a' => Frame::Array(body),
        'm' => Frame::Message(body),
        'c' => Frame::Close(body),
        other => Frame::Unknown(other, body),
    })
}

/// Decode the body of an `a` frame, one result per element.
///
/// # Errors
/// Returns `ProtocolError::Payload` only when the body is not an array; a
/// bad element fails on its own.
pub fn batch_payload(body: &str) -> Result<Vec<Result<Value, ProtocolError>>, ProtocolError> {
    let elements: Vec<&RawValue> = serde_json::from_str(body)
        .map_err(|err| ProtocolError::Payload(format!("unmarshal payload as array: {err}")))?;
    Ok(elements.into_iter().map(|element| decode_element(element.get())).collect())
}

/// Decode one possibly double-encoded message.
///
/// # Errors
/// Returns `ProtocolError::Payload` when neither the unquoted text nor the
/// raw element is JSON.
pub fn decode_element(raw: &str) -> Result<Value, ProtocolError> {
    let unquoted = serde_json::from_str::<String>(raw).unwrap_or_else(|_| dumb_unquote(raw));

    serde_json::from_str(&unquoted)
        .or_else(|_| serde_json::from_str(raw))
        .map_err(|err| ProtocolError::Payload(format!("unmarshal unquoted message {unquoted:?}: {err}")))
}

/// Permissive unquote for text the strict decoder refuses (lone UTF-16
/// surrogates mostly). Good enough for the messages the server sends.
fn dumb_unquote(raw: &str) -> String {
    raw.replace("\\\"", "\"").trim_matches('"').to_string()
}

/// Code and reason of a `c` frame.
///
/// # Errors
/// Returns `ProtocolError::Payload` for a body that is not `[code, reason]`.
pub fn close_reason(body: &str) -> Result<(i64, String), ProtocolError> {
    serde_json::from_str(body).map_err(|err| ProtocolError::Payload(format!("close frame: {err}")))
}

/// Wire form of an outgoing message: a one element JSON array.
pub fn outbound(message: &str) -> String {
    Value::Array(vec![Value::String(message.to_string())]).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROD_MESSAGE: &str = r#"["[\"user:66070d418fd0c2031b293da2/console\",{\"messages\":{\"log\":[\"saved\",\"🍌 Current tick CPU usage: 9.36470700000018\"],\"results\":[]}}]"]"#;

    #[test]
    fn test_parse_frame() {
        assert_eq!(parse_frame(""), None);
        assert_eq!(parse_frame("o"), Some(Frame::Open));
        assert_eq!(parse_frame("h"), Some(Frame::Heartbeat));
        assert_eq!(parse_frame("a[]"), Some(Frame::Array("[]")));
        assert_eq!(parse_frame("m\"x\""), Some(Frame::Message("\"x\"")));
        assert_eq!(parse_frame("c[3000,\"bye\"]"), Some(Frame::Close("[3000,\"bye\"]")));
        assert_eq!(parse_frame("zzz"), Some(Frame::Unknown('z', "zz")));
    }

    #[test]
    fn test_prod_message() {
        let messages = batch_payload(PROD_MESSAGE).unwrap();
        assert_eq!(messages.len(), 1);
        let message = messages[0].as_ref().unwrap();
        assert_eq!(message[0], "user:66070d418fd0c2031b293da2/console");
        let log = message[1]["messages"]["log"].as_array().unwrap();
        assert_eq!(log[0], "saved");
        assert!(log[1].as_str().unwrap().starts_with("\u{1f34c} Current tick"));
    }

    #[test]
    fn test_plain_strings_are_encoded_once() {
        let messages = batch_payload(r#"["auth ok abc","time 123","{not json"]"#).unwrap();
        assert_eq!(messages[0].as_ref().unwrap(), "auth ok abc");
        assert_eq!(messages[1].as_ref().unwrap(), "time 123");
        assert_eq!(messages[2].as_ref().unwrap(), "{not json");
    }

    #[test]
    fn test_objects_encoded_once() {
        let messages = batch_payload(r#"[["user:ab/cpu",{"cpu":1,"memory":2}]]"#).unwrap();
        let value = messages[0].as_ref().unwrap();
        assert_eq!(value[0], "user:ab/cpu");
        assert_eq!(value[1]["memory"], 2);
    }

    #[test]
    fn test_lone_surrogate_does_not_abort_batch() {
        let body = r#"["[\"user:ab/cpu\",{\"note\":\"\ud83c\"}]","time 5"]"#;
        let messages = batch_payload(body).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].as_ref().unwrap(), "time 5");
    }

    #[test]
    fn test_not_an_array() {
        assert!(batch_payload("{}").is_err());
    }

    #[test]
    fn test_close_and_outbound() {
        assert_eq!(close_reason(r#"[3000,"Go away!"]"#).unwrap(), (3000, "Go away!".to_string()));
        assert_eq!(outbound("subscribe user:ab/cpu"), r#"["subscribe user:ab/cpu"]"#);
        assert_eq!(outbound(r#"say "hi""#), r#"["say \"hi\""]"#);
    }
}
