//! In-game console output forwarded from the `user:<id>/console` channel.
//!
//! Payload shape:
//!
//! ```json
//! {"messages": {"log": ["ERR <font color='red'>boom</font>"], "results": []}, "shard": "shard3"}
//! {"error": "TypeError: ...", "shard": "shard3"}
//! ```
//!
//! Bots prefix lines with a three letter level (`FTL`, `ERR`, `WRN`, `INF`,
//! `DBG`); unprefixed lines are info.

use std::borrow::Cow;
use std::sync::Arc;

use log::{error, log, Level};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::domain::ProtocolError;

/// Log target of forwarded console lines
pub const CONSOLE_TARGET: &str = "screeps::console";

const DEFAULT_SHARD: &str = "none";

static FONT_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<font color='(?P<color>[^']+)'>(?P<text>[^<]+)</font>")
        .expect("font tag pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
}

impl ConsoleLevel {
    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "FTL" => Some(Self::Fatal),
            "ERR" => Some(Self::Error),
            "WRN" => Some(Self::Warn),
            "INF" => Some(Self::Info),
            "DBG" => Some(Self::Debug),
            _ => None,
        }
    }

    /// `log` has no fatal, it maps to error.
    pub fn log_level(self) -> Level {
        match self {
            Self::Fatal | Self::Error => Level::Error,
            Self::Warn => Level::Warn,
            Self::Info => Level::Info,
            Self::Debug => Level::Debug,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLine {
    pub shard: String,
    pub level: ConsoleLevel,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsolePayload {
    pub shard: String,
    pub lines: Vec<ConsoleLine>,
    /// Uncaught script error for the tick
    pub error: Option<String>,
}

/// Consumes a line instead of logging it when it returns `true`.
pub type ConsoleHook = Arc<dyn Fn(&ConsoleLine) -> bool + Send + Sync>;

/// Replace `<font color='..'>text</font>` with `text`.
pub fn strip_html(line: &str) -> Cow<'_, str> {
    FONT_TAG.replace_all(line, "$text")
}

/// Level and text of one raw line, prefix removed.
pub fn classify_line(raw: &str) -> (ConsoleLevel, String) {
    let line = strip_html(raw);
    let line = line.trim();

    if line.len() > 3 {
        if let Some(level) = line.get(..3).and_then(ConsoleLevel::from_prefix) {
            return (level, line[3..].trim_start().to_string());
        }
    }
    (ConsoleLevel::Info, line.to_string())
}

/// # Errors
/// Returns `ProtocolError::Payload` when the payload is not an object or
/// `messages.log` is not a list.
pub fn parse_console(payload: &Value) -> Result<ConsolePayload, ProtocolError> {
    let Value::Object(payload) = payload else {
        return Err(ProtocolError::Payload(format!("console payload is not an object: {payload}")));
    };

    let shard = payload.get("shard").and_then(Value::as_str).unwrap_or(DEFAULT_SHARD).to_string();
    let error = payload.get("error").and_then(Value::as_str).map(str::to_string);

    let lines = match payload.get("messages").and_then(|messages| messages.get("log")) {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(lines)) => lines
            .iter()
            .map(|line| {
                let (level, text) = classify_line(line.as_str().unwrap_or_default());
                ConsoleLine { shard: shard.clone(), level, text }
            })
            .collect(),
        Some(other) => {
            return Err(ProtocolError::Payload(format!("failed to parse log messages: {other}")));
        }
    };

    Ok(ConsolePayload { shard, lines, error })
}

/// Log every line not taken by `hook`, then the tick's error if any.
pub fn emit(payload: &ConsolePayload, hook: Option<&ConsoleHook>) {
    for line in &payload.lines {
        if hook.is_some_and(|hook| hook(line)) {
            continue;
        }
        log!(target: CONSOLE_TARGET, line.level.log_level(), "shard={} {}", line.shard, line.text);
    }
    if let Some(err) = &payload.error {
        error!(target: CONSOLE_TARGET, "shard={} {}", payload.shard, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn test_strip_html() {
        assert_eq!(strip_html("<font color='#ff0000'>boom</font> done"), "boom done");
        assert_eq!(strip_html("plain"), "plain");
    }

    #[test]
    fn test_classify_line() {
        assert_eq!(classify_line("ERR boom"), (ConsoleLevel::Error, "boom".to_string()));
        assert_eq!(classify_line("  FTL dead "), (ConsoleLevel::Fatal, "dead".to_string()));
        assert_eq!(
            classify_line("<font color='yellow'>WRN low energy</font>"),
            (ConsoleLevel::Warn, "low energy".to_string())
        );
        assert_eq!(classify_line("ERR"), (ConsoleLevel::Info, "ERR".to_string()));
        assert_eq!(classify_line("hello"), (ConsoleLevel::Info, "hello".to_string()));
        assert_eq!(classify_line("ab\u{1f34c}x"), (ConsoleLevel::Info, "ab\u{1f34c}x".to_string()));
        assert_eq!(ConsoleLevel::Fatal.log_level(), Level::Error);
    }

    #[test]
    fn test_parse_console() {
        let payload = parse_console(&json!({
            "messages": {"log": ["ERR boom", "INF fine"], "results": []},
            "shard": "shard3"
        }))
        .unwrap();
        assert_eq!(payload.shard, "shard3");
        assert_eq!(payload.lines.len(), 2);
        assert_eq!(payload.lines[0].level, ConsoleLevel::Error);
        assert_eq!(payload.lines[0].text, "boom");
        assert_eq!(payload.error, None);
    }

    #[test]
    fn test_parse_console_error_and_default_shard() {
        let payload = parse_console(&json!({"error": "TypeError: x is undefined"})).unwrap();
        assert_eq!(payload.shard, "none");
        assert!(payload.lines.is_empty());
        assert_eq!(payload.error.as_deref(), Some("TypeError: x is undefined"));
    }

    #[test]
    fn test_parse_console_rejects_bad_shapes() {
        assert!(parse_console(&json!("text")).is_err());
        assert!(parse_console(&json!({"messages": {"log": "nope"}})).is_err());
    }

    #[test]
    fn test_hook_consumes_lines() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let hook: ConsoleHook = Arc::new(move |line: &ConsoleLine| {
            sink.lock().unwrap().push(line.text.clone());
            line.level == ConsoleLevel::Error
        });

        let payload =
            parse_console(&json!({"messages": {"log": ["ERR boom", "hello"]}})).unwrap();
        emit(&payload, Some(&hook));
        assert_eq!(*seen.lock().unwrap(), vec!["boom".to_string(), "hello".to_string()]);
    }
}
