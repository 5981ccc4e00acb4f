//! Console log entries captured from the browser.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

// ============================================================================
// LogLevel
// ============================================================================

/// Console log level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// `console.debug`.
    Debug,
    /// `console.info`.
    Info,
    /// `console.log`.
    Log,
    /// `console.warn`.
    #[serde(alias = "warning")]
    Warn,
    /// `console.error`.
    Error,
}

impl LogLevel {
    /// Returns the lowercase name.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Log => "log",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    /// Returns `true` for `warn` and `error`.
    #[inline]
    #[must_use]
    pub const fn is_high_priority(&self) -> bool {
        matches!(self, Self::Warn | Self::Error)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "log" => Ok(Self::Log),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(Error::invalid_argument(format!("unknown log level '{other}'"))),
        }
    }
}

// ============================================================================
// ConsoleMessage
// ============================================================================

/// One console entry, tagged with the server port it arrived through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleMessage {
    /// When the entry was logged in the browser.
    pub timestamp: DateTime<Utc>,
    /// Log level.
    pub level: LogLevel,
    /// Rendered message text.
    pub message: String,
    /// Page URL the entry came from.
    pub url: Option<String>,
    /// Source line.
    pub line_number: Option<u32>,
    /// Source column.
    pub column_number: Option<u32>,
    /// Stack trace for errors.
    pub stack_trace: Option<String>,
    /// Server listening port of the connection.
    pub port: u16,
}

/// Wire form of a console entry; every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawConsoleEntry {
    timestamp: Option<Value>,
    level: Option<String>,
    message: Option<String>,
    args: Vec<Value>,
    url: Option<String>,
    line_number: Option<u32>,
    column_number: Option<u32>,
    stack_trace: Option<String>,
}

impl ConsoleMessage {
    /// Builds a message from a `console` frame or a `batch` entry.
    ///
    /// Unknown levels become `log`; a missing `message` is rebuilt from
    /// `args`; a missing or unparseable timestamp becomes now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if a present field has the wrong JSON type.
    pub fn from_frame(data: &Value, port: u16) -> Result<Self> {
        let raw: RawConsoleEntry = serde_json::from_value(data.clone())?;

        let level = raw
            .level
            .as_deref()
            .and_then(|level| level.parse().ok())
            .unwrap_or(LogLevel::Log);

        let message = raw.message.unwrap_or_else(|| {
            raw.args
                .iter()
                .map(|arg| match arg {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(" ")
        });

        Ok(Self {
            timestamp: parse_timestamp(raw.timestamp.as_ref()),
            level,
            message,
            url: raw.url.filter(|url| !url.is_empty()),
            line_number: raw.line_number,
            column_number: raw.column_number,
            stack_trace: raw.stack_trace,
            port,
        })
    }

    /// Returns `true` if no filter is given or the level is in it.
    #[inline]
    #[must_use]
    pub fn matches_filter(&self, levels: Option<&[LogLevel]>) -> bool {
        levels.is_none_or(|levels| levels.is_empty() || levels.contains(&self.level))
    }
}

/// Accepts epoch milliseconds or an RFC 3339 string.
fn parse_timestamp(value: Option<&Value>) -> DateTime<Utc> {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(DateTime::from_timestamp_millis),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
    .unwrap_or_else(Utc::now)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_level_parse() {
        assert_eq!("WARNING".parse::<LogLevel>().expect("level"), LogLevel::Warn);
        assert_eq!("error".parse::<LogLevel>().expect("level"), LogLevel::Error);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_from_frame_full() {
        let data = json!({
            "type": "console",
            "level": "error",
            "message": "boom",
            "url": "https://example.com/app",
            "lineNumber": 12,
            "columnNumber": 4,
            "stackTrace": "at main",
            "timestamp": 1_700_000_000_000_i64
        });

        let message = ConsoleMessage::from_frame(&data, 8851).expect("parse");
        assert_eq!(message.level, LogLevel::Error);
        assert_eq!(message.message, "boom");
        assert_eq!(message.url.as_deref(), Some("https://example.com/app"));
        assert_eq!(message.line_number, Some(12));
        assert_eq!(message.port, 8851);
        assert_eq!(message.timestamp.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_from_frame_args_fallback() {
        let data = json!({"level": "shout", "args": ["count", 3, {"a": 1}]});
        let message = ConsoleMessage::from_frame(&data, 8852).expect("parse");

        assert_eq!(message.level, LogLevel::Log);
        assert_eq!(message.message, r#"count 3 {"a":1}"#);
        assert!(message.url.is_none());
    }

    #[test]
    fn test_from_frame_rfc3339_timestamp() {
        let data = json!({"message": "x", "timestamp": "2024-05-01T10:00:00Z"});
        let message = ConsoleMessage::from_frame(&data, 1).expect("parse");
        assert_eq!(message.timestamp.to_rfc3339(), "2024-05-01T10:00:00+00:00");
    }

    #[test]
    fn test_matches_filter() {
        let message = ConsoleMessage::from_frame(&json!({"level": "warn", "message": "w"}), 1)
            .expect("parse");

        assert!(message.matches_filter(None));
        assert!(message.matches_filter(Some(&[])));
        assert!(message.matches_filter(Some(&[LogLevel::Warn, LogLevel::Error])));
        assert!(!message.matches_filter(Some(&[LogLevel::Error])));
    }
}
