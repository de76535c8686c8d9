//! Structured event logger
//!
//! - One log line = one event
//! - Explicit severity levels
//! - Deterministic field ordering (alphabetical)
//! - Emitted through `tracing`; the subscriber is the embedder's choice

use std::fmt;

use serde_json::{Map, Value};

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Per-replica detail
    Trace = 0,
    /// Normal operations
    Info = 1,
    /// Recoverable issues
    Warn = 2,
    /// Operation failures
    Error = 3,
    /// Protocol invariant violated
    Fatal = 4,
}

impl Severity {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured logger facade over `tracing`.
pub struct Logger;

impl Logger {
    /// Log an event with the given severity and fields.
    pub fn log(severity: Severity, event: &str, fields: &[(&str, &str)]) {
        let rendered = Self::render(severity, event, fields);
        match severity {
            Severity::Trace => tracing::trace!(target: "replicore", event, "{}", rendered),
            Severity::Info => tracing::info!(target: "replicore", event, "{}", rendered),
            Severity::Warn => tracing::warn!(target: "replicore", event, "{}", rendered),
            Severity::Error | Severity::Fatal => {
                tracing::error!(target: "replicore", event, "{}", rendered)
            }
        }
    }

    /// Render an event as a single JSON line with sorted keys.
    pub fn render(severity: Severity, event: &str, fields: &[(&str, &str)]) -> String {
        let mut map = Map::new();
        for (key, value) in fields {
            map.insert((*key).to_string(), Value::String((*value).to_string()));
        }
        map.insert("event".to_string(), Value::String(event.to_string()));
        map.insert(
            "severity".to_string(),
            Value::String(severity.as_str().to_string()),
        );
        Value::Object(map).to_string()
    }

    /// Log at TRACE level
    pub fn trace(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Trace, event, fields);
    }

    /// Log at INFO level
    pub fn info(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Info, event, fields);
    }

    /// Log at WARN level
    pub fn warn(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Warn, event, fields);
    }

    /// Log at ERROR level
    pub fn error(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Error, event, fields);
    }

    /// Log at FATAL level
    pub fn fatal(event: &str, fields: &[(&str, &str)]) {
        Self::log(Severity::Fatal, event, fields);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Trace < Severity::Info);
        assert!(Severity::Info < Severity::Warn);
        assert!(Severity::Warn < Severity::Error);
        assert!(Severity::Error < Severity::Fatal);
    }

    #[test]
    fn test_render_is_json() {
        let output = Logger::render(Severity::Warn, "QUORUM_SELECTED", &[("lsn", "5")]);
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["event"], "QUORUM_SELECTED");
        assert_eq!(parsed["severity"], "WARN");
        assert_eq!(parsed["lsn"], "5");
    }

    #[test]
    fn test_render_deterministic_ordering() {
        let a = Logger::render(Severity::Info, "E", &[("zebra", "1"), ("apple", "2")]);
        let b = Logger::render(Severity::Info, "E", &[("apple", "2"), ("zebra", "1")]);
        assert_eq!(a, b);
        assert!(a.find("apple").unwrap() < a.find("zebra").unwrap());
    }

    #[test]
    fn test_render_escapes_special_chars() {
        let output = Logger::render(Severity::Info, "E", &[("message", "a \"b\"\nc")]);
        let parsed: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed["message"], "a \"b\"\nc");
        assert!(!output.contains('\n'));
    }

    #[test]
    fn test_log_does_not_panic_without_subscriber() {
        Logger::info("TEST_EVENT", &[("k", "v")]);
        Logger::fatal("TEST_FATAL", &[]);
    }
}
