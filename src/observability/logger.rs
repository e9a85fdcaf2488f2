//! Structured event logger
//!
//! JSON lines on stdout/stderr, synchronous, one line per event.
//! Field ordering is deterministic (event, severity, then keys sorted).

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Write};

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Store and executor detail
    Debug = 0,
    /// Normal operations
    Info = 1,
    /// Recoverable issues
    Warn = 2,
    /// Operation failures
    Error = 3,
}

impl Severity {
    /// Returns the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Synchronous structured logger
pub struct Logger;

impl Logger {
    /// Log an event with the given severity and fields
    pub fn log(severity: Severity, event: &str, fields: &[(&str, String)]) {
        if severity >= Severity::Error {
            Self::log_to_writer(severity, event, fields, &mut io::stderr());
        } else {
            Self::log_to_writer(severity, event, fields, &mut io::stdout());
        }
    }

    fn log_to_writer<W: Write>(
        severity: Severity,
        event: &str,
        fields: &[(&str, String)],
        writer: &mut W,
    ) {
        let mut line = serde_json::Map::new();
        line.insert("event".into(), serde_json::Value::String(event.into()));
        line.insert(
            "severity".into(),
            serde_json::Value::String(severity.as_str().into()),
        );
        // BTreeMap gives sorted, stable key order
        let sorted: BTreeMap<&str, &String> = fields.iter().map(|(k, v)| (*k, v)).collect();
        for (key, value) in sorted {
            line.insert(key.into(), serde_json::Value::String(value.clone()));
        }
        let mut output = serde_json::Value::Object(line).to_string();
        output.push('\n');
        let _ = writer.write_all(output.as_bytes());
        let _ = writer.flush();
    }

    /// Log at DEBUG level
    pub fn debug(event: &str, fields: &[(&str, String)]) {
        Self::log(Severity::Debug, event, fields);
    }

    /// Log at INFO level
    pub fn info(event: &str, fields: &[(&str, String)]) {
        Self::log(Severity::Info, event, fields);
    }

    /// Log at WARN level
    pub fn warn(event: &str, fields: &[(&str, String)]) {
        Self::log(Severity::Warn, event, fields);
    }

    /// Log at ERROR level
    pub fn error(event: &str, fields: &[(&str, String)]) {
        Self::log(Severity::Error, event, fields);
    }
}

#[cfg(test)]
fn capture_log(severity: Severity, event: &str, fields: &[(&str, String)]) -> String {
    let mut buffer = Vec::new();
    Logger::log_to_writer(severity, event, fields, &mut buffer);
    String::from_utf8(buffer).unwrap()
}
