//! Severity levels and the per-emission log entry.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Field keys every entry carries ahead of the caller's own fields.
pub const TRACE_ID: &str = "trace_id";
pub const SPAN_ID: &str = "span_id";
pub const JOB: &str = "job";
pub const SERVICE: &str = "service";
pub const LEVEL: &str = "level";

/// Log severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Debug,
        Severity::Info,
        Severity::Warn,
        Severity::Error,
        Severity::Fatal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }

    /// Closest `tracing` level. `tracing` has no fatal level, so fatal maps to error.
    pub fn tracing_level(&self) -> tracing::Level {
        match self {
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error | Self::Fatal => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a severity name is not recognised
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown severity: {0}")]
pub struct UnknownSeverity(pub String);

impl FromStr for Severity {
    type Err = UnknownSeverity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            "fatal" => Ok(Self::Fatal),
            other => Err(UnknownSeverity(other.to_string())),
        }
    }
}

/// One structured log record, produced once per emission call
///
/// `fields` holds the full ordered field list handed to the log backend:
/// `trace_id, span_id, job, service, level` followed by the caller's fields
/// in insertion order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub severity: Severity,
    pub message: String,
    pub trace_id: String,
    pub span_id: String,
    pub fields: Vec<(String, Value)>,
}

impl LogEntry {
    /// Look up a field by key
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Field keys in the order the backend receives them
    pub fn keys(&self) -> Vec<&str> {
        self.fields.iter().map(|(k, _)| k.as_str()).collect()
    }

    /// Fields set by the caller, excluding the correlation fields
    pub fn caller_fields(&self) -> impl Iterator<Item = &(String, Value)> {
        self.fields
            .iter()
            .filter(|(k, _)| !matches!(k.as_str(), TRACE_ID | SPAN_ID | JOB | SERVICE | LEVEL))
    }
}

/// String form of a field value, as mirrored onto span attributes
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_severity_round_trips_through_str() {
        for severity in Severity::ALL {
            assert_eq!(severity.as_str().parse::<Severity>().unwrap(), severity);
        }
        assert_eq!("WARNING".parse::<Severity>().unwrap(), Severity::Warn);
        assert!("verbose".parse::<Severity>().is_err());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Error < Severity::Fatal);
        assert_eq!(Severity::Fatal.tracing_level(), tracing::Level::ERROR);
    }

    #[test]
    fn test_stringify() {
        assert_eq!(stringify(&json!("123")), "123");
        assert_eq!(stringify(&json!(123)), "123");
        assert_eq!(stringify(&json!(true)), "true");
        assert_eq!(stringify(&json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn test_caller_fields_skip_correlation_keys() {
        let entry = LogEntry {
            severity: Severity::Info,
            message: "hello".to_string(),
            trace_id: "t".to_string(),
            span_id: "s".to_string(),
            fields: vec![
                (TRACE_ID.to_string(), json!("t")),
                (SPAN_ID.to_string(), json!("s")),
                (JOB.to_string(), json!("job")),
                (SERVICE.to_string(), json!("svc")),
                (LEVEL.to_string(), json!("info")),
                ("order_id".to_string(), json!("123")),
            ],
        };

        let caller: Vec<_> = entry.caller_fields().map(|(k, _)| k.as_str()).collect();
        assert_eq!(caller, vec!["order_id"]);
        assert_eq!(entry.field(SERVICE), Some(&json!("svc")));
    }
}
