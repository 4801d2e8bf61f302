//! Structured-log backend

use crate::entry::{LogEntry, Severity, JOB, LEVEL, SERVICE};
use serde_json::Value;
use std::fmt;

/// Receives one entry per emission: severity, message and the ordered field list
pub trait LogBackend: Send + Sync {
    fn write(&self, entry: &LogEntry);
}

/// Writes entries as `tracing` events
///
/// Correlation fields become event fields; the caller's fields are rendered
/// as one JSON object, in insertion order, under `fields`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingBackend;

/// Renders caller fields as a JSON object without reordering them
struct OrderedFields<'a>(&'a LogEntry);

impl fmt::Display for OrderedFields<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, value)) in self.0.caller_fields().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}:{}", Value::from(key.as_str()), value)?;
        }
        f.write_str("}")
    }
}

fn field_str<'a>(entry: &'a LogEntry, key: &str) -> &'a str {
    entry.field(key).and_then(Value::as_str).unwrap_or("")
}

impl LogBackend for TracingBackend {
    fn write(&self, entry: &LogEntry) {
        let job = field_str(entry, JOB);
        let service = field_str(entry, SERVICE);
        let level = field_str(entry, LEVEL);
        let fields = OrderedFields(entry);
        let message = entry.message.as_str();

        // `tracing` levels must be known at compile time
        macro_rules! emit {
            ($lvl:expr) => {
                tracing::event!(
                    target: "logspan",
                    $lvl,
                    trace_id = %entry.trace_id,
                    span_id = %entry.span_id,
                    job = job,
                    service = service,
                    level = level,
                    fields = %fields,
                    "{}",
                    message
                )
            };
        }

        match entry.severity {
            Severity::Debug => emit!(tracing::Level::DEBUG),
            Severity::Info => emit!(tracing::Level::INFO),
            Severity::Warn => emit!(tracing::Level::WARN),
            Severity::Error | Severity::Fatal => emit!(tracing::Level::ERROR),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{SPAN_ID, TRACE_ID};
    use serde_json::json;

    fn entry(severity: Severity) -> LogEntry {
        LogEntry {
            severity,
            message: "received".to_string(),
            trace_id: "t".repeat(32),
            span_id: "s".repeat(16),
            fields: vec![
                (TRACE_ID.to_string(), json!("t".repeat(32))),
                (SPAN_ID.to_string(), json!("s".repeat(16))),
                (JOB.to_string(), json!("job")),
                (SERVICE.to_string(), json!("svc")),
                (LEVEL.to_string(), json!(severity.as_str())),
                ("zeta".to_string(), json!("last")),
                ("alpha".to_string(), json!(7)),
            ],
        }
    }

    #[test]
    fn test_ordered_fields_keep_insertion_order() {
        let entry = entry(Severity::Info);
        assert_eq!(OrderedFields(&entry).to_string(), r#"{"zeta":"last","alpha":7}"#);
    }

    #[test]
    fn test_write_every_severity() {
        for severity in Severity::ALL {
            TracingBackend.write(&entry(severity));
        }
    }
}
