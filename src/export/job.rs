use crate::entry::{LogEntry, Severity};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// The representation of a log entry shipped to the aggregator
///
/// Its label set `{level, job, service, trace_id, span_id}` plus the message
/// is the contract external dashboards query against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportJob {
    pub severity: Severity,
    pub message: String,
    pub trace_id: String,
    pub span_id: String,
    pub job: String,
    pub service: String,
    /// Emission time, Unix nanoseconds
    pub timestamp_ns: u128,
}

impl ExportJob {
    pub fn from_entry(entry: &LogEntry, job: &str, service: &str) -> Self {
        Self {
            severity: entry.severity,
            message: entry.message.clone(),
            trace_id: entry.trace_id.clone(),
            span_id: entry.span_id.clone(),
            job: job.to_string(),
            service: service.to_string(),
            timestamp_ns: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or_default(),
        }
    }

    pub fn labels(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("level", self.severity.as_str().to_string()),
            ("job", self.job.clone()),
            ("service", self.service.clone()),
            ("trace_id", self.trace_id.clone()),
            ("span_id", self.span_id.clone()),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_the_stable_schema() {
        let entry = LogEntry {
            severity: Severity::Warn,
            message: "disk almost full".to_string(),
            trace_id: "a".repeat(32),
            span_id: "b".repeat(16),
            fields: Vec::new(),
        };

        let job = ExportJob::from_entry(&entry, "billing-job", "billing");
        let labels = job.labels();

        let keys: Vec<_> = labels.keys().copied().collect();
        assert_eq!(keys, vec!["job", "level", "service", "span_id", "trace_id"]);
        assert_eq!(labels["level"], "warn");
        assert_eq!(labels["job"], "billing-job");
        assert_eq!(labels["service"], "billing");
        assert_eq!(job.message, "disk almost full");
        assert!(job.timestamp_ns > 0);
    }
}
