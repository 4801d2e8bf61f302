//! In-memory collaborators for tests
//!
//! Each fake records what it receives. Fakes built by [`Harness`] also
//! append to a shared [`Journal`], so tests can check the relative order of
//! log writes, export sends and metric records.
//!
//! Compiled for unit tests and behind the `testing` feature.

use crate::attributes::Attribute;
use crate::backend::LogBackend;
use crate::config::TelemetryConfig;
use crate::entry::{LogEntry, Severity};
use crate::export::{ExportError, ExportJob, Exporter, JobSink};
use crate::metrics::MetricsSink;
use crate::reporter::{ErrorReporter, Extras, Tags};
use crate::span::SpanContext;
use crate::telemetry::Telemetry;
use crate::tracer::Tracer;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Ordered record of collaborator calls shared between fakes
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<&'static str>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, event: &'static str) {
        lock(&self.0).push(event);
    }

    pub fn entries(&self) -> Vec<&'static str> {
        lock(&self.0).clone()
    }
}

#[derive(Default)]
pub struct MemoryLogBackend {
    entries: Mutex<Vec<LogEntry>>,
    journal: Journal,
}

impl MemoryLogBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            entries: Mutex::default(),
            journal,
        }
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        lock(&self.entries).clone()
    }
}

impl LogBackend for MemoryLogBackend {
    fn write(&self, entry: &LogEntry) {
        self.journal.record("log");
        lock(&self.entries).push(entry.clone());
    }
}

/// One call received by [`MemoryTracer`]
#[derive(Debug, Clone, PartialEq)]
pub enum TracerCall {
    Start { span: SpanContext },
    SetAttributes { span_id: String, attrs: Vec<Attribute> },
    AddEvent { span_id: String, name: String, attrs: Vec<Attribute> },
    RecordError { span_id: String, message: String },
    End { span_id: String },
}

/// Tracer handing out real IDs and recording every call
#[derive(Default)]
pub struct MemoryTracer {
    calls: Mutex<Vec<TracerCall>>,
}

impl MemoryTracer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<TracerCall> {
        lock(&self.calls).clone()
    }

    pub fn started(&self) -> Vec<SpanContext> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TracerCall::Start { span } => Some(span),
                _ => None,
            })
            .collect()
    }

    /// Span IDs in the order their spans were ended
    pub fn ended(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TracerCall::End { span_id } => Some(span_id),
                _ => None,
            })
            .collect()
    }

    pub fn errors_for(&self, span_id: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TracerCall::RecordError { span_id: id, message } if id == span_id => Some(message),
                _ => None,
            })
            .collect()
    }

    /// Every attribute batch set on the span, in call order
    pub fn attributes_for(&self, span_id: &str) -> Vec<Vec<Attribute>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TracerCall::SetAttributes { span_id: id, attrs } if id == span_id => Some(attrs),
                _ => None,
            })
            .collect()
    }

    pub fn events_for(&self, span_id: &str) -> Vec<(String, Vec<Attribute>)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TracerCall::AddEvent { span_id: id, name, attrs } if id == span_id => Some((name, attrs)),
                _ => None,
            })
            .collect()
    }

    fn push(&self, call: TracerCall) {
        lock(&self.calls).push(call);
    }
}

impl Tracer for MemoryTracer {
    fn start_span(&self, parent: Option<&SpanContext>, name: &str) -> SpanContext {
        let span = match parent {
            Some(parent) if parent.is_valid() => parent.child(name),
            _ => SpanContext::new_root(name),
        };
        self.push(TracerCall::Start { span: span.clone() });
        span
    }

    fn set_attributes(&self, span: &SpanContext, attrs: &[Attribute]) {
        self.push(TracerCall::SetAttributes {
            span_id: span.span_id.clone(),
            attrs: attrs.to_vec(),
        });
    }

    fn add_event(&self, span: &SpanContext, name: &str, attrs: &[Attribute]) {
        self.push(TracerCall::AddEvent {
            span_id: span.span_id.clone(),
            name: name.to_string(),
            attrs: attrs.to_vec(),
        });
    }

    fn record_error(&self, span: &SpanContext, err: &(dyn std::error::Error + Send + Sync + 'static)) {
        self.push(TracerCall::RecordError {
            span_id: span.span_id.clone(),
            message: err.to_string(),
        });
    }

    fn end_span(&self, span: &SpanContext) {
        self.push(TracerCall::End {
            span_id: span.span_id.clone(),
        });
    }
}

#[derive(Default)]
pub struct MemoryMetrics {
    counts: Mutex<Vec<Severity>>,
    durations: Mutex<Vec<(Severity, f64)>>,
    journal: Journal,
}

impl MemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    pub fn counts(&self) -> Vec<Severity> {
        lock(&self.counts).clone()
    }

    pub fn durations(&self) -> Vec<(Severity, f64)> {
        lock(&self.durations).clone()
    }
}

impl MetricsSink for MemoryMetrics {
    fn increment_count(&self, severity: Severity) {
        self.journal.record("metrics.count");
        lock(&self.counts).push(severity);
    }

    fn record_duration(&self, severity: Severity, millis: f64) {
        self.journal.record("metrics.duration");
        lock(&self.durations).push((severity, millis));
    }
}

#[derive(Default)]
pub struct MemoryExporter {
    jobs: Mutex<Vec<ExportJob>>,
    journal: Journal,
}

impl MemoryExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_journal(journal: Journal) -> Self {
        Self {
            jobs: Mutex::default(),
            journal,
        }
    }

    pub fn jobs(&self) -> Vec<ExportJob> {
        lock(&self.jobs).clone()
    }
}

impl Exporter for MemoryExporter {
    fn send(&self, job: ExportJob) {
        self.journal.record("export");
        lock(&self.jobs).push(job);
    }
}

/// One error received by [`MemoryReporter`]
#[derive(Debug, Clone)]
pub struct CapturedError {
    pub message: String,
    pub tags: Tags,
    pub extras: Extras,
}

#[derive(Default)]
pub struct MemoryReporter {
    captured: Mutex<Vec<CapturedError>>,
}

impl MemoryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn captured(&self) -> Vec<CapturedError> {
        lock(&self.captured).clone()
    }
}

impl ErrorReporter for MemoryReporter {
    fn capture_error(&self, err: &(dyn std::error::Error + Send + Sync + 'static), tags: &Tags, extras: &Extras) {
        lock(&self.captured).push(CapturedError {
            message: err.to_string(),
            tags: tags.clone(),
            extras: extras.clone(),
        });
    }
}

/// Aggregator stand-in for the export consumer
#[derive(Default)]
pub struct MemorySink {
    jobs: Mutex<Vec<ExportJob>>,
    attempts: AtomicUsize,
    failures_left: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the first `n` pushes with 503
    pub fn failing_first(n: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(n),
            ..Self::default()
        }
    }

    pub fn jobs(&self) -> Vec<ExportJob> {
        lock(&self.jobs).clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.jobs().into_iter().map(|job| job.message).collect()
    }

    /// Number of push calls, failed ones included
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobSink for MemorySink {
    async fn push(&self, jobs: &[ExportJob]) -> Result<(), ExportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(ExportError::Status {
                status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                body: "unavailable".to_string(),
            });
        }

        lock(&self.jobs).extend_from_slice(jobs);
        Ok(())
    }
}

/// A [`Telemetry`] wired to in-memory fakes
pub struct Harness {
    pub telemetry: Telemetry,
    pub logs: Arc<MemoryLogBackend>,
    pub tracer: Arc<MemoryTracer>,
    pub metrics: Arc<MemoryMetrics>,
    pub exporter: Arc<MemoryExporter>,
    pub reporter: Arc<MemoryReporter>,
    pub journal: Journal,
}

impl Harness {
    pub fn new(config: TelemetryConfig) -> Self {
        let journal = Journal::new();
        let logs = Arc::new(MemoryLogBackend::with_journal(journal.clone()));
        let tracer = Arc::new(MemoryTracer::new());
        let metrics = Arc::new(MemoryMetrics::with_journal(journal.clone()));
        let exporter = Arc::new(MemoryExporter::with_journal(journal.clone()));
        let reporter = Arc::new(MemoryReporter::new());

        let telemetry = Telemetry::builder(config)
            .log_backend(logs.clone())
            .tracer(tracer.clone())
            .metrics(metrics.clone())
            .exporter(exporter.clone())
            .reporter(reporter.clone())
            .build();

        Self {
            telemetry,
            logs,
            tracer,
            metrics,
            exporter,
            reporter,
            journal,
        }
    }
}
