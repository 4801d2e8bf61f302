//! Asynchronous export of log entries to a remote aggregator
//!
//! ```text
//! logger ──send──▶ ExportQueue (bounded, policy on full)
//!                       │
//!                       ▼  background task: batch by size / interval
//!                  JobSink::push ──▶ Loki push API
//! ```
//!
//! Delivery is at-most-once. Failures are logged here and never reach the
//! emitting caller.

pub mod job;
pub mod loki;
pub mod queue;

pub use job::ExportJob;
pub use loki::{ExportError, JobSink, LokiClient};
pub use queue::{BackpressurePolicy, EnqueueOutcome, ExportQueue, ExportWorker, QueueSettings};

/// Capability to ship an entry off the caller's path
pub trait Exporter: Send + Sync {
    fn send(&self, job: ExportJob);
}

/// Exporter used when remote export is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExporter;

impl Exporter for NoopExporter {
    fn send(&self, _job: ExportJob) {}
}
