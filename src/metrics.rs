use crate::entry::Severity;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Counter incremented once per emitted entry
pub const LOG_TOTAL: &str = "log_total";
/// Histogram of milliseconds between logger creation and emission
pub const LOG_DURATION_MS: &str = "log_duration_ms";

/// Per-emission metrics, tagged by severity
///
/// Implementations must never fail the caller.
pub trait MetricsSink: Send + Sync {
    fn increment_count(&self, severity: Severity);

    fn record_duration(&self, severity: Severity, millis: f64);
}

/// Records through the `metrics` facade. Without an installed recorder the
/// macros are no-ops, which covers the uninitialized case.
#[derive(Debug, Default, Clone, Copy)]
pub struct FacadeMetrics;

impl MetricsSink for FacadeMetrics {
    fn increment_count(&self, severity: Severity) {
        counter!(LOG_TOTAL, "level" => severity.as_str()).increment(1);
    }

    fn record_duration(&self, severity: Severity, millis: f64) {
        histogram!(LOG_DURATION_MS, "level" => severity.as_str()).record(millis);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment_count(&self, _severity: Severity) {}

    fn record_duration(&self, _severity: Severity, _millis: f64) {}
}

/// Install the Prometheus recorder with a global `service` label
///
/// Fails if a recorder is already installed for this process.
pub fn init_metrics(service_name: &str) -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new()
        .add_global_label("service", service_name)
        .install_recorder()?;

    init_metric_descriptions();

    Ok(handle)
}

/// Initialize metric descriptions (can be called multiple times safely)
fn init_metric_descriptions() {
    describe_counter!(LOG_TOTAL, "Total number of emitted log entries");
    describe_histogram!(
        LOG_DURATION_MS,
        "Milliseconds between logger creation and emission"
    );
}
