//! Process-wide telemetry handle and initialization
//!
//! [`init`] builds every backend once from a [`TelemetryConfig`] and returns
//! a cheap-to-clone [`Telemetry`] handle plus a [`ShutdownGuard`] that must be
//! used once at process exit. Loggers hold a clone of the handle; nothing is
//! stored in globals except what the underlying crates require (the
//! `tracing` subscriber, the `metrics` recorder, the Sentry hub).

use crate::backend::{LogBackend, TracingBackend};
use crate::config::{validate_config, TelemetryConfig};
use crate::context::{Context, LoggerHandle};
use crate::error::TelemetryError;
use crate::export::{ExportQueue, ExportWorker, Exporter, LokiClient, NoopExporter};
use crate::logger::CorrelatedLogger;
use crate::metrics::{init_metrics, FacadeMetrics, MetricsSink, NoopMetrics};
use crate::reporter::{init_sentry, ErrorReporter, NoopReporter, SentryReporter};
use crate::otlp::{init_otlp, OtlpTracer};
use crate::tracer::{LogTracer, NoopTracer, Tracer};
use metrics_exporter_prometheus::PrometheusHandle;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::trace::SdkTracerProvider;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Clone)]
pub struct Telemetry {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<TelemetryConfig>,
    log_backend: Arc<dyn LogBackend>,
    tracer: Arc<dyn Tracer>,
    metrics: Arc<dyn MetricsSink>,
    exporter: Arc<dyn Exporter>,
    reporter: Arc<dyn ErrorReporter>,
    prometheus: Option<PrometheusHandle>,
}

impl Telemetry {
    /// Start assembling a handle from explicit collaborators
    pub fn builder(config: TelemetryConfig) -> TelemetryBuilder {
        TelemetryBuilder::new(config)
    }

    /// A fresh logger for one logical operation, parented to `ctx`'s span
    pub fn logger(&self, ctx: &Context, name: &str) -> CorrelatedLogger {
        CorrelatedLogger::new(self.clone(), ctx.clone(), name)
    }

    /// The logger stored in `ctx`, or a fresh one when there is none
    pub fn resolve(&self, ctx: &Context, name: &str) -> LoggerHandle {
        match ctx.logger() {
            Some(handle) => handle.clone(),
            None => LoggerHandle::new(self.logger(ctx, name)),
        }
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.inner.config
    }

    pub fn log_backend(&self) -> &dyn LogBackend {
        self.inner.log_backend.as_ref()
    }

    pub fn tracer(&self) -> Arc<dyn Tracer> {
        self.inner.tracer.clone()
    }

    pub fn metrics(&self) -> &dyn MetricsSink {
        self.inner.metrics.as_ref()
    }

    pub fn exporter(&self) -> &dyn Exporter {
        self.inner.exporter.as_ref()
    }

    pub fn reporter(&self) -> &dyn ErrorReporter {
        self.inner.reporter.as_ref()
    }

    /// Prometheus render handle, when metrics are enabled
    pub fn metrics_handle(&self) -> Option<&PrometheusHandle> {
        self.inner.prometheus.as_ref()
    }
}

/// Assembles a [`Telemetry`] handle. Collaborators not given default to no-ops.
pub struct TelemetryBuilder {
    config: TelemetryConfig,
    log_backend: Arc<dyn LogBackend>,
    tracer: Arc<dyn Tracer>,
    metrics: Arc<dyn MetricsSink>,
    exporter: Arc<dyn Exporter>,
    reporter: Arc<dyn ErrorReporter>,
    prometheus: Option<PrometheusHandle>,
}

impl TelemetryBuilder {
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            config,
            log_backend: Arc::new(TracingBackend),
            tracer: Arc::new(NoopTracer),
            metrics: Arc::new(NoopMetrics),
            exporter: Arc::new(NoopExporter),
            reporter: Arc::new(NoopReporter),
            prometheus: None,
        }
    }

    pub fn log_backend(mut self, backend: Arc<dyn LogBackend>) -> Self {
        self.log_backend = backend;
        self
    }

    pub fn tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn exporter(mut self, exporter: Arc<dyn Exporter>) -> Self {
        self.exporter = exporter;
        self
    }

    pub fn reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }

    pub fn build(self) -> Telemetry {
        Telemetry {
            inner: Arc::new(Inner {
                config: Arc::new(self.config),
                log_backend: self.log_backend,
                tracer: self.tracer,
                metrics: self.metrics,
                exporter: self.exporter,
                reporter: self.reporter,
                prometheus: self.prometheus,
            }),
        }
    }
}

/// Releases process-wide telemetry resources
///
/// Must be used once at shutdown to flush pending exports.
#[must_use = "pending exports are lost unless shutdown() is awaited"]
pub struct ShutdownGuard {
    export_worker: Option<ExportWorker>,
    tracer_provider: Option<SdkTracerProvider>,
    sentry: Option<sentry::ClientInitGuard>,
    timeout: std::time::Duration,
}

impl ShutdownGuard {
    pub async fn shutdown(mut self) {
        if let Some(worker) = self.export_worker.take() {
            tracing::info!("Flushing pending log exports");
            worker.shutdown(self.timeout).await;
        }

        if let Some(provider) = self.tracer_provider.take() {
            tracing::info!("Flushing pending spans");
            // The batch processor blocks while it drains
            let flushed = tokio::time::timeout(
                self.timeout,
                tokio::task::spawn_blocking(move || provider.shutdown()),
            )
            .await;
            match flushed {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => tracing::warn!(error = %e, "Span exporter shutdown failed"),
                Ok(Err(e)) => tracing::error!(error = %e, "Span exporter shutdown task failed"),
                Err(_) => tracing::warn!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Span exporter did not finish before shutdown timeout"
                ),
            }
        }

        if let Some(sentry) = self.sentry.take() {
            sentry.flush(Some(self.timeout));
        }

        tracing::info!("Telemetry shut down");
    }
}

/// Initialize the `tracing` subscriber
///
/// `RUST_LOG` wins over `log_level` when set. Only the first call installs a
/// subscriber; later calls are ignored.
pub fn init_tracing(log_level: &str, log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if log_format == "json" {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

/// Build the process-wide telemetry from `config`
///
/// Must run inside a tokio runtime when `enable_loki` is set or spans go to
/// an OTLP collector, since the export consumer and the gRPC channel live on
/// it. With `enable_tracing` and an empty `otel_collector`, finished spans are
/// reported locally through `tracing` instead.
pub fn init(config: TelemetryConfig) -> Result<(Telemetry, ShutdownGuard), TelemetryError> {
    validate_config(&config)?;
    let min_severity = config.min_severity()?;

    init_tracing(min_severity.tracing_level().as_str(), &config.log_format);

    let mut builder = Telemetry::builder(config.clone());
    let mut guard = ShutdownGuard {
        export_worker: None,
        tracer_provider: None,
        sentry: None,
        timeout: config.shutdown_timeout(),
    };

    if config.enable_tracing {
        if config.otel_collector.trim().is_empty() {
            tracing::info!(service = %config.service_name, "Tracing enabled, spans reported locally");
            builder = builder.tracer(Arc::new(LogTracer::new(config.service_name.clone())));
        } else {
            if tokio::runtime::Handle::try_current().is_err() {
                return Err(TelemetryError::NoRuntime);
            }

            let provider = init_otlp(&config.otel_collector, &config.service_name, config.export_timeout())?;
            let tracer = OtlpTracer::new(provider.tracer(config.service_name.clone()));
            tracing::info!(
                service = %config.service_name,
                collector = %config.otel_collector,
                "Tracing enabled, exporting spans over OTLP"
            );

            builder = builder.tracer(Arc::new(tracer));
            guard.tracer_provider = Some(provider);
        }
    }

    if config.enable_metrics {
        let handle = init_metrics(&config.service_name)?;
        builder = builder.metrics(Arc::new(FacadeMetrics)).prometheus(handle);
    }

    if config.enable_sentry {
        guard.sentry = Some(init_sentry(&config.sentry_dsn, &config.service_name)?);
        let org = Some(config.sentry_org.clone());
        builder = builder.reporter(Arc::new(SentryReporter::new(org)));
    }

    if config.enable_loki {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(TelemetryError::NoRuntime);
        }

        let client = LokiClient::new(config.loki_url.clone(), config.export_timeout())?;
        let (queue, worker) = ExportQueue::spawn(Arc::new(client), config.queue_settings());
        tracing::info!(
            url = %config.loki_url,
            capacity = config.export_queue_capacity,
            policy = ?config.export_backpressure,
            "Remote log export enabled"
        );

        builder = builder.exporter(Arc::new(queue));
        guard.export_worker = Some(worker);
    }

    Ok((builder.build(), guard))
}
