use crate::entry::Severity;
use crate::error::TelemetryError;
use crate::export::{BackpressurePolicy, QueueSettings};
use crate::otlp::collector_endpoint;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Process-wide telemetry configuration
///
/// Built once at startup and shared read-only by every component.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Identifies the tracer and the metrics `service` label
    pub service_name: String,
    /// Label attached to every entry
    pub job_name: String,

    pub enable_tracing: bool,
    pub enable_metrics: bool,
    pub enable_sentry: bool,
    pub enable_loki: bool,

    /// Minimum severity written by the structured-log backend
    pub log_level: String,
    /// "json" or "pretty"
    pub log_format: String,

    pub loki_url: String,
    /// OTLP/gRPC collector; empty reports spans locally through `tracing`
    pub otel_collector: String,
    pub sentry_dsn: String,
    pub sentry_org: String,

    pub export_queue_capacity: usize,
    pub export_backpressure: BackpressurePolicy,
    pub export_block_timeout_ms: u64,
    pub export_batch_size: usize,
    pub export_flush_interval_ms: u64,
    pub export_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "logspan".to_string(),
            job_name: "logspan-job".to_string(),
            enable_tracing: true,
            enable_metrics: true,
            enable_sentry: true,
            enable_loki: true,
            log_level: "info".to_string(),
            log_format: "json".to_string(),
            loki_url: "http://loki:3100/loki/api/v1/push".to_string(),
            otel_collector: "otel-collector:4317".to_string(),
            sentry_dsn: String::new(),
            sentry_org: String::new(),
            export_queue_capacity: 1000,
            export_backpressure: BackpressurePolicy::Block,
            export_block_timeout_ms: 100,
            export_batch_size: 100,
            export_flush_interval_ms: 500,
            export_timeout_secs: 5,
            shutdown_timeout_secs: 5,
        }
    }
}

impl TelemetryConfig {
    /// Everything disabled: no network, no global recorder, no Sentry client
    pub fn disabled(service_name: impl Into<String>, job_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            job_name: job_name.into(),
            enable_tracing: false,
            enable_metrics: false,
            enable_sentry: false,
            enable_loki: false,
            ..Self::default()
        }
    }

    pub fn min_severity(&self) -> Result<Severity, TelemetryError> {
        self.log_level
            .parse()
            .map_err(|e| TelemetryError::Config(format!("log_level: {}", e)))
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            capacity: self.export_queue_capacity,
            policy: self.export_backpressure,
            block_timeout: Duration::from_millis(self.export_block_timeout_ms),
            batch_size: self.export_batch_size,
            flush_interval: Duration::from_millis(self.export_flush_interval_ms),
        }
    }

    pub fn export_timeout(&self) -> Duration {
        Duration::from_secs(self.export_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Load configuration from an optional `logspan.{toml,yaml,json}` file and
/// the environment (`SERVICE_NAME`, `ENABLE_LOKI`, ...), on top of defaults
pub fn load_config() -> anyhow::Result<TelemetryConfig> {
    load_config_with(config::Environment::default())
}

/// Same as [`load_config`] with an explicit environment source
pub fn load_config_with(env: config::Environment) -> anyhow::Result<TelemetryConfig> {
    let config = config::Config::builder()
        .add_source(config::Config::try_from(&TelemetryConfig::default())?)
        .add_source(config::File::with_name("logspan").required(false))
        .add_source(env.try_parsing(true))
        .build()?;

    let cfg: TelemetryConfig = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

pub fn validate_config(cfg: &TelemetryConfig) -> Result<(), TelemetryError> {
    if cfg.service_name.trim().is_empty() {
        return Err(TelemetryError::Config("service_name cannot be empty".to_string()));
    }

    if cfg.job_name.trim().is_empty() {
        return Err(TelemetryError::Config("job_name cannot be empty".to_string()));
    }

    cfg.min_severity()?;

    if !matches!(cfg.log_format.as_str(), "json" | "pretty") {
        return Err(TelemetryError::Config(format!(
            "log_format must be 'json' or 'pretty', got '{}'",
            cfg.log_format
        )));
    }

    if cfg.enable_loki {
        url::Url::parse(&cfg.loki_url).map_err(|e| TelemetryError::InvalidEndpoint {
            name: "loki_url",
            value: cfg.loki_url.clone(),
            reason: e.to_string(),
        })?;

        if cfg.export_queue_capacity == 0 {
            return Err(TelemetryError::Config(
                "export_queue_capacity must be greater than 0".to_string(),
            ));
        }

        if cfg.export_batch_size == 0 {
            return Err(TelemetryError::Config(
                "export_batch_size must be greater than 0".to_string(),
            ));
        }

        if cfg.export_flush_interval_ms == 0 {
            return Err(TelemetryError::Config(
                "export_flush_interval_ms must be greater than 0".to_string(),
            ));
        }
    }

    // An empty collector keeps spans local
    if cfg.enable_tracing && !cfg.otel_collector.trim().is_empty() {
        url::Url::parse(&collector_endpoint(&cfg.otel_collector)).map_err(|e| {
            TelemetryError::InvalidEndpoint {
                name: "otel_collector",
                value: cfg.otel_collector.clone(),
                reason: e.to_string(),
            }
        })?;
    }

    if cfg.enable_sentry && cfg.sentry_dsn.trim().is_empty() {
        return Err(TelemetryError::Config(
            "sentry_dsn is required when enable_sentry is set".to_string(),
        ));
    }

    Ok(())
}
