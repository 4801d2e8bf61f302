//! Correlated logs, spans and metrics with asynchronous log export
//!
//! Every emission through a [`CorrelatedLogger`] writes one structured log
//! entry, finalizes the operation's span with a sorted attribute snapshot,
//! records per-severity metrics and, when enabled, ships a copy to a Loki
//! aggregator through a bounded background queue.
//!
//! ```no_run
//! # async fn run() -> Result<(), logspan::TelemetryError> {
//! let config = logspan::TelemetryConfig::disabled("orders", "orders-job");
//! let (telemetry, guard) = logspan::init(config)?;
//!
//! let mut logger = telemetry.logger(&logspan::Context::new(), "create_order");
//! logger.with_field("order_id", "123").info("received");
//!
//! guard.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod attributes;
pub mod backend;
pub mod config;
pub mod context;
pub mod entry;
pub mod error;
pub mod export;
pub mod logger;
pub mod metrics;
pub mod middleware;
pub mod otlp;
pub mod panic;
pub mod reporter;
pub mod server;
pub mod signals;
pub mod span;
pub mod telemetry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tracer;

pub use attributes::{Attribute, AttributeSet};
pub use config::{load_config, TelemetryConfig};
pub use context::{Context, LoggerHandle};
pub use entry::{LogEntry, Severity};
pub use error::{InternalError, PanicError, TelemetryError};
pub use export::{BackpressurePolicy, ExportJob, Exporter};
pub use logger::{CorrelatedLogger, Timer};
pub use middleware::{trace_request, RequestLogger, RequestTelemetry};
pub use otlp::OtlpTracer;
pub use panic::PanicGuard;
pub use span::{SpanContext, SpanHandle};
pub use telemetry::{init, init_tracing, ShutdownGuard, Telemetry};
