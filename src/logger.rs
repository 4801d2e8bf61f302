//! Correlated logger
//!
//! A [`CorrelatedLogger`] belongs to one logical operation. Every emission
//! writes one structured entry, optionally ships a copy to the export queue,
//! attaches the sorted attribute snapshot to the operation's span, ends the
//! span and records the per-severity metrics, in that order.
//!
//! The span is started on the first emission and ended by it. Later
//! emissions reuse the same (ended) span identity; the span is never started
//! again and ending it again is a no-op.

use crate::attributes::{Attribute, AttributeSet};
use crate::context::Context;
use crate::entry::{stringify, LogEntry, Severity, JOB, LEVEL, SERVICE, SPAN_ID, TRACE_ID};
use crate::export::ExportJob;
use crate::reporter::{Extras, Tags};
use crate::span::{SharedError, SpanContext, SpanHandle};
use crate::telemetry::Telemetry;
use serde_json::Value;
use std::error::Error;
use std::sync::Arc;
use std::time::Instant;

pub struct CorrelatedLogger {
    telemetry: Telemetry,
    ctx: Context,
    name: String,
    span: SpanHandle,
    /// Native values, in insertion order, for the log backend
    fields: AttributeSet,
    /// String mirror of `fields` plus emission attributes, for the span
    span_attrs: AttributeSet,
    start: Instant,
}

impl CorrelatedLogger {
    /// Logger whose span starts on first emission, parented to `ctx`'s span
    pub fn new(telemetry: Telemetry, ctx: Context, name: &str) -> Self {
        let span = SpanHandle::new(telemetry.tracer());
        Self::with_span(telemetry, ctx, name, span)
    }

    fn with_span(telemetry: Telemetry, ctx: Context, name: &str, span: SpanHandle) -> Self {
        Self {
            telemetry,
            ctx,
            name: name.to_string(),
            span,
            fields: AttributeSet::new(),
            span_attrs: AttributeSet::new(),
            start: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Attach a field to every following entry, mirrored as a span attribute
    pub fn with_field(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let key = key.into();
        let value = value.into();
        self.span_attrs.set(key.clone(), stringify(&value));
        self.fields.set(key, value);
        self
    }

    pub fn with_fields<I, K, V>(&mut self, fields: I) -> &mut Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        for (key, value) in fields {
            self.with_field(key, value);
        }
        self
    }

    /// Attach an error
    ///
    /// The error is recorded on the span when it ends, added as the `error`
    /// field and attribute, and forwarded to the error reporter right away.
    pub fn with_error<E>(&mut self, err: E) -> &mut Self
    where
        E: Into<Box<dyn Error + Send + Sync>>,
    {
        let err: SharedError = Arc::from(err.into());
        let message = err.to_string();

        self.span.set_error(err.clone());
        self.with_field("error", message.clone());

        let extras = Extras::from([("error".to_string(), Value::from(message))]);
        self.telemetry.reporter().capture_error(err.as_ref(), &Tags::new(), &extras);
        self
    }

    /// The error attached by the last [`with_error`](Self::with_error)
    pub fn recorded_error(&self) -> Option<&SharedError> {
        self.span.error()
    }

    pub fn debug(&mut self, message: &str) {
        self.emit(Severity::Debug, message);
    }

    pub fn info(&mut self, message: &str) {
        self.emit(Severity::Info, message);
    }

    pub fn warn(&mut self, message: &str) {
        self.emit(Severity::Warn, message);
    }

    pub fn error(&mut self, message: &str) {
        self.emit(Severity::Error, message);
    }

    /// Emit at fatal severity, then exit the process with status 1
    pub fn fatal(&mut self, message: &str) -> ! {
        self.emit(Severity::Fatal, message);
        std::process::exit(1)
    }

    fn emit(&mut self, severity: Severity, message: &str) {
        let span = self.ensure_span();
        let config = self.telemetry.config();

        let mut fields: Vec<Attribute> = Vec::with_capacity(5 + self.fields.len());
        fields.push((TRACE_ID.to_string(), Value::from(span.trace_id.as_str())));
        fields.push((SPAN_ID.to_string(), Value::from(span.span_id.as_str())));
        fields.push((JOB.to_string(), Value::from(config.job_name.as_str())));
        fields.push((SERVICE.to_string(), Value::from(config.service_name.as_str())));
        fields.push((LEVEL.to_string(), Value::from(severity.as_str())));
        fields.extend(self.fields.iter().map(|(k, v)| (k.to_string(), v.clone())));

        let entry = LogEntry {
            severity,
            message: message.to_string(),
            trace_id: span.trace_id,
            span_id: span.span_id,
            fields,
        };

        self.telemetry.log_backend().write(&entry);

        if config.enable_loki {
            let job = ExportJob::from_entry(&entry, &config.job_name, &config.service_name);
            self.telemetry.exporter().send(job);
        }

        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        self.span_attrs.set("log.message", message);
        self.span_attrs.set("log.level", severity.as_str());
        self.span_attrs.set("duration_ms", elapsed_ms);
        self.span.end(self.span_attrs.snapshot_sorted());

        let metrics = self.telemetry.metrics();
        metrics.increment_count(severity);
        metrics.record_duration(severity, elapsed_ms);
    }

    fn ensure_span(&mut self) -> SpanContext {
        let (span, started) = self.span.ensure_started(self.ctx.span(), &self.name);
        if started {
            self.ctx = self.ctx.with_span(span.clone());
        }
        span
    }

    fn current_span(&self) -> Option<&SpanContext> {
        self.span.context().or_else(|| self.ctx.span())
    }

    /// Add an event to the span; no-op unless the span is active
    pub fn span_event(&self, name: &str, attrs: &[Attribute]) {
        self.span.add_event(name, attrs);
    }

    pub fn set_span_attr(&self, key: &str, value: impl Into<Value>) {
        self.span.set_attribute(key, stringify(&value.into()));
    }

    pub fn set_span_error(&self, err: &(dyn Error + Send + Sync + 'static)) {
        self.span.record_error(err);
    }

    /// Logger for a nested operation
    ///
    /// The child's span starts immediately, parented to this logger's span
    /// (or to the context's span before the first emission). Fields are not
    /// inherited. A child dropped without emitting ends its span on drop.
    pub fn child(&self, name: &str) -> CorrelatedLogger {
        let span = SpanHandle::start(self.telemetry.tracer(), self.current_span(), name);
        let ctx = match span.context() {
            Some(span_ctx) => self.ctx.with_span(span_ctx.clone()),
            None => self.ctx.clone(),
        };
        Self::with_span(self.telemetry.clone(), ctx, name, span)
    }

    /// Run `f` inside a child span, ended when `f` returns or unwinds
    pub fn in_span<R>(&self, name: &str, f: impl FnOnce(&Context) -> R) -> R {
        let span = SpanHandle::start(self.telemetry.tracer(), self.current_span(), name);
        let ctx = match span.context() {
            Some(span_ctx) => self.ctx.with_span(span_ctx.clone()),
            None => self.ctx.clone(),
        };
        f(&ctx)
    }

    /// The context downstream work should be parented to
    pub fn ctx(&self) -> &Context {
        &self.ctx
    }

    pub fn span(&self) -> &SpanHandle {
        &self.span
    }

    pub fn fields(&self) -> &AttributeSet {
        &self.fields
    }

    /// Start a named timer that reports to this logger's span when stopped
    pub fn start(&self, name: &str) -> Timer<'_> {
        Timer {
            logger: self,
            name: name.to_string(),
            start: Instant::now(),
        }
    }
}

/// Named timer bound to a logger's span
pub struct Timer<'a> {
    logger: &'a CorrelatedLogger,
    name: String,
    start: Instant,
}

impl Timer<'_> {
    /// Record a `custom.duration_ms` event on the logger's span
    ///
    /// Each call records its own event.
    pub fn stop(&self) {
        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        self.logger
            .span_event(&self.name, &[("custom.duration_ms".to_string(), Value::from(elapsed_ms))]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryConfig;
    use crate::testing::{Harness, TracerCall};
    use serde_json::json;

    fn harness() -> Harness {
        Harness::new(TelemetryConfig::disabled("svc", "job"))
    }

    #[test]
    fn test_logger_creation() {
        let harness = harness();
        let mut logger = harness.telemetry.logger(&Context::new(), "TestLogger");
        logger.with_field("key", "value").info("test log");

        let entries = harness.logs.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].field("key"), Some(&json!("value")));
    }

    #[test]
    fn test_logger_error() {
        let harness = harness();
        let mut logger = harness.telemetry.logger(&Context::new(), "TestLogger");

        logger.with_error("mock error").error("error occurred");

        let recorded = logger.recorded_error().map(|e| e.to_string());
        assert_eq!(recorded.as_deref(), Some("mock error"));
    }

    #[test]
    fn test_field_values_stay_native_in_log_and_string_on_span() {
        let harness = harness();
        let mut logger = harness.telemetry.logger(&Context::new(), "op");
        logger.with_field("attempt", 3).with_field("ok", true).info("done");

        let entry = &harness.logs.entries()[0];
        assert_eq!(entry.field("attempt"), Some(&json!(3)));
        assert_eq!(entry.field("ok"), Some(&json!(true)));

        let final_attrs = logger.span().final_attributes();
        assert!(final_attrs.contains(&("attempt".to_string(), json!("3"))));
        assert!(final_attrs.contains(&("ok".to_string(), json!("true"))));
    }

    #[test]
    fn test_with_fields() {
        let harness = harness();
        let mut logger = harness.telemetry.logger(&Context::new(), "op");
        logger.with_fields([("a", json!(1)), ("b", json!("two"))]).debug("bulk");

        let entries = harness.logs.entries();
        let keys = entries[0].keys().into_iter().skip(5).collect::<Vec<_>>();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_span_mutators_before_first_emission_are_noops() {
        let harness = harness();
        let logger = harness.telemetry.logger(&Context::new(), "op");

        logger.span_event("early", &[]);
        logger.set_span_attr("k", "v");
        logger.start("timer").stop();

        assert!(harness.tracer.calls().is_empty());
    }

    #[test]
    fn test_set_span_attr_on_active_child() {
        let harness = harness();
        let parent = harness.telemetry.logger(&Context::new(), "parent");
        let child = parent.child("step");

        child.set_span_attr("rows", 12);
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        child.set_span_error(&err);

        let span_id = child.span().context().map(|s| s.span_id.clone()).unwrap();
        assert_eq!(
            harness.tracer.attributes_for(&span_id),
            vec![vec![("rows".to_string(), json!("12"))]]
        );
        assert_eq!(harness.tracer.errors_for(&span_id), vec!["disk".to_string()]);
    }

    #[test]
    fn test_ctx_carries_started_span() {
        let harness = harness();
        let mut logger = harness.telemetry.logger(&Context::new(), "op");
        assert!(logger.ctx().span().is_none());

        logger.info("first");
        let started = harness.tracer.started();
        assert_eq!(logger.ctx().span(), started.first());
    }

    #[test]
    fn test_in_span_ends_after_closure() {
        let harness = harness();
        let mut logger = harness.telemetry.logger(&Context::new(), "op");
        logger.info("start");

        let inner_id = logger.in_span("lookup", |ctx| ctx.span().map(|s| s.span_id.clone()));

        let inner_id = inner_id.unwrap();
        let outer = harness.tracer.started()[0].clone();
        let inner = harness.tracer.started()[1].clone();
        assert_eq!(inner.span_id, inner_id);
        assert_eq!(inner.parent_span_id, Some(outer.span_id));
        assert!(harness
            .tracer
            .calls()
            .contains(&TracerCall::End { span_id: inner_id }));
    }

    #[test]
    fn test_child_without_emission_releases_its_span() {
        let tracer = Arc::new(crate::tracer::LogTracer::new("svc"));
        let telemetry = Telemetry::builder(TelemetryConfig::disabled("svc", "job"))
            .tracer(tracer.clone())
            .build();

        for _ in 0..100 {
            let mut logger = telemetry.logger(&Context::new(), "request");
            {
                let lookup = logger.child("load_order");
                lookup.start("db.query").stop();
            }
            logger.info("order fetched");
        }

        assert_eq!(tracer.in_flight(), 0);
    }
}
