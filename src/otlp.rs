//! OpenTelemetry span shipping
//!
//! [`OtlpTracer`] drives an OpenTelemetry SDK tracer. Spans are kept in
//! flight keyed by span ID and handed to the SDK's batch processor when they
//! end; the processor pushes them to the collector over OTLP/gRPC.

use crate::attributes::Attribute;
use crate::error::TelemetryError;
use crate::span::SpanContext;
use crate::tracer::Tracer;
use dashmap::DashMap;
use opentelemetry::trace::{
    Span as _, SpanBuilder, SpanId, Status, TraceContextExt, TraceFlags, TraceId, TraceState,
    Tracer as _,
};
use opentelemetry::{Context as OtelContext, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use serde_json::Value;
use std::time::Duration;

/// Collector endpoint with a scheme; bare `host:port` defaults to `http://`
pub fn collector_endpoint(raw: &str) -> String {
    let raw = raw.trim();
    if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{}", raw)
    }
}

/// Build the tracer provider exporting to `collector` over OTLP/gRPC
///
/// Must run inside a tokio runtime: the gRPC channel is created on it.
pub fn init_otlp(
    collector: &str,
    service_name: &str,
    timeout: Duration,
) -> Result<SdkTracerProvider, TelemetryError> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(collector_endpoint(collector))
        .with_timeout(timeout)
        .build()
        .map_err(|e| TelemetryError::Otlp(e.to_string()))?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    Ok(SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_resource(resource)
        .build())
}

/// [`Tracer`] backed by an OpenTelemetry SDK tracer
pub struct OtlpTracer<T: opentelemetry::trace::Tracer> {
    tracer: T,
    in_flight: DashMap<String, T::Span>,
}

impl<T: opentelemetry::trace::Tracer> OtlpTracer<T> {
    pub fn new(tracer: T) -> Self {
        Self {
            tracer,
            in_flight: DashMap::new(),
        }
    }

    /// Number of spans started but not yet ended
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

fn parent_context(parent: Option<&SpanContext>) -> OtelContext {
    let remote = parent.filter(|p| p.is_valid()).and_then(|p| {
        let trace_id = TraceId::from_hex(&p.trace_id).ok()?;
        let span_id = SpanId::from_hex(&p.span_id).ok()?;
        Some(opentelemetry::trace::SpanContext::new(
            trace_id,
            span_id,
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        ))
    });

    match remote {
        Some(span_context) => OtelContext::new().with_remote_span_context(span_context),
        None => OtelContext::new(),
    }
}

fn key_value((key, value): &Attribute) -> KeyValue {
    let value: opentelemetry::Value = match value {
        Value::Bool(b) => (*b).into(),
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.into(),
            None => n.as_f64().unwrap_or_default().into(),
        },
        Value::String(s) => s.clone().into(),
        other => other.to_string().into(),
    };
    KeyValue::new(key.clone(), value)
}

impl<T> Tracer for OtlpTracer<T>
where
    T: opentelemetry::trace::Tracer + Send + Sync,
    T::Span: Send + Sync,
{
    fn start_span(&self, parent: Option<&SpanContext>, name: &str) -> SpanContext {
        let parent_cx = parent_context(parent);
        let builder = SpanBuilder::from_name(name.to_string());
        let span = self.tracer.build_with_context(builder, &parent_cx);

        let otel_ctx = span.span_context();
        let parent_span_id = parent_cx
            .has_active_span()
            .then(|| parent_cx.span().span_context().span_id().to_string());
        let ctx = SpanContext {
            trace_id: otel_ctx.trace_id().to_string(),
            span_id: otel_ctx.span_id().to_string(),
            parent_span_id,
            name: name.to_string(),
            start_time: crate::span::current_millis(),
        };

        self.in_flight.insert(ctx.span_id.clone(), span);
        ctx
    }

    fn set_attributes(&self, span: &SpanContext, attrs: &[Attribute]) {
        if let Some(mut otel_span) = self.in_flight.get_mut(&span.span_id) {
            otel_span.set_attributes(attrs.iter().map(key_value));
        }
    }

    fn add_event(&self, span: &SpanContext, name: &str, attrs: &[Attribute]) {
        if let Some(mut otel_span) = self.in_flight.get_mut(&span.span_id) {
            otel_span.add_event(name.to_string(), attrs.iter().map(key_value).collect());
        }
    }

    fn record_error(&self, span: &SpanContext, err: &(dyn std::error::Error + Send + Sync + 'static)) {
        if let Some(mut otel_span) = self.in_flight.get_mut(&span.span_id) {
            otel_span.record_error(err);
            otel_span.set_status(Status::error(err.to_string()));
        }
    }

    fn end_span(&self, span: &SpanContext) {
        if let Some((_, mut otel_span)) = self.in_flight.remove(&span.span_id) {
            otel_span.end();
        }
    }
}
