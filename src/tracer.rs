//! Tracing backends
//!
//! The [`Tracer`] trait is the narrow interface between a logger's span
//! handle and whatever records spans. Two implementations ship here:
//!
//! - [`LogTracer`]: keeps in-flight spans in memory and reports each
//!   finished span as a `tracing` event with its attributes and events.
//! - [`NoopTracer`]: hands out invalid (all-zero) span contexts and ignores
//!   every call. Used when tracing is disabled.

use crate::attributes::Attribute;
use crate::span::{current_millis, SpanContext};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};

pub trait Tracer: Send + Sync {
    /// Begin a span, as a child of `parent` when given
    fn start_span(&self, parent: Option<&SpanContext>, name: &str) -> SpanContext;

    fn set_attributes(&self, span: &SpanContext, attrs: &[Attribute]);

    fn add_event(&self, span: &SpanContext, name: &str, attrs: &[Attribute]);

    fn record_error(&self, span: &SpanContext, err: &(dyn std::error::Error + Send + Sync + 'static));

    fn end_span(&self, span: &SpanContext);
}

/// Tracer used when tracing is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn start_span(&self, _parent: Option<&SpanContext>, name: &str) -> SpanContext {
        SpanContext::invalid(name)
    }

    fn set_attributes(&self, _span: &SpanContext, _attrs: &[Attribute]) {}

    fn add_event(&self, _span: &SpanContext, _name: &str, _attrs: &[Attribute]) {}

    fn record_error(&self, _span: &SpanContext, _err: &(dyn std::error::Error + Send + Sync + 'static)) {}

    fn end_span(&self, _span: &SpanContext) {}
}

/// Event recorded on a span
#[derive(Debug, Clone, Serialize)]
pub struct SpanEvent {
    pub name: String,
    pub timestamp: u64,
    pub attributes: Map<String, Value>,
}

/// Finished span as reported by [`LogTracer`]
#[derive(Debug, Clone, Serialize)]
pub struct SpanRecord {
    pub trace_id: String,
    pub span_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub start_time: u64,
    pub end_time: u64,
    pub duration_ms: u64,
    pub status: &'static str,
    pub attributes: Map<String, Value>,
    pub events: Vec<SpanEvent>,
    pub errors: Vec<String>,
}

impl SpanRecord {
    fn open(ctx: &SpanContext) -> Self {
        Self {
            trace_id: ctx.trace_id.clone(),
            span_id: ctx.span_id.clone(),
            parent_span_id: ctx.parent_span_id.clone(),
            name: ctx.name.clone(),
            start_time: ctx.start_time,
            end_time: 0,
            duration_ms: 0,
            status: "ok",
            attributes: Map::new(),
            events: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// In-process tracer reporting finished spans through `tracing`
pub struct LogTracer {
    service_name: String,
    in_flight: DashMap<String, SpanRecord>,
}

impl LogTracer {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            in_flight: DashMap::new(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Number of spans started but not yet ended
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}

impl Tracer for LogTracer {
    fn start_span(&self, parent: Option<&SpanContext>, name: &str) -> SpanContext {
        let ctx = match parent {
            Some(parent) if parent.is_valid() => parent.child(name),
            _ => SpanContext::new_root(name),
        };
        self.in_flight.insert(ctx.span_id.clone(), SpanRecord::open(&ctx));
        ctx
    }

    fn set_attributes(&self, span: &SpanContext, attrs: &[Attribute]) {
        if let Some(mut record) = self.in_flight.get_mut(&span.span_id) {
            for (key, value) in attrs {
                record.attributes.insert(key.clone(), value.clone());
            }
        }
    }

    fn add_event(&self, span: &SpanContext, name: &str, attrs: &[Attribute]) {
        if let Some(mut record) = self.in_flight.get_mut(&span.span_id) {
            record.events.push(SpanEvent {
                name: name.to_string(),
                timestamp: current_millis(),
                attributes: attrs.iter().cloned().collect(),
            });
        }
    }

    fn record_error(&self, span: &SpanContext, err: &(dyn std::error::Error + Send + Sync + 'static)) {
        if let Some(mut record) = self.in_flight.get_mut(&span.span_id) {
            record.status = "error";
            record.errors.push(err.to_string());
        }
    }

    fn end_span(&self, span: &SpanContext) {
        // Removing the record makes a second end a no-op
        let Some((_, mut record)) = self.in_flight.remove(&span.span_id) else {
            return;
        };
        record.end_time = current_millis();
        record.duration_ms = record.end_time.saturating_sub(record.start_time);

        let attributes = Value::Object(record.attributes.clone());
        tracing::debug!(
            target: "logspan::span",
            service = %self.service_name,
            trace_id = %record.trace_id,
            span_id = %record.span_id,
            parent_span_id = record.parent_span_id.as_deref().unwrap_or(""),
            name = %record.name,
            duration_ms = record.duration_ms,
            status = record.status,
            events = record.events.len(),
            attributes = %attributes,
            "span finished"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_noop_tracer_returns_invalid_context() {
        let tracer = NoopTracer;
        let root = SpanContext::new_root("parent");
        let span = tracer.start_span(Some(&root), "child");
        assert!(!span.is_valid());
        assert_eq!(span.name, "child");
    }

    #[test]
    fn test_log_tracer_parents_spans() {
        let tracer = LogTracer::new("svc");
        let root = tracer.start_span(None, "root");
        let child = tracer.start_span(Some(&root), "child");

        assert_eq!(child.trace_id, root.trace_id);
        assert_eq!(child.parent_span_id.as_deref(), Some(root.span_id.as_str()));
        assert_eq!(tracer.in_flight(), 2);
    }

    #[test]
    fn test_log_tracer_ignores_invalid_parent() {
        let tracer = LogTracer::new("svc");
        let span = tracer.start_span(Some(&SpanContext::invalid("noop")), "root");
        assert!(span.is_valid());
        assert!(span.parent_span_id.is_none());
    }

    #[test]
    fn test_log_tracer_end_releases_span() {
        let tracer = LogTracer::new("svc");
        let span = tracer.start_span(None, "op");
        tracer.set_attributes(&span, &[("k".to_string(), json!("v"))]);
        tracer.add_event(&span, "step", &[]);

        tracer.end_span(&span);
        assert_eq!(tracer.in_flight(), 0);

        // Late calls are ignored
        tracer.set_attributes(&span, &[("k".to_string(), json!("late"))]);
        tracer.end_span(&span);
        assert_eq!(tracer.in_flight(), 0);
    }
}
