//! Span identity and lifecycle
//!
//! [`SpanContext`] is the identity of one span (trace ID, span ID, parent).
//! [`SpanHandle`] owns the lifecycle of a single span on behalf of a logger:
//! it is started lazily, may be mutated while active, and is ended at most
//! once. Every call after the end is a silent no-op. A handle dropped while
//! its span is still active ends the span with no extra attributes.

use crate::attributes::Attribute;
use crate::tracer::Tracer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Error shared between a logger, its span and the error reporter
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

pub const INVALID_TRACE_ID: &str = "00000000000000000000000000000000";
pub const INVALID_SPAN_ID: &str = "0000000000000000";

/// Identity of a span within a trace
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanContext {
    /// 32 lowercase hex characters, shared by every span of a trace
    pub trace_id: String,

    /// 16 lowercase hex characters
    pub span_id: String,

    /// Parent span ID (None for root spans)
    pub parent_span_id: Option<String>,

    pub name: String,

    /// Start time (Unix milliseconds)
    pub start_time: u64,
}

impl SpanContext {
    /// Create a root span with a fresh trace ID
    pub fn new_root(name: impl Into<String>) -> Self {
        Self {
            trace_id: new_trace_id(),
            span_id: new_span_id(),
            parent_span_id: None,
            name: name.into(),
            start_time: current_millis(),
        }
    }

    /// Create a child span inheriting the trace ID
    pub fn child(&self, name: impl Into<String>) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: new_span_id(),
            parent_span_id: Some(self.span_id.clone()),
            name: name.into(),
            start_time: current_millis(),
        }
    }

    /// The context handed out when tracing is disabled
    pub fn invalid(name: impl Into<String>) -> Self {
        Self {
            trace_id: INVALID_TRACE_ID.to_string(),
            span_id: INVALID_SPAN_ID.to_string(),
            parent_span_id: None,
            name: name.into(),
            start_time: current_millis(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.trace_id != INVALID_TRACE_ID && self.span_id != INVALID_SPAN_ID
    }

    /// Duration since span start (in milliseconds)
    pub fn duration_ms(&self) -> u64 {
        current_millis().saturating_sub(self.start_time)
    }
}

pub fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn new_span_id() -> String {
    loop {
        let id: u64 = rand::random();
        if id != 0 {
            return format!("{:016x}", id);
        }
    }
}

/// Get current time as Unix milliseconds
pub fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Lifecycle state of a [`SpanHandle`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpanState {
    Unstarted,
    Active(SpanContext),
    Ended(SpanContext),
}

/// Lifecycle wrapper around one span
pub struct SpanHandle {
    tracer: Arc<dyn Tracer>,
    state: SpanState,
    error: Option<SharedError>,
    final_attributes: Vec<Attribute>,
}

impl SpanHandle {
    pub fn new(tracer: Arc<dyn Tracer>) -> Self {
        Self {
            tracer,
            state: SpanState::Unstarted,
            error: None,
            final_attributes: Vec::new(),
        }
    }

    /// Start a span right away, as a child of `parent`
    pub fn start(tracer: Arc<dyn Tracer>, parent: Option<&SpanContext>, name: &str) -> Self {
        let mut handle = Self::new(tracer);
        handle.ensure_started(parent, name);
        handle
    }

    /// Start the span unless it has already been started (or ended).
    ///
    /// Returns the span's context and whether this call started it.
    pub fn ensure_started(&mut self, parent: Option<&SpanContext>, name: &str) -> (SpanContext, bool) {
        match &self.state {
            SpanState::Active(ctx) | SpanState::Ended(ctx) => (ctx.clone(), false),
            SpanState::Unstarted => {
                let ctx = self.tracer.start_span(parent, name);
                self.state = SpanState::Active(ctx.clone());
                (ctx, true)
            }
        }
    }

    pub fn state(&self) -> &SpanState {
        &self.state
    }

    pub fn context(&self) -> Option<&SpanContext> {
        match &self.state {
            SpanState::Active(ctx) | SpanState::Ended(ctx) => Some(ctx),
            SpanState::Unstarted => None,
        }
    }

    fn active(&self) -> Option<&SpanContext> {
        match &self.state {
            SpanState::Active(ctx) => Some(ctx),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active().is_some()
    }

    pub fn is_ended(&self) -> bool {
        matches!(self.state, SpanState::Ended(_))
    }

    pub fn add_event(&self, name: &str, attrs: &[Attribute]) {
        if let Some(ctx) = self.active() {
            self.tracer.add_event(ctx, name, attrs);
        }
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        if let Some(ctx) = self.active() {
            self.tracer.set_attributes(ctx, &[(key.into(), value.into())]);
        }
    }

    /// Record an error on the span immediately
    pub fn record_error(&self, err: &(dyn std::error::Error + Send + Sync + 'static)) {
        if let Some(ctx) = self.active() {
            self.tracer.record_error(ctx, err);
        }
    }

    /// Remember an error to be recorded when the span ends
    pub fn set_error(&mut self, err: SharedError) {
        self.error = Some(err);
    }

    pub fn error(&self) -> Option<&SharedError> {
        self.error.as_ref()
    }

    /// Attach `attrs`, record the pending error and end the span.
    ///
    /// Returns false (and touches nothing) unless the span was active.
    pub fn end(&mut self, attrs: Vec<Attribute>) -> bool {
        let ctx = match std::mem::replace(&mut self.state, SpanState::Unstarted) {
            SpanState::Active(ctx) => ctx,
            other => {
                self.state = other;
                return false;
            }
        };

        if !attrs.is_empty() {
            self.tracer.set_attributes(&ctx, &attrs);
        }
        if let Some(err) = &self.error {
            self.tracer.record_error(&ctx, err.as_ref());
        }
        self.tracer.end_span(&ctx);

        self.final_attributes = attrs;
        self.state = SpanState::Ended(ctx);
        true
    }

    /// Attributes attached by the call to [`end`](Self::end) that ended the span
    pub fn final_attributes(&self) -> &[Attribute] {
        &self.final_attributes
    }
}

impl Drop for SpanHandle {
    fn drop(&mut self) {
        self.end(Vec::new());
    }
}
