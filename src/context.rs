//! Explicit context propagation
//!
//! A [`Context`] carries the current span and, optionally, the logger of
//! the unit of work it belongs to. It is passed by value (or stored in
//! request extensions); nothing is kept in thread-locals.

use crate::logger::CorrelatedLogger;
use crate::panic::PanicGuard;
use crate::span::SpanContext;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Clone, Default)]
pub struct Context {
    span: Option<SpanContext>,
    logger: Option<LoggerHandle>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same context with `span` as the current span
    pub fn with_span(&self, span: SpanContext) -> Self {
        Self {
            span: Some(span),
            logger: self.logger.clone(),
        }
    }

    pub fn span(&self) -> Option<&SpanContext> {
        self.span.as_ref()
    }

    pub fn logger(&self) -> Option<&LoggerHandle> {
        self.logger.as_ref()
    }

    /// Same context carrying `logger`
    pub fn inject(&self, logger: LoggerHandle) -> Self {
        Self {
            span: self.span.clone(),
            logger: Some(logger),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("span", &self.span)
            .field("has_logger", &self.logger.is_some())
            .finish()
    }
}

/// Shared handle on a logger stored in a [`Context`]
///
/// A logger is meant for one unit of work; the mutex only makes the handle
/// storable in request extensions. Do not hold the lock across an `.await`.
#[derive(Clone)]
pub struct LoggerHandle(Arc<Mutex<CorrelatedLogger>>);

impl LoggerHandle {
    pub fn new(logger: CorrelatedLogger) -> Self {
        Self(Arc::new(Mutex::new(logger)))
    }

    /// Lock the logger. A panic while the lock was held does not make the
    /// logger unusable.
    pub fn lock(&self) -> MutexGuard<'_, CorrelatedLogger> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Guard converting a panic in the scope it protects into an error emission
    pub fn recover_panic(&self, ctx: &Context) -> PanicGuard {
        PanicGuard::new(ctx.clone(), self.clone())
    }

    pub fn ptr_eq(&self, other: &LoggerHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
