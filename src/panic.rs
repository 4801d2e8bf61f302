//! Panic recovery for request handlers and other protected scopes

use crate::context::{Context, LoggerHandle};
use crate::error::{InternalError, PanicError};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

/// Converts a panic in the protected scope into an error-level emission
///
/// The guard is consumed by [`catch`](Self::catch) or
/// [`catch_future`](Self::catch_future), so it runs exactly once. The panic
/// is not re-raised: the caller receives [`InternalError`] instead.
pub struct PanicGuard {
    ctx: Context,
    own: LoggerHandle,
}

impl PanicGuard {
    pub fn new(ctx: Context, own: LoggerHandle) -> Self {
        Self { ctx, own }
    }

    pub fn catch<R>(self, f: impl FnOnce() -> R) -> Result<R, InternalError> {
        match std::panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => Ok(value),
            Err(payload) => Err(self.recover(payload)),
        }
    }

    pub async fn catch_future<F: Future>(self, fut: F) -> Result<F::Output, InternalError> {
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(value) => Ok(value),
            Err(payload) => Err(self.recover(payload)),
        }
    }

    /// Emit the recovered panic on the context's logger, or on the guard's own
    fn recover(self, payload: Box<dyn Any + Send>) -> InternalError {
        let err = PanicError::from_payload(payload.as_ref());
        let handle = self.ctx.logger().cloned().unwrap_or(self.own);

        handle.lock().with_error(err).error("unhandled panic");
        InternalError
    }
}
