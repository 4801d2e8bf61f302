//! Error reporting collaborators

use serde_json::Value;
use std::collections::HashMap;

pub type Tags = HashMap<String, String>;
pub type Extras = HashMap<String, Value>;

/// Capability to forward an attached error to an error-tracking service
pub trait ErrorReporter: Send + Sync {
    fn capture_error(&self, err: &(dyn std::error::Error + Send + Sync + 'static), tags: &Tags, extras: &Extras);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ErrorReporter for NoopReporter {
    fn capture_error(&self, _err: &(dyn std::error::Error + Send + Sync + 'static), _tags: &Tags, _extras: &Extras) {}
}

/// Reports through the process-wide Sentry client
///
/// The client itself is initialized by [`crate::init`]; without it the
/// capture calls are no-ops.
#[derive(Debug, Clone, Default)]
pub struct SentryReporter {
    org: Option<String>,
}

impl SentryReporter {
    pub fn new(org: Option<String>) -> Self {
        Self {
            org: org.filter(|o| !o.is_empty()),
        }
    }
}

impl ErrorReporter for SentryReporter {
    fn capture_error(&self, err: &(dyn std::error::Error + Send + Sync + 'static), tags: &Tags, extras: &Extras) {
        sentry::with_scope(
            |scope| {
                if let Some(org) = &self.org {
                    scope.set_tag("org", org);
                }
                for (key, value) in tags {
                    scope.set_tag(key, value);
                }
                for (key, value) in extras {
                    scope.set_extra(key, value.clone());
                }
            },
            || sentry::capture_error(err),
        );
    }
}

/// Initialize the Sentry client from a DSN
pub fn init_sentry(
    dsn: &str,
    service_name: &str,
) -> Result<sentry::ClientInitGuard, sentry::types::ParseDsnError> {
    let dsn: sentry::types::Dsn = dsn.parse()?;

    let guard = sentry::init(sentry::ClientOptions {
        dsn: Some(dsn),
        release: sentry::release_name!(),
        server_name: Some(service_name.to_string().into()),
        ..Default::default()
    });

    tracing::info!(service = %service_name, "Sentry error reporting initialized");
    Ok(guard)
}
