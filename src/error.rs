use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Failures surfaced by initialization and configuration
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid endpoint {name}='{value}': {reason}")]
    InvalidEndpoint {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("Metrics recorder error: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("Sentry initialization error: {0}")]
    Sentry(#[from] sentry::types::ParseDsnError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("OTLP exporter error: {0}")]
    Otlp(String),

    #[error("Remote export requires a running tokio runtime")]
    NoRuntime,
}

/// Fixed failure signalled to the caller after a recovered panic
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("internal error")]
pub struct InternalError;

impl IntoResponse for InternalError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": "internal_error",
            }
        }));

        (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
    }
}

/// Error synthesized from a recovered panic payload
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("panic: {0}")]
pub struct PanicError(pub String);

impl PanicError {
    pub fn from_payload(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = TelemetryError::Config("service_name cannot be empty".to_string());
        assert_eq!(
            error.to_string(),
            "Configuration error: service_name cannot be empty"
        );
    }

    #[test]
    fn test_panic_error_from_payload() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("index out of bounds");
        assert_eq!(PanicError::from_payload(payload.as_ref()).to_string(), "panic: index out of bounds");

        let payload: Box<dyn std::any::Any + Send> = Box::new(format!("code {}", 7));
        assert_eq!(PanicError::from_payload(payload.as_ref()).0, "code 7");

        let payload: Box<dyn std::any::Any + Send> = Box::new(42u8);
        assert_eq!(PanicError::from_payload(payload.as_ref()).0, "unknown panic payload");
    }

    #[tokio::test]
    async fn test_internal_error_response() {
        let response = InternalError.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
