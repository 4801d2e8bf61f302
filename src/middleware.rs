//! Per-request telemetry for axum
//!
//! [`trace_request`] starts a root span named `"<METHOD> <route>"`, creates
//! the request's logger with `method`, `path`, `ip` and `ua` fields, stores
//! both in the request extensions as a [`Context`] and runs the rest of the
//! stack under a [`PanicGuard`](crate::panic::PanicGuard).
//!
//! Install it with `route_layer` so the matched route template is known:
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/orders/:id", get(get_order))
//!     .route_layer(middleware::from_fn_with_state(
//!         RequestTelemetry::new(telemetry.clone(), "http"),
//!         trace_request,
//!     ));
//! ```

use crate::context::{Context, LoggerHandle};
use crate::span::SpanHandle;
use crate::telemetry::Telemetry;
use axum::{
    async_trait,
    extract::{ConnectInfo, FromRef, FromRequestParts, MatchedPath, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

/// Middleware state: the telemetry handle and the request loggers' name
#[derive(Clone)]
pub struct RequestTelemetry {
    telemetry: Telemetry,
    name: Arc<str>,
}

impl RequestTelemetry {
    pub fn new(telemetry: Telemetry, name: impl Into<Arc<str>>) -> Self {
        Self {
            telemetry,
            name: name.into(),
        }
    }
}

impl FromRef<RequestTelemetry> for Telemetry {
    fn from_ref(state: &RequestTelemetry) -> Self {
        state.telemetry.clone()
    }
}

pub async fn trace_request(
    State(state): State<RequestTelemetry>,
    mut req: Request,
    next: Next,
) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| path.clone());
    let ip = client_ip(&req);
    let ua = header_str(req.headers(), header::USER_AGENT.as_str()).unwrap_or_default();

    let mut root = SpanHandle::start(state.telemetry.tracer(), None, &format!("{} {}", method, route));
    let ctx = root
        .context()
        .map(|span| Context::new().with_span(span.clone()))
        .unwrap_or_default();

    let mut logger = state.telemetry.logger(&ctx, &state.name);
    logger
        .with_field("method", method)
        .with_field("path", path)
        .with_field("ip", ip)
        .with_field("ua", ua);

    let handle = LoggerHandle::new(logger);
    let ctx = ctx.inject(handle.clone());
    req.extensions_mut().insert(ctx.clone());

    let response = match handle.recover_panic(&ctx).catch_future(next.run(req)).await {
        Ok(response) => response,
        Err(internal) => internal.into_response(),
    };

    root.end(Vec::new());
    response
}

/// Client address: forwarding headers first, then the peer address
fn client_ip(req: &Request) -> String {
    let headers = req.headers();

    if let Some(forwarded) = header_str(headers, "x-forwarded-for") {
        if let Some(first) = forwarded.split(',').map(str::trim).find(|ip| !ip.is_empty()) {
            return first.to_string();
        }
    }

    if let Some(real_ip) = header_str(headers, "x-real-ip") {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default()
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[async_trait]
impl<S> FromRequestParts<S> for Context
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts.extensions.get::<Context>().cloned().unwrap_or_default())
    }
}

/// Extracts the request's logger, or a fresh one outside [`trace_request`]
pub struct RequestLogger(pub LoggerHandle);

#[async_trait]
impl<S> FromRequestParts<S> for RequestLogger
where
    Telemetry: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let ctx = parts.extensions.get::<Context>().cloned().unwrap_or_default();
        let telemetry = Telemetry::from_ref(state);
        Ok(RequestLogger(telemetry.resolve(&ctx, "request")))
    }
}
