use axum::{
    body::Body,
    extract::Path,
    http::{Request, StatusCode},
    middleware,
    routing::get,
    Router,
};
use logspan::testing::Harness;
use logspan::tracer::LogTracer;
use logspan::{
    trace_request, Context, RequestLogger, RequestTelemetry, Severity, Telemetry, TelemetryConfig,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

async fn get_order(Path(id): Path<String>, RequestLogger(logger): RequestLogger) -> String {
    logger.lock().with_field("order_id", id.clone()).info("order fetched");
    id
}

async fn quiet(ctx: Context) -> String {
    ctx.span().map(|s| s.name.clone()).unwrap_or_default()
}

async fn explode() -> String {
    panic!("handler exploded")
}

async fn stall() -> String {
    std::future::pending().await
}

async fn lookup_quietly(RequestLogger(logger): RequestLogger) -> &'static str {
    let logger = logger.lock();
    let lookup = logger.child("load_order");
    lookup.start("db.query").stop();
    "ok"
}

fn traced_app(tracer: Arc<LogTracer>) -> Router {
    let telemetry = Telemetry::builder(TelemetryConfig::disabled("svc", "job"))
        .tracer(tracer)
        .build();

    Router::new()
        .route("/stall", get(stall))
        .route("/lookup", get(lookup_quietly))
        .route_layer(middleware::from_fn_with_state(
            RequestTelemetry::new(telemetry.clone(), "http"),
            trace_request,
        ))
        .with_state(telemetry)
}

fn app(harness: &Harness) -> Router {
    Router::new()
        .route("/orders/:id", get(get_order))
        .route("/quiet", get(quiet))
        .route("/explode", get(explode))
        .route_layer(middleware::from_fn_with_state(
            RequestTelemetry::new(harness.telemetry.clone(), "http"),
            trace_request,
        ))
        .with_state(harness.telemetry.clone())
}

fn request(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("user-agent", "integration-test")
        .header("x-forwarded-for", "203.0.113.9")
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_request_logger_carries_request_fields() {
    let harness = Harness::new(TelemetryConfig::disabled("svc", "job"));

    let response = app(&harness).oneshot(request("/orders/42")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let entries = harness.logs.entries();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.message, "order fetched");
    assert_eq!(entry.field("method"), Some(&json!("GET")));
    assert_eq!(entry.field("path"), Some(&json!("/orders/42")));
    assert_eq!(entry.field("ip"), Some(&json!("203.0.113.9")));
    assert_eq!(entry.field("ua"), Some(&json!("integration-test")));
    assert_eq!(entry.field("order_id"), Some(&json!("42")));
}

#[tokio::test]
async fn test_root_span_named_after_route() {
    let harness = Harness::new(TelemetryConfig::disabled("svc", "job"));

    app(&harness).oneshot(request("/orders/42")).await.unwrap();

    let started = harness.tracer.started();
    assert_eq!(started.len(), 2);
    let (root, logger_span) = (&started[0], &started[1]);
    assert_eq!(root.name, "GET /orders/:id");
    assert_eq!(logger_span.name, "http");
    assert_eq!(logger_span.parent_span_id.as_deref(), Some(root.span_id.as_str()));

    // Both the logger span and the root span are ended exactly once
    let ended = harness.tracer.ended();
    assert_eq!(ended, vec![logger_span.span_id.clone(), root.span_id.clone()]);
}

#[tokio::test]
async fn test_handler_without_emission_logs_nothing() {
    let harness = Harness::new(TelemetryConfig::disabled("svc", "job"));

    let response = app(&harness).oneshot(request("/quiet")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"GET /quiet");

    assert!(harness.logs.entries().is_empty());
    assert!(harness.reporter.captured().is_empty());
    assert!(harness.metrics.counts().is_empty());
}

#[tokio::test]
async fn test_panic_becomes_500_and_error_entry() {
    let harness = Harness::new(TelemetryConfig::disabled("svc", "job"));

    let response = app(&harness).oneshot(request("/explode")).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(response).await,
        json!({ "error": { "message": "internal error", "type": "internal_error" } })
    );

    let entries = harness.logs.entries();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.severity, Severity::Error);
    assert_eq!(entry.message, "unhandled panic");
    assert_eq!(entry.field("error"), Some(&json!("panic: handler exploded")));
    assert_eq!(entry.field("path"), Some(&json!("/explode")));

    let captured = harness.reporter.captured();
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].message, "panic: handler exploded");
}

#[tokio::test]
async fn test_request_logger_outside_middleware_is_fresh() {
    let harness = Harness::new(TelemetryConfig::disabled("svc", "job"));
    let app = Router::new()
        .route("/orders/:id", get(get_order))
        .with_state(harness.telemetry.clone());

    let response = app.oneshot(request("/orders/7")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let entry = &harness.logs.entries()[0];
    assert!(entry.field("method").is_none());
    assert_eq!(entry.field("order_id"), Some(&json!("7")));
    assert_eq!(harness.tracer.started()[0].name, "request");
}

#[tokio::test]
async fn test_cancelled_request_ends_root_span() {
    let tracer = Arc::new(LogTracer::new("svc"));
    let app = traced_app(tracer.clone());

    let result = tokio::time::timeout(Duration::from_millis(50), app.oneshot(request("/stall"))).await;
    assert!(result.is_err());

    assert_eq!(tracer.in_flight(), 0);
}

#[tokio::test]
async fn test_child_without_emission_ends_its_span() {
    let tracer = Arc::new(LogTracer::new("svc"));
    let app = traced_app(tracer.clone());

    for _ in 0..10 {
        let response = app.clone().oneshot(request("/lookup")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(tracer.in_flight(), 0);
}
