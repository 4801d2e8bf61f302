use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::net::SocketAddr;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    config::TelemetryConfig,
    middleware::{trace_request, RequestLogger, RequestTelemetry},
    signals::setup_signal_handlers,
    telemetry::{self, Telemetry},
};

/// Start the demo server
///
/// This function:
/// 1. Initializes telemetry from `config`
/// 2. Sets up signal handlers for graceful shutdown
/// 3. Serves the demo routes until a shutdown signal arrives
/// 4. Flushes pending log exports
pub async fn start_server(config: TelemetryConfig, addr: SocketAddr) -> Result<()> {
    let (telemetry, guard) = telemetry::init(config)?;

    let (shutdown_tx, signal_handle) = setup_signal_handlers();
    let mut shutdown_rx = shutdown_tx.subscribe();

    let app = create_router(telemetry.clone());

    info!(
        "Starting {} on {}",
        telemetry.config().service_name,
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown_rx.recv().await;
        info!("Shutdown signal received, draining connections...");
    })
    .await?;

    signal_handle.await?;
    guard.shutdown().await;
    info!("Server stopped gracefully");

    Ok(())
}

/// Create the demo router with the request telemetry middleware installed
pub fn create_router(telemetry: Telemetry) -> Router {
    let traced = Router::new()
        .route("/orders/:id", get(get_order))
        .route("/panic", get(always_panics))
        .route_layer(middleware::from_fn_with_state(
            RequestTelemetry::new(telemetry.clone(), "http"),
            trace_request,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .merge(traced)
        .with_state(telemetry)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn metrics(State(telemetry): State<Telemetry>) -> impl IntoResponse {
    match telemetry.metrics_handle() {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics disabled".to_string()),
    }
}

async fn get_order(Path(id): Path<String>, RequestLogger(logger): RequestLogger) -> impl IntoResponse {
    let status = {
        let mut logger = logger.lock();
        logger.with_field("order_id", id.clone());

        let lookup = logger.child("load_order");
        let timer = lookup.start("db.query");
        timer.stop();

        logger.info("order fetched");
        "shipped"
    };

    Json(json!({ "id": id, "status": status }))
}

async fn always_panics() -> &'static str {
    panic!("demo handler failure")
}
