//! Read-only HTTP status surface
//!
//! - GET /health - Health report with recommendations (JSON)
//! - GET /healthz - Liveness
//! - GET /readyz - Readiness (bridge healthy and accepting transfers)
//! - GET /metrics - Prometheus metrics
//! - GET /stats - Transfer statistics
//! - GET /recovery - Stuck transaction dashboard
//! - GET /transactions/{id} - Single transaction snapshot

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use tokio::sync::watch;
use tracing::info;

use crate::error::BridgeError;
use crate::service::BridgeService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<BridgeService>,
}

async fn health_report(State(state): State<AppState>) -> Response {
    Json(state.service.health_report().await).into_response()
}

async fn liveness() -> &'static str {
    "OK"
}

async fn readiness(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.service.health().is_healthy() {
        (StatusCode::OK, "OK")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT_READY")
    }
}

async fn prometheus_metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics").into_response();
    }

    match Response::builder()
        .header(header::CONTENT_TYPE, encoder.format_type())
        .body(axum::body::Body::from(buffer))
    {
        Ok(resp) => resp,
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build metrics response",
        )
            .into_response(),
    }
}

async fn stats(State(state): State<AppState>) -> Response {
    Json(state.service.get_stats().await).into_response()
}

async fn recovery_dashboard(State(state): State<AppState>) -> Response {
    Json(state.service.get_recovery_dashboard().await).into_response()
}

async fn transaction(State(state): State<AppState>, Path(tx_id): Path<String>) -> Response {
    match state.service.check_transaction(&tx_id).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e @ BridgeError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

pub fn router(service: Arc<BridgeService>) -> Router {
    Router::new()
        .route("/health", get(health_report))
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .route("/metrics", get(prometheus_metrics))
        .route("/stats", get(stats))
        .route("/recovery", get(recovery_dashboard))
        .route("/transactions/{id}", get(transaction))
        .with_state(AppState { service })
}

/// Serve the status API until `shutdown` fires
pub async fn start_server(
    addr: SocketAddr,
    service: Arc<BridgeService>,
    mut shutdown: watch::Receiver<bool>,
) -> eyre::Result<()> {
    let app = router(service);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;

    info!("API server stopped");
    Ok(())
}
