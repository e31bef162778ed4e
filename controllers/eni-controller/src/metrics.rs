//! Prometheus endpoint
//!
//! Serves everything registered on the controller's [`Registry`] (cloud API
//! counters and latencies) in the text exposition format.

use crate::error::ControllerError;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Registry, TextEncoder};
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Router exposing `GET /metrics`.
pub fn router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(export_metrics))
        .with_state(registry)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

async fn export_metrics(State(registry): State<Registry>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return (StatusCode::INTERNAL_SERVER_ERROR, [(header::CONTENT_TYPE, "text/plain".to_string())], Vec::new());
    }
    (StatusCode::OK, [(header::CONTENT_TYPE, encoder.format_type().to_string())], buffer)
}

/// Serve metrics on `addr` until the listener fails.
pub async fn serve(addr: SocketAddr, registry: Registry) -> Result<(), ControllerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ControllerError::Metrics(format!("failed to bind {}: {}", addr, e)))?;
    info!("Serving metrics on {}", addr);
    axum::serve(listener, router(registry))
        .await
        .map_err(|e| ControllerError::Metrics(e.to_string()))
}
