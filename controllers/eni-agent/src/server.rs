//! Local RPC endpoint for the CNI plugin
//!
//! `POST /v1/ip/allocate` and `POST /v1/ip/release` take an [`IpRequest`]
//! and always answer `200` with an [`IpResponse`]; failures are reported
//! through `errCode`/`errMsg`. `GET /healthz` is `200` once a
//! `NodeNetwork` snapshot exists.

use crate::error::{AgentError, IpamError};
use crate::inspector::Inspector;
use crate::ipam::{IpRequest, IpResponse, IpamService};
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{Instrument, info, info_span, warn};

/// Handler state
#[derive(Clone)]
pub struct AppState {
    pub ipam: Arc<IpamService>,
    pub inspector: Arc<Inspector>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/ip/allocate", post(allocate))
        .route("/v1/ip/release", post(release))
        .route("/healthz", get(healthz))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

fn parse(body: Result<Json<IpRequest>, JsonRejection>) -> Result<IpRequest, IpResponse> {
    body.map(|Json(request)| request).map_err(|e| {
        warn!("Rejected malformed request: {}", e);
        IpResponse::from(Err::<(), _>(IpamError::InvalidParameter(e.body_text())))
    })
}

async fn allocate(State(state): State<AppState>, body: Result<Json<IpRequest>, JsonRejection>) -> Json<IpResponse> {
    let request = match parse(body) {
        Ok(request) => request,
        Err(response) => return Json(response),
    };
    let span = info_span!("allocate", request_id = %uuid::Uuid::new_v4(), pod = %request.pod_key());
    async move {
        info!("Allocate request for container {}", request.container_id);
        let result = state.ipam.allocate(&request).await;
        if let Err(e) = &result {
            warn!("Allocate failed: {}", e);
        }
        Json(IpResponse::from(result))
    }
    .instrument(span)
    .await
}

async fn release(State(state): State<AppState>, body: Result<Json<IpRequest>, JsonRejection>) -> Json<IpResponse> {
    let request = match parse(body) {
        Ok(request) => request,
        Err(response) => return Json(response),
    };
    let span = info_span!("release", request_id = %uuid::Uuid::new_v4(), pod = %request.pod_key());
    async move {
        info!("Release request for container {}", request.container_id);
        let result = state.ipam.release(&request).await;
        if let Err(e) = &result {
            warn!("Release failed: {}", e);
        }
        Json(IpResponse::from(result))
    }
    .instrument(span)
    .await
}

async fn healthz(State(state): State<AppState>) -> StatusCode {
    if state.inspector.get_node_network().is_some() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Serve the RPC endpoint on `addr` until the listener fails.
pub async fn serve(addr: SocketAddr, state: AppState) -> Result<(), AgentError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AgentError::Task(format!("failed to bind {}: {}", addr, e)))?;
    info!("Serving IPAM RPC on {}", addr);
    axum::serve(listener, router(state))
        .await
        .map_err(|e| AgentError::Task(format!("rpc server: {}", e)))
}
