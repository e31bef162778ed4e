//! Extender HTTP surface
//!
//! `POST /predicates` and `POST /bind` speak the kube-scheduler extender v1
//! JSON; errors travel in the `Error` field with status `200`, which is
//! what the scheduler expects.

use crate::error::SchedulerError;
use crate::scheduler::SchedulerContext;
use crate::types::{ExtenderArgs, ExtenderBindingArgs, ExtenderBindingResult, ExtenderFilterResult};
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::routing::{get, post};
use axum::{Json, Router};
use kube::ResourceExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

pub fn router(ctx: Arc<SchedulerContext>) -> Router {
    Router::new()
        .route("/predicates", post(predicates))
        .route("/bind", post(bind))
        .route("/healthz", get(healthz))
        .with_state(ctx)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

async fn predicates(
    State(ctx): State<Arc<SchedulerContext>>,
    body: Result<Json<ExtenderArgs>, JsonRejection>,
) -> Json<ExtenderFilterResult> {
    let args = match body {
        Ok(Json(args)) => args,
        Err(e) => {
            warn!("Rejected malformed predicates call: {}", e);
            return Json(ExtenderFilterResult::error(e.body_text()));
        }
    };
    if let Some(pod) = &args.pod {
        debug!(
            "Predicates for {}/{} over {} nodes",
            pod.namespace().unwrap_or_default(),
            pod.name_any(),
            args.candidates().len()
        );
    }
    Json(ctx.predicates(&args).await)
}

async fn bind(
    State(ctx): State<Arc<SchedulerContext>>,
    body: Result<Json<ExtenderBindingArgs>, JsonRejection>,
) -> Json<ExtenderBindingResult> {
    let args = match body {
        Ok(Json(args)) => args,
        Err(e) => {
            warn!("Rejected malformed bind call: {}", e);
            return Json(ExtenderBindingResult { error: e.body_text() });
        }
    };
    match ctx.bind(&args).await {
        Ok(()) => Json(ExtenderBindingResult::default()),
        Err(e) => {
            warn!("Failed to bind {} to {}: {}", args.pod_key(), args.node, e);
            Json(ExtenderBindingResult { error: e.to_string() })
        }
    }
}

async fn healthz(State(ctx): State<Arc<SchedulerContext>>) -> String {
    format!("ok, {} cached addresses", ctx.cache.count())
}

/// Serve the extender on `addr` until the listener fails.
pub async fn serve(addr: SocketAddr, ctx: Arc<SchedulerContext>) -> Result<(), SchedulerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| SchedulerError::Task(format!("failed to bind {}: {}", addr, e)))?;
    info!("Serving scheduler extender on {}", addr);
    axum::serve(listener, router(ctx))
        .await
        .map_err(|e| SchedulerError::Task(format!("extender server: {}", e)))
}
