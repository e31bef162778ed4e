//! Kubernetes resource watchers.
//!
//! `NodeNetwork` objects are reconciled through kube_runtime::Controller,
//! which reconnects dropped watches and requeues on the `Action` each
//! pass returns.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::NodeNetwork;
use futures::StreamExt;
use kube::{Api, ResourceExt};
use kube_runtime::{
    Controller, watcher,
    controller::{Action, Config as ControllerConfig},
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

/// Run a kube_runtime::Controller for `K` until its stream ends.
///
/// Failed passes are requeued after the per-object Fibonacci backoff kept
/// by the reconciler.
async fn watch_resource<K, F>(
    api: Api<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &str,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + std::cmp::Eq + std::hash::Hash + Clone + std::fmt::Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let name = obj.name_any();
        let (backoff_secs, error_count) = ctx.get_backoff_for_resource(&name);
        warn!(
            "Reconciliation error for {} {} (attempt {}), retrying in {}s: {}",
            resource_name, name, error_count, backoff_secs, error
        );
        Action::requeue(Duration::from_secs(backoff_secs))
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        let resource_name = resource_name.to_string();
        async move {
            debug!("Reconciling {} {}", resource_name, obj.name_any());
            reconcile_fn(ctx, obj).await
        }
    };

    let controller_config = ControllerConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(8);

    Controller::new(api, watcher::Config::default())
        .with_config(controller_config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            if let Err(e) = res {
                error!("Controller error for {}: {}", resource_name, e);
            }
        })
        .await;

    Err(ControllerError::Watch(format!("{} controller stream ended", resource_name)))
}

/// Watches `NodeNetwork` objects in the system namespace.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    node_network_api: Api<NodeNetwork>,
}

impl Watcher {
    pub fn new(reconciler: Arc<Reconciler>, node_network_api: Api<NodeNetwork>) -> Self {
        Self {
            reconciler,
            node_network_api,
        }
    }

    pub async fn watch_node_networks(&self) -> Result<(), ControllerError> {
        watch_resource(
            self.node_network_api.clone(),
            self.reconciler.clone(),
            |reconciler, nn: Arc<NodeNetwork>| -> ReconcileFuture {
                Box::pin(async move { reconciler.reconcile_node_network(&nn).await })
            },
            "NodeNetwork",
        )
        .await
    }
}
