//! Main controller implementation.
//!
//! Wires the [`Reconciler`] to its collaborators and runs the long-lived
//! tasks of the ENI controller:
//! - `NodeNetwork` reconciliation through kube_runtime::Controller
//! - node intake from labelled `Node` objects
//! - the periodic fixed-IP reaper
//! - the Prometheus endpoint

use crate::config::Config;
use crate::error::ControllerError;
use crate::metrics;
use crate::reconciler::Reconciler;
use crate::reconciler::node::NodeIntake;
use crate::watcher::Watcher;
use cloud_backend::CloudConfig;
use crds::{NODE_ENI_LABEL, NODE_ENI_LABEL_ENABLED, NodeNetwork};
use k8s_openapi::api::core::v1::Node;
use kube::{Api, Client};
use kube_runtime::watcher;
use kube_store::{Informer, KubeCloudIpStore, KubeClusterStore, KubeNodeNetworkStore};
use netservice_client::NetServiceClient;
use prometheus::Registry;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// ENI controller and its background tasks.
pub struct Controller {
    node_network_watcher: JoinHandle<Result<(), ControllerError>>,
    node_informer: JoinHandle<Result<(), ControllerError>>,
    reaper: JoinHandle<Result<(), ControllerError>>,
    metrics_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its tasks.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing ENI controller");

        let kube_client = Client::try_default().await?;
        let registry = Registry::new();

        let netservice = NetServiceClient::new(config.netservice_url.clone(), config.request_timeout)?;

        let cloud = cloud_backend::from_config(
            &CloudConfig {
                provider: config.cloud_provider.clone(),
                api_url: config.cloud_api_url.clone(),
                region: config.cloud_region.clone(),
                timeout: config.request_timeout,
            },
            &registry,
        )?;
        cloud.init().await.map_err(|e| {
            error!("Failed to initialize {} cloud backend: {}", config.cloud_provider, e);
            ControllerError::Cloud(e)
        })?;
        info!("Cloud backend {} initialized", cloud.provider());

        let node_network_api: Api<NodeNetwork> = Api::namespaced(kube_client.clone(), &config.system_namespace);
        let node_api: Api<Node> = Api::all(kube_client.clone());

        let reconciler = Arc::new(Reconciler::new(
            cloud,
            netservice,
            KubeNodeNetworkStore::new(kube_client.clone(), &config.system_namespace),
            KubeCloudIpStore::new(kube_client.clone()),
            KubeClusterStore::new(kube_client.clone()),
            config.clone(),
        ));

        // NodeNetworks whose node vanished while the controller was down
        match reconciler.sweep_orphans().await {
            Ok(0) => {}
            Ok(n) => info!("Retired {} orphaned NodeNetworks", n),
            Err(e) => warn!("Orphan sweep failed (will continue): {}", e),
        }

        let node_network_watcher = {
            let watcher = Watcher::new(reconciler.clone(), node_network_api);
            tokio::spawn(async move { watcher.watch_node_networks().await })
        };

        let node_informer = {
            let selector = format!("{}={}", NODE_ENI_LABEL, NODE_ENI_LABEL_ENABLED);
            let informer = Informer::new("Node", node_api, watcher::Config::default().labels(&selector))
                .add_handler(Arc::new(NodeIntake::new(reconciler.clone())))
                .with_resync(config.resync);
            tokio::spawn(async move { informer.run().await.map_err(ControllerError::from) })
        };

        let reaper: JoinHandle<Result<(), ControllerError>> = {
            let reconciler = reconciler.clone();
            let period = config.reaper_interval;
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                loop {
                    interval.tick().await;
                    if let Err(e) = reconciler.reap_fixed_ips(chrono::Utc::now()).await {
                        error!("Fixed IP reaper pass failed: {}", e);
                    }
                }
            })
        };

        let metrics_server = {
            let addr = config.metrics_addr;
            tokio::spawn(async move { metrics::serve(addr, registry).await })
        };

        Ok(Self {
            node_network_watcher,
            node_informer,
            reaper,
            metrics_server,
        })
    }

    /// Runs until one of the tasks exits.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("ENI controller running");

        tokio::select! {
            result = &mut self.node_network_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("NodeNetwork watcher panicked: {}", e)))??;
            }
            result = &mut self.node_informer => {
                result.map_err(|e| ControllerError::Watch(format!("Node informer panicked: {}", e)))??;
            }
            result = &mut self.reaper => {
                result.map_err(|e| ControllerError::Watch(format!("Fixed IP reaper panicked: {}", e)))??;
            }
            result = &mut self.metrics_server => {
                result.map_err(|e| ControllerError::Watch(format!("Metrics server panicked: {}", e)))??;
            }
        }

        Ok(())
    }
}
