//! ENI Agent
//!
//! Runs on every ENI-enabled node:
//! - configures links, addresses and policy routes for the node's ENIs
//! - reports the node `Ready` once host networking is in place
//! - serves the CNI plugin's allocate/release RPCs on a local port

mod config;
mod error;
mod hostnet;
mod inspector;
mod ipam;
mod server;
#[cfg(test)]
mod test_utils;

use crate::config::Config;
use crate::error::AgentError;
use crate::hostnet::IpCommand;
use crate::inspector::Inspector;
use crate::ipam::IpamService;
use crate::server::AppState;
use crds::NodeNetwork;
use kube::{Api, Client};
use kube_runtime::watcher;
use kube_store::informer::wait_for_sync;
use kube_store::{Informer, KubeCloudIpStore, KubeClusterStore, KubeNodeNetworkStore};
use netservice_client::NetServiceClient;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AgentError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        info!("rustls crypto provider already installed");
    }

    info!("Starting ENI Agent");

    let config = Config::from_env()?;

    info!("Configuration:");
    info!("  Node: {} (cluster {})", config.node_name, config.cluster_id);
    info!("  Netservice URL: {}", config.netservice_url);
    info!("  System namespace: {}", config.system_namespace);
    info!("  Listen: {}", config.listen_addr);
    info!("  ENI MTU: {}, route table base: {}", config.eni_mtu, config.eni_route_table_base);
    info!("  Fixed IP workload kinds: {}", config.fixed_ip_workload_kinds.join(", "));

    let client = Client::try_default().await?;
    let netservice = NetServiceClient::new(config.netservice_url.clone(), config.request_timeout)?;

    let inspector = Arc::new(Inspector::new(
        config.clone(),
        KubeNodeNetworkStore::new(client.clone(), &config.system_namespace),
        KubeCloudIpStore::new(client.clone()),
        IpCommand::new(),
    ));

    let informer = Informer::new(
        "NodeNetwork",
        Api::<NodeNetwork>::namespaced(client.clone(), &config.system_namespace),
        watcher::Config::default().fields(&format!("metadata.name={}", config.node_name)),
    )
    .add_handler(inspector.clone())
    .with_resync(config.resync);
    let store = informer.store();
    let informer_handle: JoinHandle<Result<(), AgentError>> =
        tokio::spawn(async move { informer.run().await.map_err(AgentError::from) });

    wait_for_sync(&store, config.cache_sync_timeout).await?;
    info!("NodeNetwork cache synced");

    let ipam = Arc::new(IpamService::new(
        inspector.clone(),
        netservice,
        KubeCloudIpStore::new(client.clone()),
        KubeClusterStore::new(client),
        config.clone(),
    ));
    let server_handle = tokio::spawn(server::serve(config.listen_addr, AppState { ipam, inspector }));

    tokio::select! {
        result = informer_handle => {
            result.map_err(|e| AgentError::Task(format!("NodeNetwork informer panicked: {}", e)))??;
        }
        result = server_handle => {
            result.map_err(|e| AgentError::Task(format!("RPC server panicked: {}", e)))??;
        }
    }

    Ok(())
}
