//! IP Scheduler Extender
//!
//! Keeps kube-scheduler from placing floating-IP pods on nodes whose ENIs
//! have no addresses left:
//! - filters candidate nodes by ENI capacity, cluster quota and fixed-IP
//!   subnet affinity
//! - reserves capacity at bind time and binds the pod

mod cache;
mod config;
mod error;
mod quota;
mod scheduler;
mod server;
mod types;
#[cfg(test)]
mod scheduler_test;
#[cfg(test)]
mod test_utils;

use crate::config::Config;
use crate::error::SchedulerError;
use crate::scheduler::SchedulerContext;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use kube_runtime::watcher;
use kube_store::{Informer, KubeCloudIpStore, KubeClusterStore, KubeNodeNetworkStore};
use netservice_client::NetServiceClient;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), SchedulerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        info!("rustls crypto provider already installed");
    }

    info!("Starting IP Scheduler Extender");

    let config = Config::from_env()?;

    info!("Configuration:");
    info!("  Cluster: {}", config.cluster_id);
    info!("  Netservice URL: {}", config.netservice_url);
    info!("  System namespace: {}", config.system_namespace);
    info!("  Listen: {}", config.listen_addr);
    info!("  Quota refresh: {}s", config.quota_refresh.as_secs());

    let client = Client::try_default().await?;
    let netservice = NetServiceClient::new(config.netservice_url.clone(), config.request_timeout)?;
    let ctx = Arc::new(SchedulerContext::new(
        config.clone(),
        KubeNodeNetworkStore::new(client.clone(), &config.system_namespace),
        KubeCloudIpStore::new(client.clone()),
        KubeClusterStore::new(client.clone()),
        netservice,
    ));

    ctx.bootstrap().await?;
    ctx.refresh_quota().await;

    let informer = Informer::new("Pod", Api::<Pod>::all(client), watcher::Config::default()).add_handler(ctx.clone());
    let informer_handle: JoinHandle<Result<(), SchedulerError>> =
        tokio::spawn(async move { informer.run().await.map_err(SchedulerError::from) });
    let quota_handle = tokio::spawn(quota::run(ctx.clone(), config.quota_refresh));
    let server_handle = tokio::spawn(server::serve(config.listen_addr, ctx));

    tokio::select! {
        result = informer_handle => {
            result.map_err(|e| SchedulerError::Task(format!("Pod informer panicked: {}", e)))??;
        }
        result = quota_handle => {
            result.map_err(|e| SchedulerError::Task(format!("Quota refresher panicked: {}", e)))??;
        }
        result = server_handle => {
            result.map_err(|e| SchedulerError::Task(format!("Extender server panicked: {}", e)))??;
        }
    }

    Ok(())
}
