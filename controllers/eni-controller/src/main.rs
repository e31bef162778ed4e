//! ENI Controller
//!
//! Keeps every ENI-enabled node's `NodeNetwork` in line with the cloud:
//! - creates `NodeNetwork` objects for labelled nodes
//! - creates, attaches, drains and deletes ENIs one index at a time
//! - tears a node's ENIs down behind finalizers when it goes away
//! - reaps fixed IPs whose workload no longer exists

mod backoff;
mod config;
mod controller;
mod error;
mod metrics;
mod reconciler;
mod watcher;
#[cfg(test)]
mod test_utils;

use crate::config::Config;
use crate::controller::Controller;
use crate::error::ControllerError;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube and reqwest both link rustls; pick the provider once for the process
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        info!("rustls crypto provider already installed");
    }

    info!("Starting ENI Controller");

    let config = Config::from_env()?;

    info!("Configuration:");
    info!("  Cluster: {}", config.cluster_id);
    info!("  Netservice URL: {}", config.netservice_url);
    info!("  System namespace: {}", config.system_namespace);
    info!("  Cloud: {} ({}) via {}", config.cloud_provider, config.cloud_region, config.cloud_api_url);
    info!("  Default ENI count: {}", config.default_eni_num);
    info!("  Resync: {}s, reaper every {}s, fixed IPs kept {}s",
        config.resync.as_secs(), config.reaper_interval.as_secs(), config.fixed_ip_keep.as_secs());
    info!("  Metrics: {}", config.metrics_addr);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
