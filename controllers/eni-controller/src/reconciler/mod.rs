//! Reconciliation logic for `NodeNetwork` objects and the nodes behind them.
//!
//! - `eni`: one structural ENI step per pass (probe, scale-up, scale-down)
//! - `teardown`: finalizer-driven teardown of a deleted node's ENIs
//! - `node`: `NodeNetwork` intake for labelled nodes
//! - `reaper`: fixed-IP garbage collection

pub mod eni;
pub mod node;
pub mod reaper;
pub mod teardown;

#[cfg(test)]
mod eni_test;
#[cfg(test)]
mod teardown_test;

use crate::backoff::FibonacciBackoff;
use crate::config::Config;
use crate::error::ControllerError;
use cloud_backend::CloudBackend;
use crds::{FLOATING_IP_ENI_INDEX, FloatingIpEni, NodeNetwork, NodeNetworkStatus};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use kube_store::{CloudIpStore, ClusterStore, NodeNetworkStore};
use netservice_client::NetServiceClientTrait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Requeue delay while waiting on the cloud or on pods to drain
const WAIT_REQUEUE: Duration = Duration::from_secs(5);
/// Requeue delay after a step that changed the object
const PROGRESS_REQUEUE: Duration = Duration::from_secs(1);

/// Backoff state for a node
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new() -> Self {
        Self {
            backoff: FibonacciBackoff::new(5, 300), // 5 seconds min, 5 minutes max
            error_count: 0,
        }
    }

    fn increment_error(&mut self) {
        self.error_count += 1;
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Outcome of one reconcile pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Desired state reached
    Converged,
    /// Waiting on something outside the controller
    Waiting(String),
    /// The object was written; another pass follows
    Progressed(String),
}

impl Step {
    fn into_action(self, resync: Duration) -> Action {
        match self {
            Step::Converged => Action::requeue(resync),
            Step::Waiting(_) => Action::requeue(WAIT_REQUEUE),
            Step::Progressed(_) => Action::requeue(PROGRESS_REQUEUE),
        }
    }
}

/// Reconciles CloudNet node resources.
pub struct Reconciler {
    pub(crate) cloud: Box<dyn CloudBackend>,
    pub(crate) netservice: Box<dyn NetServiceClientTrait>,
    pub(crate) node_networks: Box<dyn NodeNetworkStore>,
    pub(crate) cloud_ips: Box<dyn CloudIpStore>,
    pub(crate) cluster: Box<dyn ClusterStore>,
    pub(crate) config: Config,
    /// Error count tracking per node (name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        cloud: Box<dyn CloudBackend>,
        netservice: impl NetServiceClientTrait + 'static,
        node_networks: impl NodeNetworkStore + 'static,
        cloud_ips: impl CloudIpStore + 'static,
        cluster: impl ClusterStore + 'static,
        config: Config,
    ) -> Self {
        Self {
            cloud,
            netservice: Box::new(netservice),
            node_networks: Box::new(node_networks),
            cloud_ips: Box::new(cloud_ips),
            cluster: Box::new(cluster),
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Entry point for the `NodeNetwork` controller.
    pub async fn reconcile_node_network(&self, nn: &NodeNetwork) -> Result<Action, ControllerError> {
        let name = nn.name_any();
        let result = if nn.is_deleting() {
            self.finalize(nn).await
        } else {
            self.reconcile_enis(nn).await
        };
        match result {
            Ok(step) => {
                self.reset_error(&name);
                match &step {
                    Step::Converged => debug!("NodeNetwork {} converged", name),
                    Step::Waiting(why) => debug!("NodeNetwork {} waiting: {}", name, why),
                    Step::Progressed(what) => info!("NodeNetwork {}: {}", name, what),
                }
                Ok(step.into_action(self.config.resync))
            }
            Err(e) => {
                self.increment_error(&name);
                Err(e)
            }
        }
    }

    /// Persist `status` for `nn`, keeping `floatingIpEni` in line with the
    /// ENI at the floating-IP index.
    pub(crate) async fn write_status(
        &self,
        nn: &NodeNetwork,
        mut status: NodeNetworkStatus,
    ) -> Result<NodeNetwork, ControllerError> {
        status.floating_ip_eni = status
            .enis
            .iter()
            .find(|e| e.index == FLOATING_IP_ENI_INDEX)
            .map(|eni| FloatingIpEni {
                eni: eni.clone(),
                ip_limit: nn.spec.ip_num_per_eni,
            });
        let mut updated = nn.clone();
        updated.status = Some(status);
        Ok(self.node_networks.update_status(&updated).await?)
    }

    /// Get the Fibonacci backoff duration for a node based on its error count
    ///
    /// Returns (backoff_seconds, error_count)
    pub fn get_backoff_for_resource(&self, resource_key: &str) -> (u64, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(resource_key.to_string())
                    .or_insert_with(BackoffState::new);
                (state.backoff.next_backoff_seconds(), state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using default backoff", e);
                (60, 0)
            }
        }
    }

    /// Increment error count for a node
    pub fn increment_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states
                .entry(resource_key.to_string())
                .or_insert_with(BackoffState::new)
                .increment_error();
        }
    }

    /// Reset error count for a node (on successful reconciliation)
    pub fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.reset();
            }
        }
    }
}
