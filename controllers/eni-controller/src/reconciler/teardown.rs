//! Node teardown
//!
//! Runs once a `NodeNetwork` carries a deletion timestamp. The controller
//! finalizer is dropped only after the agent finalizer is gone and every
//! ENI has been removed, so host-side cleanup always precedes the object's
//! disappearance.

use super::eni::{Removal, vm_of};
use super::{Reconciler, Step};
use crate::error::ControllerError;
use crds::{AGENT_FINALIZER, CONTROLLER_FINALIZER, CloudIPState, LABEL_HOST, LABEL_STATUS, NodeNetwork};
use kube::ResourceExt;
use netservice_client::CleanNodeRequest;
use std::collections::BTreeMap;
use tracing::{info, warn};

impl Reconciler {
    /// Drive a deleted `NodeNetwork` towards removal of the controller
    /// finalizer.
    pub async fn finalize(&self, nn: &NodeNetwork) -> Result<Step, ControllerError> {
        let name = nn.name_any();
        if !nn.has_finalizer(CONTROLLER_FINALIZER) {
            return Ok(Step::Converged);
        }
        let host = nn.spec.hostname.clone();
        let mut current = nn.clone();

        if self.instance_exists(nn).await? {
            let active = self.cloud_ips.list(&active_on_host(&host)).await?;
            if !active.is_empty() {
                return Ok(Step::Waiting(format!(
                    "{} pod addresses still active on node {}",
                    active.len(),
                    host
                )));
            }
        } else if current.has_finalizer(AGENT_FINALIZER) {
            warn!("Instance of node {} is gone, cleaning up on behalf of the agent", name);
            current = self.clean_vanished_node(&current).await?;
        }

        if current.has_finalizer(AGENT_FINALIZER) {
            return Ok(Step::Waiting(format!("agent finalizer still present on {}", name)));
        }

        loop {
            match self.remove_top_eni(&current).await? {
                Removal::Removed { updated, eni_id } => {
                    info!("Removed ENI {} of deleted node {}", eni_id, name);
                    current = updated;
                }
                Removal::Waiting(why) => return Ok(Step::Waiting(why)),
                Removal::Empty => break,
            }
        }

        self.node_networks
            .remove_finalizer(&current, CONTROLLER_FINALIZER)
            .await?;
        info!("NodeNetwork {} released", name);
        Ok(Step::Progressed(format!("removed finalizer {}", CONTROLLER_FINALIZER)))
    }

    /// Whether the node's instance is still known to the cloud.
    async fn instance_exists(&self, nn: &NodeNetwork) -> Result<bool, ControllerError> {
        match self.cloud.get_vm_info(&nn.spec.node_address).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Forget everything recorded for a host whose instance is gone and
    /// drop the agent finalizer, since no agent is left to do it.
    async fn clean_vanished_node(&self, nn: &NodeNetwork) -> Result<NodeNetwork, ControllerError> {
        let vm = vm_of(nn)?;
        let host = nn.spec.hostname.clone();
        self.netservice
            .clean_node(&CleanNodeRequest {
                vpc_id: vm.vpc_id.clone(),
                region: vm.region.clone(),
                cluster: nn.spec.cluster.clone(),
                host: host.clone(),
            })
            .await?;

        let labels = BTreeMap::from([(LABEL_HOST.to_string(), host.clone())]);
        for ip in self.cloud_ips.list(&labels).await? {
            let namespace = ip.namespace().unwrap_or_default();
            self.cloud_ips.delete(&namespace, &ip.name_any()).await?;
        }

        Ok(self.node_networks.remove_finalizer(nn, AGENT_FINALIZER).await?)
    }
}

fn active_on_host(host: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_HOST.to_string(), host.to_string()),
        (LABEL_STATUS.to_string(), CloudIPState::Active.as_str().to_string()),
    ])
}
