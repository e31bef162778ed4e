//! Node intake
//!
//! Nodes carrying `cloudnet.microscaler.io/eni=enabled` get a
//! `NodeNetwork` sized from the instance's ENI limits. When the node goes
//! away (or loses the label, which the label-selected watch reports as a
//! delete) its `NodeNetwork` is deleted and the finalizers sequence the
//! teardown.

use super::Reconciler;
use crate::error::ControllerError;
use crds::{CONTROLLER_FINALIZER, NODE_ENI_LABEL, NODE_ENI_LABEL_ENABLED, NodeNetwork, NodeNetworkSpec};
use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use kube_store::{EventHandler, node_internal_ip};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Whether `node` is selected for ENI management.
pub fn is_eni_node(node: &Node) -> bool {
    node.labels()
        .get(NODE_ENI_LABEL)
        .is_some_and(|v| v == NODE_ENI_LABEL_ENABLED)
}

impl Reconciler {
    /// Create the `NodeNetwork` of `node` if it does not exist yet.
    ///
    /// Returns `true` when an object was created.
    pub async fn intake_node(&self, node: &Node) -> Result<bool, ControllerError> {
        let name = node.name_any();
        if node.metadata.deletion_timestamp.is_some() || !is_eni_node(node) {
            return Ok(false);
        }
        if self.node_networks.get(&name).await?.is_some() {
            debug!("NodeNetwork {} already exists", name);
            return Ok(false);
        }

        let address = node_internal_ip(node)
            .ok_or_else(|| ControllerError::InvalidState(format!("node {} has no InternalIP address", name)))?;
        let vm = self.cloud.get_vm_info(&address).await?;
        let limit = self.cloud.get_eni_limit(&address).await?;

        // one slot is the primary interface / the ENI's primary address
        let eni_num = self.config.default_eni_num.min(limit.max_eni.saturating_sub(1));
        let ip_num_per_eni = limit.max_ip_per_eni.saturating_sub(1);

        let nn = NodeNetwork {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(self.config.system_namespace.clone()),
                finalizers: Some(vec![CONTROLLER_FINALIZER.to_string()]),
                ..Default::default()
            },
            spec: NodeNetworkSpec {
                cluster: self.config.cluster_id.clone(),
                hostname: name.clone(),
                node_address: address,
                vm: Some(vm),
                eni_num,
                ip_num_per_eni,
            },
            status: None,
        };
        self.node_networks.create(&nn).await?;
        info!(
            "Created NodeNetwork {} (eniNum={}, ipNumPerEni={})",
            name, eni_num, ip_num_per_eni
        );
        Ok(true)
    }

    /// Delete the `NodeNetwork` of a node that is gone.
    pub async fn retire_node(&self, name: &str) -> Result<(), ControllerError> {
        if self.node_networks.get(name).await?.is_none() {
            return Ok(());
        }
        info!("Node {} is gone, deleting its NodeNetwork", name);
        self.node_networks.delete(name).await?;
        Ok(())
    }

    /// Delete `NodeNetwork`s whose node vanished while the controller was
    /// not watching.
    pub async fn sweep_orphans(&self) -> Result<usize, ControllerError> {
        let mut retired = 0;
        for nn in self.node_networks.list().await? {
            if nn.is_deleting() {
                continue;
            }
            let name = nn.name_any();
            let selected = self
                .cluster
                .get_node(&name)
                .await?
                .is_some_and(|node| is_eni_node(&node));
            if !selected {
                self.retire_node(&name).await?;
                retired += 1;
            }
        }
        Ok(retired)
    }
}

/// Feeds node watch events into [`Reconciler`] intake.
pub struct NodeIntake {
    reconciler: Arc<Reconciler>,
}

impl NodeIntake {
    pub fn new(reconciler: Arc<Reconciler>) -> Self {
        Self { reconciler }
    }

    async fn apply(&self, node: &Node) {
        if let Err(e) = self.reconciler.intake_node(node).await {
            error!("Failed to take in node {}: {}", node.name_any(), e);
        }
    }
}

#[async_trait::async_trait]
impl EventHandler<Node> for NodeIntake {
    async fn on_add(&self, obj: Arc<Node>) {
        self.apply(&obj).await;
    }

    async fn on_update(&self, _old: Arc<Node>, new: Arc<Node>) {
        self.apply(&new).await;
    }

    async fn on_delete(&self, obj: Arc<Node>) {
        if let Err(e) = self.reconciler.retire_node(&obj.name_any()).await {
            error!("Failed to retire node {}: {}", obj.name_any(), e);
        }
    }
}
