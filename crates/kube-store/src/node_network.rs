//! NodeNetwork store
//!
//! All writes carry the object's `resourceVersion`, so a stale writer gets
//! [`StoreError::Conflict`] instead of clobbering a newer state.

use crate::error::StoreError;
use crds::NodeNetwork;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use tracing::debug;

/// Access to `NodeNetwork` objects in the system namespace
#[async_trait::async_trait]
pub trait NodeNetworkStore: Send + Sync {
    /// Fetch by name; `None` when absent.
    async fn get(&self, name: &str) -> Result<Option<NodeNetwork>, StoreError>;

    /// Create a new object (status is not written on create).
    async fn create(&self, nn: &NodeNetwork) -> Result<NodeNetwork, StoreError>;

    /// Write `nn.status`, conditional on `nn`'s resourceVersion.
    async fn update_status(&self, nn: &NodeNetwork) -> Result<NodeNetwork, StoreError>;

    /// Replace the finalizer list, conditional on `nn`'s resourceVersion.
    async fn set_finalizers(&self, nn: &NodeNetwork, finalizers: Vec<String>) -> Result<NodeNetwork, StoreError>;

    /// Request deletion; an already-absent object is not an error.
    async fn delete(&self, name: &str) -> Result<(), StoreError>;

    async fn list(&self) -> Result<Vec<NodeNetwork>, StoreError>;

    /// Add `finalizer` unless present.
    async fn add_finalizer(&self, nn: &NodeNetwork, finalizer: &str) -> Result<NodeNetwork, StoreError> {
        if nn.has_finalizer(finalizer) {
            return Ok(nn.clone());
        }
        let mut finalizers = nn.finalizers().to_vec();
        finalizers.push(finalizer.to_string());
        self.set_finalizers(nn, finalizers).await
    }

    /// Remove `finalizer` if present.
    async fn remove_finalizer(&self, nn: &NodeNetwork, finalizer: &str) -> Result<NodeNetwork, StoreError> {
        if !nn.has_finalizer(finalizer) {
            return Ok(nn.clone());
        }
        let finalizers = nn
            .finalizers()
            .iter()
            .filter(|f| f.as_str() != finalizer)
            .cloned()
            .collect();
        self.set_finalizers(nn, finalizers).await
    }
}

/// Merge-patch body for `nn.status`. Optional fields that are unset are
/// sent as `null` so a merge patch clears them.
pub(crate) fn status_patch(nn: &NodeNetwork) -> Result<serde_json::Value, StoreError> {
    let mut status = serde_json::to_value(nn.status.clone().unwrap_or_default())?;
    if let Some(obj) = status.as_object_mut() {
        obj.entry("floatingIpEni").or_insert(serde_json::Value::Null);
    }
    Ok(json!({
        "metadata": { "resourceVersion": nn.resource_version() },
        "status": status,
    }))
}

/// Kubernetes-backed [`NodeNetworkStore`]
#[derive(Clone)]
pub struct KubeNodeNetworkStore {
    api: Api<NodeNetwork>,
}

impl KubeNodeNetworkStore {
    /// Store bound to `namespace`.
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
        }
    }
}

#[async_trait::async_trait]
impl NodeNetworkStore for KubeNodeNetworkStore {
    async fn get(&self, name: &str) -> Result<Option<NodeNetwork>, StoreError> {
        self.api
            .get_opt(name)
            .await
            .map_err(|e| StoreError::from_kube(e, name))
    }

    async fn create(&self, nn: &NodeNetwork) -> Result<NodeNetwork, StoreError> {
        let name = nn.name_any();
        debug!("Creating NodeNetwork {}", name);
        self.api
            .create(&PostParams::default(), nn)
            .await
            .map_err(|e| StoreError::from_kube(e, &name))
    }

    async fn update_status(&self, nn: &NodeNetwork) -> Result<NodeNetwork, StoreError> {
        let name = nn.name_any();
        let patch = status_patch(nn)?;
        self.api
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_kube(e, &name))
    }

    async fn set_finalizers(&self, nn: &NodeNetwork, finalizers: Vec<String>) -> Result<NodeNetwork, StoreError> {
        let name = nn.name_any();
        let patch = json!({
            "metadata": {
                "resourceVersion": nn.resource_version(),
                "finalizers": finalizers,
            }
        });
        self.api
            .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_kube(e, &name))
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        match self.api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) => match StoreError::from_kube(e, name) {
                StoreError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn list(&self) -> Result<Vec<NodeNetwork>, StoreError> {
        let list = self
            .api
            .list(&ListParams::default())
            .await
            .map_err(|e| StoreError::from_kube(e, "nodenetworks"))?;
        Ok(list.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{NodeNetworkSpec, NodeNetworkStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    #[test]
    fn test_status_patch_clears_floating_eni_and_carries_version() {
        let nn = NodeNetwork {
            metadata: ObjectMeta {
                name: Some("node-1".to_string()),
                resource_version: Some("42".to_string()),
                ..Default::default()
            },
            spec: NodeNetworkSpec {
                cluster: "cls-1".to_string(),
                hostname: "node-1".to_string(),
                node_address: "10.0.0.10".to_string(),
                vm: None,
                eni_num: 2,
                ip_num_per_eni: 9,
            },
            status: Some(NodeNetworkStatus::default()),
        };

        let patch = status_patch(&nn).unwrap();
        assert_eq!(patch["metadata"]["resourceVersion"], "42");
        assert!(patch["status"]["floatingIpEni"].is_null());
        assert_eq!(patch["status"]["status"], "NotReady");
    }
}
