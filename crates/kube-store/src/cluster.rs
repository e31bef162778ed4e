//! Cluster objects CloudNet reads but does not own: pods, workloads and
//! the pod binding subresource.

use crate::error::StoreError;
use k8s_openapi::api::apps::v1::{Deployment, ReplicaSet, StatefulSet};
use k8s_openapi::api::core::v1::{Binding, Node, ObjectReference, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, PostParams};
use kube::{Api, Client};
use tracing::debug;

/// Group/version of the `GameStatefulSet` workload CRD.
pub const GAME_STATEFULSET_GROUP: &str = "tkex.tencent.com";
pub const GAME_STATEFULSET_VERSION: &str = "v1alpha1";

/// Owner workload of a pod, from its controller owner reference.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Workload {
    pub kind: String,
    pub name: String,
}

impl Workload {
    /// Controller owner of `pod`, if any.
    pub fn of_pod(pod: &Pod) -> Option<Workload> {
        pod.metadata
            .owner_references
            .as_ref()?
            .iter()
            .find(|o| o.controller.unwrap_or(false))
            .map(|o| Workload {
                kind: o.kind.clone(),
                name: o.name.clone(),
            })
    }
}

/// Read access to pods and workloads, plus pod binding
#[async_trait::async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get_node(&self, name: &str) -> Result<Option<Node>, StoreError>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, StoreError>;

    /// Whether a workload of `kind` named `name` exists in `namespace`.
    async fn workload_exists(&self, kind: &str, namespace: &str, name: &str) -> Result<bool, StoreError>;

    /// Bind a pod to `node` through the `binding` subresource.
    async fn bind_pod(&self, namespace: &str, name: &str, uid: &str, node: &str) -> Result<(), StoreError>;
}

/// `InternalIP` address of `node`, if reported.
pub fn node_internal_ip(node: &Node) -> Option<String> {
    node.status
        .as_ref()?
        .addresses
        .as_ref()?
        .iter()
        .find(|a| a.type_ == "InternalIP")
        .map(|a| a.address.clone())
}

/// Binding object for `namespace/name` onto `node`.
pub fn pod_binding(namespace: &str, name: &str, uid: &str, node: &str) -> Binding {
    Binding {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: (!uid.is_empty()).then(|| uid.to_string()),
            ..Default::default()
        },
        target: ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some("Node".to_string()),
            name: Some(node.to_string()),
            ..Default::default()
        },
    }
}

/// Kubernetes-backed [`ClusterStore`]
#[derive(Clone)]
pub struct KubeClusterStore {
    client: Client,
}

impl KubeClusterStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn exists<T>(found: Result<Option<T>, kube::Error>, name: &str) -> Result<bool, StoreError> {
    found
        .map(|o| o.is_some())
        .map_err(|e| StoreError::from_kube(e, name))
}

#[async_trait::async_trait]
impl ClusterStore for KubeClusterStore {
    async fn get_node(&self, name: &str) -> Result<Option<Node>, StoreError> {
        let api: Api<Node> = Api::all(self.client.clone());
        api.get_opt(name)
            .await
            .map_err(|e| StoreError::from_kube(e, name))
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, StoreError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| StoreError::from_kube(e, name))
    }

    async fn workload_exists(&self, kind: &str, namespace: &str, name: &str) -> Result<bool, StoreError> {
        let client = self.client.clone();
        match kind {
            "StatefulSet" => exists(Api::<StatefulSet>::namespaced(client, namespace).get_opt(name).await, name),
            "Deployment" => exists(Api::<Deployment>::namespaced(client, namespace).get_opt(name).await, name),
            "ReplicaSet" => exists(Api::<ReplicaSet>::namespaced(client, namespace).get_opt(name).await, name),
            "GameStatefulSet" => {
                let gvk = GroupVersionKind::gvk(GAME_STATEFULSET_GROUP, GAME_STATEFULSET_VERSION, kind);
                let resource = ApiResource::from_gvk(&gvk);
                let api: Api<DynamicObject> = Api::namespaced_with(client, namespace, &resource);
                exists(api.get_opt(name).await, name)
            }
            other => Err(StoreError::Invalid(format!("unsupported workload kind {}", other))),
        }
    }

    async fn bind_pod(&self, namespace: &str, name: &str, uid: &str, node: &str) -> Result<(), StoreError> {
        debug!("Binding pod {}/{} to node {}", namespace, name, node);
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let body = serde_json::to_vec(&pod_binding(namespace, name, uid, node))?;
        api.create_subresource::<serde_json::Value>("binding", name, &PostParams::default(), body)
            .await
            .map_err(|e| StoreError::from_kube(e, name))?;
        Ok(())
    }
}
