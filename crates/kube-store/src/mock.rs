//! In-memory stores for unit testing
//!
//! The NodeNetwork mock bumps a resourceVersion on every write and rejects
//! writes carrying a stale one, so optimistic-concurrency paths can be
//! exercised without an API server.

use crate::cloud_ip::{CloudIpStore, label_selector};
use crate::cluster::ClusterStore;
use crate::error::StoreError;
use crate::node_network::NodeNetworkStore;
use crds::{CloudIP, NodeNetwork};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Current time as a metadata timestamp (e.g. for `deletionTimestamp`).
pub fn now() -> Option<Time> {
    let rfc3339 = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    serde_json::from_value(serde_json::Value::String(rfc3339)).ok()
}

/// Mock NodeNetworkStore for testing
#[derive(Clone, Debug, Default)]
pub struct MockNodeNetworkStore {
    objects: Arc<Mutex<HashMap<String, NodeNetwork>>>,
    version: Arc<Mutex<u64>>,
    fail_writes: Arc<Mutex<bool>>,
}

impl MockNodeNetworkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an object as-is, assigning a fresh resourceVersion.
    pub fn insert(&self, mut nn: NodeNetwork) -> NodeNetwork {
        nn.metadata.resource_version = Some(self.next_version());
        lock(&self.objects).insert(nn.name_any(), nn.clone());
        nn
    }

    /// Current stored copy.
    pub fn snapshot(&self, name: &str) -> Option<NodeNetwork> {
        lock(&self.objects).get(name).cloned()
    }

    /// Make every write fail with a Kubernetes-style error.
    pub fn set_fail_writes(&self, fail: bool) {
        *lock(&self.fail_writes) = fail;
    }

    fn next_version(&self) -> String {
        let mut version = lock(&self.version);
        *version += 1;
        version.to_string()
    }

    fn check_write(&self, nn: &NodeNetwork) -> Result<NodeNetwork, StoreError> {
        if *lock(&self.fail_writes) {
            return Err(StoreError::Invalid("injected write failure".to_string()));
        }
        let name = nn.name_any();
        let objects = lock(&self.objects);
        let current = objects
            .get(&name)
            .ok_or_else(|| StoreError::NotFound(name.clone()))?;
        if nn.resource_version().is_some() && current.resource_version() != nn.resource_version() {
            return Err(StoreError::Conflict(name));
        }
        Ok(current.clone())
    }

    /// Finalize deletion once no finalizers remain.
    fn store_or_remove(&self, mut nn: NodeNetwork) -> NodeNetwork {
        nn.metadata.resource_version = Some(self.next_version());
        let name = nn.name_any();
        let mut objects = lock(&self.objects);
        if nn.is_deleting() && nn.finalizers().is_empty() {
            objects.remove(&name);
        } else {
            objects.insert(name, nn.clone());
        }
        nn
    }
}

#[async_trait::async_trait]
impl NodeNetworkStore for MockNodeNetworkStore {
    async fn get(&self, name: &str) -> Result<Option<NodeNetwork>, StoreError> {
        Ok(self.snapshot(name))
    }

    async fn create(&self, nn: &NodeNetwork) -> Result<NodeNetwork, StoreError> {
        if *lock(&self.fail_writes) {
            return Err(StoreError::Invalid("injected write failure".to_string()));
        }
        let name = nn.name_any();
        if lock(&self.objects).contains_key(&name) {
            return Err(StoreError::Conflict(name));
        }
        let mut created = nn.clone();
        created.status = None;
        Ok(self.insert(created))
    }

    async fn update_status(&self, nn: &NodeNetwork) -> Result<NodeNetwork, StoreError> {
        let mut current = self.check_write(nn)?;
        current.status = nn.status.clone();
        Ok(self.store_or_remove(current))
    }

    async fn set_finalizers(&self, nn: &NodeNetwork, finalizers: Vec<String>) -> Result<NodeNetwork, StoreError> {
        let mut current = self.check_write(nn)?;
        current.metadata.finalizers = Some(finalizers);
        Ok(self.store_or_remove(current))
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let current = match self.snapshot(name) {
            Some(nn) => nn,
            None => return Ok(()),
        };
        if current.finalizers().is_empty() {
            lock(&self.objects).remove(name);
            return Ok(());
        }
        let mut deleting = current;
        if deleting.metadata.deletion_timestamp.is_none() {
            deleting.metadata.deletion_timestamp = now();
        }
        self.store_or_remove(deleting);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<NodeNetwork>, StoreError> {
        let mut items: Vec<NodeNetwork> = lock(&self.objects).values().cloned().collect();
        items.sort_by_key(|nn| nn.name_any());
        Ok(items)
    }
}

/// Mock CloudIpStore for testing
#[derive(Clone, Debug, Default)]
pub struct MockCloudIpStore {
    objects: Arc<Mutex<BTreeMap<(String, String), CloudIP>>>,
    fail_writes: Arc<Mutex<bool>>,
}

impl MockCloudIpStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite an object (for test setup).
    pub fn insert(&self, ip: CloudIP) {
        let key = (ip.namespace().unwrap_or_default(), ip.name_any());
        lock(&self.objects).insert(key, ip);
    }

    pub fn snapshot(&self, namespace: &str, name: &str) -> Option<CloudIP> {
        lock(&self.objects)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn all(&self) -> Vec<CloudIP> {
        lock(&self.objects).values().cloned().collect()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        *lock(&self.fail_writes) = fail;
    }

    fn check_fail(&self) -> Result<(), StoreError> {
        if *lock(&self.fail_writes) {
            return Err(StoreError::Invalid("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl CloudIpStore for MockCloudIpStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<CloudIP>, StoreError> {
        Ok(self.snapshot(namespace, name))
    }

    async fn create(&self, ip: &CloudIP) -> Result<CloudIP, StoreError> {
        self.check_fail()?;
        let key = (ip.namespace().unwrap_or_default(), ip.name_any());
        let mut objects = lock(&self.objects);
        if objects.contains_key(&key) {
            return Err(StoreError::Conflict(key.1));
        }
        objects.insert(key, ip.clone());
        Ok(ip.clone())
    }

    async fn replace(&self, ip: &CloudIP) -> Result<CloudIP, StoreError> {
        self.check_fail()?;
        let key = (ip.namespace().unwrap_or_default(), ip.name_any());
        let mut objects = lock(&self.objects);
        if !objects.contains_key(&key) {
            return Err(StoreError::NotFound(key.1));
        }
        objects.insert(key, ip.clone());
        Ok(ip.clone())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.check_fail()?;
        lock(&self.objects).remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn list(&self, labels: &BTreeMap<String, String>) -> Result<Vec<CloudIP>, StoreError> {
        tracing::trace!("Listing CloudIPs with selector {}", label_selector(labels));
        Ok(lock(&self.objects)
            .values()
            .filter(|ip| {
                let have = ip.labels();
                labels.iter().all(|(k, v)| have.get(k) == Some(v))
            })
            .cloned()
            .collect())
    }
}

/// Mock ClusterStore for testing
#[derive(Clone, Debug, Default)]
pub struct MockClusterStore {
    nodes: Arc<Mutex<HashMap<String, Node>>>,
    pods: Arc<Mutex<HashMap<(String, String), Pod>>>,
    workloads: Arc<Mutex<HashSet<(String, String, String)>>>,
    bindings: Arc<Mutex<Vec<(String, String, String)>>>,
    fail_bind: Arc<Mutex<bool>>,
}

impl MockClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, node: Node) {
        lock(&self.nodes).insert(node.name_any(), node);
    }

    pub fn remove_node(&self, name: &str) {
        lock(&self.nodes).remove(name);
    }

    pub fn add_pod(&self, pod: Pod) {
        let key = (pod.namespace().unwrap_or_default(), pod.name_any());
        lock(&self.pods).insert(key, pod);
    }

    pub fn add_workload(&self, kind: &str, namespace: &str, name: &str) {
        lock(&self.workloads).insert((kind.to_string(), namespace.to_string(), name.to_string()));
    }

    pub fn remove_workload(&self, kind: &str, namespace: &str, name: &str) {
        lock(&self.workloads).remove(&(kind.to_string(), namespace.to_string(), name.to_string()));
    }

    /// `(namespace, pod, node)` for every successful bind, in order.
    pub fn bindings(&self) -> Vec<(String, String, String)> {
        lock(&self.bindings).clone()
    }

    pub fn set_fail_bind(&self, fail: bool) {
        *lock(&self.fail_bind) = fail;
    }
}

#[async_trait::async_trait]
impl ClusterStore for MockClusterStore {
    async fn get_node(&self, name: &str) -> Result<Option<Node>, StoreError> {
        Ok(lock(&self.nodes).get(name).cloned())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>, StoreError> {
        Ok(lock(&self.pods)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn workload_exists(&self, kind: &str, namespace: &str, name: &str) -> Result<bool, StoreError> {
        Ok(lock(&self.workloads).contains(&(kind.to_string(), namespace.to_string(), name.to_string())))
    }

    async fn bind_pod(&self, namespace: &str, name: &str, _uid: &str, node: &str) -> Result<(), StoreError> {
        if *lock(&self.fail_bind) {
            return Err(StoreError::Conflict(format!("pod {}/{} is already bound", namespace, name)));
        }
        lock(&self.bindings).push((namespace.to_string(), name.to_string(), node.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::{CONTROLLER_FINALIZER, NodeNetworkSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn node_network(name: &str) -> NodeNetwork {
        NodeNetwork {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("cloudnet-system".to_string()),
                finalizers: Some(vec![CONTROLLER_FINALIZER.to_string()]),
                ..Default::default()
            },
            spec: NodeNetworkSpec {
                cluster: "cls-1".to_string(),
                hostname: name.to_string(),
                node_address: "10.0.0.10".to_string(),
                vm: None,
                eni_num: 1,
                ip_num_per_eni: 4,
            },
            status: None,
        }
    }

    #[tokio::test]
    async fn test_stale_write_conflicts() {
        let store = MockNodeNetworkStore::new();
        let created = store.create(&node_network("node-1")).await.unwrap();

        let fresh = store.update_status(&created).await.unwrap();
        let err = store.update_status(&created).await.unwrap_err();
        assert!(err.is_conflict());
        assert!(store.update_status(&fresh).await.is_ok());
    }

    #[tokio::test]
    async fn test_delete_waits_for_finalizers() {
        let store = MockNodeNetworkStore::new();
        store.create(&node_network("node-1")).await.unwrap();

        store.delete("node-1").await.unwrap();
        let deleting = store.get("node-1").await.unwrap().unwrap();
        assert!(deleting.is_deleting());

        store.remove_finalizer(&deleting, CONTROLLER_FINALIZER).await.unwrap();
        assert!(store.get("node-1").await.unwrap().is_none());
    }
}
