//! In-memory view of address consumption per node
//!
//! One mutex guards both indexes, so readers never see a resource under
//! one node in `by_node` and another in `by_key`. Every read hands back an
//! owned copy.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// One pod's address on one node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resource {
    pub pod_name: String,
    pub namespace: String,
    pub node: String,
    /// Owning workload kind
    pub kind: String,
    /// Address, empty while only reserved by a bind
    pub value: String,
    pub eni_id: String,
    pub subnet_id: String,
}

impl Resource {
    pub fn key(&self) -> String {
        resource_key(&self.namespace, &self.pod_name)
    }
}

/// Cache key of a pod.
pub fn resource_key(namespace: &str, pod_name: &str) -> String {
    format!("{}/{}", namespace, pod_name)
}

/// Fixed-IP pods must land on an ENI of their previous subnet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubnetCapacity {
    pub subnet_id: String,
    /// `Ready` ENIs of the node in the subnet, by index
    pub eni_ids: Vec<String>,
    pub per_eni: usize,
}

/// Limits a placement is checked against
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capacity {
    /// Addresses the node can hold: ready ENIs × addresses per ENI
    pub node: usize,
    /// Cluster-wide limit, when known
    pub quota: Option<usize>,
    pub subnet: Option<SubnetCapacity>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapacityError {
    #[error("ip quota of cluster exhausted ({used}/{limit})")]
    QuotaExhausted { used: usize, limit: usize },

    #[error("no available eni ip anymore")]
    NodeFull,

    #[error("no ready eni with spare capacity in subnet {0}")]
    SubnetFull(String),
}

#[derive(Debug, Default)]
struct Index {
    by_key: HashMap<String, Resource>,
    by_node: HashMap<String, BTreeSet<String>>,
}

impl Index {
    fn insert(&mut self, resource: Resource) {
        let key = resource.key();
        if let Some(old) = self.by_key.insert(key.clone(), resource.clone()) {
            if old.node != resource.node {
                self.unlink(&old.node, &key);
            }
        }
        self.by_node.entry(resource.node).or_default().insert(key);
    }

    fn remove(&mut self, key: &str) -> Option<Resource> {
        let removed = self.by_key.remove(key)?;
        self.unlink(&removed.node, key);
        Some(removed)
    }

    fn unlink(&mut self, node: &str, key: &str) {
        if let Some(keys) = self.by_node.get_mut(node) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_node.remove(node);
            }
        }
    }

    /// Other pods' resources on `node`.
    fn others_on<'a>(&'a self, node: &str, key: &'a str) -> impl Iterator<Item = &'a Resource> + 'a {
        self.by_node
            .get(node)
            .into_iter()
            .flatten()
            .filter(move |k| k.as_str() != key)
            .filter_map(|k| self.by_key.get(k))
    }

    /// Check `resource` against `capacity`; returns the ENI picked for a
    /// subnet-bound placement.
    fn check(&self, resource: &Resource, capacity: &Capacity) -> Result<Option<String>, CapacityError> {
        let key = resource.key();
        if let Some(limit) = capacity.quota {
            // the pod's own entry does not count against it
            let used = self.by_key.len().saturating_sub(usize::from(self.by_key.contains_key(&key)));
            if used >= limit {
                return Err(CapacityError::QuotaExhausted { used, limit });
            }
        }

        if self.others_on(&resource.node, &key).count() >= capacity.node {
            return Err(CapacityError::NodeFull);
        }

        let Some(subnet) = &capacity.subnet else {
            return Ok(None);
        };
        subnet
            .eni_ids
            .iter()
            .find(|eni| {
                self.others_on(&resource.node, &key)
                    .filter(|r| &r.eni_id == *eni)
                    .count()
                    < subnet.per_eni
            })
            .map(|eni| Some(eni.clone()))
            .ok_or_else(|| CapacityError::SubnetFull(subnet.subnet_id.clone()))
    }
}

/// Concurrency-safe resource cache
#[derive(Debug, Default)]
pub struct ResourceCache {
    index: Mutex<Index>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Index> {
        self.index.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or overwrite by key, moving the entry if its node changed.
    pub fn update_resource(&self, resource: Resource) {
        self.lock().insert(resource);
    }

    pub fn get_resource(&self, key: &str) -> Option<Resource> {
        self.lock().by_key.get(key).cloned()
    }

    pub fn delete_resource(&self, key: &str) -> Option<Resource> {
        self.lock().remove(key)
    }

    /// Resources on `node`, sorted by key.
    pub fn get_node_resources(&self, node: &str) -> Vec<Resource> {
        let index = self.lock();
        index
            .by_node
            .get(node)
            .into_iter()
            .flatten()
            .filter_map(|k| index.by_key.get(k).cloned())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.lock().by_key.len()
    }

    /// Whether `resource` would fit under `capacity`.
    pub fn check(&self, resource: &Resource, capacity: &Capacity) -> Result<(), CapacityError> {
        self.lock().check(resource, capacity).map(|_| ())
    }

    /// Check and insert in one critical section. For subnet-bound
    /// placements the chosen ENI is recorded on the stored copy.
    pub fn try_reserve(&self, mut resource: Resource, capacity: &Capacity) -> Result<Resource, CapacityError> {
        let mut index = self.lock();
        if let Some(eni) = index.check(&resource, capacity)? {
            resource.eni_id = eni;
        }
        index.insert(resource.clone());
        Ok(resource)
    }
}
