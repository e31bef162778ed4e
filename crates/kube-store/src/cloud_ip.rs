//! CloudIP store
//!
//! CloudIP has a status subresource, so the kube-backed store writes spec
//! and status in two requests. Objects are named after their address.

use crate::error::StoreError;
use crds::{CloudIP, CloudIPState, CloudIPStatus};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

/// Access to `CloudIP` objects across namespaces
#[async_trait::async_trait]
pub trait CloudIpStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<CloudIP>, StoreError>;

    /// Create the object and then write its status.
    async fn create(&self, ip: &CloudIP) -> Result<CloudIP, StoreError>;

    /// Overwrite spec, labels and status of an existing object.
    async fn replace(&self, ip: &CloudIP) -> Result<CloudIP, StoreError>;

    /// Delete; an already-absent object is not an error.
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError>;

    /// List across all namespaces, filtered by exact label matches.
    async fn list(&self, labels: &BTreeMap<String, String>) -> Result<Vec<CloudIP>, StoreError>;

    /// Move to `state`, refreshing the status label and `updateTime`.
    async fn set_state(&self, ip: &CloudIP, state: CloudIPState) -> Result<CloudIP, StoreError> {
        let mut updated = ip.clone();
        stamp_state(&mut updated, state);
        self.replace(&updated).await
    }
}

/// Render `labels` as a label selector string.
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Set state, labels and timestamps on `ip` in place.
pub fn stamp_state(ip: &mut CloudIP, state: CloudIPState) {
    let now = chrono::Utc::now();
    let create_time = ip.status.as_ref().and_then(|s| s.create_time).or(Some(now));
    ip.status = Some(CloudIPStatus {
        status: state,
        create_time,
        update_time: Some(now),
    });
    let labels = ip.spec.labels(state);
    ip.labels_mut().extend(labels);
}

/// Kubernetes-backed [`CloudIpStore`]
#[derive(Clone)]
pub struct KubeCloudIpStore {
    client: Client,
}

impl KubeCloudIpStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<CloudIP> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn write_status(&self, api: &Api<CloudIP>, ip: &CloudIP) -> Result<CloudIP, StoreError> {
        let name = ip.name_any();
        let patch = json!({ "status": ip.status.clone().unwrap_or_default() });
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| StoreError::from_kube(e, &name))
    }
}

fn namespace_of(ip: &CloudIP) -> Result<String, StoreError> {
    ip.namespace()
        .ok_or_else(|| StoreError::Invalid(format!("CloudIP {} has no namespace", ip.name_any())))
}

#[async_trait::async_trait]
impl CloudIpStore for KubeCloudIpStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<CloudIP>, StoreError> {
        self.api(namespace)
            .get_opt(name)
            .await
            .map_err(|e| StoreError::from_kube(e, name))
    }

    async fn create(&self, ip: &CloudIP) -> Result<CloudIP, StoreError> {
        let namespace = namespace_of(ip)?;
        let name = ip.name_any();
        debug!("Creating CloudIP {}/{}", namespace, name);
        let api = self.api(&namespace);
        let created = api
            .create(&PostParams::default(), ip)
            .await
            .map_err(|e| StoreError::from_kube(e, &name))?;
        if ip.status.is_none() {
            return Ok(created);
        }
        let mut with_status = created;
        with_status.status = ip.status.clone();
        self.write_status(&api, &with_status).await
    }

    async fn replace(&self, ip: &CloudIP) -> Result<CloudIP, StoreError> {
        let namespace = namespace_of(ip)?;
        let name = ip.name_any();
        let api = self.api(&namespace);
        let replaced = api
            .replace(&name, &PostParams::default(), ip)
            .await
            .map_err(|e| StoreError::from_kube(e, &name))?;
        let mut with_status = replaced;
        with_status.status = ip.status.clone();
        self.write_status(&api, &with_status).await
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        match self.api(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(e) => match StoreError::from_kube(e, name) {
                StoreError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }

    async fn list(&self, labels: &BTreeMap<String, String>) -> Result<Vec<CloudIP>, StoreError> {
        let api: Api<CloudIP> = Api::all(self.client.clone());
        let params = ListParams::default().labels(&label_selector(labels));
        let list = api
            .list(&params)
            .await
            .map_err(|e| StoreError::from_kube(e, "cloudips"))?;
        Ok(list.items)
    }
}
