//! CloudIP CRD
//!
//! Bookkeeping record for one allocated pod address. Lets the agent and
//! scheduler recover allocation state after a crash and lets fixed IPs be
//! handed back to the same workload.

use crate::constants::*;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[kube(
    group = "cloudnet.microscaler.io",
    version = "v1alpha1",
    kind = "CloudIP",
    namespaced,
    status = "CloudIPStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Address", "type":"string", "jsonPath":".spec.address"}"#,
    printcolumn = r#"{"name":"Host", "type":"string", "jsonPath":".spec.host"}"#,
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CloudIPSpec {
    /// Allocated address (without prefix length)
    pub address: String,

    #[serde(default)]
    pub vpc_id: String,

    #[serde(default)]
    pub region: String,

    #[serde(default)]
    pub subnet_id: String,

    #[serde(default)]
    pub subnet_cidr: String,

    #[serde(default)]
    pub cluster: String,

    pub namespace: String,

    pub pod_name: String,

    #[serde(default)]
    pub workload_name: String,

    #[serde(default)]
    pub workload_kind: String,

    #[serde(default)]
    pub container_id: String,

    /// Node owning the address
    pub host: String,

    /// ENI carrying the address
    #[serde(default)]
    pub eni_id: String,

    /// Address is reserved for reuse by the same workload
    #[serde(default)]
    pub is_fixed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudIPStatus {
    pub status: CloudIPState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<chrono::DateTime<chrono::Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// CloudIP state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum CloudIPState {
    /// In use by a running pod
    #[default]
    Active,

    /// Fixed IP released by its pod, kept for the workload
    Available,

    /// Fixed IP whose workload is gone, waiting to be reaped
    Deleting,
}

impl CloudIPState {
    /// Label value for [`LABEL_STATUS`].
    pub fn as_str(self) -> &'static str {
        match self {
            CloudIPState::Active => "Active",
            CloudIPState::Available => "Available",
            CloudIPState::Deleting => "Deleting",
        }
    }
}

impl CloudIPSpec {
    /// Label set written on every CloudIP for selector-based listing.
    pub fn labels(&self, state: CloudIPState) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_HOST.to_string(), self.host.clone());
        labels.insert(LABEL_STATUS.to_string(), state.as_str().to_string());
        labels.insert(LABEL_IS_FIXED.to_string(), self.is_fixed.to_string());
        labels.insert(LABEL_IS_CLUSTER_LAYER.to_string(), "true".to_string());
        if !self.eni_id.is_empty() {
            labels.insert(LABEL_ENI_ID.to_string(), self.eni_id.clone());
        }
        if !self.workload_kind.is_empty() {
            labels.insert(LABEL_WORKLOAD_KIND.to_string(), self.workload_kind.clone());
        }
        if !self.workload_name.is_empty() {
            labels.insert(LABEL_WORKLOAD_NAME.to_string(), self.workload_name.clone());
        }
        labels
    }
}

impl CloudIP {
    /// Current state, `Active` when no status has been written yet.
    pub fn state(&self) -> CloudIPState {
        self.status.as_ref().map(|s| s.status).unwrap_or_default()
    }
}
