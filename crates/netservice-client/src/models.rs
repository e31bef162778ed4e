//! Netservice API models
//!
//! Request bodies are sent inside an envelope carrying a monotonic `seq`
//! (see [`crate::common::HttpClient`]); every response is a
//! [`NetServiceResponse`] whose `errCode` is zero on success.

use serde::{Deserialize, Serialize};

/// Request wrapper adding the call sequence number
#[derive(Debug, Clone, Serialize)]
pub struct RequestEnvelope<'a, T: Serialize> {
    pub seq: u64,
    #[serde(flatten)]
    pub body: &'a T,
}

/// Response wrapper returned by every netservice call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetServiceResponse<T> {
    #[serde(default)]
    pub seq: u64,
    pub err_code: i32,
    #[serde(default)]
    pub err_msg: String,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
}

/// Address state as tracked by netservice
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IpStatus {
    #[default]
    Active,
    Available,
    Reserved,
    Deleting,
}

/// An address record owned by netservice
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct IpObject {
    pub address: String,
    #[serde(default)]
    pub vpc_id: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub subnet_id: String,
    /// e.g. "10.0.1.0/24"
    #[serde(default)]
    pub subnet_cidr: String,
    #[serde(default)]
    pub cluster: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub pod_name: String,
    #[serde(default)]
    pub workload_name: String,
    #[serde(default)]
    pub workload_kind: String,
    #[serde(default)]
    pub container_id: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub eni_id: String,
    #[serde(default)]
    pub is_fixed: bool,
    #[serde(default)]
    pub status: IpStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// Subnet description returned by `GetAvailableSubnet`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Subnet {
    pub subnet_id: String,
    pub subnet_cidr: String,
    #[serde(default)]
    pub vpc_id: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(default)]
    pub available_ip_num: u32,
}

/// Cluster quota returned by `GetQuota`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Quota {
    pub cluster: String,
    /// Maximum number of active pod addresses in the cluster
    pub limit: u32,
}

/// `AllocateIP` / `AllocateFixedIP` request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AllocateIpRequest {
    pub vpc_id: String,
    pub region: String,
    pub subnet_id: String,
    pub cluster: String,
    pub namespace: String,
    pub pod_name: String,
    #[serde(default)]
    pub workload_name: String,
    #[serde(default)]
    pub workload_kind: String,
    pub container_id: String,
    pub host: String,
    pub eni_id: String,
    /// Preferred address (fixed IP reuse only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// `ReleaseIP` / `ReleaseFixedIP` request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseIpRequest {
    pub vpc_id: String,
    pub region: String,
    pub subnet_id: String,
    pub cluster: String,
    pub namespace: String,
    pub pod_name: String,
    pub container_id: String,
    pub host: String,
    pub address: String,
}

/// `GetAvailableSubnet` request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GetAvailableSubnetRequest {
    pub vpc_id: String,
    pub region: String,
    pub zone: String,
}

/// `AllocateEni` request: reserves the primary address of a new ENI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AllocateEniRequest {
    pub vpc_id: String,
    pub region: String,
    pub zone: String,
    pub subnet_id: String,
    pub cluster: String,
    pub instance_id: String,
    pub host: String,
    pub eni_index: u32,
    pub eni_name: String,
}

/// `ReleaseEni` request: returns an ENI primary address
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseEniRequest {
    pub vpc_id: String,
    pub region: String,
    pub subnet_id: String,
    pub cluster: String,
    pub instance_id: String,
    pub host: String,
    #[serde(default)]
    pub eni_id: String,
    pub address: String,
}

/// `CleanEni` request: drops every secondary address recorded on an ENI
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CleanEniRequest {
    pub vpc_id: String,
    pub region: String,
    pub cluster: String,
    pub host: String,
    pub eni_id: String,
}

/// `CleanNode` request: drops every non-fixed address recorded on a host
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CleanNodeRequest {
    pub vpc_id: String,
    pub region: String,
    pub cluster: String,
    pub host: String,
}

/// `CleanFixedIP` request: hard-deletes a fixed address
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CleanFixedIpRequest {
    pub vpc_id: String,
    pub region: String,
    pub cluster: String,
    pub namespace: String,
    pub pod_name: String,
    pub workload_name: String,
    pub workload_kind: String,
    pub address: String,
}

/// `GetQuota` request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct GetQuotaRequest {
    pub cluster: String,
}

/// `ListIP` filter; empty fields do not filter
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ListIpRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eni_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<IpStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_fixed: Option<bool>,
}

impl ListIpRequest {
    /// Whether `ip` passes every set filter.
    pub fn matches(&self, ip: &IpObject) -> bool {
        fn eq(filter: &Option<String>, value: &str) -> bool {
            filter.as_deref().is_none_or(|f| f == value)
        }
        eq(&self.vpc_id, &ip.vpc_id)
            && eq(&self.region, &ip.region)
            && eq(&self.subnet_id, &ip.subnet_id)
            && eq(&self.cluster, &ip.cluster)
            && eq(&self.host, &ip.host)
            && eq(&self.eni_id, &ip.eni_id)
            && self.status.is_none_or(|s| s == ip.status)
            && self.is_fixed.is_none_or(|f| f == ip.is_fixed)
    }
}
