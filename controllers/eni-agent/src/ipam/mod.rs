//! Pod address allocate/release handlers
//!
//! Each call is a fail-fast pipeline against the inspector snapshot, the
//! bookkeeping service and the `CloudIP` records; see `allocate` and
//! `release`.

pub mod allocate;
pub mod release;

#[cfg(test)]
mod release_test;

use crate::config::Config;
use crate::error::{ErrorCode, IpamError};
use crate::inspector::Inspector;
use crds::{CloudIPState, LABEL_HOST, LABEL_STATUS};
use ipnet::Ipv4Net;
use kube_store::{CloudIpStore, ClusterStore};
use netservice_client::NetServiceClientTrait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Body of both RPCs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpRequest {
    #[serde(default)]
    pub pod_name: String,
    #[serde(default)]
    pub pod_namespace: String,
    #[serde(default)]
    pub container_id: String,
}

impl IpRequest {
    fn validate(&self) -> Result<(), IpamError> {
        let missing: Vec<&str> = [
            ("podName", &self.pod_name),
            ("podNamespace", &self.pod_namespace),
            ("containerId", &self.container_id),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| k)
        .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(IpamError::InvalidParameter(format!("missing {}", missing.join(", "))))
        }
    }

    /// `namespace/pod`
    pub fn pod_key(&self) -> String {
        format!("{}/{}", self.pod_namespace, self.pod_name)
    }
}

/// Address handed to a pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub ip_addr: String,
    pub mac_addr: String,
    pub mask: String,
    pub gateway: String,
}

/// Response of both RPCs; address fields are empty on release and on error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IpResponse {
    pub err_code: i32,
    #[serde(default)]
    pub err_msg: String,
    #[serde(default)]
    pub ip_addr: String,
    #[serde(default)]
    pub mac_addr: String,
    #[serde(default)]
    pub mask: String,
    #[serde(default)]
    pub gateway: String,
}

impl IpResponse {
    fn error(err: &IpamError) -> Self {
        Self {
            err_code: err.code().as_i32(),
            err_msg: err.to_string(),
            ..Default::default()
        }
    }
}

impl From<Result<Allocation, IpamError>> for IpResponse {
    fn from(result: Result<Allocation, IpamError>) -> Self {
        match result {
            Ok(a) => Self {
                err_code: ErrorCode::Ok.as_i32(),
                err_msg: String::new(),
                ip_addr: a.ip_addr,
                mac_addr: a.mac_addr,
                mask: a.mask,
                gateway: a.gateway,
            },
            Err(e) => Self::error(&e),
        }
    }
}

impl From<Result<(), IpamError>> for IpResponse {
    fn from(result: Result<(), IpamError>) -> Self {
        match result {
            Ok(()) => Self::default(),
            Err(e) => Self::error(&e),
        }
    }
}

/// Dotted netmask of `cidr`.
pub fn mask_of(cidr: &str) -> Result<String, IpamError> {
    let net: Ipv4Net = cidr
        .parse()
        .map_err(|_| IpamError::Internal(format!("invalid subnet cidr {:?}", cidr)))?;
    Ok(net.netmask().to_string())
}

/// Allocate/release handlers for this node
pub struct IpamService {
    pub(crate) inspector: Arc<Inspector>,
    pub(crate) netservice: Box<dyn NetServiceClientTrait>,
    pub(crate) cloud_ips: Box<dyn CloudIpStore>,
    pub(crate) cluster: Box<dyn ClusterStore>,
    pub(crate) config: Config,
    /// Held from ENI selection until the CloudIP is recorded, so per-ENI
    /// counts stay within `ipNumPerEni`
    pub(crate) allocating: Mutex<()>,
}

impl IpamService {
    pub fn new(
        inspector: Arc<Inspector>,
        netservice: impl NetServiceClientTrait + 'static,
        cloud_ips: impl CloudIpStore + 'static,
        cluster: impl ClusterStore + 'static,
        config: Config,
    ) -> Self {
        Self {
            inspector,
            netservice: Box::new(netservice),
            cloud_ips: Box::new(cloud_ips),
            cluster: Box::new(cluster),
            config,
            allocating: Mutex::new(()),
        }
    }

    /// Labels of this node's `Active` CloudIPs.
    pub(crate) fn active_on_host(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_HOST.to_string(), self.config.node_name.clone()),
            (LABEL_STATUS.to_string(), CloudIPState::Active.as_str().to_string()),
        ])
    }
}
