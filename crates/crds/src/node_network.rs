//! NodeNetwork CRD
//!
//! One object per cluster node, describing the ENIs the node should carry
//! (spec) and the ENIs it actually carries (status).

use crate::constants::FLOATING_IP_ENI_INDEX;
use kube::CustomResource;
use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "cloudnet.microscaler.io",
    version = "v1alpha1",
    kind = "NodeNetwork",
    namespaced,
    status = "NodeNetworkStatus",
    derive = "PartialEq",
    printcolumn = r#"{"name":"ENIs", "type":"integer", "jsonPath":".spec.eniNum"}"#,
    printcolumn = r#"{"name":"Status", "type":"string", "jsonPath":".status.status"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NodeNetworkSpec {
    /// Cluster id the node belongs to
    pub cluster: String,

    /// Node hostname (also the object name)
    pub hostname: String,

    /// Node internal address, used to look the instance up in the cloud
    pub node_address: String,

    /// Cloud VM metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vm: Option<VmInfo>,

    /// Desired number of ENIs
    #[serde(default)]
    pub eni_num: u32,

    /// Secondary IPs each ENI can carry
    #[serde(default)]
    pub ip_num_per_eni: u32,
}

/// Cloud-side description of the node's instance
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VmInfo {
    pub instance_id: String,

    #[serde(default)]
    pub instance_type: String,

    pub region: String,

    pub zone: String,

    pub vpc_id: String,

    /// Subnet of the instance's primary interface
    pub subnet_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_role: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NodeNetworkStatus {
    /// ENIs in index order (a stack: appended and removed at the end)
    #[serde(default)]
    pub enis: Vec<ElasticNetworkInterface>,

    /// ENI occupying the reserved floating-IP index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub floating_ip_eni: Option<FloatingIpEni>,

    /// Host-side readiness, set by the node agent
    #[serde(default)]
    pub status: NodeNetworkState,
}

/// Node readiness as seen by the node agent
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum NodeNetworkState {
    #[default]
    NotReady,
    Ready,
}

/// The ENI used for pod IP allocation, with its IP limit
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FloatingIpEni {
    pub eni: ElasticNetworkInterface,

    /// Secondary IPs this ENI may carry
    pub ip_limit: u32,
}

/// One network interface slot on a node
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ElasticNetworkInterface {
    /// Slot index; contiguous from 0
    pub index: u32,

    #[serde(default)]
    pub eni_id: String,

    #[serde(default)]
    pub eni_name: String,

    #[serde(default)]
    pub subnet_id: String,

    /// Subnet CIDR, e.g. "10.0.1.0/24"
    #[serde(default)]
    pub subnet_cidr: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,

    #[serde(default)]
    pub mac_address: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<EniAttachment>,

    /// Primary address of the ENI (allocated from the bookkeeping service)
    #[serde(default)]
    pub primary_ip: String,

    #[serde(default)]
    pub secondary_ips: Vec<String>,

    /// Host policy-routing table used for this ENI
    #[serde(default)]
    pub route_table_id: u32,

    #[serde(default)]
    pub status: EniStatus,
}

/// Cloud attachment of an ENI to an instance
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EniAttachment {
    pub attachment_id: String,

    pub instance_id: String,

    #[serde(default)]
    pub device_index: u32,
}

/// ENI lifecycle state
///
/// `NotReady -> Ready -> Cleaning -> Cleaned -> Deleting -> (removed)`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum EniStatus {
    /// Created and attach requested, not yet confirmed
    #[default]
    NotReady,

    /// Attached and usable for allocation
    Ready,

    /// Scale-down requested; waiting for pod IPs to drain
    Cleaning,

    /// No pod IPs left; ledger cleaned
    Cleaned,

    /// Detach/delete in progress
    Deleting,
}

impl EniStatus {
    /// Whether the ENI is in the middle of a structural change.
    pub fn is_transitional(self) -> bool {
        !matches!(self, EniStatus::Ready)
    }
}

impl ElasticNetworkInterface {
    /// Whether this ENI can take new pod addresses.
    pub fn is_ready(&self) -> bool {
        self.status == EniStatus::Ready
    }
}

impl NodeNetwork {
    /// ENIs currently in `Ready` state, in index order.
    pub fn ready_enis(&self) -> Vec<&ElasticNetworkInterface> {
        self.status
            .as_ref()
            .map(|s| s.enis.iter().filter(|e| e.is_ready()).collect())
            .unwrap_or_default()
    }

    /// ENIs in index order (empty without status).
    pub fn enis(&self) -> &[ElasticNetworkInterface] {
        self.status.as_ref().map(|s| s.enis.as_slice()).unwrap_or(&[])
    }

    /// The floating-IP ENI, but only once it is `Ready`.
    pub fn ready_floating_ip_eni(&self) -> Option<&ElasticNetworkInterface> {
        self.status
            .as_ref()
            .and_then(|s| s.floating_ip_eni.as_ref())
            .map(|f| &f.eni)
            .filter(|e| e.is_ready() && e.index == FLOATING_IP_ENI_INDEX)
    }

    /// Whether the node agent reported the host as ready.
    pub fn is_node_ready(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.status == NodeNetworkState::Ready)
    }

    /// Whether `finalizer` is present in metadata.
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers().iter().any(|f| f == finalizer)
    }

    /// Whether the object is being deleted.
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Checks the stack invariants on `status.enis`: indices are contiguous
    /// from 0 and at most one ENI (the last) is transitional.
    pub fn check_eni_invariants(&self) -> Result<(), String> {
        let enis = self.enis();
        for (pos, eni) in enis.iter().enumerate() {
            if eni.index as usize != pos {
                return Err(format!("eni at position {} has index {}", pos, eni.index));
            }
            if eni.status.is_transitional() && pos + 1 != enis.len() {
                return Err(format!(
                    "eni {} is {:?} but is not the last eni",
                    eni.index, eni.status
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn eni(index: u32, status: EniStatus) -> ElasticNetworkInterface {
        ElasticNetworkInterface {
            index,
            eni_id: format!("eni-{}", index),
            status,
            ..Default::default()
        }
    }

    fn node_network(enis: Vec<ElasticNetworkInterface>) -> NodeNetwork {
        NodeNetwork {
            metadata: ObjectMeta {
                name: Some("node-1".to_string()),
                ..Default::default()
            },
            spec: NodeNetworkSpec {
                cluster: "cls-1".to_string(),
                hostname: "node-1".to_string(),
                node_address: "10.0.0.10".to_string(),
                vm: None,
                eni_num: enis.len() as u32,
                ip_num_per_eni: 4,
            },
            status: Some(NodeNetworkStatus {
                enis,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn test_eni_invariants() {
        let nn = node_network(vec![eni(0, EniStatus::Ready), eni(1, EniStatus::Cleaning)]);
        assert!(nn.check_eni_invariants().is_ok());

        let gap = node_network(vec![eni(0, EniStatus::Ready), eni(2, EniStatus::Ready)]);
        assert!(gap.check_eni_invariants().is_err());

        let two_moving = node_network(vec![eni(0, EniStatus::NotReady), eni(1, EniStatus::Ready)]);
        assert!(two_moving.check_eni_invariants().is_err());
    }

    #[test]
    fn test_ready_enis_and_status_serialization() {
        let nn = node_network(vec![eni(0, EniStatus::Ready), eni(1, EniStatus::NotReady)]);
        assert_eq!(nn.ready_enis().len(), 1);

        let json = serde_json::to_value(nn.status.as_ref().map(|s| &s.enis[1])).unwrap();
        assert_eq!(json["status"], "NotReady");
        assert_eq!(json["eniId"], "eni-1");
    }
}
