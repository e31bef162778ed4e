//! Test utilities for unit testing reconcilers
//!
//! `TestHarness` wires a [`Reconciler`] to in-memory mocks that share state
//! with the harness, so tests can seed and inspect every collaborator.

#[cfg(test)]
use crate::config::Config;
#[cfg(test)]
use crate::reconciler::{Reconciler, Step};
#[cfg(test)]
use cloud_backend::{EniLimit, MockCloudBackend};
#[cfg(test)]
use crds::*;
#[cfg(test)]
use k8s_openapi::api::core::v1::{Node, NodeAddress, NodeStatus};
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
#[cfg(test)]
use kube_store::{MockCloudIpStore, MockClusterStore, MockNodeNetworkStore};
#[cfg(test)]
use netservice_client::{MockNetServiceClient, Subnet};
#[cfg(test)]
use std::collections::BTreeMap;

#[cfg(test)]
pub const TEST_NAMESPACE: &str = "cloudnet-system";

/// Helper to create the cloud view of a node's instance
#[cfg(test)]
pub fn create_test_vm(node: &str) -> VmInfo {
    VmInfo {
        instance_id: format!("i-{}", node),
        instance_type: "S5.LARGE8".to_string(),
        region: "ap-guangzhou".to_string(),
        zone: "ap-guangzhou-3".to_string(),
        vpc_id: "vpc-1".to_string(),
        subnet_id: "subnet-node".to_string(),
        node_role: None,
    }
}

#[cfg(test)]
pub fn test_limit() -> EniLimit {
    EniLimit {
        max_eni: 4,
        max_ip_per_eni: 10,
    }
}

/// Helper to create a test Node
#[cfg(test)]
pub fn create_test_node(name: &str, address: &str, labelled: bool) -> Node {
    let mut labels = BTreeMap::new();
    if labelled {
        labels.insert(NODE_ENI_LABEL.to_string(), NODE_ENI_LABEL_ENABLED.to_string());
    }
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        status: Some(NodeStatus {
            addresses: Some(vec![NodeAddress {
                address: address.to_string(),
                type_: "InternalIP".to_string(),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Helper to create a test ENI record
#[cfg(test)]
pub fn create_test_eni(index: u32, status: EniStatus) -> ElasticNetworkInterface {
    ElasticNetworkInterface {
        index,
        eni_id: format!("eni-test-{}", index),
        eni_name: format!("i-node-1-eni-{}", index),
        subnet_id: "subnet-eni".to_string(),
        subnet_cidr: "10.0.1.0/24".to_string(),
        gateway: Some("10.0.1.1".to_string()),
        mac_address: format!("02:00:00:00:01:{:02x}", index),
        attachment: None,
        primary_ip: format!("10.0.1.{}", 200 + index),
        secondary_ips: Vec::new(),
        route_table_id: 100 + index,
        status,
    }
}

/// Helper to create a test NodeNetwork for `node-1`
#[cfg(test)]
pub fn create_test_node_network(eni_num: u32, enis: Vec<ElasticNetworkInterface>) -> NodeNetwork {
    NodeNetwork {
        metadata: ObjectMeta {
            name: Some("node-1".to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            finalizers: Some(vec![CONTROLLER_FINALIZER.to_string()]),
            ..Default::default()
        },
        spec: NodeNetworkSpec {
            cluster: "cls-1".to_string(),
            hostname: "node-1".to_string(),
            node_address: "10.0.0.10".to_string(),
            vm: Some(create_test_vm("node-1")),
            eni_num,
            ip_num_per_eni: 9,
        },
        status: Some(NodeNetworkStatus {
            enis,
            ..Default::default()
        }),
    }
}

/// Helper to create a test CloudIP
#[cfg(test)]
pub fn create_test_cloud_ip(address: &str, eni_id: &str, state: CloudIPState, is_fixed: bool) -> CloudIP {
    let spec = CloudIPSpec {
        address: address.to_string(),
        vpc_id: "vpc-1".to_string(),
        region: "ap-guangzhou".to_string(),
        subnet_id: "subnet-eni".to_string(),
        subnet_cidr: "10.0.1.0/24".to_string(),
        cluster: "cls-1".to_string(),
        namespace: "default".to_string(),
        pod_name: "web-0".to_string(),
        workload_name: "web".to_string(),
        workload_kind: "StatefulSet".to_string(),
        container_id: "c-1".to_string(),
        host: "node-1".to_string(),
        eni_id: eni_id.to_string(),
        is_fixed,
    };
    let now = chrono::Utc::now();
    CloudIP {
        metadata: ObjectMeta {
            name: Some(address.to_string()),
            namespace: Some("default".to_string()),
            labels: Some(spec.labels(state)),
            ..Default::default()
        },
        spec,
        status: Some(CloudIPStatus {
            status: state,
            create_time: Some(now),
            update_time: Some(now),
        }),
    }
}

/// Mocks shared between a test and the reconciler under test
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct TestHarness {
    pub cloud: MockCloudBackend,
    pub netservice: MockNetServiceClient,
    pub node_networks: MockNodeNetworkStore,
    pub cloud_ips: MockCloudIpStore,
    pub cluster: MockClusterStore,
    pub config: Config,
}

#[cfg(test)]
impl TestHarness {
    /// `node-1` at 10.0.0.10 is known to the cloud and netservice has one
    /// ENI subnet.
    pub fn new() -> Self {
        let cloud = MockCloudBackend::new();
        cloud.add_vm("10.0.0.10", create_test_vm("node-1"), test_limit());

        let netservice = MockNetServiceClient::new("http://test-netservice");
        netservice.add_subnet(Subnet {
            subnet_id: "subnet-eni".to_string(),
            subnet_cidr: "10.0.1.0/24".to_string(),
            vpc_id: "vpc-1".to_string(),
            region: "ap-guangzhou".to_string(),
            zone: "ap-guangzhou-3".to_string(),
            gateway: Some("10.0.1.1".to_string()),
            available_ip_num: 250,
        });

        let cluster = MockClusterStore::new();
        cluster.add_node(create_test_node("node-1", "10.0.0.10", true));

        Self {
            cloud,
            netservice,
            node_networks: MockNodeNetworkStore::new(),
            cloud_ips: MockCloudIpStore::new(),
            cluster,
            config: Config {
                cluster_id: "cls-1".to_string(),
                default_eni_num: 2,
                ..Default::default()
            },
        }
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            Box::new(self.cloud.clone()),
            self.netservice.clone(),
            self.node_networks.clone(),
            self.cloud_ips.clone(),
            self.cluster.clone(),
            self.config.clone(),
        )
    }

    /// Current `node-1`; panics when it is gone.
    pub fn node_network(&self) -> NodeNetwork {
        self.node_networks.snapshot("node-1").unwrap()
    }

    /// Run passes on `node-1` until one does not progress.
    pub async fn drive(&self, reconciler: &Reconciler) -> Step {
        for _ in 0..32 {
            let nn = match self.node_networks.snapshot("node-1") {
                Some(nn) => nn,
                None => return Step::Converged,
            };
            let step = if nn.is_deleting() {
                reconciler.finalize(&nn).await.unwrap()
            } else {
                reconciler.reconcile_enis(&nn).await.unwrap()
            };
            if !matches!(step, Step::Progressed(_)) {
                return step;
            }
        }
        panic!("node-1 did not settle");
    }
}
