//! Test utilities for the scheduler extender

#[cfg(test)]
use crate::config::Config;
#[cfg(test)]
use crate::scheduler::SchedulerContext;
#[cfg(test)]
use crate::types::{ExtenderArgs, ExtenderBindingArgs};
#[cfg(test)]
use crds::*;
#[cfg(test)]
use k8s_openapi::api::core::v1::Pod;
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
#[cfg(test)]
use kube_store::{MockCloudIpStore, MockClusterStore, MockNodeNetworkStore};
#[cfg(test)]
use netservice_client::MockNetServiceClient;
#[cfg(test)]
use std::collections::BTreeMap;
#[cfg(test)]
use std::sync::Arc;

/// Helper to create an ENI of `node` in `subnet`
#[cfg(test)]
pub fn create_test_eni(node: &str, index: u32, subnet: &str, status: EniStatus) -> ElasticNetworkInterface {
    ElasticNetworkInterface {
        index,
        eni_id: format!("eni-{}-{}", node, index),
        eni_name: format!("i-{}-eni-{}", node, index),
        subnet_id: subnet.to_string(),
        subnet_cidr: "10.0.1.0/24".to_string(),
        mac_address: format!("02:00:00:00:01:{:02x}", index),
        primary_ip: format!("10.0.1.{}", 200 + index),
        route_table_id: 100 + index,
        status,
        ..Default::default()
    }
}

/// Helper to create a `Ready` NodeNetwork for `node`
#[cfg(test)]
pub fn create_test_node_network(node: &str, enis: Vec<ElasticNetworkInterface>, ip_num_per_eni: u32) -> NodeNetwork {
    NodeNetwork {
        metadata: ObjectMeta {
            name: Some(node.to_string()),
            namespace: Some("cloudnet-system".to_string()),
            ..Default::default()
        },
        spec: NodeNetworkSpec {
            cluster: "cls-1".to_string(),
            hostname: node.to_string(),
            node_address: "10.0.0.10".to_string(),
            vm: None,
            eni_num: enis.len() as u32,
            ip_num_per_eni,
        },
        status: Some(NodeNetworkStatus {
            enis,
            floating_ip_eni: None,
            status: NodeNetworkState::Ready,
        }),
    }
}

/// Helper to create a test pod; `floating` sets the networks annotation.
#[cfg(test)]
pub fn create_test_pod(name: &str, kind: &str, workload: &str, floating: bool, fixed: bool) -> Pod {
    let mut annotations = BTreeMap::new();
    if floating {
        annotations.insert(ANNOTATION_NETWORKS.to_string(), NETWORKS_FLOATING_IP.to_string());
    }
    if fixed {
        annotations.insert(ANNOTATION_FIXED_IP.to_string(), "true".to_string());
    }
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            uid: Some(format!("uid-{}", name)),
            annotations: Some(annotations),
            owner_references: Some(vec![OwnerReference {
                api_version: "apps/v1".to_string(),
                kind: kind.to_string(),
                name: workload.to_string(),
                uid: format!("uid-{}", workload),
                controller: Some(true),
                ..Default::default()
            }]),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Helper to create a CloudIP held by `pod` of StatefulSet `web`
#[cfg(test)]
pub fn create_test_cloud_ip(address: &str, pod: &str, host: &str, subnet: &str, state: CloudIPState) -> CloudIP {
    let spec = CloudIPSpec {
        address: address.to_string(),
        vpc_id: "vpc-1".to_string(),
        region: "ap-guangzhou".to_string(),
        subnet_id: subnet.to_string(),
        subnet_cidr: "10.0.1.0/24".to_string(),
        cluster: "cls-1".to_string(),
        namespace: "default".to_string(),
        pod_name: pod.to_string(),
        workload_name: "web".to_string(),
        workload_kind: "StatefulSet".to_string(),
        container_id: "c-1".to_string(),
        host: host.to_string(),
        eni_id: format!("eni-{}-0", host),
        is_fixed: true,
    };
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
            create_time: None,
            update_time: None,
        }),
    }
}

#[cfg(test)]
pub fn filter_args(pod: Pod, nodes: &[&str]) -> ExtenderArgs {
    ExtenderArgs {
        pod: Some(pod),
        nodes: None,
        node_names: Some(nodes.iter().map(|n| n.to_string()).collect()),
    }
}

#[cfg(test)]
pub fn binding_args(pod: &str, node: &str) -> ExtenderBindingArgs {
    ExtenderBindingArgs {
        pod_name: pod.to_string(),
        pod_namespace: "default".to_string(),
        pod_uid: format!("uid-{}", pod),
        node: node.to_string(),
    }
}

/// Mocks shared between a test and the scheduler context under test
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct SchedulerHarness {
    pub netservice: MockNetServiceClient,
    pub node_networks: MockNodeNetworkStore,
    pub cloud_ips: MockCloudIpStore,
    pub cluster: MockClusterStore,
    pub config: Config,
}

#[cfg(test)]
impl SchedulerHarness {
    pub fn new() -> Self {
        Self {
            netservice: MockNetServiceClient::new("http://test-netservice"),
            node_networks: MockNodeNetworkStore::new(),
            cloud_ips: MockCloudIpStore::new(),
            cluster: MockClusterStore::new(),
            config: Config {
                cluster_id: "cls-1".to_string(),
                ..Default::default()
            },
        }
    }

    pub fn context(&self) -> Arc<SchedulerContext> {
        Arc::new(SchedulerContext::new(
            self.config.clone(),
            self.node_networks.clone(),
            self.cloud_ips.clone(),
            self.cluster.clone(),
            self.netservice.clone(),
        ))
    }
}
