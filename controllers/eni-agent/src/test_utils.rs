//! Test utilities for the node agent
//!
//! `AgentHarness` shares in-memory stores, netservice and a recording
//! [`MockHostNetwork`] with the inspector and handlers under test.

#[cfg(test)]
use crate::config::Config;
#[cfg(test)]
use crate::error::AgentError;
#[cfg(test)]
use crate::hostnet::{EniLink, HostNetwork, HostRule};
#[cfg(test)]
use crate::inspector::Inspector;
#[cfg(test)]
use crate::ipam::{IpRequest, IpamService};
#[cfg(test)]
use crds::*;
#[cfg(test)]
use k8s_openapi::api::core::v1::Pod;
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
#[cfg(test)]
use kube_store::{MockCloudIpStore, MockClusterStore, MockNodeNetworkStore};
#[cfg(test)]
use netservice_client::{MockNetServiceClient, Subnet};
#[cfg(test)]
use std::collections::{BTreeMap, HashMap};
#[cfg(test)]
use std::sync::{Arc, Mutex};

/// Host network that records configured tables instead of running `ip`
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct MockHostNetwork {
    links: Arc<Mutex<HashMap<u32, EniLink>>>,
    fail: Arc<Mutex<bool>>,
}

#[cfg(test)]
impl MockHostNetwork {
    /// Tables currently configured, sorted.
    pub fn tables(&self) -> Vec<u32> {
        let mut tables: Vec<u32> = self.links.lock().unwrap().keys().copied().collect();
        tables.sort();
        tables
    }

    pub fn link(&self, table: u32) -> Option<EniLink> {
        self.links.lock().unwrap().get(&table).cloned()
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    fn check(&self) -> Result<(), AgentError> {
        if *self.fail.lock().unwrap() {
            return Err(AgentError::HostNetwork("injected failure".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl HostNetwork for MockHostNetwork {
    async fn rules(&self) -> Result<Vec<HostRule>, AgentError> {
        self.check()?;
        let mut rules = vec![HostRule {
            src: Some("all".to_string()),
            table: "main".to_string(),
        }];
        rules.extend(self.links.lock().unwrap().values().map(|l| HostRule {
            src: Some(l.primary_ip.clone()),
            table: l.table.to_string(),
        }));
        Ok(rules)
    }

    async fn configure(&self, link: &EniLink) -> Result<(), AgentError> {
        self.check()?;
        self.links.lock().unwrap().insert(link.table, link.clone());
        Ok(())
    }

    async fn remove(&self, table: u32, _src: Option<&str>) -> Result<(), AgentError> {
        self.check()?;
        self.links.lock().unwrap().remove(&table);
        Ok(())
    }
}

/// Helper to create a test ENI record on subnet-eni (10.0.1.0/24)
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

/// Helper to create `node-1` with `enis`; the floating-IP ENI is filled in
/// from index 0.
#[cfg(test)]
pub fn create_test_node_network(enis: Vec<ElasticNetworkInterface>) -> NodeNetwork {
    let floating_ip_eni = enis
        .iter()
        .find(|e| e.index == FLOATING_IP_ENI_INDEX)
        .map(|eni| FloatingIpEni {
            eni: eni.clone(),
            ip_limit: 2,
        });
    NodeNetwork {
        metadata: ObjectMeta {
            name: Some("node-1".to_string()),
            namespace: Some("cloudnet-system".to_string()),
            finalizers: Some(vec![CONTROLLER_FINALIZER.to_string()]),
            ..Default::default()
        },
        spec: NodeNetworkSpec {
            cluster: "cls-1".to_string(),
            hostname: "node-1".to_string(),
            node_address: "10.0.0.10".to_string(),
            vm: Some(VmInfo {
                instance_id: "i-node-1".to_string(),
                instance_type: "S5.LARGE8".to_string(),
                region: "ap-guangzhou".to_string(),
                zone: "ap-guangzhou-3".to_string(),
                vpc_id: "vpc-1".to_string(),
                subnet_id: "subnet-node".to_string(),
                node_role: None,
            }),
            eni_num: enis.len() as u32,
            ip_num_per_eni: 2,
        },
        status: Some(NodeNetworkStatus {
            enis,
            floating_ip_eni,
            status: NodeNetworkState::NotReady,
        }),
    }
}

/// Helper to create a test pod owned by `kind`/`workload`
#[cfg(test)]
pub fn create_test_pod(name: &str, kind: &str, workload: &str, fixed: bool) -> Pod {
    let mut annotations = BTreeMap::from([(ANNOTATION_NETWORKS.to_string(), NETWORKS_FLOATING_IP.to_string())]);
    if fixed {
        annotations.insert(ANNOTATION_FIXED_IP.to_string(), "true".to_string());
    }
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
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

/// Helper to create a test CloudIP hosted on node-1
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

#[cfg(test)]
pub fn request(pod: &str, container: &str) -> IpRequest {
    IpRequest {
        pod_name: pod.to_string(),
        pod_namespace: "default".to_string(),
        container_id: container.to_string(),
    }
}

/// Mocks shared between a test and the agent components under test
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct AgentHarness {
    pub netservice: MockNetServiceClient,
    pub node_networks: MockNodeNetworkStore,
    pub cloud_ips: MockCloudIpStore,
    pub cluster: MockClusterStore,
    pub host: MockHostNetwork,
    pub config: Config,
}

#[cfg(test)]
impl AgentHarness {
    /// Agent for `node-1`; netservice knows subnet-eni (10.0.1.0/24) and
    /// a second subnet-other (10.0.2.0/24).
    pub fn new() -> Self {
        let netservice = MockNetServiceClient::new("http://test-netservice");
        for (id, cidr, gateway) in [
            ("subnet-eni", "10.0.1.0/24", "10.0.1.1"),
            ("subnet-other", "10.0.2.0/24", "10.0.2.1"),
        ] {
            netservice.add_subnet(Subnet {
                subnet_id: id.to_string(),
                subnet_cidr: cidr.to_string(),
                vpc_id: "vpc-1".to_string(),
                region: "ap-guangzhou".to_string(),
                zone: "ap-guangzhou-3".to_string(),
                gateway: Some(gateway.to_string()),
                available_ip_num: 250,
            });
        }
        Self {
            netservice,
            node_networks: MockNodeNetworkStore::new(),
            cloud_ips: MockCloudIpStore::new(),
            cluster: MockClusterStore::new(),
            host: MockHostNetwork::default(),
            config: Config {
                node_name: "node-1".to_string(),
                cluster_id: "cls-1".to_string(),
                ..Default::default()
            },
        }
    }

    pub fn inspector(&self) -> Arc<Inspector> {
        Arc::new(Inspector::new(
            self.config.clone(),
            self.node_networks.clone(),
            self.cloud_ips.clone(),
            self.host.clone(),
        ))
    }

    pub fn service(&self, inspector: Arc<Inspector>) -> IpamService {
        IpamService::new(
            inspector,
            self.netservice.clone(),
            self.cloud_ips.clone(),
            self.cluster.clone(),
            self.config.clone(),
        )
    }

    /// Inspector synced against `enis` plus a service on top of it.
    pub async fn ready_service(&self, enis: Vec<ElasticNetworkInterface>) -> IpamService {
        let inspector = self.inspector();
        let nn = self.node_networks.insert(create_test_node_network(enis));
        inspector.sync(&nn).await.unwrap();
        self.service(inspector)
    }
}
