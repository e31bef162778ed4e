//! Allocate pipeline
//!
//! 1. validate the request and fetch the pod
//! 2. require a ready node with a `Ready` floating-IP ENI
//! 3. pick an ENI and allocate from netservice (fixed or floating)
//! 4. upsert the `CloudIP` record; on failure the address is given back

use super::{Allocation, IpRequest, IpamService, mask_of};
use crate::error::IpamError;
use crds::{
    ANNOTATION_FIXED_IP_ADDRESS, CloudIP, CloudIPSpec, CloudIPState, ElasticNetworkInterface, LABEL_IS_FIXED,
    LABEL_WORKLOAD_KIND, LABEL_WORKLOAD_NAME, NodeNetwork, POD_GATEWAY, VmInfo, wants_fixed_ip,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use kube_store::Workload;
use kube_store::cloud_ip::stamp_state;
use netservice_client::{AllocateIpRequest, IpObject, ReleaseIpRequest};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

impl IpamService {
    /// Hand an address to the pod in `request`.
    pub async fn allocate(&self, request: &IpRequest) -> Result<Allocation, IpamError> {
        request.validate()?;
        let pod = self
            .cluster
            .get_pod(&request.pod_namespace, &request.pod_name)
            .await?
            .ok_or_else(|| IpamError::PodNotFound(request.pod_key()))?;
        let workload = Workload::of_pod(&pod).unwrap_or_default();
        let annotations = pod.annotations();

        let _allocating = self.allocating.lock().await;
        let nn = self.ready_node_network()?;
        let vm = nn
            .spec
            .vm
            .clone()
            .ok_or_else(|| IpamError::NodeNotReady(format!("node {} has no instance info", nn.name_any())))?;

        let fixed = wants_fixed_ip(annotations);
        let (ip, eni) = if fixed {
            self.allocate_fixed(request, &nn, &vm, &workload, annotations.get(ANNOTATION_FIXED_IP_ADDRESS))
                .await?
        } else {
            let eni = self.choose_eni(&nn, None).await?;
            let ip = self
                .netservice
                .allocate_ip(&self.allocate_request(request, &vm, &workload, &eni, None))
                .await?;
            (ip, eni)
        };

        let cidr = if ip.subnet_cidr.is_empty() { &eni.subnet_cidr } else { &ip.subnet_cidr };
        let recorded = match mask_of(cidr) {
            Ok(mask) => self.record(request, &vm, &workload, &eni, &ip, fixed).await.map(|_| mask),
            Err(e) => Err(e),
        };
        let mask = match recorded {
            Ok(mask) => mask,
            Err(e) => {
                self.give_back(request, &vm, &ip, fixed).await;
                return Err(e);
            }
        };

        info!(
            "Allocated {} on {} to {} ({})",
            ip.address,
            eni.eni_id,
            request.pod_key(),
            if fixed { "fixed" } else { "floating" }
        );
        Ok(Allocation {
            ip_addr: ip.address,
            mac_addr: eni.mac_address,
            mask,
            gateway: POD_GATEWAY.to_string(),
        })
    }

    fn ready_node_network(&self) -> Result<Arc<NodeNetwork>, IpamError> {
        let node = &self.config.node_name;
        if !self.inspector.can_allocate() {
            return Err(IpamError::NodeNotReady(format!("node {} host networking is not ready", node)));
        }
        let nn = self
            .inspector
            .get_node_network()
            .ok_or_else(|| IpamError::NodeNotReady(format!("node {} has no NodeNetwork", node)))?;
        if nn.ready_floating_ip_eni().is_none() {
            return Err(IpamError::NodeNotReady(format!("floating ip eni of node {} is not ready", node)));
        }
        Ok(nn)
    }

    async fn allocate_fixed(
        &self,
        request: &IpRequest,
        nn: &NodeNetwork,
        vm: &VmInfo,
        workload: &Workload,
        pinned: Option<&String>,
    ) -> Result<(IpObject, ElasticNetworkInterface), IpamError> {
        if !self.config.fixed_ip_workload_kinds.contains(&workload.kind) {
            let kind = if workload.kind.is_empty() { "<none>" } else { workload.kind.as_str() };
            return Err(IpamError::WorkloadKindUnsupported(kind.to_string()));
        }
        let exists = self
            .cluster
            .workload_exists(&workload.kind, &request.pod_namespace, &workload.name)
            .await?;
        if !exists {
            return Err(IpamError::WorkloadNotFound(format!(
                "{} {}/{}",
                workload.kind, request.pod_namespace, workload.name
            )));
        }

        let previous = self.previous_fixed_ip(request, workload).await?;
        let subnet = previous.as_ref().map(|ip| ip.spec.subnet_id.as_str());
        let eni = self.choose_eni(nn, subnet).await?;
        let address = pinned
            .cloned()
            .filter(|a| !a.is_empty())
            .or_else(|| previous.as_ref().map(|ip| ip.spec.address.clone()));
        debug!(
            "Fixed IP for {}: previous {:?}, requested {:?}",
            request.pod_key(),
            previous.as_ref().map(|ip| &ip.spec.address),
            address
        );

        let ip = self
            .netservice
            .allocate_fixed_ip(&self.allocate_request(request, vm, workload, &eni, address))
            .await?;
        Ok((ip, eni))
    }

    /// The pod's fixed CloudIP from an earlier incarnation, if any.
    async fn previous_fixed_ip(&self, request: &IpRequest, workload: &Workload) -> Result<Option<CloudIP>, IpamError> {
        let labels = BTreeMap::from([
            (LABEL_IS_FIXED.to_string(), "true".to_string()),
            (LABEL_WORKLOAD_KIND.to_string(), workload.kind.clone()),
            (LABEL_WORKLOAD_NAME.to_string(), workload.name.clone()),
        ]);
        Ok(self
            .cloud_ips
            .list(&labels)
            .await?
            .into_iter()
            .find(|ip| ip.spec.namespace == request.pod_namespace && ip.spec.pod_name == request.pod_name))
    }

    /// First `Ready` ENI by index with spare capacity, optionally restricted
    /// to `subnet`.
    pub(crate) async fn choose_eni(
        &self,
        nn: &NodeNetwork,
        subnet: Option<&str>,
    ) -> Result<ElasticNetworkInterface, IpamError> {
        let mut used: HashMap<String, u32> = HashMap::new();
        for ip in self.cloud_ips.list(&self.active_on_host()).await? {
            *used.entry(ip.spec.eni_id).or_default() += 1;
        }
        let limit = nn.spec.ip_num_per_eni;
        nn.ready_enis()
            .into_iter()
            .filter(|eni| subnet.is_none_or(|s| eni.subnet_id == s))
            .find(|eni| used.get(&eni.eni_id).copied().unwrap_or(0) < limit)
            .cloned()
            .ok_or_else(|| match subnet {
                Some(s) => IpamError::NodeNotReady(format!("no ready eni with spare capacity in subnet {}", s)),
                None => IpamError::NodeNotReady("no ready eni with spare capacity".to_string()),
            })
    }

    fn allocate_request(
        &self,
        request: &IpRequest,
        vm: &VmInfo,
        workload: &Workload,
        eni: &ElasticNetworkInterface,
        address: Option<String>,
    ) -> AllocateIpRequest {
        AllocateIpRequest {
            vpc_id: vm.vpc_id.clone(),
            region: vm.region.clone(),
            subnet_id: eni.subnet_id.clone(),
            cluster: self.config.cluster_id.clone(),
            namespace: request.pod_namespace.clone(),
            pod_name: request.pod_name.clone(),
            workload_name: workload.name.clone(),
            workload_kind: workload.kind.clone(),
            container_id: request.container_id.clone(),
            host: self.config.node_name.clone(),
            eni_id: eni.eni_id.clone(),
            address,
        }
    }

    /// Create or overwrite the `CloudIP` for `ip` and mark it `Active`.
    async fn record(
        &self,
        request: &IpRequest,
        vm: &VmInfo,
        workload: &Workload,
        eni: &ElasticNetworkInterface,
        ip: &IpObject,
        fixed: bool,
    ) -> Result<CloudIP, IpamError> {
        let spec = CloudIPSpec {
            address: ip.address.clone(),
            vpc_id: vm.vpc_id.clone(),
            region: vm.region.clone(),
            subnet_id: if ip.subnet_id.is_empty() { eni.subnet_id.clone() } else { ip.subnet_id.clone() },
            subnet_cidr: if ip.subnet_cidr.is_empty() { eni.subnet_cidr.clone() } else { ip.subnet_cidr.clone() },
            cluster: self.config.cluster_id.clone(),
            namespace: request.pod_namespace.clone(),
            pod_name: request.pod_name.clone(),
            workload_name: workload.name.clone(),
            workload_kind: workload.kind.clone(),
            container_id: request.container_id.clone(),
            host: self.config.node_name.clone(),
            eni_id: eni.eni_id.clone(),
            is_fixed: fixed,
        };

        match self.cloud_ips.get(&request.pod_namespace, &ip.address).await? {
            Some(mut existing) => {
                existing.spec = spec;
                stamp_state(&mut existing, CloudIPState::Active);
                Ok(self.cloud_ips.replace(&existing).await?)
            }
            None => {
                let mut created = CloudIP {
                    metadata: ObjectMeta {
                        name: Some(ip.address.clone()),
                        namespace: Some(request.pod_namespace.clone()),
                        ..Default::default()
                    },
                    spec,
                    status: None,
                };
                stamp_state(&mut created, CloudIPState::Active);
                Ok(self.cloud_ips.create(&created).await?)
            }
        }
    }

    /// Best-effort release after a failed allocation.
    async fn give_back(&self, request: &IpRequest, vm: &VmInfo, ip: &IpObject, fixed: bool) {
        let release = ReleaseIpRequest {
            vpc_id: vm.vpc_id.clone(),
            region: vm.region.clone(),
            subnet_id: ip.subnet_id.clone(),
            cluster: self.config.cluster_id.clone(),
            namespace: request.pod_namespace.clone(),
            pod_name: request.pod_name.clone(),
            container_id: request.container_id.clone(),
            host: self.config.node_name.clone(),
            address: ip.address.clone(),
        };
        let result = if fixed {
            self.netservice.release_fixed_ip(&release).await
        } else {
            self.netservice.release_ip(&release).await
        };
        if let Err(e) = result {
            warn!(
                "Failed to give back {} after failed allocation for {}: {}",
                ip.address,
                request.pod_key(),
                e
            );
        }
    }
}
