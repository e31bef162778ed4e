//! Predicate and bind for floating-IP pods
//!
//! A [`SchedulerContext`] is built once in `main` and shared by the HTTP
//! handlers, the pod informer and the quota refresher. Capacity of a node
//! is derived from its `NodeNetwork` on every call; consumption comes from
//! the [`ResourceCache`].

use crate::cache::{Capacity, Resource, ResourceCache, SubnetCapacity, resource_key};
use crate::config::Config;
use crate::error::SchedulerError;
use crate::types::{ExtenderArgs, ExtenderBindingArgs, ExtenderFilterResult};
use crds::{CloudIPState, LABEL_IS_FIXED, LABEL_STATUS, LABEL_WORKLOAD_KIND, LABEL_WORKLOAD_NAME, wants_fixed_ip, wants_floating_ip};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use kube_store::{CloudIpStore, ClusterStore, EventHandler, NodeNetworkStore, Workload};
use netservice_client::NetServiceClientTrait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Shared state of the extender
pub struct SchedulerContext {
    pub(crate) cache: ResourceCache,
    node_networks: Box<dyn NodeNetworkStore>,
    cloud_ips: Box<dyn CloudIpStore>,
    cluster: Box<dyn ClusterStore>,
    pub(crate) netservice: Box<dyn NetServiceClientTrait>,
    pub(crate) config: Config,
    quota: Mutex<Option<u32>>,
}

impl SchedulerContext {
    pub fn new(
        config: Config,
        node_networks: impl NodeNetworkStore + 'static,
        cloud_ips: impl CloudIpStore + 'static,
        cluster: impl ClusterStore + 'static,
        netservice: impl NetServiceClientTrait + 'static,
    ) -> Self {
        Self {
            cache: ResourceCache::new(),
            node_networks: Box::new(node_networks),
            cloud_ips: Box::new(cloud_ips),
            cluster: Box::new(cluster),
            netservice: Box::new(netservice),
            config,
            quota: Mutex::new(None),
        }
    }

    fn quota_lock(&self) -> MutexGuard<'_, Option<u32>> {
        self.quota.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Last known cluster quota.
    pub fn quota(&self) -> Option<u32> {
        *self.quota_lock()
    }

    pub(crate) fn set_quota(&self, limit: u32) -> Option<u32> {
        self.quota_lock().replace(limit)
    }

    /// Seed the cache from every `Active` CloudIP of this cluster.
    pub async fn bootstrap(&self) -> Result<usize, SchedulerError> {
        let labels = BTreeMap::from([(LABEL_STATUS.to_string(), CloudIPState::Active.as_str().to_string())]);
        let mut seeded = 0;
        for ip in self.cloud_ips.list(&labels).await? {
            let spec = ip.spec;
            if !spec.cluster.is_empty() && spec.cluster != self.config.cluster_id {
                continue;
            }
            self.cache.update_resource(Resource {
                pod_name: spec.pod_name,
                namespace: spec.namespace,
                node: spec.host,
                kind: spec.workload_kind,
                value: spec.address,
                eni_id: spec.eni_id,
                subnet_id: spec.subnet_id,
            });
            seeded += 1;
        }
        info!("Seeded resource cache with {} active addresses", seeded);
        Ok(seeded)
    }

    /// Subnet of the pod's fixed address from an earlier incarnation.
    async fn fixed_subnet(&self, pod: &Pod) -> Result<Option<(String, String)>, SchedulerError> {
        if !wants_fixed_ip(pod.annotations()) {
            return Ok(None);
        }
        let mut labels = BTreeMap::from([(LABEL_IS_FIXED.to_string(), "true".to_string())]);
        if let Some(workload) = Workload::of_pod(pod) {
            labels.insert(LABEL_WORKLOAD_KIND.to_string(), workload.kind);
            labels.insert(LABEL_WORKLOAD_NAME.to_string(), workload.name);
        }
        let namespace = pod.namespace().unwrap_or_default();
        let name = pod.name_any();
        Ok(self
            .cloud_ips
            .list(&labels)
            .await?
            .into_iter()
            .find(|ip| ip.spec.namespace == namespace && ip.spec.pod_name == name)
            .map(|ip| (ip.spec.subnet_id, ip.spec.address)))
    }

    /// What `node` can hold, or why it takes no floating-IP pods.
    async fn capacity(&self, node: &str, subnet: Option<&str>) -> Result<Capacity, SchedulerError> {
        let nn = self
            .node_networks
            .get(node)
            .await?
            .ok_or_else(|| SchedulerError::Unschedulable(format!("node {} has no NodeNetwork", node)))?;
        if !nn.is_node_ready() {
            return Err(SchedulerError::Unschedulable(format!("NodeNetwork of node {} is not ready", node)));
        }
        let per_eni = nn.spec.ip_num_per_eni as usize;
        let ready = nn.ready_enis();
        Ok(Capacity {
            node: ready.len() * per_eni,
            quota: self.quota().map(|q| q as usize),
            subnet: subnet.map(|s| SubnetCapacity {
                subnet_id: s.to_string(),
                eni_ids: ready
                    .iter()
                    .filter(|eni| eni.subnet_id == s)
                    .map(|eni| eni.eni_id.clone())
                    .collect(),
                per_eni,
            }),
        })
    }

    fn resource_for(pod: &Pod, node: &str, fixed: Option<&(String, String)>) -> Resource {
        Resource {
            pod_name: pod.name_any(),
            namespace: pod.namespace().unwrap_or_default(),
            node: node.to_string(),
            kind: Workload::of_pod(pod).map(|w| w.kind).unwrap_or_default(),
            value: fixed.map(|(_, address)| address.clone()).unwrap_or_default(),
            eni_id: String::new(),
            subnet_id: fixed.map(|(subnet, _)| subnet.clone()).unwrap_or_default(),
        }
    }

    /// Filter the candidate nodes of `args`.
    pub async fn predicates(&self, args: &ExtenderArgs) -> ExtenderFilterResult {
        let candidates = args.candidates();
        let Some(pod) = &args.pod else {
            return ExtenderFilterResult::error("extender args carry no pod");
        };
        if !wants_floating_ip(pod.annotations()) {
            return ExtenderFilterResult::answer(args, &candidates, BTreeMap::new());
        }

        let fixed = match self.fixed_subnet(pod).await {
            Ok(fixed) => fixed,
            Err(e) => return ExtenderFilterResult::error(e.to_string()),
        };
        let subnet = fixed.as_ref().map(|(s, _)| s.as_str());

        let mut passed = Vec::new();
        let mut failed = BTreeMap::new();
        for node in candidates {
            let verdict = match self.capacity(&node, subnet).await {
                Ok(capacity) => self
                    .cache
                    .check(&Self::resource_for(pod, &node, fixed.as_ref()), &capacity)
                    .map_err(SchedulerError::from),
                Err(e) => Err(e),
            };
            match verdict {
                Ok(()) => passed.push(node),
                Err(e) => {
                    debug!("Node {} rejected for {}/{}: {}", node, pod.namespace().unwrap_or_default(), pod.name_any(), e);
                    failed.insert(node, e.to_string());
                }
            }
        }
        ExtenderFilterResult::answer(args, &passed, failed)
    }

    /// Reserve capacity for the pod and bind it to `args.node`. The
    /// reservation is rolled back when the bind call fails.
    pub async fn bind(&self, args: &ExtenderBindingArgs) -> Result<(), SchedulerError> {
        let pod = self
            .cluster
            .get_pod(&args.pod_namespace, &args.pod_name)
            .await?
            .ok_or_else(|| SchedulerError::InvalidRequest(format!("pod {} not found", args.pod_key())))?;

        if !wants_floating_ip(pod.annotations()) {
            self.cluster
                .bind_pod(&args.pod_namespace, &args.pod_name, &args.pod_uid, &args.node)
                .await?;
            return Ok(());
        }

        let fixed = self.fixed_subnet(&pod).await?;
        let capacity = self.capacity(&args.node, fixed.as_ref().map(|(s, _)| s.as_str())).await?;
        let key = resource_key(&args.pod_namespace, &args.pod_name);
        let previous = self.cache.get_resource(&key);
        let reserved = self
            .cache
            .try_reserve(Self::resource_for(&pod, &args.node, fixed.as_ref()), &capacity)?;

        if let Err(e) = self
            .cluster
            .bind_pod(&args.pod_namespace, &args.pod_name, &args.pod_uid, &args.node)
            .await
        {
            warn!("Binding {} to {} failed, releasing reservation: {}", args.pod_key(), args.node, e);
            match previous {
                Some(resource) => self.cache.update_resource(resource),
                None => {
                    self.cache.delete_resource(&key);
                }
            }
            return Err(e.into());
        }

        info!(
            "Bound {} to {}{}",
            args.pod_key(),
            args.node,
            if reserved.eni_id.is_empty() { String::new() } else { format!(" (eni {})", reserved.eni_id) }
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl EventHandler<Pod> for SchedulerContext {
    async fn on_add(&self, _obj: Arc<Pod>) {}

    async fn on_update(&self, _old: Arc<Pod>, _new: Arc<Pod>) {}

    async fn on_delete(&self, obj: Arc<Pod>) {
        let key = resource_key(&obj.namespace().unwrap_or_default(), &obj.name_any());
        if let Some(resource) = self.cache.delete_resource(&key) {
            debug!("Dropped {} on {} from resource cache", key, resource.node);
        }
    }
}
