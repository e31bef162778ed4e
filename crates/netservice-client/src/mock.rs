//! Mock NetServiceClient for unit testing
//!
//! Keeps subnets, addresses and quotas in memory and hands out addresses
//! from the subnet CIDR in ascending order (the first host is reserved for
//! the gateway). Individual methods can be made to fail with a given
//! upstream code to exercise error paths.

use crate::error::NetServiceError;
use crate::models::*;
use crate::netservice_trait::NetServiceClientTrait;
use ipnet::Ipv4Net;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Mock NetServiceClient for testing
#[derive(Clone, Debug, Default)]
pub struct MockNetServiceClient {
    pub(crate) base_url: String,
    pub(crate) subnets: Arc<Mutex<Vec<Subnet>>>,
    pub(crate) ips: Arc<Mutex<HashMap<String, IpObject>>>,
    pub(crate) quotas: Arc<Mutex<HashMap<String, u32>>>,
    pub(crate) failures: Arc<Mutex<HashMap<String, (i32, String)>>>,
    pub(crate) calls: Arc<Mutex<Vec<String>>>,
    pub(crate) latency: Arc<Mutex<Option<Duration>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockNetServiceClient {
    /// Create a new mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Add a subnet (for test setup)
    pub fn add_subnet(&self, subnet: Subnet) {
        lock(&self.subnets).push(subnet);
    }

    /// Add an address record (for test setup)
    pub fn add_ip(&self, ip: IpObject) {
        lock(&self.ips).insert(ip.address.clone(), ip);
    }

    /// Set the quota of a cluster (for test setup)
    pub fn set_quota(&self, cluster: &str, limit: u32) {
        lock(&self.quotas).insert(cluster.to_string(), limit);
    }

    /// Make `method` fail with an upstream error until cleared
    pub fn fail_on(&self, method: &str, code: i32, message: &str) {
        lock(&self.failures).insert(method.to_string(), (code, message.to_string()));
    }

    /// Clear all injected failures
    pub fn clear_failures(&self) {
        lock(&self.failures).clear();
    }

    /// Delay every address allocation by `latency` so concurrent callers
    /// interleave
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = Some(latency);
    }

    /// Methods called so far, in order
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    /// Address record by address
    pub fn get_ip(&self, address: &str) -> Option<IpObject> {
        lock(&self.ips).get(address).cloned()
    }

    /// Number of address records
    pub fn ip_count(&self) -> usize {
        lock(&self.ips).len()
    }

    fn enter(&self, method: &str) -> Result<(), NetServiceError> {
        lock(&self.calls).push(method.to_string());
        match lock(&self.failures).get(method) {
            Some((code, message)) => Err(NetServiceError::Upstream {
                code: *code,
                message: message.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn delay(&self) {
        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn subnet(&self, subnet_id: &str) -> Result<Subnet, NetServiceError> {
        lock(&self.subnets)
            .iter()
            .find(|s| s.subnet_id == subnet_id)
            .cloned()
            .ok_or_else(|| NetServiceError::NotFound(format!("subnet {} not found", subnet_id)))
    }

    /// Reserve the first free host address of `subnet` for `template`.
    fn take_free_address(&self, subnet: &Subnet, mut template: IpObject) -> Result<IpObject, NetServiceError> {
        let net: Ipv4Net = subnet.subnet_cidr.parse().map_err(|_| {
            NetServiceError::InvalidRequest(format!("bad subnet cidr {}", subnet.subnet_cidr))
        })?;
        let mut ips = lock(&self.ips);
        let free = net
            .hosts()
            .skip(1)
            .map(|a| a.to_string())
            .find(|a| !ips.contains_key(a))
            .ok_or_else(|| NetServiceError::Upstream {
                code: 5,
                message: format!("no available ip in subnet {}", subnet.subnet_id),
            })?;
        template.address = free.clone();
        template.subnet_id = subnet.subnet_id.clone();
        template.subnet_cidr = subnet.subnet_cidr.clone();
        template.update_time = Some(chrono::Utc::now());
        ips.insert(free, template.clone());
        Ok(template)
    }
}

fn ip_from_request(request: &AllocateIpRequest, is_fixed: bool) -> IpObject {
    IpObject {
        address: String::new(),
        vpc_id: request.vpc_id.clone(),
        region: request.region.clone(),
        subnet_id: request.subnet_id.clone(),
        subnet_cidr: String::new(),
        cluster: request.cluster.clone(),
        namespace: request.namespace.clone(),
        pod_name: request.pod_name.clone(),
        workload_name: request.workload_name.clone(),
        workload_kind: request.workload_kind.clone(),
        container_id: request.container_id.clone(),
        host: request.host.clone(),
        eni_id: request.eni_id.clone(),
        is_fixed,
        status: IpStatus::Active,
        update_time: None,
    }
}

#[async_trait::async_trait]
impl NetServiceClientTrait for MockNetServiceClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn allocate_ip(&self, request: &AllocateIpRequest) -> Result<IpObject, NetServiceError> {
        self.enter("allocate_ip")?;
        self.delay().await;
        let subnet = self.subnet(&request.subnet_id)?;
        self.take_free_address(&subnet, ip_from_request(request, false))
    }

    async fn allocate_fixed_ip(&self, request: &AllocateIpRequest) -> Result<IpObject, NetServiceError> {
        self.enter("allocate_fixed_ip")?;
        self.delay().await;
        let subnet = self.subnet(&request.subnet_id)?;
        {
            let mut ips = lock(&self.ips);
            let existing = ips.values_mut().find(|ip| {
                ip.is_fixed
                    && ip.namespace == request.namespace
                    && ip.pod_name == request.pod_name
                    && request.address.as_ref().is_none_or(|a| a == &ip.address)
            });
            if let Some(ip) = existing {
                ip.status = IpStatus::Active;
                ip.container_id = request.container_id.clone();
                ip.host = request.host.clone();
                ip.eni_id = request.eni_id.clone();
                ip.update_time = Some(chrono::Utc::now());
                return Ok(ip.clone());
            }
            if let Some(address) = &request.address {
                if ips.contains_key(address) {
                    return Err(NetServiceError::Upstream {
                        code: 6,
                        message: format!("address {} is owned by another pod", address),
                    });
                }
                let mut ip = ip_from_request(request, true);
                ip.address = address.clone();
                ip.subnet_cidr = subnet.subnet_cidr.clone();
                ip.update_time = Some(chrono::Utc::now());
                ips.insert(address.clone(), ip.clone());
                return Ok(ip);
            }
        }
        self.take_free_address(&subnet, ip_from_request(request, true))
    }

    async fn release_ip(&self, request: &ReleaseIpRequest) -> Result<(), NetServiceError> {
        self.enter("release_ip")?;
        let mut ips = lock(&self.ips);
        match ips.get(&request.address) {
            Some(ip) if ip.pod_name == request.pod_name && ip.namespace == request.namespace => {
                ips.remove(&request.address);
                Ok(())
            }
            _ => Err(NetServiceError::NotFound(format!("address {} not found", request.address))),
        }
    }

    async fn release_fixed_ip(&self, request: &ReleaseIpRequest) -> Result<(), NetServiceError> {
        self.enter("release_fixed_ip")?;
        let mut ips = lock(&self.ips);
        match ips.get_mut(&request.address) {
            Some(ip) if ip.is_fixed => {
                ip.status = IpStatus::Available;
                ip.container_id.clear();
                ip.update_time = Some(chrono::Utc::now());
                Ok(())
            }
            _ => Err(NetServiceError::NotFound(format!("fixed address {} not found", request.address))),
        }
    }

    async fn clean_fixed_ip(&self, request: &CleanFixedIpRequest) -> Result<(), NetServiceError> {
        self.enter("clean_fixed_ip")?;
        lock(&self.ips).remove(&request.address);
        Ok(())
    }

    async fn list_ip(&self, request: &ListIpRequest) -> Result<Vec<IpObject>, NetServiceError> {
        self.enter("list_ip")?;
        let mut result: Vec<IpObject> = lock(&self.ips)
            .values()
            .filter(|ip| request.matches(ip))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(result)
    }

    async fn get_available_subnet(&self, request: &GetAvailableSubnetRequest) -> Result<Subnet, NetServiceError> {
        self.enter("get_available_subnet")?;
        lock(&self.subnets)
            .iter()
            .find(|s| s.vpc_id.is_empty() || s.vpc_id == request.vpc_id)
            .cloned()
            .ok_or_else(|| NetServiceError::Upstream {
                code: 4,
                message: format!("no available subnet in vpc {}", request.vpc_id),
            })
    }

    async fn allocate_eni(&self, request: &AllocateEniRequest) -> Result<IpObject, NetServiceError> {
        self.enter("allocate_eni")?;
        let subnet = self.subnet(&request.subnet_id)?;
        let template = IpObject {
            vpc_id: request.vpc_id.clone(),
            region: request.region.clone(),
            cluster: request.cluster.clone(),
            pod_name: request.eni_name.clone(),
            host: request.host.clone(),
            status: IpStatus::Reserved,
            ..Default::default()
        };
        self.take_free_address(&subnet, template)
    }

    async fn release_eni(&self, request: &ReleaseEniRequest) -> Result<(), NetServiceError> {
        self.enter("release_eni")?;
        lock(&self.ips).remove(&request.address);
        Ok(())
    }

    async fn clean_eni(&self, request: &CleanEniRequest) -> Result<(), NetServiceError> {
        self.enter("clean_eni")?;
        lock(&self.ips).retain(|_, ip| ip.is_fixed || ip.eni_id != request.eni_id || ip.status == IpStatus::Reserved);
        Ok(())
    }

    async fn clean_node(&self, request: &CleanNodeRequest) -> Result<(), NetServiceError> {
        self.enter("clean_node")?;
        lock(&self.ips).retain(|_, ip| ip.is_fixed || ip.host != request.host || ip.status == IpStatus::Reserved);
        Ok(())
    }

    async fn get_quota(&self, request: &GetQuotaRequest) -> Result<Quota, NetServiceError> {
        self.enter("get_quota")?;
        lock(&self.quotas)
            .get(&request.cluster)
            .map(|limit| Quota {
                cluster: request.cluster.clone(),
                limit: *limit,
            })
            .ok_or_else(|| NetServiceError::NotFound(format!("quota of cluster {} not found", request.cluster)))
    }
}
