//! Netservice API client
//!
//! Every operation is a JSON `POST` under `/netservice/v1/`; see
//! [`crate::common::HttpClient`] for envelope handling.

use crate::common::HttpClient;
use crate::error::NetServiceError;
use crate::models::*;
use crate::netservice_trait::NetServiceClientTrait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

const PATH_ALLOCATE_IP: &str = "/netservice/v1/ip/allocate";
const PATH_ALLOCATE_FIXED_IP: &str = "/netservice/v1/ip/fixed/allocate";
const PATH_RELEASE_IP: &str = "/netservice/v1/ip/release";
const PATH_RELEASE_FIXED_IP: &str = "/netservice/v1/ip/fixed/release";
const PATH_CLEAN_FIXED_IP: &str = "/netservice/v1/ip/fixed/clean";
const PATH_LIST_IP: &str = "/netservice/v1/ip/list";
const PATH_AVAILABLE_SUBNET: &str = "/netservice/v1/subnet/available";
const PATH_ALLOCATE_ENI: &str = "/netservice/v1/eni/allocate";
const PATH_RELEASE_ENI: &str = "/netservice/v1/eni/release";
const PATH_CLEAN_ENI: &str = "/netservice/v1/eni/clean";
const PATH_CLEAN_NODE: &str = "/netservice/v1/node/clean";
const PATH_QUOTA: &str = "/netservice/v1/quota";

/// Netservice API client
#[derive(Debug)]
pub struct NetServiceClient {
    http: HttpClient,
}

impl NetServiceClient {
    /// Create a new netservice client
    ///
    /// # Arguments
    /// * `base_url` - Netservice base URL (e.g., "http://netservice.cloudnet-system:8080")
    /// * `timeout` - Per-request timeout
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, NetServiceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(NetServiceError::Http)?;

        Ok(Self {
            http: HttpClient::new(client, base_url),
        })
    }
}

#[async_trait::async_trait]
impl NetServiceClientTrait for NetServiceClient {
    fn base_url(&self) -> &str {
        self.http.base_url()
    }

    async fn allocate_ip(&self, request: &AllocateIpRequest) -> Result<IpObject, NetServiceError> {
        debug!("Allocating IP for {}/{} on eni {}", request.namespace, request.pod_name, request.eni_id);
        self.http.call(PATH_ALLOCATE_IP, request).await
    }

    async fn allocate_fixed_ip(&self, request: &AllocateIpRequest) -> Result<IpObject, NetServiceError> {
        debug!(
            "Allocating fixed IP for {}/{} (preferred: {})",
            request.namespace,
            request.pod_name,
            request.address.as_deref().unwrap_or("none")
        );
        self.http.call(PATH_ALLOCATE_FIXED_IP, request).await
    }

    async fn release_ip(&self, request: &ReleaseIpRequest) -> Result<(), NetServiceError> {
        debug!("Releasing IP {} of {}/{}", request.address, request.namespace, request.pod_name);
        self.http.call_empty(PATH_RELEASE_IP, request).await
    }

    async fn release_fixed_ip(&self, request: &ReleaseIpRequest) -> Result<(), NetServiceError> {
        debug!("Releasing fixed IP {} of {}/{}", request.address, request.namespace, request.pod_name);
        self.http.call_empty(PATH_RELEASE_FIXED_IP, request).await
    }

    async fn clean_fixed_ip(&self, request: &CleanFixedIpRequest) -> Result<(), NetServiceError> {
        debug!("Cleaning fixed IP {} of {}/{}", request.address, request.namespace, request.workload_name);
        self.http.call_empty(PATH_CLEAN_FIXED_IP, request).await
    }

    async fn list_ip(&self, request: &ListIpRequest) -> Result<Vec<IpObject>, NetServiceError> {
        self.http.call(PATH_LIST_IP, request).await
    }

    async fn get_available_subnet(&self, request: &GetAvailableSubnetRequest) -> Result<Subnet, NetServiceError> {
        debug!("Querying available subnet in {}/{}", request.vpc_id, request.zone);
        self.http.call(PATH_AVAILABLE_SUBNET, request).await
    }

    async fn allocate_eni(&self, request: &AllocateEniRequest) -> Result<IpObject, NetServiceError> {
        debug!("Allocating primary IP for eni {} of {}", request.eni_name, request.instance_id);
        self.http.call(PATH_ALLOCATE_ENI, request).await
    }

    async fn release_eni(&self, request: &ReleaseEniRequest) -> Result<(), NetServiceError> {
        debug!("Releasing primary IP {} of eni {}", request.address, request.eni_id);
        self.http.call_empty(PATH_RELEASE_ENI, request).await
    }

    async fn clean_eni(&self, request: &CleanEniRequest) -> Result<(), NetServiceError> {
        debug!("Cleaning addresses of eni {} on {}", request.eni_id, request.host);
        self.http.call_empty(PATH_CLEAN_ENI, request).await
    }

    async fn clean_node(&self, request: &CleanNodeRequest) -> Result<(), NetServiceError> {
        debug!("Cleaning addresses of node {}", request.host);
        self.http.call_empty(PATH_CLEAN_NODE, request).await
    }

    async fn get_quota(&self, request: &GetQuotaRequest) -> Result<Quota, NetServiceError> {
        self.http.call(PATH_QUOTA, request).await
    }
}
