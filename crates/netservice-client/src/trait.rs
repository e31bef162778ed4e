//! NetServiceClient trait for mocking
//!
//! This trait abstracts the bookkeeping service client so controllers and
//! handlers can be unit tested against an in-memory implementation.

use crate::error::NetServiceError;
use crate::models::*;

/// Trait for bookkeeping service operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait NetServiceClientTrait: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    // Pod addresses
    async fn allocate_ip(&self, request: &AllocateIpRequest) -> Result<IpObject, NetServiceError>;
    async fn allocate_fixed_ip(&self, request: &AllocateIpRequest) -> Result<IpObject, NetServiceError>;
    async fn release_ip(&self, request: &ReleaseIpRequest) -> Result<(), NetServiceError>;
    async fn release_fixed_ip(&self, request: &ReleaseIpRequest) -> Result<(), NetServiceError>;
    async fn clean_fixed_ip(&self, request: &CleanFixedIpRequest) -> Result<(), NetServiceError>;
    async fn list_ip(&self, request: &ListIpRequest) -> Result<Vec<IpObject>, NetServiceError>;

    // ENI primary addresses and node-level cleanup
    async fn get_available_subnet(&self, request: &GetAvailableSubnetRequest) -> Result<Subnet, NetServiceError>;
    async fn allocate_eni(&self, request: &AllocateEniRequest) -> Result<IpObject, NetServiceError>;
    async fn release_eni(&self, request: &ReleaseEniRequest) -> Result<(), NetServiceError>;
    async fn clean_eni(&self, request: &CleanEniRequest) -> Result<(), NetServiceError>;
    async fn clean_node(&self, request: &CleanNodeRequest) -> Result<(), NetServiceError>;

    // Quota
    async fn get_quota(&self, request: &GetQuotaRequest) -> Result<Quota, NetServiceError>;
}
