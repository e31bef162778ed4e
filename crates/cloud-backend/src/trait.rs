//! Cloud backend trait
//!
//! Capability set the ENI controller needs from a cloud provider. Lookups
//! that find nothing return [`CloudError::NotFound`].

use crate::error::CloudError;
use crate::models::{EniInfo, EniLimit};
use crds::{EniAttachment, VmInfo};

/// Operations on instances and their network interfaces
#[async_trait::async_trait]
pub trait CloudBackend: Send + Sync {
    /// Provider name, e.g. "aws"
    fn provider(&self) -> &'static str;

    /// Validate configuration and connectivity.
    async fn init(&self) -> Result<(), CloudError>;

    /// Instance owning the private address `node_ip`.
    async fn get_vm_info(&self, node_ip: &str) -> Result<VmInfo, CloudError>;

    /// Highest device index in use on the instance at `node_ip`.
    async fn get_max_eni_index(&self, node_ip: &str) -> Result<u32, CloudError>;

    /// Interface limits of the instance at `node_ip`.
    async fn get_eni_limit(&self, node_ip: &str) -> Result<EniLimit, CloudError>;

    /// Create an ENI with `primary_ip` and room for `ip_num` secondary addresses.
    async fn create_eni(&self, name: &str, subnet_id: &str, primary_ip: &str, ip_num: u32) -> Result<EniInfo, CloudError>;

    /// Attach an ENI at device `index`. Attachment completes asynchronously;
    /// poll with [`CloudBackend::query_eni`].
    async fn attach_eni(&self, index: u32, eni_id: &str, instance_id: &str, mac: &str) -> Result<EniAttachment, CloudError>;

    async fn detach_eni(&self, eni_id: &str, attachment: &EniAttachment) -> Result<(), CloudError>;

    async fn delete_eni(&self, eni_id: &str) -> Result<(), CloudError>;

    async fn query_eni(&self, eni_id: &str) -> Result<EniInfo, CloudError>;

    /// ENI carrying `name`, used to adopt an ENI created by an interrupted pass.
    async fn find_eni(&self, name: &str) -> Result<Option<EniInfo>, CloudError>;
}
