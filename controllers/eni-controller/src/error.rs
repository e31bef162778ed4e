//! Controller-specific error types.

use cloud_backend::CloudError;
use kube::Error as KubeError;
use kube_store::StoreError;
use netservice_client::NetServiceError;
use thiserror::Error;

/// Errors that can occur in the ENI controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Object store error (including optimistic-concurrency conflicts)
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Cloud provider error
    #[error("Cloud error: {0}")]
    Cloud(#[from] CloudError),

    /// Bookkeeping service error
    #[error("Netservice error: {0}")]
    NetService(#[from] NetServiceError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Object violates an invariant the controller cannot repair
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Metrics endpoint failed
    #[error("Metrics server error: {0}")]
    Metrics(String),
}
