//! Scheduler extender error types.

use kube::Error as KubeError;
use kube_store::StoreError;
use netservice_client::NetServiceError;
use thiserror::Error;

/// Errors that stop the extender or fail a bind.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Object store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Bookkeeping service error
    #[error("Netservice error: {0}")]
    NetService(#[from] NetServiceError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed extender call
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The node cannot take floating-IP pods at all
    #[error("{0}")]
    Unschedulable(String),

    /// Capacity check failed at bind time
    #[error("{0}")]
    Capacity(#[from] crate::cache::CapacityError),

    /// Informer, refresher or server task failed
    #[error("Task failed: {0}")]
    Task(String),
}
