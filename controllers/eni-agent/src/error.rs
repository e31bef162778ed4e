//! Agent error types.

use kube::Error as KubeError;
use kube_store::StoreError;
use netservice_client::NetServiceError;
use thiserror::Error;

/// Errors that stop the agent or abort a host-networking pass.
#[derive(Debug, Error)]
pub enum AgentError {
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

    /// A host networking command failed
    #[error("Host network error: {0}")]
    HostNetwork(String),

    /// Informer or server task failed
    #[error("Task failed: {0}")]
    Task(String),
}

/// Stable numeric codes returned by the allocate/release RPCs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    Ok = 0,
    InvalidParameter = 1,
    PodNotFound = 2,
    WorkloadNotFound = 3,
    WorkloadKindUnsupported = 4,
    NodeNotReady = 5,
    NetServiceFailure = 6,
    StoreFailure = 7,
    CloudIpNotFound = 8,
    Internal = 9,
}

impl ErrorCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Failure of one allocate or release call
#[derive(Debug, Error)]
pub enum IpamError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("pod {0} not found")]
    PodNotFound(String),

    #[error("workload {0} not found")]
    WorkloadNotFound(String),

    #[error("workload kind {0} does not support fixed ips")]
    WorkloadKindUnsupported(String),

    #[error("node not ready: {0}")]
    NodeNotReady(String),

    /// Carries the upstream code and message
    #[error("netservice failure: {0}")]
    NetService(#[from] NetServiceError),

    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    #[error("cloud ip not found: {0}")]
    CloudIpNotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IpamError {
    pub fn code(&self) -> ErrorCode {
        match self {
            IpamError::InvalidParameter(_) => ErrorCode::InvalidParameter,
            IpamError::PodNotFound(_) => ErrorCode::PodNotFound,
            IpamError::WorkloadNotFound(_) => ErrorCode::WorkloadNotFound,
            IpamError::WorkloadKindUnsupported(_) => ErrorCode::WorkloadKindUnsupported,
            IpamError::NodeNotReady(_) => ErrorCode::NodeNotReady,
            IpamError::NetService(_) => ErrorCode::NetServiceFailure,
            IpamError::Store(_) => ErrorCode::StoreFailure,
            IpamError::CloudIpNotFound(_) => ErrorCode::CloudIpNotFound,
            IpamError::Internal(_) => ErrorCode::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_code_is_kept_in_message() {
        let err = IpamError::from(NetServiceError::Upstream {
            code: 5,
            message: "no available ip in subnet subnet-1".to_string(),
        });
        assert_eq!(err.code(), ErrorCode::NetServiceFailure);
        assert!(err.to_string().contains("no available ip"));
    }
}
