//! Store errors

use thiserror::Error;

/// Errors returned by the Kubernetes-backed stores
#[derive(Debug, Error)]
pub enum StoreError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Write lost an optimistic-concurrency race (HTTP 409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Informer cache did not sync in time
    #[error("Cache sync failed: {0}")]
    Sync(String),

    /// Caller passed something the store cannot act on
    #[error("Invalid request: {0}")]
    Invalid(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Classify a kube error, keeping 404 and 409 as sentinels.
    pub fn from_kube(err: kube::Error, what: &str) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound(what.to_string()),
            kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict(what.to_string()),
            other => StoreError::Kube(other),
        }
    }

    /// Whether this is the not-found sentinel.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Whether this is the conflict sentinel.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}
