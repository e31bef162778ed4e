//! Cloud backend errors

use thiserror::Error;

/// Errors returned by cloud backends
#[derive(Debug, Error)]
pub enum CloudError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider rejected the call
    #[error("Cloud API error {code}: {message}")]
    Api { code: String, message: String },

    /// Instance or ENI does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid request or configuration
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Metrics registration failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl CloudError {
    /// Whether this is the not-found sentinel.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound(_))
    }
}
