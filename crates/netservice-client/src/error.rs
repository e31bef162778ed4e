//! Netservice client errors

use thiserror::Error;

/// Errors that can occur when talking to the bookkeeping service
#[derive(Debug, Error)]
pub enum NetServiceError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Netservice answered with a non-success HTTP status or malformed body
    #[error("Netservice API error: {0}")]
    Api(String),

    /// Netservice processed the call and returned a non-zero error code
    #[error("Netservice returned code {code}: {message}")]
    Upstream { code: i32, message: String },

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request (e.g., missing required fields)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl NetServiceError {
    /// Error code to surface to RPC callers. Upstream codes pass through
    /// unchanged; transport failures map to `-1`.
    pub fn code(&self) -> i32 {
        match self {
            NetServiceError::Upstream { code, .. } => *code,
            _ => -1,
        }
    }
}
