//! Common utilities for the netservice client
//!
//! Provides the authenticated HTTP wrapper that stamps every call with a
//! monotonic sequence number and unwraps the response envelope.

use crate::error::NetServiceError;
use crate::models::{NetServiceResponse, RequestEnvelope};
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// HTTP client wrapper with sequence numbering
#[derive(Debug)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    seq: AtomicU64,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, base_url: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            seq: AtomicU64::new(1),
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a full URL from a path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    /// Next call sequence number
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Make a POST call and return the response `data`.
    ///
    /// A missing `data` on success is reported as an API error.
    pub async fn call<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, NetServiceError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let response: NetServiceResponse<Resp> = self.call_raw(path, body).await?;
        response
            .data
            .ok_or_else(|| NetServiceError::Api(format!("POST {} returned no data", path)))
    }

    /// Make a POST call whose response carries no data.
    pub async fn call_empty<Req>(&self, path: &str, body: &Req) -> Result<(), NetServiceError>
    where
        Req: Serialize + Sync,
    {
        let _: NetServiceResponse<serde_json::Value> = self.call_raw(path, body).await?;
        Ok(())
    }

    async fn call_raw<Req, Resp>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<NetServiceResponse<Resp>, NetServiceError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = self.build_url(path);
        let seq = self.next_seq();
        let envelope = RequestEnvelope { seq, body };
        debug!("POST {} seq={}", url, seq);

        let response = self.client
            .post(&url)
            .header("Accept", "application/json")
            .json(&envelope)
            .send()
            .await
            .map_err(NetServiceError::Http)?;

        let status = response.status();
        if status == 404 {
            let body = response.text().await.unwrap_or_default();
            return Err(NetServiceError::NotFound(format!("{} - {}", path, body)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NetServiceError::Api(format!(
                "POST {} failed: {} - {}",
                path, status, body
            )));
        }

        let text = response.text().await?;
        let parsed: NetServiceResponse<Resp> = serde_json::from_str(&text).map_err(|e| {
            NetServiceError::Api(format!(
                "error decoding response body: {} - Response (first 500 chars): {}",
                e,
                text.chars().take(500).collect::<String>()
            ))
        })?;

        if parsed.err_code != 0 {
            return Err(NetServiceError::Upstream {
                code: parsed.err_code,
                message: parsed.err_msg,
            });
        }
        if parsed.seq != 0 && parsed.seq != seq {
            debug!("POST {} answered seq {} for request seq {}", path, parsed.seq, seq);
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_is_monotonic() {
        let http = HttpClient::new(Client::new(), "http://netservice:8080/".to_string());
        let a = http.next_seq();
        let b = http.next_seq();
        assert!(b > a);
        assert_eq!(http.base_url(), "http://netservice:8080");
        assert_eq!(http.build_url("/v1/quota"), "http://netservice:8080/v1/quota");
    }
}
