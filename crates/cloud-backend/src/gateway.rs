//! Cloud API gateway transport
//!
//! Both providers are reached through a signing gateway that accepts the
//! provider's native action name and parameters as JSON and returns the
//! provider's JSON response. Request signing and credentials live in the
//! gateway.

use crate::error::CloudError;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

/// JSON-over-HTTP client for one provider API
#[derive(Debug, Clone)]
pub struct GatewayClient {
    client: Client,
    endpoint: String,
    region: String,
    version: &'static str,
}

impl GatewayClient {
    /// Create a new gateway client
    ///
    /// # Arguments
    /// * `endpoint` - Gateway URL (e.g., "http://cloud-gateway.cloudnet-system:8080/aws")
    /// * `region` - Region every call is scoped to
    /// * `version` - Provider API version string
    pub fn new(endpoint: &str, region: &str, version: &'static str, timeout: Duration) -> Result<Self, CloudError> {
        if endpoint.is_empty() {
            return Err(CloudError::InvalidRequest("cloud API endpoint is empty".to_string()));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            region: region.to_string(),
            version,
        })
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Call `action` and return the raw JSON body.
    pub async fn call_raw(&self, action: &str, params: Value) -> Result<Value, CloudError> {
        let mut body = json!({
            "Action": action,
            "Version": self.version,
            "Region": self.region,
        });
        if let (Some(body), Value::Object(params)) = (body.as_object_mut(), params) {
            body.extend(params);
        }
        debug!("Cloud API call {} in {}", action, self.region);

        let response = self.client
            .post(&self.endpoint)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let value: Value = serde_json::from_str(&text).map_err(|e| CloudError::Api {
            code: status.as_u16().to_string(),
            message: format!(
                "{} returned undecodable body: {} - {}",
                action,
                e,
                text.chars().take(500).collect::<String>()
            ),
        })?;
        Ok(value)
    }

    /// Decode `value` into `T`.
    pub fn decode<T: DeserializeOwned>(action: &str, value: Value) -> Result<T, CloudError> {
        serde_json::from_value(value).map_err(|e| CloudError::Api {
            code: "DecodeError".to_string(),
            message: format!("{} response: {}", action, e),
        })
    }
}

/// Map a provider error code to the crate error, keeping not-found as a sentinel.
pub fn provider_error(code: &str, message: &str) -> CloudError {
    if code.contains("NotFound") {
        CloudError::NotFound(format!("{}: {}", code, message))
    } else {
        CloudError::Api {
            code: code.to_string(),
            message: message.to_string(),
        }
    }
}
