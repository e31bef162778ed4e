//! Cloud provider backends for CloudNet
//!
//! Each provider implements [`CloudBackend`] over a signing API gateway.
//! [`from_config`] picks the provider and wraps it with call metrics.

pub mod aws;
#[path = "trait.rs"]
pub mod cloud_trait;
pub mod error;
pub mod gateway;
pub mod metrics;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod models;
pub mod tencent;

pub use aws::AwsBackend;
pub use cloud_trait::CloudBackend;
pub use error::CloudError;
pub use metrics::MetricsBackend;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockCloudBackend;
pub use models::{CloudConfig, EniInfo, EniLimit, EniState};
pub use tencent::TencentBackend;

use prometheus::Registry;

/// Build the backend named by `config.provider`, instrumented into `registry`.
pub fn from_config(config: &CloudConfig, registry: &Registry) -> Result<Box<dyn CloudBackend>, CloudError> {
    match config.provider.as_str() {
        "aws" => Ok(Box::new(MetricsBackend::new(AwsBackend::new(config)?, registry)?)),
        "tencent" | "qcloud" => Ok(Box::new(MetricsBackend::new(TencentBackend::new(config)?, registry)?)),
        other => Err(CloudError::InvalidRequest(format!("unsupported cloud provider {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(provider: &str) -> CloudConfig {
        CloudConfig {
            provider: provider.to_string(),
            api_url: "http://cloud-gateway.local".to_string(),
            region: "ap-guangzhou".to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_from_config_selects_provider() {
        let backend = from_config(&config("tencent"), &Registry::new()).unwrap();
        assert_eq!(backend.provider(), "tencent");
        assert!(from_config(&config("azure"), &Registry::new()).is_err());
    }
}
