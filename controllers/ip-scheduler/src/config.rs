//! Extender configuration, read once from environment variables.

use crate::error::SchedulerError;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Scheduler extender settings
#[derive(Debug, Clone)]
pub struct Config {
    pub cluster_id: String,
    pub netservice_url: String,
    /// Namespace holding `NodeNetwork` objects
    pub system_namespace: String,
    /// Listener for the kube-scheduler extender calls
    pub listen_addr: SocketAddr,
    pub quota_refresh: Duration,
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster_id: String::new(),
            netservice_url: "http://netservice.cloudnet-system:8080".to_string(),
            system_namespace: "cloudnet-system".to_string(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8888)),
            quota_refresh: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
        }
    }
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T, SchedulerError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| SchedulerError::InvalidConfig(format!("{} has an invalid value: {}", name, raw))),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, SchedulerError> {
        let defaults = Config::default();
        let quota_refresh = parsed("QUOTA_REFRESH_SECONDS", defaults.quota_refresh.as_secs())?;
        if quota_refresh == 0 {
            return Err(SchedulerError::InvalidConfig(
                "QUOTA_REFRESH_SECONDS must be positive".to_string(),
            ));
        }
        Ok(Config {
            cluster_id: env::var("CLUSTER_ID").map_err(|_| {
                SchedulerError::InvalidConfig("CLUSTER_ID environment variable is required".to_string())
            })?,
            netservice_url: env::var("NETSERVICE_URL").unwrap_or(defaults.netservice_url),
            system_namespace: env::var("SYSTEM_NAMESPACE").unwrap_or(defaults.system_namespace),
            listen_addr: parsed("SCHEDULER_LISTEN_ADDR", defaults.listen_addr)?,
            quota_refresh: Duration::from_secs(quota_refresh),
            request_timeout: defaults.request_timeout,
        })
    }
}
