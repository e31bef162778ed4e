//! Controller configuration, read once from environment variables.

use crate::error::ControllerError;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// ENI controller settings
#[derive(Debug, Clone)]
pub struct Config {
    pub cluster_id: String,
    pub netservice_url: String,
    /// Namespace holding `NodeNetwork` objects
    pub system_namespace: String,
    pub cloud_provider: String,
    pub cloud_api_url: String,
    pub cloud_region: String,
    /// Upper bound on `eniNum` for new nodes
    pub default_eni_num: u32,
    /// First host routing table; ENI `i` uses `base + i`
    pub eni_route_table_base: u32,
    /// Requeue period of converged nodes
    pub resync: Duration,
    pub reaper_interval: Duration,
    /// How long a fixed IP stays `Deleting` before it is reaped
    pub fixed_ip_keep: Duration,
    /// Workload kinds the reaper never checks
    pub reaper_skip_kinds: Vec<String>,
    pub metrics_addr: SocketAddr,
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster_id: String::new(),
            netservice_url: "http://netservice.cloudnet-system:8080".to_string(),
            system_namespace: "cloudnet-system".to_string(),
            cloud_provider: "tencent".to_string(),
            cloud_api_url: String::new(),
            cloud_region: String::new(),
            default_eni_num: 1,
            eni_route_table_base: 100,
            resync: Duration::from_secs(60),
            reaper_interval: Duration::from_secs(300),
            fixed_ip_keep: Duration::from_secs(1800),
            reaper_skip_kinds: vec!["GameStatefulSet".to_string()],
            metrics_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            request_timeout: Duration::from_secs(10),
        }
    }
}

fn required(name: &str) -> Result<String, ControllerError> {
    env::var(name).map_err(|_| ControllerError::InvalidConfig(format!("{} environment variable is required", name)))
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ControllerError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ControllerError::InvalidConfig(format!("{} has an invalid value: {}", name, raw))),
        Err(_) => Ok(default),
    }
}

/// Split a comma-separated list, dropping empty entries.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ControllerError> {
        let defaults = Config::default();
        let config = Config {
            cluster_id: required("CLUSTER_ID")?,
            netservice_url: env::var("NETSERVICE_URL").unwrap_or(defaults.netservice_url),
            system_namespace: env::var("SYSTEM_NAMESPACE").unwrap_or(defaults.system_namespace),
            cloud_provider: env::var("CLOUD_PROVIDER").unwrap_or(defaults.cloud_provider),
            cloud_api_url: required("CLOUD_API_URL")?,
            cloud_region: required("CLOUD_REGION")?,
            default_eni_num: parsed("DEFAULT_ENI_NUM", defaults.default_eni_num)?,
            eni_route_table_base: parsed("ENI_ROUTE_TABLE_BASE", defaults.eni_route_table_base)?,
            resync: Duration::from_secs(parsed("RESYNC_SECONDS", defaults.resync.as_secs())?),
            reaper_interval: Duration::from_secs(parsed("REAPER_INTERVAL_SECONDS", defaults.reaper_interval.as_secs())?),
            fixed_ip_keep: Duration::from_secs(parsed("FIXED_IP_KEEP_SECONDS", defaults.fixed_ip_keep.as_secs())?),
            reaper_skip_kinds: env::var("REAPER_SKIP_KINDS")
                .map(|raw| split_list(&raw))
                .unwrap_or(defaults.reaper_skip_kinds),
            metrics_addr: parsed("METRICS_ADDR", defaults.metrics_addr)?,
            request_timeout: defaults.request_timeout,
        };
        if config.default_eni_num == 0 {
            return Err(ControllerError::InvalidConfig("DEFAULT_ENI_NUM must be at least 1".to_string()));
        }
        Ok(config)
    }
}
