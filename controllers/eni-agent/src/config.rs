//! Agent configuration, read once from environment variables.

use crate::error::AgentError;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Node agent settings
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the node this agent runs on
    pub node_name: String,
    pub cluster_id: String,
    pub netservice_url: String,
    /// Namespace holding `NodeNetwork` objects
    pub system_namespace: String,
    /// Local listener for the allocate/release RPCs
    pub listen_addr: SocketAddr,
    pub eni_mtu: u32,
    /// First host routing table; ENI `i` uses `base + i` unless the
    /// controller recorded a table id
    pub eni_route_table_base: u32,
    /// Initial `NodeNetwork` cache sync must finish within this
    pub cache_sync_timeout: Duration,
    /// Workload kinds allowed to hold fixed IPs
    pub fixed_ip_workload_kinds: Vec<String>,
    pub resync: Duration,
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            cluster_id: String::new(),
            netservice_url: "http://netservice.cloudnet-system:8080".to_string(),
            system_namespace: "cloudnet-system".to_string(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 9876)),
            eni_mtu: 1500,
            eni_route_table_base: 100,
            cache_sync_timeout: Duration::from_secs(60),
            fixed_ip_workload_kinds: vec!["StatefulSet".to_string(), "GameStatefulSet".to_string()],
            resync: Duration::from_secs(60),
            request_timeout: Duration::from_secs(10),
        }
    }
}

fn required(name: &str) -> Result<String, AgentError> {
    env::var(name).map_err(|_| AgentError::InvalidConfig(format!("{} environment variable is required", name)))
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> Result<T, AgentError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| AgentError::InvalidConfig(format!("{} has an invalid value: {}", name, raw))),
        Err(_) => Ok(default),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AgentError> {
        let defaults = Config::default();
        let config = Config {
            node_name: required("NODE_NAME")?,
            cluster_id: required("CLUSTER_ID")?,
            netservice_url: env::var("NETSERVICE_URL").unwrap_or(defaults.netservice_url),
            system_namespace: env::var("SYSTEM_NAMESPACE").unwrap_or(defaults.system_namespace),
            listen_addr: parsed("AGENT_LISTEN_ADDR", defaults.listen_addr)?,
            eni_mtu: parsed("ENI_MTU", defaults.eni_mtu)?,
            eni_route_table_base: parsed("ENI_ROUTE_TABLE_BASE", defaults.eni_route_table_base)?,
            cache_sync_timeout: Duration::from_secs(parsed(
                "CACHE_SYNC_TIMEOUT_SECONDS",
                defaults.cache_sync_timeout.as_secs(),
            )?),
            fixed_ip_workload_kinds: env::var("FIXED_IP_WORKLOAD_KINDS")
                .map(|raw| split_list(&raw))
                .unwrap_or(defaults.fixed_ip_workload_kinds),
            resync: defaults.resync,
            request_timeout: defaults.request_timeout,
        };
        if config.eni_mtu < 576 {
            return Err(AgentError::InvalidConfig(format!("ENI_MTU {} is too small", config.eni_mtu)));
        }
        Ok(config)
    }
}
