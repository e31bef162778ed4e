//! Host networking for ENIs
//!
//! Each `Ready` ENI gets its link brought up with the configured MTU, its
//! primary address, a default route through the subnet gateway in its own
//! routing table, and a `from <primary> lookup <table>` policy rule. The
//! [`IpCommand`] implementation drives iproute2 and reads its JSON output.

use crate::error::AgentError;
use crds::ElasticNetworkInterface;
use ipnet::Ipv4Net;
use serde::Deserialize;
use std::net::Ipv4Addr;
use tokio::process::Command;
use tracing::{debug, info};

/// Host configuration of one ENI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EniLink {
    pub mac_address: String,
    pub primary_ip: String,
    pub prefix_len: u8,
    pub gateway: String,
    pub table: u32,
    pub mtu: u32,
}

impl EniLink {
    /// Host view of `eni`. The routing table is the one the controller
    /// recorded, else `base + index`; the gateway defaults to the first host
    /// of the subnet.
    pub fn from_eni(eni: &ElasticNetworkInterface, base: u32, mtu: u32) -> Result<Self, AgentError> {
        let net: Ipv4Net = eni.subnet_cidr.parse().map_err(|_| {
            AgentError::HostNetwork(format!("eni {} has invalid subnet cidr {:?}", eni.eni_id, eni.subnet_cidr))
        })?;
        let gateway = match &eni.gateway {
            Some(gw) if !gw.is_empty() => gw.clone(),
            _ => net
                .hosts()
                .next()
                .map(|a| a.to_string())
                .ok_or_else(|| AgentError::HostNetwork(format!("subnet {} has no hosts", net)))?,
        };
        eni.primary_ip.parse::<Ipv4Addr>().map_err(|_| {
            AgentError::HostNetwork(format!("eni {} has invalid primary ip {:?}", eni.eni_id, eni.primary_ip))
        })?;
        Ok(Self {
            mac_address: eni.mac_address.to_lowercase(),
            primary_ip: eni.primary_ip.clone(),
            prefix_len: net.prefix_len(),
            gateway,
            table: table_of(eni, base),
            mtu,
        })
    }
}

/// Routing table of `eni`.
pub fn table_of(eni: &ElasticNetworkInterface, base: u32) -> u32 {
    if eni.route_table_id != 0 {
        eni.route_table_id
    } else {
        base + eni.index
    }
}

/// A policy rule as reported by `ip -j rule show`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HostRule {
    #[serde(default)]
    pub src: Option<String>,
    pub table: String,
}

impl HostRule {
    /// Numeric table id; `None` for named tables such as `main`.
    pub fn table_id(&self) -> Option<u32> {
        self.table.parse().ok()
    }
}

#[derive(Debug, Deserialize)]
struct LinkInfo {
    ifname: String,
    #[serde(default)]
    address: Option<String>,
}

/// Applies and removes ENI host configuration
#[async_trait::async_trait]
pub trait HostNetwork: Send + Sync {
    /// Installed policy rules.
    async fn rules(&self) -> Result<Vec<HostRule>, AgentError>;

    /// Bring `link` up and route its primary address through its table.
    /// Re-applying an existing configuration is a no-op.
    async fn configure(&self, link: &EniLink) -> Result<(), AgentError>;

    /// Drop the rule for `src` (when known) and flush `table`.
    async fn remove(&self, table: u32, src: Option<&str>) -> Result<(), AgentError>;
}

/// [`HostNetwork`] backed by the `ip` command
#[derive(Debug, Clone, Default)]
pub struct IpCommand;

impl IpCommand {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, args: &[&str]) -> Result<String, AgentError> {
        debug!("ip {}", args.join(" "));
        let output = Command::new("ip")
            .args(args)
            .output()
            .await
            .map_err(|e| AgentError::HostNetwork(format!("failed to run ip {}: {}", args.join(" "), e)))?;
        if !output.status.success() {
            return Err(AgentError::HostNetwork(format!(
                "ip {} exited with {}: {}",
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn link_by_mac(&self, mac: &str) -> Result<String, AgentError> {
        let json = self.run(&["-j", "link", "show"]).await?;
        let links: Vec<LinkInfo> = serde_json::from_str(&json)
            .map_err(|e| AgentError::HostNetwork(format!("unexpected ip link output: {}", e)))?;
        links
            .into_iter()
            .find(|l| l.address.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(mac)))
            .map(|l| l.ifname)
            .ok_or_else(|| AgentError::HostNetwork(format!("no link with mac {}", mac)))
    }
}

#[async_trait::async_trait]
impl HostNetwork for IpCommand {
    async fn rules(&self) -> Result<Vec<HostRule>, AgentError> {
        let json = self.run(&["-j", "rule", "show"]).await?;
        parse_rules(&json)
    }

    async fn configure(&self, link: &EniLink) -> Result<(), AgentError> {
        let ifname = self.link_by_mac(&link.mac_address).await?;
        let mtu = link.mtu.to_string();
        let table = link.table.to_string();
        let address = format!("{}/{}", link.primary_ip, link.prefix_len);

        self.run(&["link", "set", "dev", &ifname, "mtu", &mtu, "up"]).await?;
        self.run(&["addr", "replace", &address, "dev", &ifname]).await?;
        self.run(&["route", "replace", "default", "via", &link.gateway, "dev", &ifname, "table", &table])
            .await?;

        let installed = self
            .rules()
            .await?
            .iter()
            .any(|r| r.table_id() == Some(link.table) && r.src.as_deref() == Some(link.primary_ip.as_str()));
        if !installed {
            self.run(&["rule", "add", "from", &link.primary_ip, "lookup", &table]).await?;
        }
        info!("Configured {} ({}) with table {}", ifname, address, link.table);
        Ok(())
    }

    async fn remove(&self, table: u32, src: Option<&str>) -> Result<(), AgentError> {
        let table_arg = table.to_string();
        if let Some(src) = src {
            self.run(&["rule", "del", "from", src, "lookup", &table_arg]).await?;
        }
        self.run(&["route", "flush", "table", &table_arg]).await?;
        info!("Removed host routing table {}", table);
        Ok(())
    }
}

/// Parse `ip -j rule show` output.
pub fn parse_rules(json: &str) -> Result<Vec<HostRule>, AgentError> {
    serde_json::from_str(json).map_err(|e| AgentError::HostNetwork(format!("unexpected ip rule output: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crds::EniStatus;

    #[test]
    fn test_parse_rules() {
        let json = r#"[
            {"priority":0,"src":"all","table":"local"},
            {"priority":32765,"src":"10.0.1.200","table":"100"},
            {"priority":32766,"src":"all","table":"main"}
        ]"#;
        let rules = parse_rules(json).unwrap();
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[1].table_id(), Some(100));
        assert_eq!(rules[1].src.as_deref(), Some("10.0.1.200"));
        assert_eq!(rules[2].table_id(), None);
    }

    #[test]
    fn test_link_defaults_gateway_and_table() {
        let eni = ElasticNetworkInterface {
            index: 2,
            eni_id: "eni-2".to_string(),
            subnet_cidr: "10.0.1.0/24".to_string(),
            mac_address: "02:00:00:00:01:AB".to_string(),
            primary_ip: "10.0.1.202".to_string(),
            status: EniStatus::Ready,
            ..Default::default()
        };
        let link = EniLink::from_eni(&eni, 100, 1500).unwrap();
        assert_eq!(link.gateway, "10.0.1.1");
        assert_eq!(link.table, 102);
        assert_eq!(link.prefix_len, 24);
        assert_eq!(link.mac_address, "02:00:00:00:01:ab");
    }

    #[test]
    fn test_link_rejects_bad_cidr() {
        let eni = ElasticNetworkInterface {
            subnet_cidr: "not-a-cidr".to_string(),
            ..Default::default()
        };
        assert!(EniLink::from_eni(&eni, 100, 1500).is_err());
    }
}
