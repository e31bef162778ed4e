//! Provider-neutral cloud models

use crds::EniAttachment;
use serde::{Deserialize, Serialize};

/// Interface limits of an instance type
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct EniLimit {
    /// Interfaces the instance may carry, primary included
    pub max_eni: u32,
    /// Addresses per interface, primary included
    pub max_ip_per_eni: u32,
}

/// ENI lifecycle as reported by the provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum EniState {
    #[default]
    Pending,
    Available,
    Attaching,
    Attached,
    Detaching,
    Deleting,
}

/// One ENI as seen by the provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct EniInfo {
    pub eni_id: String,
    pub eni_name: String,
    pub mac_address: String,
    pub subnet_id: String,
    pub primary_ip: String,
    #[serde(default)]
    pub secondary_ips: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<EniAttachment>,
    pub state: EniState,
}

impl EniInfo {
    /// Attached and usable on the instance.
    pub fn is_attached(&self) -> bool {
        self.state == EniState::Attached && self.attachment.is_some()
    }
}

/// Connection settings shared by the gateway-backed providers
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// `aws` or `tencent`
    pub provider: String,
    /// Cloud API gateway endpoint
    pub api_url: String,
    pub region: String,
    pub timeout: std::time::Duration,
}
