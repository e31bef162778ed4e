//! Tencent Cloud backend
//!
//! Speaks VPC/CVM `2017-03-12` actions through the gateway. Every response
//! is wrapped in `{"Response": {...}}` and errors appear as
//! `Response.Error`. Attachment ids do not exist on this provider; the ENI
//! id stands in for one.

use crate::cloud_trait::CloudBackend;
use crate::error::CloudError;
use crate::gateway::{GatewayClient, provider_error};
use crate::models::{CloudConfig, EniInfo, EniLimit, EniState};
use crds::{EniAttachment, VmInfo};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

const API_VERSION: &str = "2017-03-12";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiError {
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstancesResponse {
    #[serde(default)]
    instance_set: Vec<Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Instance {
    instance_id: String,
    #[serde(default)]
    instance_type: String,
    placement: Placement,
    virtual_private_cloud: VirtualPrivateCloud,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Placement {
    zone: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VirtualPrivateCloud {
    vpc_id: String,
    subnet_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LimitResponse {
    eni_quantity: u32,
    eni_private_ip_address_quantity: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeSubnetsResponse {
    #[serde(default)]
    subnet_set: Vec<Subnet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Subnet {
    vpc_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateResponse {
    network_interface: NetworkInterface,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeNetworkInterfacesResponse {
    #[serde(default)]
    network_interface_set: Vec<NetworkInterface>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkInterface {
    network_interface_id: String,
    #[serde(default)]
    network_interface_name: String,
    #[serde(default)]
    mac_address: String,
    #[serde(default)]
    subnet_id: String,
    #[serde(default)]
    private_ip_address_set: Vec<PrivateIp>,
    #[serde(default)]
    state: String,
    #[serde(default)]
    attachment: Option<Attachment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PrivateIp {
    private_ip_address: String,
    #[serde(default)]
    primary: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Attachment {
    instance_id: String,
    #[serde(default)]
    device_index: u32,
}

impl NetworkInterface {
    fn into_eni_info(self) -> EniInfo {
        let state = match (self.state.as_str(), self.attachment.is_some()) {
            ("AVAILABLE", true) => EniState::Attached,
            ("AVAILABLE", false) => EniState::Available,
            ("ATTACHING", _) => EniState::Attaching,
            ("DETACHING", _) => EniState::Detaching,
            ("DELETING", _) => EniState::Deleting,
            _ => EniState::Pending,
        };
        let eni_id = self.network_interface_id;
        let attachment = self
            .attachment
            .filter(|_| state == EniState::Attached)
            .map(|a| EniAttachment {
                attachment_id: eni_id.clone(),
                instance_id: a.instance_id,
                device_index: a.device_index,
            });
        let (primary, secondary): (Vec<PrivateIp>, Vec<PrivateIp>) =
            self.private_ip_address_set.into_iter().partition(|ip| ip.primary);
        EniInfo {
            eni_id,
            eni_name: self.network_interface_name,
            mac_address: self.mac_address,
            subnet_id: self.subnet_id,
            primary_ip: primary
                .into_iter()
                .next()
                .map(|ip| ip.private_ip_address)
                .unwrap_or_default(),
            secondary_ips: secondary.into_iter().map(|ip| ip.private_ip_address).collect(),
            attachment,
            state,
        }
    }
}

/// Tencent Cloud-backed [`CloudBackend`]
#[derive(Debug, Clone)]
pub struct TencentBackend {
    gateway: GatewayClient,
}

impl TencentBackend {
    pub fn new(config: &CloudConfig) -> Result<Self, CloudError> {
        Ok(Self {
            gateway: GatewayClient::new(&config.api_url, &config.region, API_VERSION, config.timeout)?,
        })
    }

    async fn call<T: serde::de::DeserializeOwned>(&self, action: &str, params: Value) -> Result<T, CloudError> {
        let mut value = self.gateway.call_raw(action, params).await?;
        let mut response = value.get_mut("Response").map(Value::take).unwrap_or(Value::Null);
        if let Some(err) = response.get_mut("Error").map(Value::take) {
            let err: ApiError = GatewayClient::decode(action, err)?;
            return Err(provider_error(&err.code, &err.message));
        }
        GatewayClient::decode(action, response)
    }

    async fn instance_by_ip(&self, node_ip: &str) -> Result<Instance, CloudError> {
        let response: DescribeInstancesResponse = self
            .call(
                "DescribeInstances",
                json!({ "Filters": [{ "Name": "private-ip-address", "Values": [node_ip] }] }),
            )
            .await?;
        response
            .instance_set
            .into_iter()
            .next()
            .ok_or_else(|| CloudError::NotFound(format!("no instance with address {}", node_ip)))
    }

    async fn describe_enis(&self, params: Value) -> Result<Vec<EniInfo>, CloudError> {
        let response: DescribeNetworkInterfacesResponse = self.call("DescribeNetworkInterfaces", params).await?;
        Ok(response
            .network_interface_set
            .into_iter()
            .map(NetworkInterface::into_eni_info)
            .collect())
    }

    async fn vpc_of_subnet(&self, subnet_id: &str) -> Result<String, CloudError> {
        let response: DescribeSubnetsResponse = self
            .call("DescribeSubnets", json!({ "SubnetIds": [subnet_id] }))
            .await?;
        response
            .subnet_set
            .into_iter()
            .next()
            .map(|s| s.vpc_id)
            .ok_or_else(|| CloudError::NotFound(format!("subnet {}", subnet_id)))
    }
}

#[async_trait::async_trait]
impl CloudBackend for TencentBackend {
    fn provider(&self) -> &'static str {
        "tencent"
    }

    async fn init(&self) -> Result<(), CloudError> {
        let _: Value = self.call("DescribeVpcs", json!({ "Limit": "1" })).await?;
        info!("Tencent backend ready in region {}", self.gateway.region());
        Ok(())
    }

    async fn get_vm_info(&self, node_ip: &str) -> Result<VmInfo, CloudError> {
        let instance = self.instance_by_ip(node_ip).await?;
        Ok(VmInfo {
            instance_id: instance.instance_id,
            instance_type: instance.instance_type,
            region: self.gateway.region().to_string(),
            zone: instance.placement.zone,
            vpc_id: instance.virtual_private_cloud.vpc_id,
            subnet_id: instance.virtual_private_cloud.subnet_id,
            node_role: None,
        })
    }

    async fn get_max_eni_index(&self, node_ip: &str) -> Result<u32, CloudError> {
        let instance = self.instance_by_ip(node_ip).await?;
        let enis = self
            .describe_enis(json!({
                "Filters": [{ "Name": "attachment.instance-id", "Values": [instance.instance_id] }]
            }))
            .await?;
        Ok(enis
            .iter()
            .filter_map(|e| e.attachment.as_ref().map(|a| a.device_index))
            .max()
            .unwrap_or(0))
    }

    async fn get_eni_limit(&self, node_ip: &str) -> Result<EniLimit, CloudError> {
        let instance = self.instance_by_ip(node_ip).await?;
        let limit: LimitResponse = self
            .call(
                "DescribeNetworkInterfaceLimit",
                json!({ "InstanceId": instance.instance_id }),
            )
            .await?;
        Ok(EniLimit {
            max_eni: limit.eni_quantity,
            max_ip_per_eni: limit.eni_private_ip_address_quantity,
        })
    }

    async fn create_eni(&self, name: &str, subnet_id: &str, primary_ip: &str, ip_num: u32) -> Result<EniInfo, CloudError> {
        debug!("Creating ENI {} in subnet {} with primary {}", name, subnet_id, primary_ip);
        let vpc_id = self.vpc_of_subnet(subnet_id).await?;
        let response: CreateResponse = self
            .call(
                "CreateNetworkInterface",
                json!({
                    "VpcId": vpc_id,
                    "SubnetId": subnet_id,
                    "NetworkInterfaceName": name,
                    "PrivateIpAddresses": [{ "PrivateIpAddress": primary_ip, "Primary": true }],
                    "SecondaryPrivateIpAddressCount": ip_num,
                }),
            )
            .await?;
        Ok(response.network_interface.into_eni_info())
    }

    async fn attach_eni(&self, index: u32, eni_id: &str, instance_id: &str, _mac: &str) -> Result<EniAttachment, CloudError> {
        let _: Value = self
            .call(
                "AttachNetworkInterface",
                json!({ "NetworkInterfaceId": eni_id, "InstanceId": instance_id }),
            )
            .await?;
        Ok(EniAttachment {
            attachment_id: eni_id.to_string(),
            instance_id: instance_id.to_string(),
            device_index: index,
        })
    }

    async fn detach_eni(&self, eni_id: &str, attachment: &EniAttachment) -> Result<(), CloudError> {
        let _: Value = self
            .call(
                "DetachNetworkInterface",
                json!({ "NetworkInterfaceId": eni_id, "InstanceId": attachment.instance_id }),
            )
            .await?;
        Ok(())
    }

    async fn delete_eni(&self, eni_id: &str) -> Result<(), CloudError> {
        let _: Value = self
            .call("DeleteNetworkInterface", json!({ "NetworkInterfaceId": eni_id }))
            .await?;
        Ok(())
    }

    async fn query_eni(&self, eni_id: &str) -> Result<EniInfo, CloudError> {
        self.describe_enis(json!({ "NetworkInterfaceIds": [eni_id] }))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CloudError::NotFound(format!("eni {}", eni_id)))
    }

    async fn find_eni(&self, name: &str) -> Result<Option<EniInfo>, CloudError> {
        Ok(self
            .describe_enis(json!({
                "Filters": [{ "Name": "network-interface-name", "Values": [name] }]
            }))
            .await?
            .into_iter()
            .next())
    }
}
