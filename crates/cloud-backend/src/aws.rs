//! AWS EC2 backend
//!
//! Speaks EC2 `2016-11-15` actions through the gateway. Error bodies follow
//! the EC2 JSON shape `{"Error": {"Code": ..., "Message": ...}}`.

use crate::cloud_trait::CloudBackend;
use crate::error::CloudError;
use crate::gateway::{GatewayClient, provider_error};
use crate::models::{CloudConfig, EniInfo, EniLimit, EniState};
use crds::{EniAttachment, VmInfo};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

const API_VERSION: &str = "2016-11-15";

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
    reservations: Vec<Reservation>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Reservation {
    #[serde(default)]
    instances: Vec<Instance>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Instance {
    instance_id: String,
    #[serde(default)]
    instance_type: String,
    #[serde(default)]
    placement: Option<Placement>,
    #[serde(default)]
    vpc_id: String,
    #[serde(default)]
    subnet_id: String,
    #[serde(default)]
    network_interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Placement {
    availability_zone: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeInstanceTypesResponse {
    #[serde(default)]
    instance_types: Vec<InstanceTypeInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InstanceTypeInfo {
    network_info: NetworkInfo,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkInfo {
    maximum_network_interfaces: u32,
    ipv4_addresses_per_interface: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkInterfaceResponse {
    network_interface: NetworkInterface,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeNetworkInterfacesResponse {
    #[serde(default)]
    network_interfaces: Vec<NetworkInterface>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkInterface {
    network_interface_id: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    mac_address: String,
    #[serde(default)]
    subnet_id: String,
    #[serde(default)]
    private_ip_address: String,
    #[serde(default)]
    private_ip_addresses: Vec<PrivateIp>,
    #[serde(default)]
    status: String,
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
    #[serde(default)]
    attachment_id: String,
    #[serde(default)]
    instance_id: String,
    #[serde(default)]
    device_index: u32,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AttachResponse {
    attachment_id: String,
}

impl NetworkInterface {
    fn into_eni_info(self) -> EniInfo {
        let attached = self
            .attachment
            .as_ref()
            .is_some_and(|a| a.status == "attached");
        let state = match (self.status.as_str(), attached) {
            (_, true) => EniState::Attached,
            ("available", _) => EniState::Available,
            ("attaching", _) | ("in-use", _) => EniState::Attaching,
            ("detaching", _) => EniState::Detaching,
            _ => EniState::Pending,
        };
        let attachment = self.attachment.filter(|_| attached).map(|a| EniAttachment {
            attachment_id: a.attachment_id,
            instance_id: a.instance_id,
            device_index: a.device_index,
        });
        EniInfo {
            eni_id: self.network_interface_id,
            eni_name: self.description,
            mac_address: self.mac_address,
            subnet_id: self.subnet_id,
            primary_ip: self.private_ip_address,
            secondary_ips: self
                .private_ip_addresses
                .into_iter()
                .filter(|ip| !ip.primary)
                .map(|ip| ip.private_ip_address)
                .collect(),
            attachment,
            state,
        }
    }
}

/// EC2-backed [`CloudBackend`]
#[derive(Debug, Clone)]
pub struct AwsBackend {
    gateway: GatewayClient,
}

impl AwsBackend {
    pub fn new(config: &CloudConfig) -> Result<Self, CloudError> {
        Ok(Self {
            gateway: GatewayClient::new(&config.api_url, &config.region, API_VERSION, config.timeout)?,
        })
    }

    async fn call<T: serde::de::DeserializeOwned>(&self, action: &str, params: Value) -> Result<T, CloudError> {
        let mut value = self.gateway.call_raw(action, params).await?;
        if let Some(err) = value.get_mut("Error").map(Value::take) {
            let err: ApiError = GatewayClient::decode(action, err)?;
            return Err(provider_error(&err.code, &err.message));
        }
        GatewayClient::decode(action, value)
    }

    async fn instance_by_ip(&self, node_ip: &str) -> Result<Instance, CloudError> {
        let response: DescribeInstancesResponse = self
            .call(
                "DescribeInstances",
                json!({ "Filters": [{ "Name": "private-ip-address", "Values": [node_ip] }] }),
            )
            .await?;
        response
            .reservations
            .into_iter()
            .flat_map(|r| r.instances)
            .next()
            .ok_or_else(|| CloudError::NotFound(format!("no instance with address {}", node_ip)))
    }

    async fn describe_enis(&self, params: Value) -> Result<Vec<EniInfo>, CloudError> {
        let response: DescribeNetworkInterfacesResponse = self.call("DescribeNetworkInterfaces", params).await?;
        Ok(response
            .network_interfaces
            .into_iter()
            .map(NetworkInterface::into_eni_info)
            .collect())
    }
}

#[async_trait::async_trait]
impl CloudBackend for AwsBackend {
    fn provider(&self) -> &'static str {
        "aws"
    }

    async fn init(&self) -> Result<(), CloudError> {
        let _: Value = self.call("DescribeAccountAttributes", json!({})).await?;
        info!("AWS backend ready in region {}", self.gateway.region());
        Ok(())
    }

    async fn get_vm_info(&self, node_ip: &str) -> Result<VmInfo, CloudError> {
        let instance = self.instance_by_ip(node_ip).await?;
        Ok(VmInfo {
            instance_id: instance.instance_id,
            instance_type: instance.instance_type,
            region: self.gateway.region().to_string(),
            zone: instance
                .placement
                .map(|p| p.availability_zone)
                .unwrap_or_default(),
            vpc_id: instance.vpc_id,
            subnet_id: instance.subnet_id,
            node_role: None,
        })
    }

    async fn get_max_eni_index(&self, node_ip: &str) -> Result<u32, CloudError> {
        let instance = self.instance_by_ip(node_ip).await?;
        Ok(instance
            .network_interfaces
            .iter()
            .filter_map(|n| n.attachment.as_ref().map(|a| a.device_index))
            .max()
            .unwrap_or(0))
    }

    async fn get_eni_limit(&self, node_ip: &str) -> Result<EniLimit, CloudError> {
        let instance = self.instance_by_ip(node_ip).await?;
        let response: DescribeInstanceTypesResponse = self
            .call(
                "DescribeInstanceTypes",
                json!({ "InstanceTypes": [instance.instance_type] }),
            )
            .await?;
        let info = response
            .instance_types
            .into_iter()
            .next()
            .ok_or_else(|| CloudError::NotFound(format!("instance type of {}", instance.instance_id)))?;
        Ok(EniLimit {
            max_eni: info.network_info.maximum_network_interfaces,
            max_ip_per_eni: info.network_info.ipv4_addresses_per_interface,
        })
    }

    async fn create_eni(&self, name: &str, subnet_id: &str, primary_ip: &str, ip_num: u32) -> Result<EniInfo, CloudError> {
        debug!("Creating ENI {} in subnet {} with primary {}", name, subnet_id, primary_ip);
        let response: NetworkInterfaceResponse = self
            .call(
                "CreateNetworkInterface",
                json!({
                    "SubnetId": subnet_id,
                    "PrivateIpAddress": primary_ip,
                    "SecondaryPrivateIpAddressCount": ip_num,
                    "Description": name,
                    "ClientToken": name,
                    "TagSpecifications": [{
                        "ResourceType": "network-interface",
                        "Tags": [{ "Key": "Name", "Value": name }],
                    }],
                }),
            )
            .await?;
        Ok(response.network_interface.into_eni_info())
    }

    async fn attach_eni(&self, index: u32, eni_id: &str, instance_id: &str, _mac: &str) -> Result<EniAttachment, CloudError> {
        let response: AttachResponse = self
            .call(
                "AttachNetworkInterface",
                json!({
                    "DeviceIndex": index,
                    "InstanceId": instance_id,
                    "NetworkInterfaceId": eni_id,
                }),
            )
            .await?;
        Ok(EniAttachment {
            attachment_id: response.attachment_id,
            instance_id: instance_id.to_string(),
            device_index: index,
        })
    }

    async fn detach_eni(&self, _eni_id: &str, attachment: &EniAttachment) -> Result<(), CloudError> {
        let _: Value = self
            .call(
                "DetachNetworkInterface",
                json!({ "AttachmentId": attachment.attachment_id, "Force": true }),
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
            .describe_enis(json!({ "Filters": [{ "Name": "tag:Name", "Values": [name] }] }))
            .await?
            .into_iter()
            .next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attached_interface_maps_to_attached_state() {
        let raw = json!({
            "NetworkInterfaceId": "eni-0abc",
            "Description": "i-123-eni-1",
            "MacAddress": "02:00:00:00:00:01",
            "SubnetId": "subnet-1",
            "PrivateIpAddress": "10.0.1.10",
            "PrivateIpAddresses": [
                { "PrivateIpAddress": "10.0.1.10", "Primary": true },
                { "PrivateIpAddress": "10.0.1.11", "Primary": false }
            ],
            "Status": "in-use",
            "Attachment": {
                "AttachmentId": "eni-attach-1",
                "InstanceId": "i-123",
                "DeviceIndex": 1,
                "Status": "attached"
            }
        });
        let nic: NetworkInterface = serde_json::from_value(raw).unwrap();
        let info = nic.into_eni_info();
        assert!(info.is_attached());
        assert_eq!(info.secondary_ips, vec!["10.0.1.11".to_string()]);
        assert_eq!(info.attachment.unwrap().attachment_id, "eni-attach-1");
    }

    #[test]
    fn test_attaching_interface_is_not_attached() {
        let raw = json!({
            "NetworkInterfaceId": "eni-0abc",
            "Status": "in-use",
            "Attachment": { "AttachmentId": "eni-attach-1", "InstanceId": "i-123", "DeviceIndex": 1, "Status": "attaching" }
        });
        let nic: NetworkInterface = serde_json::from_value(raw).unwrap();
        let info = nic.into_eni_info();
        assert_eq!(info.state, EniState::Attaching);
        assert!(info.attachment.is_none());
    }
}
