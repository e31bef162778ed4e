//! ENI step machine
//!
//! Each pass applies at most one structural step to a node's ENI stack:
//!
//! - probe the last ENI while it is `NotReady`
//! - scale up by one ENI when the stack is short and its top is `Ready`
//! - scale down by walking the top ENI through
//!   `Cleaning -> Cleaned -> Deleting -> (removed)`
//!
//! Every remote side effect is followed by a status write, and a retried
//! pass picks up where the previous one stopped. ENIs are named
//! `<instance>-eni-<index>` so a creation whose status write was lost is
//! adopted instead of duplicated.

use super::{Reconciler, Step};
use crate::error::ControllerError;
use cloud_backend::{EniInfo, EniState};
use crds::{
    CloudIPState, ElasticNetworkInterface, EniStatus, LABEL_ENI_ID, LABEL_STATUS, NodeNetwork, NodeNetworkStatus,
    VmInfo,
};
use kube::ResourceExt;
use netservice_client::{
    AllocateEniRequest, CleanEniRequest, GetAvailableSubnetRequest, IpObject, ListIpRequest, NetServiceError,
    ReleaseEniRequest,
};
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

/// Cloud-side name of the ENI at `index` on `instance_id`.
pub fn eni_name(instance_id: &str, index: u32) -> String {
    format!("{}-eni-{}", instance_id, index)
}

/// Result of trying to remove the top ENI
#[derive(Debug)]
pub enum Removal {
    /// Removed and the status written
    Removed { updated: NodeNetwork, eni_id: String },
    /// Detach still in progress
    Waiting(String),
    /// No ENIs left
    Empty,
}

impl Removal {
    fn into_step(self) -> Step {
        match self {
            Removal::Removed { eni_id, .. } => Step::Progressed(format!("removed eni {}", eni_id)),
            Removal::Waiting(why) => Step::Waiting(why),
            Removal::Empty => Step::Converged,
        }
    }
}

pub(crate) fn status_of(nn: &NodeNetwork) -> NodeNetworkStatus {
    nn.status.clone().unwrap_or_default()
}

pub(crate) fn vm_of(nn: &NodeNetwork) -> Result<&VmInfo, ControllerError> {
    nn.spec
        .vm
        .as_ref()
        .ok_or_else(|| ControllerError::InvalidState(format!("NodeNetwork {} has no vm info", nn.name_any())))
}

/// Labels of `Active` CloudIPs carried by `eni_id`.
fn active_on_eni(eni_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_ENI_ID.to_string(), eni_id.to_string()),
        (LABEL_STATUS.to_string(), CloudIPState::Active.as_str().to_string()),
    ])
}

impl Reconciler {
    /// Apply at most one ENI step to a live `NodeNetwork`.
    pub async fn reconcile_enis(&self, nn: &NodeNetwork) -> Result<Step, ControllerError> {
        nn.check_eni_invariants()
            .map_err(|e| ControllerError::InvalidState(format!("NodeNetwork {}: {}", nn.name_any(), e)))?;

        if let Some(last) = nn.enis().last() {
            match last.status {
                EniStatus::NotReady => return self.probe_eni(nn, last).await,
                EniStatus::Cleaning => return self.drain_eni(nn, last).await,
                EniStatus::Cleaned => return self.set_last_status(nn, EniStatus::Deleting).await,
                EniStatus::Deleting => return Ok(self.remove_top_eni(nn).await?.into_step()),
                EniStatus::Ready => {}
            }
        }

        let have = nn.enis().len();
        let want = nn.spec.eni_num as usize;
        if want > have {
            self.scale_up(nn).await
        } else if want < have {
            self.set_last_status(nn, EniStatus::Cleaning).await
        } else {
            Ok(Step::Converged)
        }
    }

    async fn set_last_status(&self, nn: &NodeNetwork, to: EniStatus) -> Result<Step, ControllerError> {
        let mut status = status_of(nn);
        let eni = status
            .enis
            .last_mut()
            .ok_or_else(|| ControllerError::InvalidState(format!("NodeNetwork {} has no enis", nn.name_any())))?;
        eni.status = to;
        let what = format!("eni {} is {:?}", eni.eni_id, to);
        self.write_status(nn, status).await?;
        Ok(Step::Progressed(what))
    }

    /// Mark the last ENI `Ready` once the cloud reports it attached.
    async fn probe_eni(&self, nn: &NodeNetwork, eni: &ElasticNetworkInterface) -> Result<Step, ControllerError> {
        let info = match self.cloud.query_eni(&eni.eni_id).await {
            Ok(info) => info,
            Err(e) if e.is_not_found() => {
                warn!(
                    "ENI {} of node {} no longer exists in the cloud, dropping it",
                    eni.eni_id,
                    nn.name_any()
                );
                self.release_primary(nn, eni).await?;
                let mut status = status_of(nn);
                status.enis.pop();
                self.write_status(nn, status).await?;
                return Ok(Step::Progressed(format!("dropped missing eni {}", eni.eni_id)));
            }
            Err(e) => return Err(e.into()),
        };

        if !info.is_attached() {
            return Ok(Step::Waiting(format!("eni {} is {:?}", eni.eni_id, info.state)));
        }

        let mut status = status_of(nn);
        if let Some(last) = status.enis.last_mut() {
            last.status = EniStatus::Ready;
            if !info.mac_address.is_empty() {
                last.mac_address = info.mac_address;
            }
            if info.attachment.is_some() {
                last.attachment = info.attachment;
            }
            if !info.secondary_ips.is_empty() {
                last.secondary_ips = info.secondary_ips;
            }
        }
        self.write_status(nn, status).await?;
        Ok(Step::Progressed(format!("eni {} is ready", eni.eni_id)))
    }

    /// Append one ENI at the top of the stack.
    async fn scale_up(&self, nn: &NodeNetwork) -> Result<Step, ControllerError> {
        let vm = vm_of(nn)?;
        let index = nn.enis().len() as u32;
        let name = eni_name(&vm.instance_id, index);

        let eni = match self.cloud.find_eni(&name).await? {
            Some(existing) => {
                info!("Adopting existing ENI {} ({}) for node {}", existing.eni_id, name, nn.name_any());
                match self.adopt_eni(nn, vm, index, existing).await? {
                    Some(eni) => eni,
                    None => return Ok(Step::Progressed(format!("discarded orphaned eni {}", name))),
                }
            }
            None => self.create_eni(nn, vm, index, &name).await?,
        };

        let what = format!("added eni {} at index {}", eni.eni_id, index);
        let mut status = status_of(nn);
        status.enis.push(eni);
        self.write_status(nn, status).await?;
        Ok(Step::Progressed(what))
    }

    fn eni_record(&self, index: u32, info: &EniInfo, subnet_cidr: String, gateway: Option<String>) -> ElasticNetworkInterface {
        ElasticNetworkInterface {
            index,
            eni_id: info.eni_id.clone(),
            eni_name: info.eni_name.clone(),
            subnet_id: info.subnet_id.clone(),
            subnet_cidr,
            gateway,
            mac_address: info.mac_address.clone(),
            attachment: info.attachment.clone(),
            primary_ip: info.primary_ip.clone(),
            secondary_ips: Vec::new(),
            route_table_id: self.config.eni_route_table_base + index,
            status: EniStatus::NotReady,
        }
    }

    async fn create_eni(
        &self,
        nn: &NodeNetwork,
        vm: &VmInfo,
        index: u32,
        name: &str,
    ) -> Result<ElasticNetworkInterface, ControllerError> {
        let subnet = self
            .netservice
            .get_available_subnet(&GetAvailableSubnetRequest {
                vpc_id: vm.vpc_id.clone(),
                region: vm.region.clone(),
                zone: vm.zone.clone(),
            })
            .await?;
        let primary = self
            .netservice
            .allocate_eni(&AllocateEniRequest {
                vpc_id: vm.vpc_id.clone(),
                region: vm.region.clone(),
                zone: vm.zone.clone(),
                subnet_id: subnet.subnet_id.clone(),
                cluster: nn.spec.cluster.clone(),
                instance_id: vm.instance_id.clone(),
                host: nn.spec.hostname.clone(),
                eni_index: index,
                eni_name: name.to_string(),
            })
            .await?;
        debug!("Reserved primary address {} for ENI {}", primary.address, name);

        let mut info = match self
            .cloud
            .create_eni(name, &subnet.subnet_id, &primary.address, nn.spec.ip_num_per_eni)
            .await
        {
            Ok(info) => info,
            Err(e) => {
                error!("Failed to create ENI {}: {}", name, e);
                self.compensate(nn, vm, None, &primary).await;
                return Err(e.into());
            }
        };

        match self.attach(nn, vm, &info).await {
            Ok(attachment) => info.attachment = Some(attachment),
            Err(e) => {
                error!("Failed to attach ENI {} to {}: {}", info.eni_id, vm.instance_id, e);
                self.compensate(nn, vm, Some(&info.eni_id), &primary).await;
                return Err(e);
            }
        }

        let subnet_cidr = if primary.subnet_cidr.is_empty() {
            subnet.subnet_cidr
        } else {
            primary.subnet_cidr
        };
        Ok(self.eni_record(index, &info, subnet_cidr, subnet.gateway))
    }

    /// Take over an ENI created by an earlier, interrupted pass.
    ///
    /// Returns `None` when netservice no longer holds the ENI's primary
    /// address: the ENI is deleted and the next pass creates a fresh one.
    async fn adopt_eni(
        &self,
        nn: &NodeNetwork,
        vm: &VmInfo,
        index: u32,
        mut info: EniInfo,
    ) -> Result<Option<ElasticNetworkInterface>, ControllerError> {
        let recorded = self
            .netservice
            .list_ip(&ListIpRequest {
                host: Some(nn.spec.hostname.clone()),
                subnet_id: Some(info.subnet_id.clone()),
                ..Default::default()
            })
            .await?
            .into_iter()
            .find(|ip| ip.address == info.primary_ip);

        let Some(recorded) = recorded else {
            warn!(
                "Primary address {} of ENI {} is not recorded in netservice, deleting the ENI",
                info.primary_ip, info.eni_id
            );
            self.discard_eni(&info).await?;
            return Ok(None);
        };

        if info.attachment.is_none() {
            info.attachment = Some(self.attach(nn, vm, &info).await?);
        }
        Ok(Some(self.eni_record(index, &info, recorded.subnet_cidr, None)))
    }

    /// Detach and delete a cloud ENI that has no status entry. Not-found
    /// counts as done.
    async fn discard_eni(&self, info: &EniInfo) -> Result<(), ControllerError> {
        if let Some(attachment) = &info.attachment {
            match self.cloud.detach_eni(&info.eni_id, attachment).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e.into()),
            }
        }
        match self.cloud.delete_eni(&info.eni_id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn attach(
        &self,
        nn: &NodeNetwork,
        vm: &VmInfo,
        info: &EniInfo,
    ) -> Result<crds::EniAttachment, ControllerError> {
        let device_index = self.cloud.get_max_eni_index(&nn.spec.node_address).await? + 1;
        Ok(self
            .cloud
            .attach_eni(device_index, &info.eni_id, &vm.instance_id, &info.mac_address)
            .await?)
    }

    /// Best-effort undo of a half-finished scale-up. Failures are logged;
    /// the caller returns the original error.
    async fn compensate(&self, nn: &NodeNetwork, vm: &VmInfo, eni_id: Option<&str>, primary: &IpObject) {
        if let Some(eni_id) = eni_id {
            if let Err(e) = self.cloud.delete_eni(eni_id).await {
                warn!("Compensation: failed to delete ENI {}: {}", eni_id, e);
            }
        }
        let request = ReleaseEniRequest {
            vpc_id: vm.vpc_id.clone(),
            region: vm.region.clone(),
            subnet_id: primary.subnet_id.clone(),
            cluster: nn.spec.cluster.clone(),
            instance_id: vm.instance_id.clone(),
            host: nn.spec.hostname.clone(),
            eni_id: eni_id.unwrap_or_default().to_string(),
            address: primary.address.clone(),
        };
        if let Err(e) = self.netservice.release_eni(&request).await {
            warn!("Compensation: failed to release primary address {}: {}", primary.address, e);
        }
    }

    /// `Cleaning -> Cleaned` once no pod address is active on the ENI.
    async fn drain_eni(&self, nn: &NodeNetwork, eni: &ElasticNetworkInterface) -> Result<Step, ControllerError> {
        let active = self.cloud_ips.list(&active_on_eni(&eni.eni_id)).await?;
        if !active.is_empty() {
            return Ok(Step::Waiting(format!(
                "{} pod addresses still active on eni {}",
                active.len(),
                eni.eni_id
            )));
        }
        let vm = vm_of(nn)?;
        self.netservice
            .clean_eni(&CleanEniRequest {
                vpc_id: vm.vpc_id.clone(),
                region: vm.region.clone(),
                cluster: nn.spec.cluster.clone(),
                host: nn.spec.hostname.clone(),
                eni_id: eni.eni_id.clone(),
            })
            .await?;
        self.set_last_status(nn, EniStatus::Cleaned).await
    }

    /// Return the primary address of `eni`; already-released is fine.
    pub(crate) async fn release_primary(
        &self,
        nn: &NodeNetwork,
        eni: &ElasticNetworkInterface,
    ) -> Result<(), ControllerError> {
        let vm = vm_of(nn)?;
        let request = ReleaseEniRequest {
            vpc_id: vm.vpc_id.clone(),
            region: vm.region.clone(),
            subnet_id: eni.subnet_id.clone(),
            cluster: nn.spec.cluster.clone(),
            instance_id: vm.instance_id.clone(),
            host: nn.spec.hostname.clone(),
            eni_id: eni.eni_id.clone(),
            address: eni.primary_ip.clone(),
        };
        match self.netservice.release_eni(&request).await {
            Ok(()) | Err(NetServiceError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Detach, delete and release the top ENI, then pop it from the stack.
    pub(crate) async fn remove_top_eni(&self, nn: &NodeNetwork) -> Result<Removal, ControllerError> {
        let Some(eni) = nn.enis().last().cloned() else {
            return Ok(Removal::Empty);
        };

        match self.cloud.query_eni(&eni.eni_id).await {
            Err(e) if e.is_not_found() => debug!("ENI {} already gone from the cloud", eni.eni_id),
            Err(e) => return Err(e.into()),
            Ok(info) => {
                if let Some(attachment) = info.attachment.as_ref() {
                    if info.state != EniState::Detaching {
                        match self.cloud.detach_eni(&eni.eni_id, attachment).await {
                            Ok(()) => info!("Detached ENI {} from {}", eni.eni_id, attachment.instance_id),
                            Err(e) if e.is_not_found() => {}
                            Err(e) => return Err(e.into()),
                        }
                    }
                    match self.cloud.query_eni(&eni.eni_id).await {
                        Ok(after) if after.attachment.is_some() => {
                            return Ok(Removal::Waiting(format!("eni {} is detaching", eni.eni_id)));
                        }
                        Ok(_) => {}
                        Err(e) if e.is_not_found() => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                match self.cloud.delete_eni(&eni.eni_id).await {
                    Ok(()) => info!("Deleted ENI {}", eni.eni_id),
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        self.release_primary(nn, &eni).await?;
        let mut status = status_of(nn);
        status.enis.pop();
        let updated = self.write_status(nn, status).await?;
        Ok(Removal::Removed {
            updated,
            eni_id: eni.eni_id,
        })
    }
}
