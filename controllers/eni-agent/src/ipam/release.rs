//! Release pipeline
//!
//! The pod's `Active` CloudIP on this node is looked up by pod and
//! container, the address is returned to netservice, and the record is
//! deleted (floating) or kept as `Available` for the workload (fixed).

use super::{IpRequest, IpamService};
use crate::error::IpamError;
use crds::CloudIPState;
use kube::ResourceExt;
use netservice_client::{NetServiceError, ReleaseIpRequest};
use tracing::{info, warn};

impl IpamService {
    /// Return the address held by the pod in `request`.
    pub async fn release(&self, request: &IpRequest) -> Result<(), IpamError> {
        request.validate()?;
        let ip = self
            .cloud_ips
            .list(&self.active_on_host())
            .await?
            .into_iter()
            .find(|ip| {
                ip.spec.pod_name == request.pod_name
                    && ip.spec.namespace == request.pod_namespace
                    && ip.spec.container_id == request.container_id
            })
            .ok_or_else(|| {
                IpamError::CloudIpNotFound(format!(
                    "no active address for {} container {} on {}",
                    request.pod_key(),
                    request.container_id,
                    self.config.node_name
                ))
            })?;

        let spec = &ip.spec;
        let release = ReleaseIpRequest {
            vpc_id: spec.vpc_id.clone(),
            region: spec.region.clone(),
            subnet_id: spec.subnet_id.clone(),
            cluster: spec.cluster.clone(),
            namespace: spec.namespace.clone(),
            pod_name: spec.pod_name.clone(),
            container_id: spec.container_id.clone(),
            host: spec.host.clone(),
            address: spec.address.clone(),
        };
        let result = if spec.is_fixed {
            self.netservice.release_fixed_ip(&release).await
        } else {
            self.netservice.release_ip(&release).await
        };
        match result {
            Ok(()) => {}
            Err(NetServiceError::NotFound(msg)) => {
                warn!("Netservice no longer knows {} ({}), dropping the record", spec.address, msg);
            }
            Err(e) => return Err(e.into()),
        }

        let namespace = ip.namespace().unwrap_or_else(|| spec.namespace.clone());
        if spec.is_fixed {
            self.cloud_ips.set_state(&ip, CloudIPState::Available).await?;
        } else {
            self.cloud_ips.delete(&namespace, &ip.name_any()).await?;
        }
        info!(
            "Released {} from {} ({})",
            spec.address,
            request.pod_key(),
            if spec.is_fixed { "kept for workload" } else { "deleted" }
        );
        Ok(())
    }
}
