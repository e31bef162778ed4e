//! Fixed-IP reaper
//!
//! Fixed IPs outlive their pods as `Available` CloudIPs so a recreated pod
//! of the same workload gets its address back. Once the workload itself is
//! gone the address is marked `Deleting`, and after the keep period it is
//! cleaned from netservice and the CloudIP is deleted.

use super::Reconciler;
use crate::error::ControllerError;
use crds::{CloudIP, CloudIPState, LABEL_IS_FIXED};
use kube::ResourceExt;
use netservice_client::{CleanFixedIpRequest, NetServiceError};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Counts from one reaper pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapSummary {
    /// `Available` -> `Deleting`
    pub marked: usize,
    /// Cleaned and deleted
    pub reaped: usize,
}

impl Reconciler {
    /// One pass over every fixed CloudIP.
    pub async fn reap_fixed_ips(&self, now: chrono::DateTime<chrono::Utc>) -> Result<ReapSummary, ControllerError> {
        let labels = BTreeMap::from([(LABEL_IS_FIXED.to_string(), "true".to_string())]);
        let mut summary = ReapSummary::default();

        for ip in self.cloud_ips.list(&labels).await? {
            let key = format!("{}/{}", ip.namespace().unwrap_or_default(), ip.name_any());
            let result = match ip.state() {
                CloudIPState::Active => Ok(()),
                CloudIPState::Available => self.mark_if_orphaned(&ip, &mut summary).await,
                CloudIPState::Deleting => self.reap_if_expired(&ip, now, &mut summary).await,
            };
            // one bad record must not stall the rest
            if let Err(e) = result {
                warn!("Reaper failed on CloudIP {}: {}", key, e);
            }
        }

        if summary != ReapSummary::default() {
            info!(
                "Reaper marked {} and reaped {} fixed IPs",
                summary.marked, summary.reaped
            );
        }
        Ok(summary)
    }

    async fn mark_if_orphaned(&self, ip: &CloudIP, summary: &mut ReapSummary) -> Result<(), ControllerError> {
        let spec = &ip.spec;
        if spec.workload_kind.is_empty() || spec.workload_name.is_empty() {
            return Ok(());
        }
        if self.config.reaper_skip_kinds.iter().any(|k| k == &spec.workload_kind) {
            debug!("Skipping fixed IP {} of {} {}", spec.address, spec.workload_kind, spec.workload_name);
            return Ok(());
        }
        let exists = self
            .cluster
            .workload_exists(&spec.workload_kind, &spec.namespace, &spec.workload_name)
            .await?;
        if !exists {
            info!(
                "Workload {} {}/{} is gone, marking fixed IP {} for deletion",
                spec.workload_kind, spec.namespace, spec.workload_name, spec.address
            );
            self.cloud_ips.set_state(ip, CloudIPState::Deleting).await?;
            summary.marked += 1;
        }
        Ok(())
    }

    async fn reap_if_expired(
        &self,
        ip: &CloudIP,
        now: chrono::DateTime<chrono::Utc>,
        summary: &mut ReapSummary,
    ) -> Result<(), ControllerError> {
        let since = ip.status.as_ref().and_then(|s| s.update_time.or(s.create_time));
        let keep = chrono::Duration::from_std(self.config.fixed_ip_keep)
            .map_err(|e| ControllerError::InvalidConfig(format!("fixed ip keep duration: {}", e)))?;
        if since.is_some_and(|t| now - t < keep) {
            return Ok(());
        }

        let spec = &ip.spec;
        let request = CleanFixedIpRequest {
            vpc_id: spec.vpc_id.clone(),
            region: spec.region.clone(),
            cluster: spec.cluster.clone(),
            namespace: spec.namespace.clone(),
            pod_name: spec.pod_name.clone(),
            workload_name: spec.workload_name.clone(),
            workload_kind: spec.workload_kind.clone(),
            address: spec.address.clone(),
        };
        match self.netservice.clean_fixed_ip(&request).await {
            Ok(()) | Err(NetServiceError::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.cloud_ips
            .delete(&ip.namespace().unwrap_or_default(), &ip.name_any())
            .await?;
        info!("Reaped fixed IP {} of {}/{}", spec.address, spec.namespace, spec.workload_name);
        summary.reaped += 1;
        Ok(())
    }
}
