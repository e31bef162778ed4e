//! Cluster quota refresher
//!
//! Polls netservice for the cluster's address quota on a fixed interval.
//! A failed poll keeps the last good value; until the first success the
//! quota check is skipped.

use crate::error::SchedulerError;
use crate::scheduler::SchedulerContext;
use netservice_client::{GetQuotaRequest, NetServiceError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

impl SchedulerContext {
    /// Fetch the quota once; returns the value now in effect.
    pub async fn refresh_quota(&self) -> Option<u32> {
        let request = GetQuotaRequest {
            cluster: self.config.cluster_id.clone(),
        };
        match self.netservice.get_quota(&request).await {
            Ok(quota) => {
                let previous = self.set_quota(quota.limit);
                if previous != Some(quota.limit) {
                    info!("Cluster {} ip quota is now {}", self.config.cluster_id, quota.limit);
                }
            }
            Err(NetServiceError::NotFound(msg)) => {
                debug!("No quota for cluster {}: {}", self.config.cluster_id, msg);
            }
            Err(e) => {
                warn!("Failed to refresh quota, keeping {:?}: {}", self.quota(), e);
            }
        }
        self.quota()
    }
}

/// Refresh the quota every `interval` until the task is dropped.
pub async fn run(ctx: Arc<SchedulerContext>, interval: Duration) -> Result<(), SchedulerError> {
    info!("Refreshing cluster quota every {}s", interval.as_secs());
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        ctx.refresh_quota().await;
    }
}
