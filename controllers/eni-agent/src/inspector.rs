//! Node agent inspector
//!
//! Follows this node's `NodeNetwork` and keeps the host in line with it:
//! `Ready` and draining ENIs are configured, routing tables of ENIs that
//! left the status list are flushed, and the node is reported `Ready` behind the agent
//! finalizer. The last reconciled object is published as an immutable
//! snapshot for the allocate/release handlers.

use crate::config::Config;
use crate::error::AgentError;
use crate::hostnet::{EniLink, HostNetwork, HostRule, table_of};
use crds::{AGENT_FINALIZER, CloudIPState, EniStatus, LABEL_HOST, LABEL_STATUS, NodeNetwork, NodeNetworkState};
use kube::ResourceExt;
use kube_store::{CloudIpStore, EventHandler, NodeNetworkStore};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

/// Routing tables from `eni_route_table_base` on that the agent owns
pub const MANAGED_TABLES: u32 = 64;

#[derive(Debug, Default)]
struct Snapshot {
    node_network: Option<Arc<NodeNetwork>>,
    ready: bool,
}

/// Host-side view of this node's ENIs
pub struct Inspector {
    config: Config,
    node_networks: Box<dyn NodeNetworkStore>,
    cloud_ips: Box<dyn CloudIpStore>,
    host: Box<dyn HostNetwork>,
    state: Mutex<Snapshot>,
}

impl Inspector {
    pub fn new(
        config: Config,
        node_networks: impl NodeNetworkStore + 'static,
        cloud_ips: impl CloudIpStore + 'static,
        host: impl HostNetwork + 'static,
    ) -> Self {
        Self {
            config,
            node_networks: Box::new(node_networks),
            cloud_ips: Box::new(cloud_ips),
            host: Box::new(host),
            state: Mutex::new(Snapshot::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Last reconciled `NodeNetwork`, if any.
    pub fn get_node_network(&self) -> Option<Arc<NodeNetwork>> {
        self.lock().node_network.clone()
    }

    /// Whether the host is configured and new addresses may be handed out.
    pub fn can_allocate(&self) -> bool {
        let state = self.lock();
        state.ready && state.node_network.is_some()
    }

    fn publish(&self, node_network: Option<NodeNetwork>, ready: bool) {
        let mut state = self.lock();
        state.node_network = node_network.map(Arc::new);
        state.ready = ready;
    }

    fn mark_not_ready(&self) {
        self.lock().ready = false;
    }

    fn is_managed(&self, table: u32) -> bool {
        let base = self.config.eni_route_table_base;
        table >= base && table < base + MANAGED_TABLES
    }

    /// Bring the host in line with `nn` and report the node ready.
    pub async fn sync(&self, nn: &NodeNetwork) -> Result<(), AgentError> {
        if nn.name_any() != self.config.node_name {
            return Ok(());
        }
        if nn.is_deleting() {
            self.teardown(nn).await?;
            return Ok(());
        }

        if let Err(e) = self.apply_host(nn).await {
            self.mark_not_ready();
            return Err(e);
        }

        let mut current = self.node_networks.add_finalizer(nn, AGENT_FINALIZER).await?;
        if !current.is_node_ready() {
            let mut status = current.status.clone().unwrap_or_default();
            status.status = NodeNetworkState::Ready;
            current.status = Some(status);
            current = self.node_networks.update_status(&current).await?;
            info!("Node {} host networking ready", self.config.node_name);
        }
        self.publish(Some(current), true);
        Ok(())
    }

    async fn apply_host(&self, nn: &NodeNetwork) -> Result<(), AgentError> {
        let rules = self.host.rules().await?;
        let base = self.config.eni_route_table_base;
        // draining ENIs keep their config until they leave the list
        let wanted: BTreeSet<u32> = nn.enis().iter().map(|eni| table_of(eni, base)).collect();
        for eni in nn
            .enis()
            .iter()
            .filter(|e| matches!(e.status, EniStatus::Ready | EniStatus::Cleaning))
        {
            let link = EniLink::from_eni(eni, base, self.config.eni_mtu)?;
            self.host.configure(&link).await?;
        }
        for rule in stale_rules(&rules, &wanted, |t| self.is_managed(t)) {
            if let Some(table) = rule.table_id() {
                info!("Removing host config of departed ENI (table {})", table);
                self.host.remove(table, rule_source(rule)).await?;
            }
        }
        Ok(())
    }

    async fn active_ips(&self) -> Result<usize, AgentError> {
        let labels = BTreeMap::from([
            (LABEL_HOST.to_string(), self.config.node_name.clone()),
            (LABEL_STATUS.to_string(), CloudIPState::Active.as_str().to_string()),
        ]);
        Ok(self.cloud_ips.list(&labels).await?.len())
    }

    /// Undo host networking once no pod address is active on the node.
    ///
    /// Returns `false` while pods still hold addresses; the informer resync
    /// brings the object back for another try.
    pub async fn teardown(&self, nn: &NodeNetwork) -> Result<bool, AgentError> {
        // no new addresses on a node that is going away
        self.mark_not_ready();

        let active = self.active_ips().await?;
        if active > 0 {
            info!(
                "Node {} is being deleted, waiting for {} active pod addresses",
                self.config.node_name, active
            );
            return Ok(false);
        }

        let rules = self.host.rules().await?;
        for rule in stale_rules(&rules, &BTreeSet::new(), |t| self.is_managed(t)) {
            if let Some(table) = rule.table_id() {
                self.host.remove(table, rule_source(rule)).await?;
            }
        }

        self.node_networks.remove_finalizer(nn, AGENT_FINALIZER).await?;
        self.publish(None, false);
        info!("Node {} host networking removed", self.config.node_name);
        Ok(true)
    }

    async fn handle(&self, nn: &NodeNetwork) {
        if let Err(e) = self.sync(nn).await {
            error!("Failed to sync NodeNetwork {}: {}", nn.name_any(), e);
        }
    }
}

/// Managed rules whose table is not in `wanted`.
fn stale_rules<'a>(
    rules: &'a [HostRule],
    wanted: &BTreeSet<u32>,
    managed: impl Fn(u32) -> bool,
) -> Vec<&'a HostRule> {
    rules
        .iter()
        .filter(|r| r.table_id().is_some_and(|t| managed(t) && !wanted.contains(&t)))
        .collect()
}

fn rule_source(rule: &HostRule) -> Option<&str> {
    rule.src.as_deref().filter(|s| *s != "all")
}

#[async_trait::async_trait]
impl EventHandler<NodeNetwork> for Inspector {
    async fn on_add(&self, obj: Arc<NodeNetwork>) {
        self.handle(&obj).await;
    }

    async fn on_update(&self, _old: Arc<NodeNetwork>, new: Arc<NodeNetwork>) {
        self.handle(&new).await;
    }

    async fn on_delete(&self, obj: Arc<NodeNetwork>) {
        if obj.name_any() != self.config.node_name {
            return;
        }
        if obj.has_finalizer(AGENT_FINALIZER) {
            warn!("NodeNetwork {} removed while still holding the agent finalizer", obj.name_any());
        }
        debug!("NodeNetwork {} is gone", obj.name_any());
        self.publish(None, false);
    }
}
