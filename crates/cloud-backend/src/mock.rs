//! In-memory cloud backend for unit testing
//!
//! Instances are registered by node address. ENIs get sequential ids and
//! MAC addresses; attachments stay in `Attaching` until
//! [`MockCloudBackend::complete_attachments`] is called unless the backend
//! was built with [`MockCloudBackend::attach_immediately`].

use crate::cloud_trait::CloudBackend;
use crate::error::CloudError;
use crate::models::{EniInfo, EniLimit, EniState};
use crds::{EniAttachment, VmInfo};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Debug, Default)]
struct State {
    vms: HashMap<String, VmInfo>,
    limits: HashMap<String, EniLimit>,
    enis: BTreeMap<String, EniInfo>,
    next_id: u32,
    failures: HashMap<String, String>,
    calls: Vec<String>,
    attach_immediately: bool,
}

/// Mock CloudBackend for testing
#[derive(Clone, Debug, Default)]
pub struct MockCloudBackend {
    state: Arc<Mutex<State>>,
}

impl MockCloudBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attachments complete as soon as `attach_eni` returns.
    pub fn attach_immediately(self) -> Self {
        lock(&self.state).attach_immediately = true;
        self
    }

    /// Register an instance reachable at `node_ip`.
    pub fn add_vm(&self, node_ip: &str, vm: VmInfo, limit: EniLimit) {
        let mut state = lock(&self.state);
        state.vms.insert(node_ip.to_string(), vm);
        state.limits.insert(node_ip.to_string(), limit);
    }

    /// Forget an instance, as if it had been terminated.
    pub fn remove_vm(&self, node_ip: &str) {
        let mut state = lock(&self.state);
        state.vms.remove(node_ip);
        state.limits.remove(node_ip);
    }

    /// Insert an ENI directly (e.g. one left behind by an earlier pass).
    pub fn insert_eni(&self, eni: EniInfo) {
        lock(&self.state).enis.insert(eni.eni_id.clone(), eni);
    }

    /// Make `method` fail with a provider error until cleared.
    pub fn fail_on(&self, method: &str, message: &str) {
        lock(&self.state)
            .failures
            .insert(method.to_string(), message.to_string());
    }

    pub fn clear_failures(&self) {
        lock(&self.state).failures.clear();
    }

    /// Move every `Attaching` ENI to `Attached`.
    pub fn complete_attachments(&self) {
        for eni in lock(&self.state).enis.values_mut() {
            if eni.state == EniState::Attaching {
                eni.state = EniState::Attached;
            }
        }
    }

    pub fn eni(&self, eni_id: &str) -> Option<EniInfo> {
        lock(&self.state).enis.get(eni_id).cloned()
    }

    pub fn eni_count(&self) -> usize {
        lock(&self.state).enis.len()
    }

    /// Method names in call order.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    fn enter(&self, method: &str) -> Result<MutexGuard<'_, State>, CloudError> {
        let mut state = lock(&self.state);
        state.calls.push(method.to_string());
        if let Some(message) = state.failures.get(method) {
            return Err(CloudError::Api {
                code: "InternalError".to_string(),
                message: message.clone(),
            });
        }
        Ok(state)
    }
}

fn vm_of<'a>(state: &'a State, node_ip: &str) -> Result<&'a VmInfo, CloudError> {
    state
        .vms
        .get(node_ip)
        .ok_or_else(|| CloudError::NotFound(format!("instance with address {}", node_ip)))
}

#[async_trait::async_trait]
impl CloudBackend for MockCloudBackend {
    fn provider(&self) -> &'static str {
        "mock"
    }

    async fn init(&self) -> Result<(), CloudError> {
        self.enter("init")?;
        Ok(())
    }

    async fn get_vm_info(&self, node_ip: &str) -> Result<VmInfo, CloudError> {
        let state = self.enter("get_vm_info")?;
        vm_of(&state, node_ip).cloned()
    }

    async fn get_max_eni_index(&self, node_ip: &str) -> Result<u32, CloudError> {
        let state = self.enter("get_max_eni_index")?;
        let instance_id = vm_of(&state, node_ip)?.instance_id.clone();
        Ok(state
            .enis
            .values()
            .filter_map(|e| e.attachment.as_ref())
            .filter(|a| a.instance_id == instance_id)
            .map(|a| a.device_index)
            .max()
            .unwrap_or(0))
    }

    async fn get_eni_limit(&self, node_ip: &str) -> Result<EniLimit, CloudError> {
        let state = self.enter("get_eni_limit")?;
        state
            .limits
            .get(node_ip)
            .copied()
            .ok_or_else(|| CloudError::NotFound(format!("instance with address {}", node_ip)))
    }

    async fn create_eni(&self, name: &str, subnet_id: &str, primary_ip: &str, ip_num: u32) -> Result<EniInfo, CloudError> {
        let mut state = self.enter("create_eni")?;
        state.next_id += 1;
        let id = state.next_id;
        let eni = EniInfo {
            eni_id: format!("eni-{:08x}", id),
            eni_name: name.to_string(),
            mac_address: format!("02:00:00:00:{:02x}:{:02x}", (id >> 8) & 0xff, id & 0xff),
            subnet_id: subnet_id.to_string(),
            primary_ip: primary_ip.to_string(),
            secondary_ips: Vec::with_capacity(ip_num as usize),
            attachment: None,
            state: EniState::Available,
        };
        state.enis.insert(eni.eni_id.clone(), eni.clone());
        Ok(eni)
    }

    async fn attach_eni(&self, index: u32, eni_id: &str, instance_id: &str, _mac: &str) -> Result<EniAttachment, CloudError> {
        let mut state = self.enter("attach_eni")?;
        let immediate = state.attach_immediately;
        let eni = state
            .enis
            .get_mut(eni_id)
            .ok_or_else(|| CloudError::NotFound(eni_id.to_string()))?;
        if eni.attachment.is_some() {
            return Err(CloudError::Api {
                code: "InvalidNetworkInterface.InUse".to_string(),
                message: format!("{} is already attached", eni_id),
            });
        }
        let attachment = EniAttachment {
            attachment_id: format!("attach-{}", eni_id),
            instance_id: instance_id.to_string(),
            device_index: index,
        };
        eni.attachment = Some(attachment.clone());
        eni.state = if immediate { EniState::Attached } else { EniState::Attaching };
        Ok(attachment)
    }

    async fn detach_eni(&self, eni_id: &str, _attachment: &EniAttachment) -> Result<(), CloudError> {
        let mut state = self.enter("detach_eni")?;
        let eni = state
            .enis
            .get_mut(eni_id)
            .ok_or_else(|| CloudError::NotFound(eni_id.to_string()))?;
        eni.attachment = None;
        eni.state = EniState::Available;
        Ok(())
    }

    async fn delete_eni(&self, eni_id: &str) -> Result<(), CloudError> {
        let mut state = self.enter("delete_eni")?;
        state
            .enis
            .remove(eni_id)
            .map(|_| ())
            .ok_or_else(|| CloudError::NotFound(eni_id.to_string()))
    }

    async fn query_eni(&self, eni_id: &str) -> Result<EniInfo, CloudError> {
        let state = self.enter("query_eni")?;
        state
            .enis
            .get(eni_id)
            .cloned()
            .ok_or_else(|| CloudError::NotFound(eni_id.to_string()))
    }

    async fn find_eni(&self, name: &str) -> Result<Option<EniInfo>, CloudError> {
        let state = self.enter("find_eni")?;
        Ok(state.enis.values().find(|e| e.eni_name == name).cloned())
    }
}
