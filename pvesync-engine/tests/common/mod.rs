//! In-memory platform used by the engine integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use pvesync_engine::device::StorageDevice;
use pvesync_engine::{
    ApiError, Bus, CloneRequest, DiskSize, Engine, EngineConfig, IdGenerator, SlotKey,
    UpdateRequest, VmApi, VmRef, VmStatus,
};

/// One recorded collaborator call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Fetch(u32),
    Update(u32, UpdateRequest),
    Grow(u32, SlotKey, DiskSize),
    Clone(CloneRequest),
    Status(u32),
    Shutdown(u32),
    Stop(u32),
    Delete { vmid: u32, purge: bool, unreferenced: bool },
    NextId,
}

#[derive(Default)]
struct State {
    vms: HashMap<u32, BTreeMap<String, String>>,
    running: HashSet<u32>,
    calls: Vec<Call>,
    failing_growth: HashSet<SlotKey>,
    hanging_growth: HashSet<SlotKey>,
    update_error: Option<ApiError>,
    shutdown_error: Option<ApiError>,
    hang_updates: bool,
    next_id: u32,
}

/// Platform fake. Allocates volumes for `<datastore>:<size>` disk references
/// the way the real platform does, so a second pass sees realistic state.
#[derive(Default)]
pub struct FakeApi {
    state: Mutex<State>,
}

impl FakeApi {
    pub fn new() -> Arc<Self> {
        let api = Self::default();
        api.state.lock().unwrap().next_id = 100;
        Arc::new(api)
    }

    pub fn with_vm(self: &Arc<Self>, vmid: u32, fields: &[(&str, &str)]) -> Arc<Self> {
        let config = fields
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.state.lock().unwrap().vms.insert(vmid, config);
        Arc::clone(self)
    }

    pub fn set_running(&self, vmid: u32) {
        self.state.lock().unwrap().running.insert(vmid);
    }

    pub fn fail_growth(&self, slot: &str) {
        let slot: SlotKey = slot.parse().unwrap();
        self.state.lock().unwrap().failing_growth.insert(slot);
    }

    pub fn hang_growth(&self, slot: &str) {
        let slot: SlotKey = slot.parse().unwrap();
        self.state.lock().unwrap().hanging_growth.insert(slot);
    }

    pub fn fail_updates(&self, error: ApiError) {
        self.state.lock().unwrap().update_error = Some(error);
    }

    pub fn fail_shutdown(&self, error: ApiError) {
        self.state.lock().unwrap().shutdown_error = Some(error);
    }

    pub fn hang_updates(&self) {
        self.state.lock().unwrap().hang_updates = true;
    }

    pub fn set_next_id(&self, id: u32) {
        self.state.lock().unwrap().next_id = id;
    }

    pub fn config(&self, vmid: u32) -> Option<BTreeMap<String, String>> {
        self.state.lock().unwrap().vms.get(&vmid).cloned()
    }

    pub fn field(&self, vmid: u32, name: &str) -> Option<String> {
        self.config(vmid).and_then(|c| c.get(name).cloned())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    /// Recorded calls that change something on the platform.
    pub fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, Call::Fetch(_) | Call::Status(_)))
            .collect()
    }

    pub fn updates(&self) -> Vec<UpdateRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Update(_, req) => Some(req),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

/// Rewrites a freshly requested `<datastore>:<size>` reference into an
/// allocated volume with its size recorded.
fn allocate(vmid: u32, slot: &str, value: &str, previous: Option<&String>) -> String {
    let Ok(mut dev) = StorageDevice::decode(value) else {
        return value.to_string();
    };
    if let Some((ds, size)) = dev.file.split_once(':') {
        if let Ok(gb) = size.parse::<u64>() {
            dev.file = format!("{ds}:vm-{vmid}-disk-{slot}");
            dev.size = DiskSize::from_gigabytes(gb);
        }
    }
    if dev.size.is_none() {
        dev.size = previous
            .and_then(|p| StorageDevice::decode(p).ok())
            .and_then(|p| p.size);
    }
    dev.encode()
}

#[async_trait]
impl VmApi for FakeApi {
    async fn fetch_config(
        &self,
        vm: &VmRef,
    ) -> Result<Option<BTreeMap<String, String>>, ApiError> {
        self.record(Call::Fetch(vm.vmid));
        Ok(self.config(vm.vmid))
    }

    async fn apply_update(&self, vm: &VmRef, update: &UpdateRequest) -> Result<(), ApiError> {
        self.record(Call::Update(vm.vmid, update.clone()));
        let hang = self.state.lock().unwrap().hang_updates;
        if hang {
            tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        }

        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.update_error.clone() {
            return Err(err);
        }
        let config = state.vms.get_mut(&vm.vmid).ok_or(ApiError::NotFound)?;
        for (field, value) in &update.set {
            let value = if SlotKey::recognize(field, &Bus::DISK).is_some() {
                allocate(vm.vmid, field, value, config.get(field))
            } else {
                value.clone()
            };
            config.insert(field.clone(), value);
        }
        for field in &update.delete {
            config.remove(field);
        }
        Ok(())
    }

    async fn grow_volume(&self, vm: &VmRef, slot: SlotKey, size: DiskSize) -> Result<(), ApiError> {
        self.record(Call::Grow(vm.vmid, slot, size));
        let hang = self.state.lock().unwrap().hanging_growth.contains(&slot);
        if hang {
            tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
        }

        let mut state = self.state.lock().unwrap();
        if state.failing_growth.contains(&slot) {
            return Err(ApiError::Status {
                code: 500,
                message: "not enough space on storage".to_string(),
            });
        }
        let config = state.vms.get_mut(&vm.vmid).ok_or(ApiError::NotFound)?;
        let current = config
            .get(&slot.to_string())
            .ok_or_else(|| ApiError::Status {
                code: 500,
                message: format!("disk '{slot}' does not exist"),
            })?;
        let mut dev = StorageDevice::decode(current).map_err(|e| ApiError::Decode(e.to_string()))?;
        dev.size = Some(size);
        config.insert(slot.to_string(), dev.encode());
        Ok(())
    }

    async fn clone_vm(&self, request: &CloneRequest) -> Result<(), ApiError> {
        self.record(Call::Clone(request.clone()));
        let mut state = self.state.lock().unwrap();
        let mut config = state
            .vms
            .get(&request.source.vmid)
            .cloned()
            .ok_or(ApiError::NotFound)?;
        if let Some(name) = &request.name {
            config.insert("name".to_string(), name.clone());
        }
        state.vms.insert(request.new_id, config);
        Ok(())
    }

    async fn status(&self, vm: &VmRef) -> Result<Option<VmStatus>, ApiError> {
        self.record(Call::Status(vm.vmid));
        let state = self.state.lock().unwrap();
        if !state.vms.contains_key(&vm.vmid) {
            return Ok(None);
        }
        let status = if state.running.contains(&vm.vmid) {
            "running"
        } else {
            "stopped"
        };
        Ok(Some(VmStatus {
            status: status.to_string(),
        }))
    }

    async fn shutdown(&self, vm: &VmRef, _timeout: Duration) -> Result<(), ApiError> {
        self.record(Call::Shutdown(vm.vmid));
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.shutdown_error.clone() {
            return Err(err);
        }
        state.running.remove(&vm.vmid);
        Ok(())
    }

    async fn stop(&self, vm: &VmRef) -> Result<(), ApiError> {
        self.record(Call::Stop(vm.vmid));
        self.state.lock().unwrap().running.remove(&vm.vmid);
        Ok(())
    }

    async fn delete(
        &self,
        vm: &VmRef,
        purge: bool,
        destroy_unreferenced_disks: bool,
    ) -> Result<(), ApiError> {
        self.record(Call::Delete {
            vmid: vm.vmid,
            purge,
            unreferenced: destroy_unreferenced_disks,
        });
        let mut state = self.state.lock().unwrap();
        state.running.remove(&vm.vmid);
        state
            .vms
            .remove(&vm.vmid)
            .map(|_| ())
            .ok_or(ApiError::NotFound)
    }
}

#[async_trait]
impl IdGenerator for FakeApi {
    async fn next_id(&self) -> Result<u32, ApiError> {
        self.record(Call::NextId);
        let mut state = self.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        Ok(id)
    }
}

pub fn engine(api: &Arc<FakeApi>) -> Engine {
    Engine::new(api.clone(), api.clone(), EngineConfig::default())
}

/// Builds a desired-state document from JSON.
pub fn desired(json: &str) -> pvesync_engine::DesiredVm {
    serde_json::from_str(json).expect("valid desired-state document")
}
