//! Read-back of declared state and import of undeclared VMs.

use crate::collection::{
    import_cdroms, import_disks, import_networks, read_cdroms, read_disks, read_networks,
};
use crate::error::Result;
use crate::groups;
use crate::model::DesiredVm;
use crate::snapshot::RemoteSnapshot;

/// Refreshes every declared attribute, group field and slot of `desired`
/// from the snapshot. Undeclared ones stay as they are.
pub fn read_back(desired: &DesiredVm, snapshot: &RemoteSnapshot) -> Result<DesiredVm> {
    let mut state = desired.clone();
    groups::read_general(&mut state, snapshot);
    if let Some(cpu) = state.cpu.as_mut() {
        groups::read_cpu(cpu, snapshot)?;
    }
    if let Some(memory) = state.memory.as_mut() {
        groups::read_memory(memory, snapshot)?;
    }
    if let Some(vga) = state.vga.as_mut() {
        groups::read_vga(vga, snapshot)?;
    }
    if let Some(rng) = state.rng.as_mut() {
        groups::read_rng(rng, snapshot)?;
    }
    read_networks(&mut state.network, snapshot);
    read_disks(&mut state.disk, snapshot);
    read_cdroms(&mut state.cdrom, snapshot);
    Ok(state)
}

/// Builds a document declaring everything the platform reports.
pub fn import(node: &str, vmid: u32, snapshot: &RemoteSnapshot) -> Result<DesiredVm> {
    let mut vm = DesiredVm::new(node);
    vm.id = Some(vmid);
    groups::import_general(&mut vm, snapshot);
    vm.cpu = groups::import_cpu(snapshot)?;
    vm.memory = groups::import_memory(snapshot)?;
    vm.vga = groups::import_vga(snapshot)?;
    vm.rng = groups::import_rng(snapshot)?;
    vm.network = import_networks(snapshot);
    vm.disk = import_disks(snapshot);
    vm.cdrom = import_cdroms(snapshot);
    vm.stop_on_destroy = false;
    vm.purge_on_destroy = true;
    vm.delete_unreferenced_disks_on_destroy = true;
    Ok(vm)
}
