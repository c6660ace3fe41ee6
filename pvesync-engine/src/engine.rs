//! Engine operations: reconcile, plan, create, read, import and destroy.
//!
//! A reconcile pass runs `validate → build batch → update → growth →
//! read-back` under one deadline. Nothing remote is mutated until the whole
//! batch has been built.

use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::{ApiError, CloneRequest, IdGenerator, VmApi, VmRef};
use crate::batch::MutationBatch;
use crate::collection::{self, parse_keys};
use crate::config::EngineConfig;
use crate::deletion::apply_deletions;
use crate::dispatch::{Dispatcher, GrowthReport, bounded};
use crate::error::{EngineError, Result, Stage, ValidationError};
use crate::groups;
use crate::model::{CloneSpec, DesiredVm};
use crate::readback;
use crate::slot::Bus;
use crate::snapshot::RemoteSnapshot;

/// Lowest id the platform accepts for a VM.
const MIN_VMID: u32 = 100;

/// Result of a successful pass.
#[derive(Debug, Clone, Serialize)]
pub struct Reconciled {
    /// Declared state as read back after the pass.
    pub state: DesiredVm,
    /// The batch that was dispatched.
    pub batch: MutationBatch,
    pub growth: GrowthReport,
}

/// Checks everything that can be checked without looking at the remote VM.
pub fn validate(desired: &DesiredVm) -> std::result::Result<(), ValidationError> {
    parse_keys(&desired.network, &Bus::NETWORK)?;
    parse_keys(&desired.disk, &Bus::DISK)?;
    parse_keys(&desired.cdrom, &Bus::CDROM)?;
    if let Some(key) = desired.cdrom.keys().find(|k| desired.disk.contains_key(*k)) {
        return Err(ValidationError::ConflictingDirective { field: key.clone() });
    }
    desired
        .delete
        .check_against(&desired.network, &desired.disk, &desired.cdrom)?;
    if let Some(clone) = &desired.clone {
        validate_clone(clone)?;
    }
    Ok(())
}

fn validate_clone(clone: &CloneSpec) -> std::result::Result<(), ValidationError> {
    if clone.source_vm_id < MIN_VMID {
        return Err(ValidationError::InvalidClone(format!(
            "source VM id {} is below {MIN_VMID}",
            clone.source_vm_id
        )));
    }
    if !clone.full && (clone.target_datastore.is_some() || clone.target_format.is_some()) {
        return Err(ValidationError::InvalidClone(
            "target datastore and format require a full clone".to_string(),
        ));
    }
    Ok(())
}

/// Computes every directive `desired` needs against `snapshot`.
pub fn build_batch(desired: &DesiredVm, snapshot: &RemoteSnapshot) -> Result<MutationBatch> {
    let mut batch = MutationBatch::new();
    groups::plan_general(desired, snapshot, &mut batch)?;
    if let Some(cpu) = &desired.cpu {
        groups::plan_cpu(cpu, snapshot, &mut batch)?;
    }
    if let Some(memory) = &desired.memory {
        groups::plan_memory(memory, snapshot, &mut batch)?;
    }
    if let Some(vga) = &desired.vga {
        groups::plan_vga(vga, snapshot, &mut batch)?;
    }
    if let Some(rng) = &desired.rng {
        groups::plan_rng(rng, snapshot, &mut batch)?;
    }
    collection::plan_network(&desired.network, snapshot, &mut batch)?;
    collection::plan_disks(&desired.disk, snapshot, &mut batch)?;
    collection::plan_cdroms(&desired.cdrom, snapshot, &mut batch)?;
    apply_deletions(&desired.delete, &mut batch)?;
    Ok(batch)
}

fn target(desired: &DesiredVm) -> std::result::Result<VmRef, ValidationError> {
    desired.vm_ref().ok_or_else(|| ValidationError::InvalidValue {
        field: "id".to_string(),
        reason: "the VM has no id yet".to_string(),
    })
}

/// Reconciles desired-state documents against one platform.
pub struct Engine {
    api: Arc<dyn VmApi>,
    ids: Arc<dyn IdGenerator>,
    config: EngineConfig,
}

impl Engine {
    pub fn new(api: Arc<dyn VmApi>, ids: Arc<dyn IdGenerator>, config: EngineConfig) -> Self {
        Self { api, ids, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn fetch(&self, vm: &VmRef, deadline: Instant) -> Result<Option<RemoteSnapshot>> {
        let fields = bounded(deadline, Stage::Fetch, self.api.fetch_config(vm))
            .await?
            .map_err(|e| EngineError::remote(vm, "fetch configuration", e))?;
        fields.map(RemoteSnapshot::from_fields).transpose()
    }

    async fn fetch_existing(&self, vm: &VmRef, deadline: Instant) -> Result<RemoteSnapshot> {
        self.fetch(vm, deadline)
            .await?
            .ok_or_else(|| EngineError::NotFound { vm: vm.clone() })
    }

    /// Computes the batch a reconcile would dispatch, without dispatching it.
    pub async fn plan(&self, desired: &DesiredVm) -> Result<MutationBatch> {
        validate(desired)?;
        let vm = target(desired)?;
        let deadline = Instant::now() + self.config.timeouts.read;
        let snapshot = self.fetch_existing(&vm, deadline).await?;
        build_batch(desired, &snapshot)
    }

    /// Brings the remote VM in line with every declared attribute and slot.
    ///
    /// `clone_origin` marks the first pass after a clone. Decisions compare
    /// against the fetched snapshot either way, so inherited values that
    /// are not declared stay untouched and inherited values declared empty
    /// get cleared.
    pub async fn reconcile(&self, desired: &DesiredVm, clone_origin: bool) -> Result<Reconciled> {
        let deadline = Instant::now() + self.config.timeouts.update;
        self.run_pass(desired, clone_origin, deadline).await
    }

    async fn run_pass(
        &self,
        desired: &DesiredVm,
        clone_origin: bool,
        deadline: Instant,
    ) -> Result<Reconciled> {
        validate(desired)?;
        let vm = target(desired)?;
        let snapshot = self.fetch_existing(&vm, deadline).await?;
        let batch = build_batch(desired, &snapshot)?;

        if batch.is_empty() {
            debug!(vm = %vm, "already in desired state");
        } else {
            info!(
                vm = %vm,
                clone_origin,
                set = batch.sets().len(),
                clear = batch.clears().len(),
                grow = batch.growth().len(),
                "reconciling"
            );
        }

        let dispatcher = Dispatcher::new(self.api.as_ref(), &vm, deadline);
        dispatcher.update(&batch).await?;
        let growth = dispatcher.grow(batch.growth()).await;

        let state = match self.fetch_existing(&vm, deadline).await {
            Ok(snapshot) => readback::read_back(desired, &snapshot),
            Err(e) => Err(e),
        };

        match (growth.is_complete(), state) {
            (true, Ok(state)) => Ok(Reconciled {
                state,
                batch,
                growth,
            }),
            (true, Err(e)) => Err(e),
            (false, Ok(state)) => Err(EngineError::PartialApply {
                report: growth,
                state: Some(Box::new(state)),
            }),
            (false, Err(e)) => {
                warn!(vm = %vm, error = %e, "read-back after partial apply failed");
                Err(EngineError::PartialApply {
                    report: growth,
                    state: None,
                })
            }
        }
    }

    /// Creates a VM by cloning, then reconciles it as a clone-origin pass.
    pub async fn create(&self, desired: &DesiredVm) -> Result<Reconciled> {
        validate(desired)?;
        let clone = desired.clone.as_ref().ok_or_else(|| {
            ValidationError::InvalidClone("creating a VM requires a clone source".to_string())
        })?;
        let deadline = Instant::now() + self.config.timeouts.create;

        let vmid = match desired.id {
            Some(id) => id,
            None => bounded(deadline, Stage::NextId, self.ids.next_id())
                .await?
                .map_err(|source| EngineError::Remote {
                    context: "allocate VM id".to_string(),
                    source,
                })?,
        };
        let vm = VmRef::new(desired.node_name.clone(), vmid);
        let source_node = clone
            .source_node_name
            .clone()
            .unwrap_or_else(|| desired.node_name.clone());

        let request = CloneRequest {
            source: VmRef::new(source_node, clone.source_vm_id),
            new_id: vmid,
            target_node: desired.node_name.clone(),
            full: clone.full,
            name: desired.name.value().cloned(),
            description: desired.description.value().cloned(),
            target_datastore: clone.target_datastore.clone(),
            target_format: clone.target_format.clone(),
            snapshot_name: clone.snapshot_name.clone(),
            pool_id: clone.pool_id.clone(),
            bandwidth_limit: clone.bandwidth_limit,
        };
        info!(vm = %vm, source = %request.source, full = clone.full, "cloning VM");
        bounded(deadline, Stage::Clone, self.api.clone_vm(&request))
            .await?
            .map_err(|source| EngineError::Remote {
                context: format!("clone {} to {}", request.source, vm),
                source,
            })?;

        let mut created = desired.clone();
        created.id = Some(vmid);
        self.run_pass(&created, true, deadline).await
    }

    /// Refreshes declared state. `None` means the VM is gone.
    pub async fn read(&self, desired: &DesiredVm) -> Result<Option<DesiredVm>> {
        let vm = target(desired)?;
        let deadline = Instant::now() + self.config.timeouts.read;
        match self.fetch(&vm, deadline).await? {
            Some(snapshot) => readback::read_back(desired, &snapshot).map(Some),
            None => {
                info!(vm = %vm, "VM no longer exists");
                Ok(None)
            }
        }
    }

    /// Adopts an existing VM, declaring everything it reports.
    pub async fn import(&self, vm: &VmRef) -> Result<DesiredVm> {
        let deadline = Instant::now() + self.config.timeouts.read;
        let snapshot = self.fetch_existing(vm, deadline).await?;
        info!(vm = %vm, "importing VM");
        readback::import(&vm.node, vm.vmid, &snapshot)
    }

    /// Stops and deletes the VM. A VM that is already gone counts as deleted.
    pub async fn destroy(&self, desired: &DesiredVm) -> Result<()> {
        let vm = target(desired)?;
        let deadline = Instant::now() + self.config.timeouts.delete;

        let status = match bounded(deadline, Stage::Status, self.api.status(&vm)).await? {
            Ok(Some(status)) => status,
            Ok(None) | Err(ApiError::NotFound) => {
                info!(vm = %vm, "VM already gone");
                return Ok(());
            }
            Err(e) => return Err(EngineError::remote(&vm, "query status", e)),
        };

        if !status.is_stopped() {
            if let Err(e) = self.power_off(&vm, desired.stop_on_destroy, deadline).await {
                warn!(vm = %vm, error = %e, "failed to stop VM, deleting anyway");
            }
        }

        info!(
            vm = %vm,
            purge = desired.purge_on_destroy,
            unreferenced = desired.delete_unreferenced_disks_on_destroy,
            "deleting VM"
        );
        let call = self.api.delete(
            &vm,
            desired.purge_on_destroy,
            desired.delete_unreferenced_disks_on_destroy,
        );
        match bounded(deadline, Stage::Delete, call).await? {
            Ok(()) | Err(ApiError::NotFound) => Ok(()),
            Err(source) => Err(EngineError::Remote {
                context: format!("delete {vm}"),
                source,
            }),
        }
    }

    async fn power_off(&self, vm: &VmRef, force: bool, deadline: Instant) -> Result<()> {
        if force {
            info!(vm = %vm, "stopping VM");
            bounded(deadline, Stage::Stop, self.api.stop(vm))
                .await?
                .map_err(|e| EngineError::remote(vm, "stop", e))?;
        } else {
            let grace = self
                .config
                .timeouts
                .shutdown
                .min(deadline.saturating_duration_since(Instant::now()));
            info!(vm = %vm, grace_secs = grace.as_secs(), "shutting down VM");
            bounded(deadline, Stage::Shutdown, self.api.shutdown(vm, grace))
                .await?
                .map_err(|e| EngineError::remote(vm, "shutdown", e))?;
        }
        self.wait_stopped(vm, deadline).await
    }

    async fn wait_stopped(&self, vm: &VmRef, deadline: Instant) -> Result<()> {
        let poll = self.config.status_poll_interval;
        loop {
            let status = bounded(deadline, Stage::Status, self.api.status(vm))
                .await?
                .map_err(|e| EngineError::remote(vm, "query status", e))?;
            match status {
                None => return Ok(()),
                Some(s) if s.is_stopped() => return Ok(()),
                Some(s) => debug!(vm = %vm, status = %s.status, "waiting for VM to stop"),
            }
            if Instant::now() + poll >= deadline {
                return Err(EngineError::Timeout { stage: Stage::Stop });
            }
            tokio::time::sleep(poll).await;
        }
    }
}
