//! Scalar attributes and structured groups (CPU, memory, display, RNG).
//!
//! Each group has three directions: `plan_*` writes directives for the
//! declared sub-fields, `read_*` refreshes them from a snapshot and
//! `import_*` declares whatever the platform reports.

use std::collections::BTreeSet;

use tracing::debug;

use crate::attr::Attr;
use crate::batch::MutationBatch;
use crate::device::{CpuEmulation, RngDevice, VgaDevice};
use crate::error::{EngineError, Result, ValidationError};
use crate::merge::{Decision, apply, decide};
use crate::model::{CpuConfig, DesiredVm, MemoryConfig, RngConfig, VgaConfig};
use crate::snapshot::{RemoteSnapshot, encode_tags};

/// How a scalar value is written into a configuration field.
pub(crate) trait FieldValue: Clone + PartialEq {
    fn encode(&self) -> String;
}

impl FieldValue for String {
    fn encode(&self) -> String {
        self.clone()
    }
}

impl FieldValue for u32 {
    fn encode(&self) -> String {
        self.to_string()
    }
}

impl FieldValue for u64 {
    fn encode(&self) -> String {
        self.to_string()
    }
}

impl FieldValue for bool {
    fn encode(&self) -> String {
        (if *self { "1" } else { "0" }).to_string()
    }
}

impl FieldValue for BTreeSet<String> {
    fn encode(&self) -> String {
        encode_tags(self)
    }
}

fn scalar<T: FieldValue>(
    batch: &mut MutationBatch,
    field: &str,
    desired: &Attr<T>,
    current: Option<T>,
) -> std::result::Result<(), ValidationError> {
    match decide(desired, current.as_ref()) {
        Decision::Set(v) => {
            debug!(field, "set");
            batch.set(field, v.encode())
        }
        Decision::Clear => {
            debug!(field, "clear");
            batch.clear(field)
        }
        Decision::Leave | Decision::NoOp => Ok(()),
    }
}

/// Emits the directive for a field holding a whole property-string unit.
fn unit<D: PartialEq>(
    batch: &mut MutationBatch,
    field: &str,
    remote: Option<&D>,
    merged: &D,
    blank: bool,
    encode: impl FnOnce(&D) -> String,
) -> std::result::Result<(), ValidationError> {
    match remote {
        Some(remote) if remote == merged => Ok(()),
        None if blank => Ok(()),
        Some(_) if blank => {
            debug!(field, "clear unit");
            batch.clear(field)
        }
        _ => {
            debug!(field, "set unit");
            batch.set(field, encode(merged))
        }
    }
}

fn text(snapshot: &RemoteSnapshot, field: &str) -> Option<String> {
    snapshot.field(field).map(str::to_string)
}

// General

pub(crate) fn plan_general(
    desired: &DesiredVm,
    snapshot: &RemoteSnapshot,
    batch: &mut MutationBatch,
) -> Result<()> {
    scalar(batch, "name", &desired.name, text(snapshot, "name"))?;
    scalar(batch, "description", &desired.description, text(snapshot, "description"))?;
    scalar(batch, "tags", &declared_tags(&desired.tags), snapshot.tags())?;
    Ok(())
}

/// The platform does not keep an empty tag list, so declaring one means
/// declaring no tags at all.
fn declared_tags(tags: &Attr<BTreeSet<String>>) -> Attr<BTreeSet<String>> {
    match tags {
        Attr::Value(set) if set.is_empty() => Attr::Empty,
        other => other.clone(),
    }
}

pub(crate) fn read_general(desired: &mut DesiredVm, snapshot: &RemoteSnapshot) {
    desired.name.refresh(text(snapshot, "name"));
    desired.description.refresh(text(snapshot, "description"));
    desired.tags.refresh(snapshot.tags());
}

pub(crate) fn import_general(vm: &mut DesiredVm, snapshot: &RemoteSnapshot) {
    vm.name = Attr::from_import(text(snapshot, "name"));
    vm.description = Attr::from_import(text(snapshot, "description"));
    vm.tags = Attr::from_import(snapshot.tags());
}

// CPU

struct CpuReading {
    cores: Option<u32>,
    sockets: Option<u32>,
    vcpus: Option<u32>,
    limit: Option<u32>,
    units: Option<u32>,
    numa: Option<bool>,
    affinity: Option<String>,
    architecture: Option<String>,
    emulation: Option<CpuEmulation>,
}

impl CpuReading {
    fn from_snapshot(snapshot: &RemoteSnapshot) -> Result<Self> {
        Ok(Self {
            cores: snapshot.parse_field("cores")?,
            sockets: snapshot.parse_field("sockets")?,
            vcpus: snapshot.parse_field("vcpus")?,
            limit: snapshot.parse_field("cpulimit")?,
            units: snapshot.parse_field("cpuunits")?,
            numa: snapshot.flag("numa"),
            affinity: text(snapshot, "affinity"),
            architecture: text(snapshot, "arch"),
            emulation: snapshot.cpu_emulation()?,
        })
    }
}

pub(crate) fn plan_cpu(
    cpu: &CpuConfig,
    snapshot: &RemoteSnapshot,
    batch: &mut MutationBatch,
) -> Result<()> {
    let remote = CpuReading::from_snapshot(snapshot)?;
    scalar(batch, "cores", &cpu.cores, remote.cores)?;
    scalar(batch, "sockets", &cpu.sockets, remote.sockets)?;
    scalar(batch, "vcpus", &cpu.vcpus, remote.vcpus)?;
    scalar(batch, "cpulimit", &cpu.limit, remote.limit)?;
    scalar(batch, "cpuunits", &cpu.units, remote.units)?;
    scalar(batch, "numa", &cpu.numa, remote.numa)?;
    scalar(batch, "affinity", &cpu.affinity, remote.affinity)?;
    scalar(batch, "arch", &cpu.architecture, remote.architecture)?;

    let mut merged = remote.emulation.clone().unwrap_or_default();
    apply(&cpu.cpu_type, &mut merged.cpu_type);
    apply(&cpu.flags, &mut merged.flags);
    if merged.flags.as_ref().is_some_and(Vec::is_empty) {
        merged.flags = None;
    }
    if remote.emulation.as_ref() == Some(&merged) {
        return Ok(());
    }
    if merged.cpu_type.is_none() && merged.flags.is_some() {
        return Err(ValidationError::FlagsWithoutType.into());
    }
    let blank = merged.cpu_type.is_none();
    unit(batch, "cpu", remote.emulation.as_ref(), &merged, blank, CpuEmulation::encode)?;
    Ok(())
}

pub(crate) fn read_cpu(cpu: &mut CpuConfig, snapshot: &RemoteSnapshot) -> Result<()> {
    let remote = CpuReading::from_snapshot(snapshot)?;
    cpu.cores.refresh(remote.cores);
    cpu.sockets.refresh(remote.sockets);
    cpu.vcpus.refresh(remote.vcpus);
    cpu.limit.refresh(remote.limit);
    cpu.units.refresh(remote.units);
    cpu.numa.refresh(remote.numa);
    cpu.affinity.refresh(remote.affinity);
    cpu.architecture.refresh(remote.architecture);
    let emulation = remote.emulation.unwrap_or_default();
    cpu.cpu_type.refresh(emulation.cpu_type);
    cpu.flags.refresh(emulation.flags);
    Ok(())
}

pub(crate) fn import_cpu(snapshot: &RemoteSnapshot) -> Result<Option<CpuConfig>> {
    let remote = CpuReading::from_snapshot(snapshot)?;
    let emulation = remote.emulation.unwrap_or_default();
    let cpu = CpuConfig {
        cores: Attr::from_import(remote.cores),
        sockets: Attr::from_import(remote.sockets),
        vcpus: Attr::from_import(remote.vcpus),
        limit: Attr::from_import(remote.limit),
        units: Attr::from_import(remote.units),
        numa: Attr::from_import(remote.numa),
        affinity: Attr::from_import(remote.affinity),
        architecture: Attr::from_import(remote.architecture),
        cpu_type: Attr::from_import(emulation.cpu_type),
        flags: Attr::from_import(emulation.flags),
    };
    Ok((cpu != CpuConfig::default()).then_some(cpu))
}

// Memory

struct MemoryReading {
    dedicated: Option<u64>,
    floating: Option<u64>,
    shares: Option<u32>,
}

impl MemoryReading {
    fn from_snapshot(snapshot: &RemoteSnapshot) -> Result<Self> {
        Ok(Self {
            dedicated: snapshot.parse_field("memory")?,
            floating: snapshot.parse_field("balloon")?,
            shares: snapshot.parse_field("shares")?,
        })
    }
}

pub(crate) fn plan_memory(
    memory: &MemoryConfig,
    snapshot: &RemoteSnapshot,
    batch: &mut MutationBatch,
) -> Result<()> {
    let remote = MemoryReading::from_snapshot(snapshot)?;
    scalar(batch, "memory", &memory.dedicated, remote.dedicated)?;
    scalar(batch, "balloon", &memory.floating, remote.floating)?;
    scalar(batch, "shares", &memory.shares, remote.shares)?;
    Ok(())
}

pub(crate) fn read_memory(memory: &mut MemoryConfig, snapshot: &RemoteSnapshot) -> Result<()> {
    let remote = MemoryReading::from_snapshot(snapshot)?;
    memory.dedicated.refresh(remote.dedicated);
    memory.floating.refresh(remote.floating);
    memory.shares.refresh(remote.shares);
    Ok(())
}

pub(crate) fn import_memory(snapshot: &RemoteSnapshot) -> Result<Option<MemoryConfig>> {
    let remote = MemoryReading::from_snapshot(snapshot)?;
    let memory = MemoryConfig {
        dedicated: Attr::from_import(remote.dedicated),
        floating: Attr::from_import(remote.floating),
        shares: Attr::from_import(remote.shares),
    };
    Ok((memory != MemoryConfig::default()).then_some(memory))
}

// Display

pub(crate) fn plan_vga(
    vga: &VgaConfig,
    snapshot: &RemoteSnapshot,
    batch: &mut MutationBatch,
) -> Result<()> {
    let remote = snapshot.vga()?;
    let mut merged = remote.clone().unwrap_or_default();
    apply(&vga.vga_type, &mut merged.vga_type);
    apply(&vga.memory, &mut merged.memory);
    apply(&vga.clipboard, &mut merged.clipboard);
    unit(batch, "vga", remote.as_ref(), &merged, merged.is_blank(), VgaDevice::encode)?;
    Ok(())
}

pub(crate) fn read_vga(vga: &mut VgaConfig, snapshot: &RemoteSnapshot) -> Result<()> {
    let remote = snapshot.vga()?.unwrap_or_default();
    vga.vga_type.refresh(remote.vga_type);
    vga.memory.refresh(remote.memory);
    vga.clipboard.refresh(remote.clipboard);
    Ok(())
}

pub(crate) fn import_vga(snapshot: &RemoteSnapshot) -> Result<Option<VgaConfig>> {
    Ok(snapshot.vga()?.map(|remote| VgaConfig {
        vga_type: Attr::from_import(remote.vga_type),
        memory: Attr::from_import(remote.memory),
        clipboard: Attr::from_import(remote.clipboard),
    }))
}

// Random number generator

pub(crate) fn plan_rng(
    rng: &RngConfig,
    snapshot: &RemoteSnapshot,
    batch: &mut MutationBatch,
) -> Result<()> {
    let remote = snapshot.rng()?;
    let mut merged = remote.clone().unwrap_or_default();
    apply(&rng.source, &mut merged.source);
    apply(&rng.max_bytes, &mut merged.max_bytes);
    apply(&rng.period, &mut merged.period);
    let blank = merged.is_blank();
    if !blank && merged.source.is_none() && remote.as_ref() != Some(&merged) {
        return Err(EngineError::Validation(ValidationError::RequiredField {
            scope: "rng0".to_string(),
            field: "source",
        }));
    }
    unit(batch, "rng0", remote.as_ref(), &merged, blank, RngDevice::encode)?;
    Ok(())
}

pub(crate) fn read_rng(rng: &mut RngConfig, snapshot: &RemoteSnapshot) -> Result<()> {
    let remote = snapshot.rng()?.unwrap_or_default();
    rng.source.refresh(remote.source);
    rng.max_bytes.refresh(remote.max_bytes);
    rng.period.refresh(remote.period);
    Ok(())
}

pub(crate) fn import_rng(snapshot: &RemoteSnapshot) -> Result<Option<RngConfig>> {
    Ok(snapshot.rng()?.map(|remote| RngConfig {
        source: Attr::from_import(remote.source),
        max_bytes: Attr::from_import(remote.max_bytes),
        period: Attr::from_import(remote.period),
    }))
}
