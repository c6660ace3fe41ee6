//! Desired-state documents.
//!
//! Attributes use [`Attr`]: leaving a key out means the engine does not own
//! it, `null` means it must be absent remotely.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::api::VmRef;
use crate::attr::Attr;
use crate::deletion::DeletionRequest;

fn default_true() -> bool {
    true
}

/// Desired state of one VM.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DesiredVm {
    /// Platform id. Absent until the VM has been created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    pub node_name: String,

    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub name: Attr<String>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub description: Attr<String>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub tags: Attr<BTreeSet<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone: Option<CloneSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vga: Option<VgaConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rng: Option<RngConfig>,

    /// Network slots keyed `net0`..`net31`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub network: BTreeMap<String, NetworkSlot>,
    /// Disk slots keyed by bus and index, e.g. `scsi0`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub disk: BTreeMap<String, DiskSlot>,
    /// CD-ROM drives keyed by bus and index, e.g. `ide2`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cdrom: BTreeMap<String, CdromSlot>,

    #[serde(default, skip_serializing_if = "DeletionRequest::is_empty")]
    pub delete: DeletionRequest,

    #[serde(default)]
    pub stop_on_destroy: bool,
    #[serde(default = "default_true")]
    pub purge_on_destroy: bool,
    #[serde(default)]
    pub delete_unreferenced_disks_on_destroy: bool,
}

impl DesiredVm {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            id: None,
            node_name: node_name.into(),
            name: Attr::Unset,
            description: Attr::Unset,
            tags: Attr::Unset,
            clone: None,
            cpu: None,
            memory: None,
            vga: None,
            rng: None,
            network: BTreeMap::new(),
            disk: BTreeMap::new(),
            cdrom: BTreeMap::new(),
            delete: DeletionRequest::default(),
            stop_on_destroy: false,
            purge_on_destroy: true,
            delete_unreferenced_disks_on_destroy: false,
        }
    }

    /// Reference to the remote VM, once an id has been assigned.
    pub fn vm_ref(&self) -> Option<VmRef> {
        self.id.map(|vmid| VmRef::new(self.node_name.clone(), vmid))
    }
}

/// Where a new VM is cloned from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CloneSpec {
    pub source_vm_id: u32,
    /// Node holding the source; defaults to the target node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_node_name: Option<String>,
    #[serde(default = "default_true")]
    pub full: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_datastore: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_id: Option<String>,
    /// Clone bandwidth limit in KiB/s.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth_limit: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CpuConfig {
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub cores: Attr<u32>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub sockets: Attr<u32>,
    /// Hotplugged vCPUs.
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub vcpus: Attr<u32>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub limit: Attr<u32>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub units: Attr<u32>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub numa: Attr<bool>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub affinity: Attr<String>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub architecture: Attr<String>,
    /// Emulated CPU type. Encoded together with `flags`.
    #[serde(default, rename = "type", skip_serializing_if = "Attr::is_unset")]
    pub cpu_type: Attr<String>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub flags: Attr<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryConfig {
    /// Dedicated memory in MiB.
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub dedicated: Attr<u64>,
    /// Balloon floor in MiB.
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub floating: Attr<u64>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub shares: Attr<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VgaConfig {
    #[serde(default, rename = "type", skip_serializing_if = "Attr::is_unset")]
    pub vga_type: Attr<String>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub memory: Attr<u32>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub clipboard: Attr<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RngConfig {
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub source: Attr<String>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub max_bytes: Attr<u32>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub period: Attr<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkSlot {
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub model: Attr<String>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub mac_address: Attr<String>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub bridge: Attr<String>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub firewall: Attr<bool>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub link_down: Attr<bool>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub mtu: Attr<u32>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub queues: Attr<u32>,
    /// MB/s.
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub rate_limit: Attr<f64>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub tag: Attr<u32>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub trunks: Attr<Vec<u32>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiskSlot {
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub file: Attr<String>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub datastore_id: Attr<String>,
    /// Capacity in GiB. Can only grow once the slot exists.
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub size_gb: Attr<u64>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub format: Attr<String>,
    /// Only used when the slot is created.
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub import_from: Attr<String>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub media: Attr<String>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub aio: Attr<String>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub cache: Attr<String>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub discard: Attr<String>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub serial: Attr<String>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub backup: Attr<bool>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub iothread: Attr<bool>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub replicate: Attr<bool>,
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub ssd: Attr<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CdromSlot {
    /// ISO volume (`local:iso/debian.iso`), `cdrom` for the host drive or
    /// `none` for an empty drive. `null` ejects the medium.
    #[serde(default, skip_serializing_if = "Attr::is_unset")]
    pub file_id: Attr<String>,
}
