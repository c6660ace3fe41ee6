//! Per-slot reconciliation of the network and disk collections.
//!
//! Only declared slots are ever emitted. A declared slot that exists
//! remotely is merged onto the remote device; one that does not is created
//! from its declared sub-fields.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::attr::Attr;
use crate::batch::{GrowthDelta, MutationBatch};
use crate::device::{NetworkDevice, StorageDevice};
use crate::error::ValidationError;
use crate::merge::{apply, initial};
use crate::model::{CdromSlot, DiskSlot, NetworkSlot};
use crate::size::DiskSize;
use crate::slot::{Bus, SlotKey, SlotTable};
use crate::snapshot::RemoteSnapshot;

const DEFAULT_NIC_MODEL: &str = "virtio";
/// Medium of a new drive that declares none: the host's optical drive.
const DEFAULT_CDROM_MEDIUM: &str = "cdrom";
const EJECTED_MEDIUM: &str = "none";

/// Parses every declared key before anything else looks at the collection.
pub fn parse_keys<'a, T>(
    declared: &'a BTreeMap<String, T>,
    buses: &[Bus],
) -> Result<Vec<(SlotKey, &'a T)>, ValidationError> {
    declared
        .iter()
        .map(|(key, slot)| SlotKey::parse(key, buses).map(|k| (k, slot)))
        .collect()
}

// Network

pub fn plan_network(
    declared: &BTreeMap<String, NetworkSlot>,
    snapshot: &RemoteSnapshot,
    batch: &mut MutationBatch,
) -> Result<(), ValidationError> {
    let keys = parse_keys(declared, &Bus::NETWORK)?;
    let table = SlotTable::from_entries(keys.into_iter().map(|(k, slot)| (k.index(), slot)));
    debug!(positions = table.len(), "network slot table");

    for (index, slot) in table.iter() {
        let key = SlotKey::new(Bus::Net, index)?;
        match snapshot.network(index) {
            Some(remote) => {
                let merged = merge_network(&key, slot, remote)?;
                if merged != *remote {
                    debug!(slot = %key, "update network device");
                    batch.set(key.to_string(), merged.encode())?;
                }
            }
            None => {
                debug!(slot = %key, "create network device");
                batch.set(key.to_string(), new_network(&key, slot)?.encode())?;
            }
        }
    }
    Ok(())
}

fn required_model(key: &SlotKey, slot: &NetworkSlot) -> Result<(), ValidationError> {
    if matches!(slot.model, Attr::Empty) {
        return Err(ValidationError::RequiredField {
            scope: key.to_string(),
            field: "model",
        });
    }
    Ok(())
}

fn overlay_network(slot: &NetworkSlot, dev: &mut NetworkDevice) {
    apply(&slot.mac_address, &mut dev.mac_address);
    apply(&slot.bridge, &mut dev.bridge);
    apply(&slot.firewall, &mut dev.firewall);
    apply(&slot.link_down, &mut dev.link_down);
    apply(&slot.mtu, &mut dev.mtu);
    apply(&slot.queues, &mut dev.queues);
    apply(&slot.rate_limit, &mut dev.rate_limit);
    apply(&slot.tag, &mut dev.tag);
    apply(&slot.trunks, &mut dev.trunks);
}

fn merge_network(
    key: &SlotKey,
    slot: &NetworkSlot,
    remote: &NetworkDevice,
) -> Result<NetworkDevice, ValidationError> {
    required_model(key, slot)?;
    let mut dev = remote.clone();
    if let Some(model) = slot.model.value() {
        dev.model.clone_from(model);
    }
    overlay_network(slot, &mut dev);
    Ok(dev)
}

fn new_network(key: &SlotKey, slot: &NetworkSlot) -> Result<NetworkDevice, ValidationError> {
    required_model(key, slot)?;
    let mut dev = NetworkDevice {
        model: initial(&slot.model).unwrap_or_else(|| DEFAULT_NIC_MODEL.to_string()),
        ..Default::default()
    };
    overlay_network(slot, &mut dev);
    Ok(dev)
}

pub fn read_networks(declared: &mut BTreeMap<String, NetworkSlot>, snapshot: &RemoteSnapshot) {
    for (key, slot) in declared.iter_mut() {
        let Some(remote) = SlotKey::recognize(key, &Bus::NETWORK)
            .and_then(|k| snapshot.network(k.index()))
        else {
            warn!(slot = %key, "declared network slot not present remotely");
            continue;
        };
        slot.model.refresh(Some(remote.model.clone()));
        slot.mac_address.refresh(remote.mac_address.clone());
        slot.bridge.refresh(remote.bridge.clone());
        slot.firewall.refresh(remote.firewall);
        slot.link_down.refresh(remote.link_down);
        slot.mtu.refresh(remote.mtu);
        slot.queues.refresh(remote.queues);
        slot.rate_limit.refresh(remote.rate_limit);
        slot.tag.refresh(remote.tag);
        slot.trunks.refresh(remote.trunks.clone());
    }
}

pub fn import_networks(snapshot: &RemoteSnapshot) -> BTreeMap<String, NetworkSlot> {
    snapshot
        .networks()
        .map(|(index, dev)| {
            let slot = NetworkSlot {
                model: Attr::Value(dev.model.clone()),
                mac_address: Attr::from_import(dev.mac_address.clone()),
                bridge: Attr::from_import(dev.bridge.clone()),
                firewall: Attr::from_import(dev.firewall),
                link_down: Attr::from_import(dev.link_down),
                mtu: Attr::from_import(dev.mtu),
                queues: Attr::from_import(dev.queues),
                rate_limit: Attr::from_import(dev.rate_limit),
                tag: Attr::from_import(dev.tag),
                trunks: Attr::from_import(dev.trunks.clone()),
            };
            (format!("{}{}", Bus::Net.prefix(), index), slot)
        })
        .collect()
}

// Disks

pub fn plan_disks(
    declared: &BTreeMap<String, DiskSlot>,
    snapshot: &RemoteSnapshot,
    batch: &mut MutationBatch,
) -> Result<(), ValidationError> {
    let mut keys = parse_keys(declared, &Bus::DISK)?;
    keys.sort_by_key(|(k, _)| *k);

    for (key, slot) in keys {
        match snapshot.disk(&key) {
            Some(remote) => plan_existing_disk(&key, slot, remote, batch)?,
            None => {
                debug!(slot = %key, "create disk");
                batch.set(key.to_string(), new_disk(&key, slot)?.encode())?;
            }
        }
    }
    Ok(())
}

fn immutable(
    key: &SlotKey,
    field: &'static str,
    declared: &Attr<String>,
    current: Option<&str>,
) -> Result<(), ValidationError> {
    match declared {
        Attr::Value(v) if current != Some(v.as_str()) => Err(ValidationError::ImmutableField {
            slot: key.to_string(),
            field,
            current: current.unwrap_or_default().to_string(),
            requested: v.clone(),
        }),
        Attr::Empty if current.is_some() => Err(ValidationError::ImmutableField {
            slot: key.to_string(),
            field,
            current: current.unwrap_or_default().to_string(),
            requested: String::new(),
        }),
        _ => Ok(()),
    }
}

fn capacity(gb: u64) -> Result<DiskSize, ValidationError> {
    DiskSize::from_gigabytes(gb).ok_or_else(|| ValidationError::InvalidValue {
        field: "size_gb".to_string(),
        reason: format!("{gb} GiB exceeds the largest representable capacity"),
    })
}

fn plan_existing_disk(
    key: &SlotKey,
    slot: &DiskSlot,
    remote: &StorageDevice,
    batch: &mut MutationBatch,
) -> Result<(), ValidationError> {
    immutable(key, "file", &slot.file, Some(remote.file.as_str()))?;
    immutable(key, "datastore_id", &slot.datastore_id, remote.datastore_id())?;
    if remote.format.is_some() {
        immutable(key, "format", &slot.format, remote.format.as_deref())?;
    }

    match &slot.size_gb {
        Attr::Unset => {}
        Attr::Empty => {
            return Err(ValidationError::RequiredField {
                scope: key.to_string(),
                field: "size_gb",
            });
        }
        Attr::Value(requested) => {
            let current = remote
                .size
                .ok_or(ValidationError::UnknownCapacity { slot: *key })?;
            let current_gb = current.in_gigabytes();
            match requested.cmp(&current_gb) {
                Ordering::Equal => {}
                Ordering::Greater => {
                    debug!(slot = %key, from = current_gb, to = requested, "grow disk");
                    batch.grow(GrowthDelta {
                        slot: *key,
                        new_size: capacity(*requested)?,
                    });
                }
                Ordering::Less => {
                    return Err(ValidationError::ShrinkRejected {
                        slot: *key,
                        current_gb,
                        requested_gb: *requested,
                    });
                }
            }
        }
    }

    let mut merged = remote.clone();
    apply(&slot.media, &mut merged.media);
    apply(&slot.aio, &mut merged.aio);
    apply(&slot.cache, &mut merged.cache);
    apply(&slot.discard, &mut merged.discard);
    apply(&slot.serial, &mut merged.serial);
    apply(&slot.backup, &mut merged.backup);
    apply(&slot.iothread, &mut merged.iothread);
    apply(&slot.replicate, &mut merged.replicate);
    apply(&slot.ssd, &mut merged.ssd);

    if merged != *remote {
        // Capacity only ever changes through a growth call
        merged.size = None;
        debug!(slot = %key, "update disk options");
        batch.set(key.to_string(), merged.encode())?;
    }
    Ok(())
}

fn new_disk(key: &SlotKey, slot: &DiskSlot) -> Result<StorageDevice, ValidationError> {
    let size_gb = slot.size_gb.value().copied();
    let (file, size) = match (slot.file.value(), slot.datastore_id.value(), size_gb) {
        (Some(file), _, size) => (file.clone(), size.map(capacity).transpose()?),
        (None, Some(ds), Some(size)) if size > 0 => (format!("{ds}:{size}"), None),
        (None, Some(_), _) => {
            return Err(ValidationError::MissingDiskSource {
                slot: *key,
                reason: "a new disk needs a positive size_gb".to_string(),
            });
        }
        (None, None, _) => {
            return Err(ValidationError::MissingDiskSource {
                slot: *key,
                reason: "a new disk needs either file or datastore_id".to_string(),
            });
        }
    };

    Ok(StorageDevice {
        file,
        size,
        format: initial(&slot.format),
        import_from: initial(&slot.import_from),
        media: initial(&slot.media),
        aio: initial(&slot.aio),
        cache: initial(&slot.cache),
        discard: initial(&slot.discard),
        serial: initial(&slot.serial),
        backup: initial(&slot.backup),
        iothread: initial(&slot.iothread),
        replicate: initial(&slot.replicate),
        ssd: initial(&slot.ssd),
        extra: Vec::new(),
    })
}

pub fn read_disks(declared: &mut BTreeMap<String, DiskSlot>, snapshot: &RemoteSnapshot) {
    for (key, slot) in declared.iter_mut() {
        let Some(remote) = SlotKey::recognize(key, &Bus::DISK).and_then(|k| snapshot.disk(&k))
        else {
            warn!(slot = %key, "declared disk slot not present remotely");
            continue;
        };
        slot.file.refresh(Some(remote.file.clone()));
        slot.datastore_id.refresh(remote.datastore_id().map(str::to_string));
        slot.size_gb.refresh(remote.size.map(DiskSize::in_gigabytes));
        slot.format.refresh(remote.format.clone());
        slot.media.refresh(remote.media.clone());
        slot.aio.refresh(remote.aio.clone());
        slot.cache.refresh(remote.cache.clone());
        slot.discard.refresh(remote.discard.clone());
        slot.serial.refresh(remote.serial.clone());
        slot.backup.refresh(remote.backup);
        slot.iothread.refresh(remote.iothread);
        slot.replicate.refresh(remote.replicate);
        slot.ssd.refresh(remote.ssd);
        // The platform does not report import sources back
    }
}

pub fn import_disks(snapshot: &RemoteSnapshot) -> BTreeMap<String, DiskSlot> {
    snapshot
        .disks()
        .filter(|(_, dev)| !dev.is_cdrom())
        .map(|(key, dev)| {
            let slot = DiskSlot {
                file: Attr::Value(dev.file.clone()),
                datastore_id: Attr::from_import(dev.datastore_id().map(str::to_string)),
                size_gb: Attr::from_import(dev.size.map(DiskSize::in_gigabytes)),
                format: Attr::from_import(dev.format.clone()),
                import_from: Attr::Unset,
                media: Attr::from_import(dev.media.clone()),
                aio: Attr::from_import(dev.aio.clone()),
                cache: Attr::from_import(dev.cache.clone()),
                discard: Attr::from_import(dev.discard.clone()),
                serial: Attr::from_import(dev.serial.clone()),
                backup: Attr::from_import(dev.backup),
                iothread: Attr::from_import(dev.iothread),
                replicate: Attr::from_import(dev.replicate),
                ssd: Attr::from_import(dev.ssd),
            };
            (key.to_string(), slot)
        })
        .collect()
}

// CD-ROM drives
//
// The drive itself is a storage device with `media=cdrom`. Only the medium
// is reconciled, and unlike a disk volume it can be swapped or ejected.

fn declared_medium(slot: &CdromSlot) -> Option<&str> {
    match &slot.file_id {
        Attr::Unset => None,
        Attr::Empty => Some(EJECTED_MEDIUM),
        Attr::Value(file) => Some(file),
    }
}

fn cdrom_drive(file: &str) -> StorageDevice {
    StorageDevice {
        file: file.to_string(),
        media: Some("cdrom".to_string()),
        ..Default::default()
    }
}

pub fn plan_cdroms(
    declared: &BTreeMap<String, CdromSlot>,
    snapshot: &RemoteSnapshot,
    batch: &mut MutationBatch,
) -> Result<(), ValidationError> {
    let mut keys = parse_keys(declared, &Bus::CDROM)?;
    keys.sort_by_key(|(k, _)| *k);

    for (key, slot) in keys {
        match snapshot.disk(&key) {
            Some(remote) if !remote.is_cdrom() => {
                return Err(ValidationError::ImmutableField {
                    slot: key.to_string(),
                    field: "media",
                    current: remote.media.clone().unwrap_or_else(|| "disk".to_string()),
                    requested: "cdrom".to_string(),
                });
            }
            Some(remote) => {
                let Some(medium) = declared_medium(slot) else {
                    continue;
                };
                if remote.file != medium {
                    debug!(slot = %key, from = %remote.file, to = medium, "change medium");
                    let drive = StorageDevice {
                        file: medium.to_string(),
                        size: None,
                        format: None,
                        ..remote.clone()
                    };
                    batch.set(key.to_string(), drive.encode())?;
                }
            }
            None => {
                let medium = declared_medium(slot).unwrap_or(DEFAULT_CDROM_MEDIUM);
                debug!(slot = %key, medium, "create cd-rom drive");
                batch.set(key.to_string(), cdrom_drive(medium).encode())?;
            }
        }
    }
    Ok(())
}

pub fn read_cdroms(declared: &mut BTreeMap<String, CdromSlot>, snapshot: &RemoteSnapshot) {
    for (key, slot) in declared.iter_mut() {
        let Some(remote) = SlotKey::recognize(key, &Bus::CDROM)
            .and_then(|k| snapshot.disk(&k))
            .filter(|dev| dev.is_cdrom())
        else {
            warn!(slot = %key, "declared cd-rom drive not present remotely");
            continue;
        };
        slot.file_id.refresh(Some(remote.file.clone()));
    }
}

pub fn import_cdroms(snapshot: &RemoteSnapshot) -> BTreeMap<String, CdromSlot> {
    snapshot
        .disks()
        .filter(|(_, dev)| dev.is_cdrom())
        .map(|(key, dev)| {
            let slot = CdromSlot {
                file_id: Attr::Value(dev.file.clone()),
            };
            (key.to_string(), slot)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(pairs: &[(&str, &str)]) -> RemoteSnapshot {
        let fields = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RemoteSnapshot::from_fields(fields).unwrap()
    }

    fn net(bridge: &str) -> NetworkSlot {
        NetworkSlot {
            bridge: Attr::Value(bridge.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_network_sparsity() {
        let snap = snapshot(&[
            ("net0", "virtio=BC:24:11:00:00:00,bridge=vmbr9"),
            ("net1", "virtio=BC:24:11:00:00:01,bridge=vmbr9"),
            ("net2", "virtio=BC:24:11:00:00:02,bridge=vmbr9"),
            ("net3", "virtio=BC:24:11:00:00:03,bridge=vmbr9"),
        ]);
        let declared = BTreeMap::from([
            ("net0".to_string(), net("vmbr0")),
            ("net3".to_string(), net("vmbr3")),
        ]);

        let mut batch = MutationBatch::new();
        plan_network(&declared, &snap, &mut batch).unwrap();

        let touched: Vec<_> = batch.sets().keys().cloned().collect();
        assert_eq!(touched, vec!["net0".to_string(), "net3".to_string()]);
        assert_eq!(
            batch.sets()["net3"],
            "virtio=BC:24:11:00:00:03,bridge=vmbr3"
        );
    }

    #[test]
    fn test_network_unchanged_slot_emits_nothing() {
        let snap = snapshot(&[("net0", "virtio=BC:24:11:00:00:00,bridge=vmbr0,firewall=1")]);
        let declared = BTreeMap::from([("net0".to_string(), net("vmbr0"))]);
        let mut batch = MutationBatch::new();
        plan_network(&declared, &snap, &mut batch).unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn test_network_new_slot_defaults_model() {
        let declared = BTreeMap::from([("net1".to_string(), net("vmbr1"))]);
        let mut batch = MutationBatch::new();
        plan_network(&declared, &snapshot(&[]), &mut batch).unwrap();
        assert_eq!(batch.sets()["net1"], "model=virtio,bridge=vmbr1");
    }

    #[test]
    fn test_network_rejects_bad_key() {
        let declared = BTreeMap::from([("eth0".to_string(), net("vmbr1"))]);
        let err = plan_network(&declared, &snapshot(&[]), &mut MutationBatch::new()).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidSlotKey { ref key, .. } if key == "eth0"));
    }

    fn disk(size_gb: u64) -> DiskSlot {
        DiskSlot {
            datastore_id: Attr::Value("local-lvm".to_string()),
            size_gb: Attr::Value(size_gb),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_disk_from_datastore() {
        let declared = BTreeMap::from([("scsi0".to_string(), disk(16))]);
        let mut batch = MutationBatch::new();
        plan_disks(&declared, &snapshot(&[]), &mut batch).unwrap();
        assert_eq!(batch.sets()["scsi0"], "local-lvm:16");
        assert!(batch.growth().is_empty());
    }

    #[test]
    fn test_new_disk_without_source() {
        let declared = BTreeMap::from([(
            "virtio1".to_string(),
            DiskSlot {
                size_gb: Attr::Value(8),
                ..Default::default()
            },
        )]);
        let err = plan_disks(&declared, &snapshot(&[]), &mut MutationBatch::new()).unwrap_err();
        assert!(matches!(err, ValidationError::MissingDiskSource { .. }));
    }

    #[test]
    fn test_new_disk_zero_size_rejected() {
        let declared = BTreeMap::from([("scsi0".to_string(), disk(0))]);
        assert!(plan_disks(&declared, &snapshot(&[]), &mut MutationBatch::new()).is_err());
    }

    #[test]
    fn test_existing_disk_growth() {
        let snap = snapshot(&[("scsi0", "local-lvm:vm-100-disk-0,size=16G")]);
        let declared = BTreeMap::from([("scsi0".to_string(), disk(32))]);
        let mut batch = MutationBatch::new();
        plan_disks(&declared, &snap, &mut batch).unwrap();
        assert!(batch.is_update_empty());
        assert_eq!(
            batch.growth(),
            [GrowthDelta {
                slot: SlotKey::new(Bus::Scsi, 0).unwrap(),
                new_size: DiskSize::from_gigabytes(32).unwrap(),
            }]
        );
    }

    #[test]
    fn test_existing_disk_shrink() {
        let snap = snapshot(&[("scsi0", "local-lvm:vm-100-disk-0,size=32G")]);
        let declared = BTreeMap::from([("scsi0".to_string(), disk(16))]);
        let err = plan_disks(&declared, &snap, &mut MutationBatch::new()).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::ShrinkRejected {
                current_gb: 32,
                requested_gb: 16,
                ..
            }
        ));
    }

    #[test]
    fn test_existing_disk_oversized_growth() {
        let snap = snapshot(&[("scsi0", "local-lvm:vm-100-disk-0,size=16G")]);
        let declared = BTreeMap::from([("scsi0".to_string(), disk(20_000_000_000))]);
        let mut batch = MutationBatch::new();
        let err = plan_disks(&declared, &snap, &mut batch).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidValue { ref field, .. } if field == "size_gb"));
        assert!(batch.growth().is_empty());
    }

    #[test]
    fn test_new_disk_from_file_oversized() {
        let declared = BTreeMap::from([(
            "scsi1".to_string(),
            DiskSlot {
                file: Attr::Value("local:iso/data.img".to_string()),
                size_gb: Attr::Value(u64::MAX),
                ..Default::default()
            },
        )]);
        let err = plan_disks(&declared, &snapshot(&[]), &mut MutationBatch::new()).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidValue { ref field, .. } if field == "size_gb"));
    }

    #[test]
    fn test_existing_disk_option_update_omits_size() {
        let snap = snapshot(&[("scsi0", "local-lvm:vm-100-disk-0,size=32G")]);
        let mut slot = disk(64);
        slot.discard = Attr::Value("on".to_string());
        let declared = BTreeMap::from([("scsi0".to_string(), slot)]);
        let mut batch = MutationBatch::new();
        plan_disks(&declared, &snap, &mut batch).unwrap();
        assert_eq!(batch.sets()["scsi0"], "local-lvm:vm-100-disk-0,discard=on");
        assert_eq!(batch.growth().len(), 1);
    }

    #[test]
    fn test_existing_disk_immutable_datastore() {
        let snap = snapshot(&[("scsi0", "local-lvm:vm-100-disk-0,size=32G")]);
        let mut slot = disk(32);
        slot.datastore_id = Attr::Value("ceph".to_string());
        let declared = BTreeMap::from([("scsi0".to_string(), slot)]);
        let err = plan_disks(&declared, &snap, &mut MutationBatch::new()).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::ImmutableField {
                field: "datastore_id",
                ..
            }
        ));
    }

    #[test]
    fn test_read_disks_maps_datastore_and_size() {
        let snap = snapshot(&[("scsi0", "local-lvm:vm-100-disk-0,size=32G")]);
        let mut declared = BTreeMap::from([("scsi0".to_string(), disk(16))]);
        read_disks(&mut declared, &snap);
        let slot = &declared["scsi0"];
        assert_eq!(slot.size_gb, Attr::Value(32));
        assert_eq!(slot.datastore_id, Attr::Value("local-lvm".to_string()));
        assert_eq!(slot.file, Attr::Unset);
    }

    fn medium(file_id: Attr<String>) -> BTreeMap<String, CdromSlot> {
        BTreeMap::from([("ide2".to_string(), CdromSlot { file_id })])
    }

    #[test]
    fn test_cdrom_swap_medium() {
        let snap = snapshot(&[("ide2", "local:iso/debian-12.iso,media=cdrom,size=628M")]);
        let declared = medium(Attr::Value("local:iso/debian-13.iso".to_string()));
        let mut batch = MutationBatch::new();
        plan_cdroms(&declared, &snap, &mut batch).unwrap();
        assert_eq!(batch.sets()["ide2"], "local:iso/debian-13.iso,media=cdrom");
        assert!(batch.growth().is_empty());
    }

    #[test]
    fn test_cdrom_eject_and_unchanged() {
        let snap = snapshot(&[("ide2", "local:iso/debian-12.iso,media=cdrom")]);
        let mut batch = MutationBatch::new();
        plan_cdroms(&medium(Attr::Empty), &snap, &mut batch).unwrap();
        assert_eq!(batch.sets()["ide2"], "none,media=cdrom");
        assert!(batch.clears().is_empty());

        let ejected = snapshot(&[("ide2", "none,media=cdrom")]);
        let mut batch = MutationBatch::new();
        plan_cdroms(&medium(Attr::Empty), &ejected, &mut batch).unwrap();
        plan_cdroms(&medium(Attr::Unset), &ejected, &mut batch).unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn test_cdrom_new_drive_defaults_to_host_drive() {
        let mut batch = MutationBatch::new();
        plan_cdroms(&medium(Attr::Unset), &snapshot(&[]), &mut batch).unwrap();
        assert_eq!(batch.sets()["ide2"], "cdrom,media=cdrom");
    }

    #[test]
    fn test_cdrom_over_disk_rejected() {
        let snap = snapshot(&[("ide2", "local-lvm:vm-100-disk-1,size=8G")]);
        let err = plan_cdroms(&medium(Attr::Value("none".to_string())), &snap, &mut MutationBatch::new())
            .unwrap_err();
        assert!(matches!(err, ValidationError::ImmutableField { field: "media", .. }));
    }

    #[test]
    fn test_cdrom_rejects_virtio() {
        let declared = BTreeMap::from([("virtio0".to_string(), CdromSlot::default())]);
        let err = plan_cdroms(&declared, &snapshot(&[]), &mut MutationBatch::new()).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidSlotKey { .. }));
    }

    #[test]
    fn test_cdrom_import_and_read() {
        let snap = snapshot(&[
            ("ide2", "local:iso/debian-12.iso,media=cdrom"),
            ("scsi0", "local-lvm:vm-100-disk-0,size=32G"),
        ]);
        let imported = import_cdroms(&snap);
        assert_eq!(imported.keys().collect::<Vec<_>>(), ["ide2"]);
        assert_eq!(
            imported["ide2"].file_id,
            Attr::Value("local:iso/debian-12.iso".to_string())
        );
        assert!(!import_disks(&snap).contains_key("ide2"));

        let mut declared = medium(Attr::Empty);
        read_cdroms(&mut declared, &snap);
        assert_eq!(
            declared["ide2"].file_id,
            Attr::Value("local:iso/debian-12.iso".to_string())
        );
    }
}
