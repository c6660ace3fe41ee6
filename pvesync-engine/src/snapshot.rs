//! Decoded view of a VM's remote configuration.

use std::collections::{BTreeMap, BTreeSet};

use crate::device::{CpuEmulation, NetworkDevice, RngDevice, StorageDevice, VgaDevice};
use crate::error::EngineError;
use crate::slot::{Bus, SlotKey, SlotTable};

/// Splits a tag list on any of the separators the platform accepts.
pub fn parse_tags(s: &str) -> BTreeSet<String> {
    s.split([';', ',', ' '])
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn encode_tags(tags: &BTreeSet<String>) -> String {
    tags.iter().map(String::as_str).collect::<Vec<_>>().join(";")
}

/// The authoritative remote configuration of one VM, as of one fetch.
///
/// Built from the flat field map the platform returns. Device fields are
/// decoded up front; everything else stays available as raw strings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteSnapshot {
    fields: BTreeMap<String, String>,
    networks: SlotTable<NetworkDevice>,
    disks: BTreeMap<SlotKey, StorageDevice>,
}

impl RemoteSnapshot {
    pub fn from_fields(fields: BTreeMap<String, String>) -> Result<Self, EngineError> {
        let mut networks = SlotTable::default();
        let mut disks = BTreeMap::new();

        for (key, value) in &fields {
            let decode_err = |source| EngineError::Decode {
                field: key.clone(),
                source,
            };
            if let Some(slot) = SlotKey::recognize(key, &Bus::NETWORK) {
                networks.insert(slot.index(), NetworkDevice::decode(value).map_err(decode_err)?);
            } else if let Some(slot) = SlotKey::recognize(key, &Bus::DISK) {
                disks.insert(slot, StorageDevice::decode(value).map_err(decode_err)?);
            }
        }

        Ok(Self {
            fields,
            networks,
            disks,
        })
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    /// Parses a numeric or boolean scalar field.
    pub fn parse_field<T: std::str::FromStr>(&self, name: &str) -> Result<Option<T>, EngineError> {
        self.field(name)
            .map(|raw| {
                raw.parse().map_err(|_| EngineError::Decode {
                    field: name.to_string(),
                    source: crate::error::CodecError::InvalidProperty {
                        key: name.to_string(),
                        value: raw.to_string(),
                    },
                })
            })
            .transpose()
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        self.field(name).map(|v| v == "1")
    }

    pub fn tags(&self) -> Option<BTreeSet<String>> {
        self.field("tags")
            .map(parse_tags)
            .filter(|tags| !tags.is_empty())
    }

    pub fn cpu_emulation(&self) -> Result<Option<CpuEmulation>, EngineError> {
        self.decode_unit("cpu", CpuEmulation::decode)
    }

    pub fn vga(&self) -> Result<Option<VgaDevice>, EngineError> {
        self.decode_unit("vga", VgaDevice::decode)
    }

    pub fn rng(&self) -> Result<Option<RngDevice>, EngineError> {
        self.decode_unit("rng0", RngDevice::decode)
    }

    fn decode_unit<T>(
        &self,
        name: &str,
        decode: impl Fn(&str) -> Result<T, crate::error::CodecError>,
    ) -> Result<Option<T>, EngineError> {
        self.field(name)
            .map(|raw| {
                decode(raw).map_err(|source| EngineError::Decode {
                    field: name.to_string(),
                    source,
                })
            })
            .transpose()
    }

    pub fn network(&self, index: u32) -> Option<&NetworkDevice> {
        self.networks.get(index)
    }

    pub fn networks(&self) -> impl Iterator<Item = (u32, &NetworkDevice)> {
        self.networks.iter()
    }

    pub fn disk(&self, slot: &SlotKey) -> Option<&StorageDevice> {
        self.disks.get(slot)
    }

    pub fn disks(&self) -> impl Iterator<Item = (&SlotKey, &StorageDevice)> {
        self.disks.iter()
    }

    /// Platform checksum of the configuration, when reported.
    pub fn digest(&self) -> Option<&str> {
        self.field("digest")
    }
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

    #[test]
    fn test_decodes_devices() {
        let snap = snapshot(&[
            ("net0", "virtio=BC:24:11:00:00:01,bridge=vmbr0"),
            ("net2", "e1000=BC:24:11:00:00:02,bridge=vmbr1"),
            ("scsi0", "local-lvm:vm-100-disk-0,size=8G"),
            ("scsihw", "virtio-scsi-pci"),
            ("unused0", "local-lvm:vm-100-disk-9"),
            ("cores", "2"),
        ]);

        assert_eq!(snap.network(0).unwrap().bridge.as_deref(), Some("vmbr0"));
        assert!(snap.network(1).is_none());
        assert_eq!(snap.networks().count(), 2);
        assert_eq!(snap.disks().count(), 1);
        assert_eq!(snap.parse_field::<u32>("cores").unwrap(), Some(2));
    }

    #[test]
    fn test_bad_device_names_field() {
        let fields = [("net0".to_string(), "bridge=vmbr0".to_string())].into();
        let err = RemoteSnapshot::from_fields(fields).unwrap_err();
        assert!(matches!(err, EngineError::Decode { ref field, .. } if field == "net0"));
    }

    #[test]
    fn test_tags() {
        let snap = snapshot(&[("tags", "web;prod,eu")]);
        let tags = snap.tags().unwrap();
        assert_eq!(encode_tags(&tags), "eu;prod;web");
        assert!(snapshot(&[("tags", "")]).tags().is_none());
    }
}
