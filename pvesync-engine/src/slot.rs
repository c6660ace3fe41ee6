//! Slot keys and slot tables.
//!
//! A slot key names one device position on a VM, e.g. `net0` or `scsi3`.
//! The bus prefix and the index range are fixed by the platform.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bus {
    Net,
    Ide,
    Sata,
    Scsi,
    Virtio,
}

impl Bus {
    /// Buses that carry storage devices.
    pub const DISK: [Bus; 4] = [Bus::Ide, Bus::Sata, Bus::Scsi, Bus::Virtio];
    pub const NETWORK: [Bus; 1] = [Bus::Net];
    /// Buses a CD-ROM drive can sit on.
    pub const CDROM: [Bus; 3] = [Bus::Ide, Bus::Sata, Bus::Scsi];

    pub fn prefix(self) -> &'static str {
        match self {
            Bus::Net => "net",
            Bus::Ide => "ide",
            Bus::Sata => "sata",
            Bus::Scsi => "scsi",
            Bus::Virtio => "virtio",
        }
    }

    /// Highest valid index on this bus.
    pub fn max_index(self) -> u32 {
        match self {
            Bus::Net => 31,
            Bus::Ide => 3,
            Bus::Sata => 5,
            Bus::Scsi => 30,
            Bus::Virtio => 15,
        }
    }

    fn describe(buses: &[Bus]) -> String {
        buses
            .iter()
            .map(|b| format!("{}0..{}{}", b.prefix(), b.prefix(), b.max_index()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    bus: Bus,
    index: u32,
}

impl SlotKey {
    pub fn new(bus: Bus, index: u32) -> Result<Self, ValidationError> {
        if index > bus.max_index() {
            return Err(ValidationError::SlotOutOfRange {
                key: format!("{}{}", bus.prefix(), index),
                max: bus.max_index(),
            });
        }
        Ok(Self { bus, index })
    }

    /// Parses `key` against the given buses.
    pub fn parse(key: &str, buses: &[Bus]) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidSlotKey {
            key: key.to_string(),
            expected: Bus::describe(buses),
        };

        for bus in buses {
            let Some(digits) = key.strip_prefix(bus.prefix()) else {
                continue;
            };
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            // Leading zeros would alias another key
            if digits.len() > 1 && digits.starts_with('0') {
                return Err(invalid());
            }
            let index: u32 = digits.parse().map_err(|_| invalid())?;
            return SlotKey::new(*bus, index);
        }

        Err(invalid())
    }

    /// Like [`SlotKey::parse`], but returns `None` for anything that is not
    /// a slot key. Used when scanning remote configuration, where keys such
    /// as `scsihw` share a bus prefix.
    pub fn recognize(key: &str, buses: &[Bus]) -> Option<Self> {
        Self::parse(key, buses).ok()
    }

    pub fn bus(&self) -> Bus {
        self.bus
    }

    pub fn index(&self) -> u32 {
        self.index
    }
}

impl fmt::Display for SlotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.bus.prefix(), self.index)
    }
}

impl FromStr for SlotKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let all = [Bus::Net, Bus::Ide, Bus::Sata, Bus::Scsi, Bus::Virtio];
        SlotKey::parse(s, &all)
    }
}

impl Serialize for SlotKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SlotKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A dense positional table over one bus, sized to the highest declared
/// index plus one. Undeclared positions are `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotTable<T> {
    slots: Vec<Option<T>>,
}

impl<T> Default for SlotTable<T> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<T> SlotTable<T> {
    pub fn from_entries(entries: impl IntoIterator<Item = (u32, T)>) -> Self {
        let mut table = Self::default();
        for (index, value) in entries {
            table.insert(index, value);
        }
        table
    }

    pub fn insert(&mut self, index: u32, value: T) {
        let index = index as usize;
        if self.slots.len() <= index {
            self.slots.resize_with(index + 1, || None);
        }
        self.slots[index] = Some(value);
    }

    pub fn get(&self, index: u32) -> Option<&T> {
        self.slots.get(index as usize).and_then(Option::as_ref)
    }

    /// Positions covered, declared or not.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Declared positions in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|v| (i as u32, v)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_keys() {
        let key = SlotKey::parse("net3", &Bus::NETWORK).unwrap();
        assert_eq!(key.bus(), Bus::Net);
        assert_eq!(key.index(), 3);

        let key = SlotKey::parse("virtio15", &Bus::DISK).unwrap();
        assert_eq!(key.to_string(), "virtio15");
    }

    #[test]
    fn test_parse_rejects_wrong_bus() {
        let err = SlotKey::parse("net0", &Bus::DISK).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidSlotKey { .. }));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for key in ["net", "netx", "net-1", "net01", "scsihw", "", "sata 1"] {
            assert!(
                SlotKey::parse(key, &[Bus::Net, Bus::Scsi, Bus::Sata]).is_err(),
                "{key} should be rejected"
            );
        }
    }

    #[test]
    fn test_parse_out_of_range() {
        let err = SlotKey::parse("ide4", &Bus::DISK).unwrap_err();
        assert_eq!(
            err,
            ValidationError::SlotOutOfRange {
                key: "ide4".to_string(),
                max: 3
            }
        );
        assert!(SlotKey::parse("scsi30", &Bus::DISK).is_ok());
        assert!(SlotKey::parse("scsi31", &Bus::DISK).is_err());
    }

    #[test]
    fn test_recognize_skips_non_slots() {
        assert!(SlotKey::recognize("scsihw", &Bus::DISK).is_none());
        assert!(SlotKey::recognize("unused0", &Bus::DISK).is_none());
        assert!(SlotKey::recognize("sata2", &Bus::DISK).is_some());
    }

    #[test]
    fn test_table_is_dense_and_sparse_aware() {
        let table = SlotTable::from_entries([(2, "c"), (0, "a")]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(1), None);
        assert_eq!(table.get(9), None);
        let declared: Vec<_> = table.iter().collect();
        assert_eq!(declared, vec![(0, &"a"), (2, &"c")]);
    }
}
