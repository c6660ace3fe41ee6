//! Explicit slot deletions.
//!
//! Deletions are supplied on every pass and always produce clear directives,
//! whether or not the slot still exists remotely. Clearing an absent slot is
//! a no-op on the platform side.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::batch::MutationBatch;
use crate::error::ValidationError;
use crate::slot::{Bus, SlotKey};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeletionRequest {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disk: Vec<String>,
}

impl DeletionRequest {
    pub fn is_empty(&self) -> bool {
        self.network.is_empty() && self.disk.is_empty()
    }

    /// Parses both lists in order, skipping blank entries.
    pub fn slots(&self) -> Result<Vec<SlotKey>, ValidationError> {
        let net_buses: &'static [Bus] = &Bus::NETWORK;
        let disk_buses: &'static [Bus] = &Bus::DISK;
        let network = self.network.iter().map(|e| (e, net_buses));
        let disk = self.disk.iter().map(|e| (e, disk_buses));
        network
            .chain(disk)
            .filter(|(entry, _)| !entry.trim().is_empty())
            .map(|(entry, buses)| SlotKey::parse(entry.trim(), buses))
            .collect()
    }

    /// Rejects deletions of slots the same document still declares.
    pub fn check_against<N, D, C>(
        &self,
        network: &BTreeMap<String, N>,
        disk: &BTreeMap<String, D>,
        cdrom: &BTreeMap<String, C>,
    ) -> Result<(), ValidationError> {
        for slot in self.slots()? {
            let name = slot.to_string();
            let declared = network.contains_key(&name)
                || disk.contains_key(&name)
                || cdrom.contains_key(&name);
            if declared {
                return Err(ValidationError::ConflictingDirective { field: name });
            }
        }
        Ok(())
    }
}

/// Appends one clear directive per requested slot.
pub fn apply_deletions(
    request: &DeletionRequest,
    batch: &mut MutationBatch,
) -> Result<usize, ValidationError> {
    let slots = request.slots()?;
    for slot in &slots {
        debug!(%slot, "delete slot");
        batch.clear(slot.to_string())?;
    }
    Ok(slots.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_entry_becomes_a_clear() {
        let request = DeletionRequest {
            network: vec!["net1".to_string(), " ".to_string()],
            disk: vec!["sata2".to_string()],
        };
        let mut batch = MutationBatch::new();
        assert_eq!(apply_deletions(&request, &mut batch).unwrap(), 2);
        assert_eq!(batch.clears(), ["net1".to_string(), "sata2".to_string()]);
    }

    #[test]
    fn test_entries_are_validated_per_family() {
        let request = DeletionRequest {
            network: vec!["scsi0".to_string()],
            disk: vec![],
        };
        assert!(apply_deletions(&request, &mut MutationBatch::new()).is_err());
    }

    #[test]
    fn test_conflict_with_declared_slot() {
        let request = DeletionRequest {
            network: vec!["net0".to_string()],
            disk: vec![],
        };
        let network = BTreeMap::from([("net0".to_string(), ())]);
        let none = BTreeMap::<String, ()>::new();
        let err = request.check_against(&network, &none, &none).unwrap_err();
        assert_eq!(
            err,
            ValidationError::ConflictingDirective {
                field: "net0".to_string()
            }
        );
    }

    #[test]
    fn test_conflict_with_declared_cdrom_drive() {
        let request = DeletionRequest {
            network: vec![],
            disk: vec!["ide2".to_string()],
        };
        let none = BTreeMap::<String, ()>::new();
        let cdrom = BTreeMap::from([("ide2".to_string(), ())]);
        assert!(request.check_against(&none, &none, &cdrom).is_err());
        assert!(request.check_against(&none, &none, &none).is_ok());
    }
}
