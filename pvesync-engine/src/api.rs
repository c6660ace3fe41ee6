//! Collaborator traits for the platform API.
//!
//! The engine never talks HTTP itself. It drives these traits, which the
//! REST client implements and tests replace with in-memory fakes.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ValidationError;
use crate::size::DiskSize;
use crate::slot::SlotKey;

/// Errors reported by a platform collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("resource does not exist")]
    NotFound,

    #[error("HTTP {code}: {message}")]
    Status { code: u16, message: String },

    #[error("task {upid} failed: {exit_status}")]
    TaskFailed { upid: String, exit_status: String },

    #[error("transport: {0}")]
    Transport(String),

    #[error("decode: {0}")]
    Decode(String),
}

/// Identifies one VM on one node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VmRef {
    pub node: String,
    pub vmid: u32,
}

impl VmRef {
    pub fn new(node: impl Into<String>, vmid: u32) -> Self {
        Self {
            node: node.into(),
            vmid,
        }
    }
}

impl fmt::Display for VmRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node, self.vmid)
    }
}

/// Parses the `<node>/<vmid>` form used for import.
impl FromStr for VmRef {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ValidationError::InvalidValue {
            field: "import id".to_string(),
            reason: format!("{s:?}: {reason}"),
        };
        let (node, vmid) = s
            .split_once('/')
            .ok_or_else(|| invalid("expected <node>/<vmid>"))?;
        if node.is_empty() {
            return Err(invalid("node name is empty"));
        }
        let vmid = vmid
            .parse()
            .map_err(|_| invalid("vmid is not a number"))?;
        Ok(Self::new(node, vmid))
    }
}

/// One configuration update: fields to set and fields to delete.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateRequest {
    pub set: BTreeMap<String, String>,
    pub delete: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloneRequest {
    pub source: VmRef,
    pub new_id: u32,
    pub target_node: String,
    pub full: bool,
    pub name: Option<String>,
    pub description: Option<String>,
    pub target_datastore: Option<String>,
    pub target_format: Option<String>,
    pub snapshot_name: Option<String>,
    pub pool_id: Option<String>,
    pub bandwidth_limit: Option<u32>,
}

/// Power state as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmStatus {
    pub status: String,
}

impl VmStatus {
    pub fn is_stopped(&self) -> bool {
        self.status == "stopped"
    }
}

/// Remote operations on one platform.
///
/// Implementations resolve asynchronous platform tasks before returning,
/// so a successful call means the change is in effect.
#[async_trait]
pub trait VmApi: Send + Sync {
    /// Fetches the flat configuration map, or `None` if the VM does not exist.
    async fn fetch_config(&self, vm: &VmRef)
        -> Result<Option<BTreeMap<String, String>>, ApiError>;

    async fn apply_update(&self, vm: &VmRef, update: &UpdateRequest) -> Result<(), ApiError>;

    /// Grows one volume to an absolute capacity.
    async fn grow_volume(&self, vm: &VmRef, slot: SlotKey, size: DiskSize)
        -> Result<(), ApiError>;

    async fn clone_vm(&self, request: &CloneRequest) -> Result<(), ApiError>;

    /// Current power state, or `None` if the VM does not exist.
    async fn status(&self, vm: &VmRef) -> Result<Option<VmStatus>, ApiError>;

    /// Graceful shutdown, forcing a stop once `timeout` has passed.
    async fn shutdown(&self, vm: &VmRef, timeout: Duration) -> Result<(), ApiError>;

    async fn stop(&self, vm: &VmRef) -> Result<(), ApiError>;

    async fn delete(
        &self,
        vm: &VmRef,
        purge: bool,
        destroy_unreferenced_disks: bool,
    ) -> Result<(), ApiError>;
}

/// Allocates ids for new VMs.
#[async_trait]
pub trait IdGenerator: Send + Sync {
    async fn next_id(&self) -> Result<u32, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_ref_parse() {
        let vm: VmRef = "pve1/105".parse().unwrap();
        assert_eq!(vm, VmRef::new("pve1", 105));
        assert_eq!(vm.to_string(), "pve1/105");
    }

    #[test]
    fn test_vm_ref_parse_errors() {
        for s in ["pve1", "/105", "pve1/x", "pve1/"] {
            assert!(s.parse::<VmRef>().is_err(), "{s} should be rejected");
        }
    }
}
