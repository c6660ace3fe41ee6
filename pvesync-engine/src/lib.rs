//! pvesync-engine - opt-in reconciliation of Proxmox VE VM configuration.
//!
//! Only attributes and slots a desired-state document declares are ever
//! created, changed or removed. Everything else on the VM is left alone.

pub mod api;
pub mod attr;
pub mod batch;
pub mod collection;
pub mod config;
pub mod deletion;
pub mod device;
pub mod dispatch;
pub mod engine;
pub mod error;
mod groups;
pub mod merge;
pub mod model;
pub mod readback;
pub mod size;
pub mod slot;
pub mod snapshot;

pub use api::{ApiError, CloneRequest, IdGenerator, UpdateRequest, VmApi, VmRef, VmStatus};
pub use attr::Attr;
pub use batch::{GrowthDelta, MutationBatch};
pub use config::{EngineConfig, Timeouts};
pub use deletion::DeletionRequest;
pub use dispatch::GrowthReport;
pub use engine::{Engine, Reconciled, build_batch, validate};
pub use error::{EngineError, Stage, ValidationError};
pub use model::DesiredVm;
pub use size::DiskSize;
pub use slot::{Bus, SlotKey};
pub use snapshot::RemoteSnapshot;
