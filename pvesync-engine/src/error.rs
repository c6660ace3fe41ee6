//! Engine error types.

use std::fmt;

use thiserror::Error;

use crate::api::{ApiError, VmRef};
use crate::dispatch::GrowthReport;
use crate::model::DesiredVm;
use crate::slot::SlotKey;

/// A desired-state document that cannot be turned into a mutation batch.
///
/// Raised before any mutating remote call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid slot key {key:?}, expected one of: {expected}")]
    InvalidSlotKey { key: String, expected: String },

    #[error("slot {key} out of range, index must be at most {max}")]
    SlotOutOfRange { key: String, max: u32 },

    #[error("disk {slot}: shrinking from {current_gb}G to {requested_gb}G is not supported")]
    ShrinkRejected {
        slot: SlotKey,
        current_gb: u64,
        requested_gb: u64,
    },

    #[error("disk {slot}: current capacity is unknown, cannot resize")]
    UnknownCapacity { slot: SlotKey },

    #[error("cpu flags cannot be set without a cpu type")]
    FlagsWithoutType,

    #[error("disk {slot}: {reason}")]
    MissingDiskSource { slot: SlotKey, reason: String },

    #[error("{slot}: {field} cannot be changed after creation (current {current:?}, requested {requested:?})")]
    ImmutableField {
        slot: String,
        field: &'static str,
        current: String,
        requested: String,
    },

    #[error("{scope}: {field} is required and cannot be cleared")]
    RequiredField { scope: String, field: &'static str },

    #[error("field {field} is both set and cleared in the same pass")]
    ConflictingDirective { field: String },

    #[error("invalid clone source: {0}")]
    InvalidClone(String),

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// A remote value that does not follow the platform's encoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("invalid size {0:?}")]
    InvalidSize(String),

    #[error("invalid value {value:?} for property {key}")]
    InvalidProperty { key: String, value: String },

    #[error("missing required property {0}")]
    MissingProperty(&'static str),
}

/// The remote step a deadline expired in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Update,
    Grow(SlotKey),
    Clone,
    NextId,
    Status,
    Shutdown,
    Stop,
    Delete,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Fetch => f.write_str("configuration fetch"),
            Stage::Update => f.write_str("configuration update"),
            Stage::Grow(slot) => write!(f, "resize of {slot}"),
            Stage::Clone => f.write_str("clone"),
            Stage::NextId => f.write_str("id allocation"),
            Stage::Status => f.write_str("status query"),
            Stage::Shutdown => f.write_str("shutdown"),
            Stage::Stop => f.write_str("stop"),
            Stage::Delete => f.write_str("delete"),
        }
    }
}

/// Errors surfaced by engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("virtual machine {vm} not found")]
    NotFound { vm: VmRef },

    #[error("{context}: {source}")]
    Remote {
        context: String,
        #[source]
        source: ApiError,
    },

    /// The update was applied but a volume growth failed. `state` holds the
    /// read-back state when it could still be obtained.
    #[error("partially applied: {report}")]
    PartialApply {
        report: GrowthReport,
        state: Option<Box<DesiredVm>>,
    },

    #[error("deadline exceeded during {stage}")]
    Timeout { stage: Stage },

    #[error("decoding {field}: {source}")]
    Decode {
        field: String,
        #[source]
        source: CodecError,
    },
}

impl EngineError {
    /// Maps a collaborator error, folding the not-found case.
    pub(crate) fn remote(vm: &VmRef, context: impl Into<String>, err: ApiError) -> Self {
        match err {
            ApiError::NotFound => EngineError::NotFound { vm: vm.clone() },
            source => EngineError::Remote {
                context: context.into(),
                source,
            },
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
