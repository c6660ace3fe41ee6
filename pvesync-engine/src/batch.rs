//! Mutation batches.
//!
//! A batch collects every change one pass wants to make: fields to set,
//! fields to clear and volumes to grow. Set and clear go out together in one
//! configuration update; growth goes out afterwards, one call per volume.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::api::UpdateRequest;
use crate::error::ValidationError;
use crate::size::DiskSize;
use crate::slot::SlotKey;

/// Request to grow one existing volume to a new absolute capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrowthDelta {
    pub slot: SlotKey,
    pub new_size: DiskSize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MutationBatch {
    set: BTreeMap<String, String>,
    clear: Vec<String>,
    growth: Vec<GrowthDelta>,
}

impl MutationBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a set directive. A later set of the same field replaces the
    /// earlier value.
    pub fn set(
        &mut self,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ValidationError> {
        let field = field.into();
        if self.clear.contains(&field) {
            return Err(ValidationError::ConflictingDirective { field });
        }
        self.set.insert(field, value.into());
        Ok(())
    }

    pub fn clear(&mut self, field: impl Into<String>) -> Result<(), ValidationError> {
        let field = field.into();
        if self.set.contains_key(&field) {
            return Err(ValidationError::ConflictingDirective { field });
        }
        if !self.clear.contains(&field) {
            self.clear.push(field);
        }
        Ok(())
    }

    pub fn grow(&mut self, delta: GrowthDelta) {
        self.growth.push(delta);
    }

    pub fn sets(&self) -> &BTreeMap<String, String> {
        &self.set
    }

    pub fn clears(&self) -> &[String] {
        &self.clear
    }

    pub fn growth(&self) -> &[GrowthDelta] {
        &self.growth
    }

    /// Whether the configuration update would carry nothing.
    pub fn is_update_empty(&self) -> bool {
        self.set.is_empty() && self.clear.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.is_update_empty() && self.growth.is_empty()
    }

    /// Whether the batch sets or clears `field`.
    pub fn touches(&self, field: &str) -> bool {
        self.set.contains_key(field) || self.clear.iter().any(|f| f == field)
    }

    pub fn update_request(&self) -> UpdateRequest {
        UpdateRequest {
            set: self.set.clone(),
            delete: self.clear.clone(),
        }
    }
}
