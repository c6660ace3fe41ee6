//! Mutation dispatch.
//!
//! One configuration update carrying every set and clear, then one growth
//! call per volume. Every remote call is bounded by the pass deadline.

use std::fmt;
use std::future::Future;

use serde::Serialize;
use tokio::time::{Instant, timeout_at};
use tracing::{info, warn};

use crate::api::{ApiError, VmApi, VmRef};
use crate::batch::{GrowthDelta, MutationBatch};
use crate::error::{EngineError, Result, Stage};
use crate::slot::SlotKey;

/// Runs one remote call under `deadline`.
pub(crate) async fn bounded<T>(
    deadline: Instant,
    stage: Stage,
    call: impl Future<Output = std::result::Result<T, ApiError>>,
) -> Result<std::result::Result<T, ApiError>> {
    timeout_at(deadline, call)
        .await
        .map_err(|_| EngineError::Timeout { stage })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GrowthFailure {
    pub slot: SlotKey,
    pub error: String,
}

/// Outcome of the growth phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GrowthReport {
    pub grown: Vec<SlotKey>,
    pub failed: Option<GrowthFailure>,
    pub not_attempted: Vec<SlotKey>,
}

impl GrowthReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_none()
    }
}

impl fmt::Display for GrowthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |slots: &[SlotKey]| {
            slots
                .iter()
                .map(SlotKey::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(f, "grown [{}]", list(&self.grown))?;
        if let Some(failed) = &self.failed {
            write!(f, ", {} failed: {}", failed.slot, failed.error)?;
        }
        if !self.not_attempted.is_empty() {
            write!(f, ", not attempted [{}]", list(&self.not_attempted))?;
        }
        Ok(())
    }
}

/// Sends a batch to one VM under a single deadline.
pub struct Dispatcher<'a> {
    api: &'a dyn VmApi,
    vm: &'a VmRef,
    deadline: Instant,
}

impl<'a> Dispatcher<'a> {
    pub fn new(api: &'a dyn VmApi, vm: &'a VmRef, deadline: Instant) -> Self {
        Self { api, vm, deadline }
    }

    /// Sends the configuration update, skipping it when there is nothing to send.
    /// Returns whether a call was made.
    pub async fn update(&self, batch: &MutationBatch) -> Result<bool> {
        if batch.is_update_empty() {
            return Ok(false);
        }
        let request = batch.update_request();
        info!(
            vm = %self.vm,
            set = request.set.len(),
            delete = request.delete.len(),
            "applying configuration update"
        );
        bounded(self.deadline, Stage::Update, self.api.apply_update(self.vm, &request))
            .await?
            .map_err(|e| {
                let fields: Vec<&str> = request
                    .set
                    .keys()
                    .chain(request.delete.iter())
                    .map(String::as_str)
                    .collect();
                EngineError::remote(self.vm, format!("update of {}", fields.join(", ")), e)
            })?;
        Ok(true)
    }

    /// Grows volumes in batch order, stopping at the first failure.
    ///
    /// A failed call, or one cut off by the deadline, is recorded in the
    /// report together with the slots that were never attempted.
    pub async fn grow(&self, deltas: &[GrowthDelta]) -> GrowthReport {
        let mut report = GrowthReport::default();
        for (i, delta) in deltas.iter().enumerate() {
            info!(vm = %self.vm, slot = %delta.slot, size = %delta.new_size, "growing volume");
            let call = self.api.grow_volume(self.vm, delta.slot, delta.new_size);
            let outcome = match bounded(self.deadline, Stage::Grow(delta.slot), call).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(expired) => Err(expired.to_string()),
            };
            if let Err(error) = outcome {
                warn!(vm = %self.vm, slot = %delta.slot, %error, "volume growth failed");
                report.failed = Some(GrowthFailure {
                    slot: delta.slot,
                    error,
                });
                report.not_attempted = deltas[i + 1..].iter().map(|d| d.slot).collect();
                break;
            }
            report.grown.push(delta.slot);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::Bus;

    #[test]
    fn test_report_display() {
        let report = GrowthReport {
            grown: vec![SlotKey::new(Bus::Scsi, 0).unwrap()],
            failed: Some(GrowthFailure {
                slot: SlotKey::new(Bus::Scsi, 1).unwrap(),
                error: "HTTP 500: no space".to_string(),
            }),
            not_attempted: vec![SlotKey::new(Bus::Virtio, 0).unwrap()],
        };
        assert!(!report.is_complete());
        assert_eq!(
            report.to_string(),
            "grown [scsi0], scsi1 failed: HTTP 500: no space, not attempted [virtio0]"
        );
    }

    #[test]
    fn test_bounded_passes_result_through() {
        let deadline = Instant::now() + std::time::Duration::from_secs(5);
        let ok = tokio_test::block_on(bounded(deadline, Stage::Fetch, async { Ok::<_, ApiError>(7) }));
        assert_eq!(ok.unwrap(), Ok(7));

        let failed = tokio_test::block_on(bounded(deadline, Stage::Delete, async {
            Err::<(), _>(ApiError::NotFound)
        }));
        assert_eq!(failed.unwrap(), Err(ApiError::NotFound));
    }
}
