use tracing::debug;

use crate::error::SyncError;
use crate::record::RecordId;
use crate::request::{ExchangeResult, RequestId};
use crate::store::StoreId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchPhase {
    Idle,
    Sending { request: RequestId },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOutcome {
    Applied,
    /// Some records were not applied; they stay dirty in the store.
    Rejected { failed: Vec<RecordId> },
}

/// Edit session of one batched store: `Idle -> Sending -> Idle`, with the
/// outcome of the last batch kept for inspection. A second batch cannot
/// start while one is being sent.
#[derive(Debug)]
pub struct BatchSession {
    store: StoreId,
    phase: BatchPhase,
    last_outcome: Option<BatchOutcome>,
}

impl BatchSession {
    pub fn new(store: StoreId) -> Self {
        BatchSession {
            store,
            phase: BatchPhase::Idle,
            last_outcome: None,
        }
    }

    pub fn phase(&self) -> BatchPhase {
        self.phase
    }

    pub fn is_sending(&self) -> bool {
        matches!(self.phase, BatchPhase::Sending { .. })
    }

    pub fn last_outcome(&self) -> Option<&BatchOutcome> {
        self.last_outcome.as_ref()
    }

    /// Enter `Sending` for `request`.
    pub fn begin(&mut self, request: RequestId) -> Result<(), SyncError> {
        if self.is_sending() {
            return Err(SyncError::BatchInFlight { store: self.store });
        }
        self.phase = BatchPhase::Sending { request };
        Ok(())
    }

    /// Fail early when a batch is already on the wire.
    pub fn check_idle(&self) -> Result<(), SyncError> {
        if self.is_sending() {
            return Err(SyncError::BatchInFlight { store: self.store });
        }
        Ok(())
    }

    /// Return to `Idle` once the request being sent has resolved. Results
    /// for any other request are ignored.
    pub fn finish(&mut self, result: &ExchangeResult) -> Option<&BatchOutcome> {
        match self.phase {
            BatchPhase::Sending { request } if request == result.request_id => {}
            _ => {
                debug!(store = %self.store, request = %result.request_id, "result does not belong to the batch in flight");
                return None;
            }
        }

        let failed: Vec<RecordId> = if result.success {
            Vec::new()
        } else if result.entries.is_empty() {
            result.sent.clone()
        } else {
            result.failed().cloned().collect()
        };
        self.phase = BatchPhase::Idle;
        self.last_outcome = Some(if result.success && failed.is_empty() {
            BatchOutcome::Applied
        } else {
            BatchOutcome::Rejected { failed }
        });
        self.last_outcome.as_ref()
    }
}
