use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;

use super::{Action, RequestId};
use crate::error::TransportError;
use crate::store::StoreId;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OutgoingRequest {
    pub request_id: RequestId,
    pub store: StoreId,
    pub module: String,
    pub action: Action,
    pub server_action: &'static str,
    pub payload: Value,
}

/// Hands requests to the network. The response arrives later, through the
/// session, as a separate turn.
pub trait Transport: Send + Sync {
    fn send(&self, request: &OutgoingRequest) -> Result<(), TransportError>;
}

/// Transport that only records what was sent.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    sent: Arc<Mutex<Vec<OutgoingRequest>>>,
    fail_next: Arc<Mutex<Option<TransportError>>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutgoingRequest> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().map(|sent| sent.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last(&self) -> Option<OutgoingRequest> {
        self.sent.lock().ok().and_then(|sent| sent.last().cloned())
    }

    /// Drain everything sent so far.
    pub fn take(&self) -> Vec<OutgoingRequest> {
        self.sent
            .lock()
            .map(|mut sent| std::mem::take(&mut *sent))
            .unwrap_or_default()
    }

    /// Make the next `send` fail with `error`.
    pub fn fail_next(&self, error: TransportError) {
        if let Ok(mut slot) = self.fail_next.lock() {
            *slot = Some(error);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.clear();
        }
    }
}

impl Transport for InMemoryTransport {
    fn send(&self, request: &OutgoingRequest) -> Result<(), TransportError> {
        let failure = self
            .fail_next
            .lock()
            .map_err(|_| TransportError::ConnectionFailed("transport state poisoned".to_string()))?
            .take();
        if let Some(error) = failure {
            return Err(error);
        }

        self.sent
            .lock()
            .map_err(|_| TransportError::ConnectionFailed("transport log poisoned".to_string()))?
            .push(request.clone());
        Ok(())
    }
}
