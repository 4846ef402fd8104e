use std::fmt;

use serde_json::Value;
use tracing::{error, warn};

use super::{Action, ExchangeResult, Outcome, RequestId, ResultEntry};
use crate::clock::Timestamp;
use crate::record::{FieldMap, Record, RecordId};

/// Receives the result of an exchange, exactly once.
pub type CompletionTarget = Box<dyn FnOnce(ExchangeResult) + Send>;

/// A record as it was put on the wire.
#[derive(Clone, Debug, PartialEq)]
pub struct SentRecord {
    pub key: RecordId,
    pub phantom: bool,
    pub id_properties: Vec<String>,
    pub values: FieldMap,
}

impl SentRecord {
    pub fn new(record: &Record, values: FieldMap) -> Self {
        SentRecord {
            key: record.key().clone(),
            phantom: record.is_phantom(),
            id_properties: record.id_properties().to_vec(),
            values,
        }
    }

    /// Whether a response item describes this record: by identity fields, or
    /// for a new record by the client key echoed back as `id`.
    pub fn matches(&self, item: &FieldMap) -> bool {
        if self.phantom {
            if let Some(Value::String(id)) = item.get("id") {
                return id == self.key.as_str();
            }
            return false;
        }
        RecordId::from_data(&self.id_properties, item).as_ref() == Some(&self.key)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ExchangeState {
    Idle,
    Started,
    Resolved,
}

/// Lifecycle of one request/response exchange.
///
/// `start` opens the exchange, `add_*` accumulate per-record results and
/// `done` hands them to the completion target. The target runs at most once;
/// later `done` calls are logged and ignored.
pub struct RequestCorrelator {
    request_id: RequestId,
    action: Action,
    batch: bool,
    sent: Vec<SentRecord>,
    target: Option<CompletionTarget>,
    state: ExchangeState,
    module: Option<(String, String)>,
    received_time: Timestamp,
    entries: Vec<ResultEntry>,
    listed: Vec<FieldMap>,
    error: Option<String>,
}

impl fmt::Debug for RequestCorrelator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestCorrelator")
            .field("request_id", &self.request_id)
            .field("action", &self.action)
            .field("batch", &self.batch)
            .field("state", &self.state)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl RequestCorrelator {
    pub fn new(request_id: RequestId, action: Action, sent: Vec<SentRecord>) -> Self {
        RequestCorrelator {
            request_id,
            action,
            batch: false,
            sent,
            target: None,
            state: ExchangeState::Idle,
            module: None,
            received_time: 0,
            entries: Vec::new(),
            listed: Vec::new(),
            error: None,
        }
    }

    pub fn with_target(mut self, target: impl FnOnce(ExchangeResult) + Send + 'static) -> Self {
        self.target = Some(Box::new(target));
        self
    }

    /// Treat the whole request as one batch exchange.
    pub fn batched(mut self) -> Self {
        self.batch = true;
        self
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn is_batch(&self) -> bool {
        self.batch
    }

    pub fn sent(&self) -> &[SentRecord] {
        &self.sent
    }

    pub fn received_time(&self) -> Timestamp {
        self.received_time
    }

    pub fn is_started(&self) -> bool {
        self.state == ExchangeState::Started
    }

    pub fn is_resolved(&self) -> bool {
        self.state == ExchangeState::Resolved
    }

    /// Module that answered, as given to `start`.
    pub fn module(&self) -> Option<(&str, &str)> {
        self.module
            .as_ref()
            .map(|(name, id)| (name.as_str(), id.as_str()))
    }

    /// Open the exchange for `body`. Returns false, leaving the exchange
    /// untouched, when the body is not an object or nothing awaits the result.
    pub fn start(&mut self, module_name: &str, module_id: &str, body: &Value, timestamp: Timestamp) -> bool {
        if self.state == ExchangeState::Resolved {
            error!(request = %self.request_id, "start on a resolved exchange");
            return false;
        }
        if !body.is_object() {
            warn!(request = %self.request_id, module = module_name, "response body is not an object");
            return false;
        }
        if self.target.is_none() {
            warn!(request = %self.request_id, "no completion target configured");
            return false;
        }

        self.reset();
        self.module = Some((module_name.to_string(), module_id.to_string()));
        self.received_time = timestamp;
        self.state = ExchangeState::Started;
        true
    }

    /// The sent record a response item refers to.
    pub fn match_item(&self, item: &FieldMap) -> Option<&SentRecord> {
        self.sent.iter().find(|sent| sent.matches(item))
    }

    pub fn sent_record(&self, id: &RecordId) -> Option<&SentRecord> {
        self.sent.iter().find(|sent| &sent.key == id)
    }

    pub fn add_created(&mut self, id: RecordId, data: FieldMap) {
        self.push(id, Outcome::Created(data));
    }

    pub fn add_updated(&mut self, id: RecordId, data: FieldMap) {
        self.push(id, Outcome::Updated(data));
    }

    pub fn add_destroyed(&mut self, id: RecordId) {
        self.push(id, Outcome::Destroyed);
    }

    pub fn add_opened(&mut self, id: RecordId, data: FieldMap) {
        self.push(id, Outcome::Opened(data));
    }

    pub fn add_listed(&mut self, data: FieldMap) {
        if self.accepting("add_listed") {
            self.listed.push(data);
        }
    }

    /// Record a failure, for one record when `id` is given or for the whole
    /// exchange otherwise.
    pub fn add_error(&mut self, id: Option<RecordId>, message: impl Into<String>) {
        let message = message.into();
        match id {
            Some(id) => self.push(id, Outcome::Failed(message)),
            None => {
                if self.accepting("add_error") {
                    self.error.get_or_insert(message);
                }
            }
        }
    }

    /// Sent records that no accumulated entry mentions yet.
    pub fn unreported(&self) -> Vec<&SentRecord> {
        self.sent
            .iter()
            .filter(|sent| !self.entries.iter().any(|e| e.id == sent.key))
            .collect()
    }

    /// Deliver the accumulated results. Returns false, without delivering,
    /// when the exchange was never started or has already been resolved.
    pub fn done(&mut self, success: bool) -> bool {
        match self.state {
            ExchangeState::Started => {}
            ExchangeState::Resolved => {
                error!(request = %self.request_id, "exchange already resolved, ignoring done");
                return false;
            }
            ExchangeState::Idle => {
                error!(request = %self.request_id, "done called before start");
                return false;
            }
        }
        self.state = ExchangeState::Resolved;

        let result = ExchangeResult {
            request_id: self.request_id,
            action: self.action,
            success,
            batch: self.batch,
            received_time: self.received_time,
            sent: self.sent.iter().map(|s| s.key.clone()).collect(),
            entries: std::mem::take(&mut self.entries),
            listed: std::mem::take(&mut self.listed),
            error: self.error.take(),
        };
        self.module = None;

        match self.target.take() {
            Some(target) => {
                target(result);
                true
            }
            None => false,
        }
    }

    /// Resolve an exchange that got no usable response. Anything accumulated
    /// so far is discarded and `done(false)` runs with an empty result.
    pub fn fail(&mut self, reason: impl fmt::Display, timestamp: Timestamp) -> bool {
        if self.state == ExchangeState::Resolved {
            error!(request = %self.request_id, %reason, "exchange already resolved, ignoring failure");
            return false;
        }
        self.reset();
        self.received_time = timestamp;
        self.error = Some(reason.to_string());
        self.state = ExchangeState::Started;
        self.done(false)
    }

    fn reset(&mut self) {
        self.entries.clear();
        self.listed.clear();
        self.error = None;
    }

    fn accepting(&self, operation: &str) -> bool {
        if self.state != ExchangeState::Started {
            warn!(request = %self.request_id, operation, "exchange not started, result dropped");
            return false;
        }
        true
    }

    fn push(&mut self, id: RecordId, outcome: Outcome) {
        if !self.accepting("add") {
            return;
        }
        let sent = self
            .sent_record(&id)
            .map(|s| s.values.clone())
            .unwrap_or_default();
        // Last word wins when a response mentions a record twice.
        self.entries.retain(|e| e.id != id);
        self.entries.push(ResultEntry { id, sent, outcome });
    }
}
