use serde::Serialize;

use super::{Action, RequestId};
use crate::clock::Timestamp;
use crate::record::{FieldMap, RecordId};

/// What the server did with one record of a request.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "data", rename_all = "lowercase")]
pub enum Outcome {
    Created(FieldMap),
    Updated(FieldMap),
    Opened(FieldMap),
    Destroyed,
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResultEntry {
    pub id: RecordId,
    /// Values sent for this record, used to tell in-flight edits apart.
    pub sent: FieldMap,
    pub outcome: Outcome,
}

impl ResultEntry {
    pub fn is_applied(&self) -> bool {
        !self.is_failed()
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, Outcome::Failed(_))
    }
}

/// Everything a finished exchange delivers to its completion target.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ExchangeResult {
    pub request_id: RequestId,
    pub action: Action,
    pub success: bool,
    pub batch: bool,
    pub received_time: Timestamp,
    /// Keys of every record the request carried.
    pub sent: Vec<RecordId>,
    pub entries: Vec<ResultEntry>,
    /// Items returned by a `list` request.
    pub listed: Vec<FieldMap>,
    pub error: Option<String>,
}

impl ExchangeResult {
    pub fn applied(&self) -> impl Iterator<Item = &RecordId> {
        self.entries.iter().filter(|e| e.is_applied()).map(|e| &e.id)
    }

    pub fn failed(&self) -> impl Iterator<Item = &RecordId> {
        self.entries.iter().filter(|e| e.is_failed()).map(|e| &e.id)
    }

    pub fn entry(&self, id: &RecordId) -> Option<&ResultEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }
}
