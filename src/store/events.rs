use serde::Serialize;
use serde_json::Value;

use crate::clock::Timestamp;
use crate::notify::NotificationAction;
use crate::record::{Record, RecordId};
use crate::request::Action;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateOperation {
    Edit,
    Reject,
    Commit,
}

/// Records about to be written, grouped by the action that writes them.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ChangeSet {
    pub create: Vec<Record>,
    pub update: Vec<Record>,
    pub destroy: Vec<Record>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.destroy.is_empty()
    }

    pub fn len(&self) -> usize {
        self.create.len() + self.update.len() + self.destroy.len()
    }

    pub fn records(&self, action: Action) -> &[Record] {
        match action {
            Action::Create => &self.create,
            Action::Update => &self.update,
            Action::Destroy => &self.destroy,
            Action::Open | Action::List => &[],
        }
    }

    /// Drop records that must not be rebroadcast to other stores.
    pub fn propagatable(&self) -> ChangeSet {
        let keep = |records: &[Record]| -> Vec<Record> {
            records
                .iter()
                .filter(|r| r.has_event_propagation())
                .cloned()
                .collect()
        };
        ChangeSet {
            create: keep(&self.create),
            update: keep(&self.update),
            destroy: keep(&self.destroy),
        }
    }
}

/// Lifecycle event queued by a [`Store`](super::Store).
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StoreEvent {
    Add {
        records: Vec<Record>,
    },
    Load {
        count: usize,
    },
    BeforeSave {
        changes: ChangeSet,
    },
    Save {
        action: Action,
        records: Vec<Record>,
    },
    Update {
        record: Record,
        operation: UpdateOperation,
    },
    Remove {
        record: Record,
    },
    Write {
        action: Action,
        records: Vec<Record>,
    },
    Exception {
        action: Action,
        error: String,
        records: Vec<RecordId>,
    },
    Notified {
        action: NotificationAction,
        records: Vec<RecordId>,
        data: Value,
        received: Timestamp,
        success: bool,
    },
}

impl StoreEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StoreEvent::Add { .. } => "add",
            StoreEvent::Load { .. } => "load",
            StoreEvent::BeforeSave { .. } => "beforesave",
            StoreEvent::Save { .. } => "save",
            StoreEvent::Update { .. } => "update",
            StoreEvent::Remove { .. } => "remove",
            StoreEvent::Write { .. } => "write",
            StoreEvent::Exception { .. } => "exception",
            StoreEvent::Notified { .. } => "notify",
        }
    }
}
