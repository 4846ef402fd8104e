use serde::Serialize;

use crate::record::{Record, RecordId};
use crate::request::Action;
use crate::store::{ChangeSet, StoreId, UpdateOperation};

/// Store lifecycle event as rebroadcast by the registry.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum RegistryEvent {
    BeforeRecordSave {
        store: StoreId,
        changes: ChangeSet,
    },
    AfterRecordSave {
        store: StoreId,
        action: Action,
        records: Vec<Record>,
    },
    AfterRecordUpdate {
        store: StoreId,
        record: Record,
        operation: UpdateOperation,
    },
    RecordRemove {
        store: StoreId,
        record: Record,
    },
    AfterRecordWrite {
        store: StoreId,
        action: Action,
        records: Vec<Record>,
    },
    StoreException {
        store: StoreId,
        action: Action,
        error: String,
        records: Vec<RecordId>,
    },
}

impl RegistryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RegistryEvent::BeforeRecordSave { .. } => "beforerecordsave",
            RegistryEvent::AfterRecordSave { .. } => "afterrecordsave",
            RegistryEvent::AfterRecordUpdate { .. } => "afterrecordupdate",
            RegistryEvent::RecordRemove { .. } => "recordremove",
            RegistryEvent::AfterRecordWrite { .. } => "afterrecordwrite",
            RegistryEvent::StoreException { .. } => "storeexception",
        }
    }

    pub fn store(&self) -> StoreId {
        match self {
            RegistryEvent::BeforeRecordSave { store, .. }
            | RegistryEvent::AfterRecordSave { store, .. }
            | RegistryEvent::AfterRecordUpdate { store, .. }
            | RegistryEvent::RecordRemove { store, .. }
            | RegistryEvent::AfterRecordWrite { store, .. }
            | RegistryEvent::StoreException { store, .. } => *store,
        }
    }
}
