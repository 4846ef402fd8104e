use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::warn;

use super::{ChangeSet, StoreEvent, StoreId, StoreOptions, UpdateOperation};
use crate::clock::Timestamp;
use crate::error::SyncError;
use crate::notify::NotificationAction;
use crate::record::{FieldMap, Record, RecordId};
use crate::request::{Action, ExchangeResult, Outcome};

/// Veto hook consulted before a notification is applied to a store.
pub type BeforeNotify = Arc<dyn Fn(&NotificationAction, &[RecordId]) -> bool + Send + Sync>;

pub struct Store {
    pub(super) id: StoreId,
    pub(super) options: StoreOptions,
    pub(super) records: IndexMap<RecordId, Record>,
    pub(super) removed: Vec<Record>,
    pub(super) last_execution: HashMap<Action, Timestamp>,
    pub(super) before_notify: Option<BeforeNotify>,
    pub(super) events: Vec<StoreEvent>,
    destroyed: bool,
}

impl Store {
    pub fn new(options: StoreOptions) -> Self {
        Store {
            id: StoreId::next(),
            options,
            records: IndexMap::new(),
            removed: Vec::new(),
            last_execution: HashMap::new(),
            before_notify: None,
            events: Vec::new(),
            destroyed: false,
        }
    }

    pub fn id(&self) -> StoreId {
        self.id
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, key: &RecordId) -> bool {
        self.records.contains_key(key)
    }

    pub fn get(&self, key: &RecordId) -> Option<&Record> {
        self.records.get(key)
    }

    pub fn get_at(&self, index: usize) -> Option<&Record> {
        self.records.get_index(index).map(|(_, record)| record)
    }

    pub fn position(&self, key: &RecordId) -> Option<usize> {
        self.records.get_index_of(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &RecordId> {
        self.records.keys()
    }

    /// Persisted records removed locally whose destroy has not been applied yet.
    pub fn removed(&self) -> &[Record] {
        &self.removed
    }

    /// Add a new phantom record built from `data`, returning its key.
    pub fn create(&mut self, data: FieldMap) -> Result<RecordId, SyncError> {
        let record = Record::phantom(self.options.id_properties.clone(), data);
        let key = record.key().clone();
        self.add(record)?;
        Ok(key)
    }

    pub fn add(&mut self, record: Record) -> Result<(), SyncError> {
        if self.records.contains_key(record.key()) {
            return Err(SyncError::DuplicateRecord(record.key().clone()));
        }
        self.events.push(StoreEvent::Add {
            records: vec![record.clone()],
        });
        self.records.insert(record.key().clone(), record);
        Ok(())
    }

    /// Replace the cached records with a server listing. Unsaved phantom
    /// records survive the reload.
    pub fn load(&mut self, records: Vec<Record>) {
        self.records.retain(|_, record| record.is_phantom());
        for record in records {
            self.records.insert(record.key().clone(), record);
        }
        self.events.push(StoreEvent::Load {
            count: self.records.len(),
        });
    }

    pub fn set(&mut self, key: &RecordId, field: &str, value: Value) -> Result<bool, SyncError> {
        let record = self.record_mut(key)?;
        let changed = record.set(field, value)?;
        self.after_edit(key, changed);
        Ok(changed)
    }

    pub fn set_at(
        &mut self,
        key: &RecordId,
        field: &str,
        value: Value,
        at: Timestamp,
    ) -> Result<bool, SyncError> {
        let record = self.record_mut(key)?;
        let changed = record.set_at(field, value, at)?;
        self.after_edit(key, changed);
        Ok(changed)
    }

    pub fn begin_edit(&mut self, key: &RecordId) -> Result<(), SyncError> {
        self.record_mut(key)?.begin_edit();
        Ok(())
    }

    pub fn cancel_edit(&mut self, key: &RecordId) -> Result<(), SyncError> {
        self.record_mut(key)?.cancel_edit();
        Ok(())
    }

    pub fn end_edit(&mut self, key: &RecordId) -> Result<bool, SyncError> {
        let changed = self.record_mut(key)?.end_edit();
        self.after_edit(key, changed);
        Ok(changed)
    }

    pub fn reject(&mut self, key: &RecordId) -> Result<(), SyncError> {
        let record = self.record_mut(key)?;
        record.reject();
        let snapshot = record.clone();
        self.events.push(StoreEvent::Update {
            record: snapshot,
            operation: UpdateOperation::Reject,
        });
        Ok(())
    }

    /// Remove a record. Persisted records are kept aside until their destroy
    /// request has been applied; phantom records are simply dropped.
    pub fn remove(&mut self, key: &RecordId) -> Result<Record, SyncError> {
        let record = self
            .records
            .shift_remove(key)
            .ok_or_else(|| SyncError::RecordNotFound(key.clone()))?;
        if !record.is_phantom() {
            self.removed.push(record.clone());
        }
        self.events.push(StoreEvent::Remove {
            record: record.clone(),
        });
        Ok(record)
    }

    pub fn modified_records(&self) -> Vec<&Record> {
        self.records.values().filter(|r| r.is_dirty()).collect()
    }

    /// Everything a save would write right now.
    pub fn pending_changes(&self) -> ChangeSet {
        let mut changes = ChangeSet::default();
        for record in self.records.values() {
            if record.is_phantom() {
                changes.create.push(record.clone());
            } else if record.is_dirty() {
                changes.update.push(record.clone());
            }
        }
        changes.destroy = self.removed.clone();
        changes
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.removed.is_empty()
            || self
                .records
                .values()
                .any(|r| r.is_phantom() || r.is_dirty())
    }

    /// Transport timestamp of the last successful response for `action`, or 0.
    pub fn last_execution_time(&self, action: Action) -> Timestamp {
        self.last_execution.get(&action).copied().unwrap_or(0)
    }

    pub fn update_execution_time(&mut self, action: Action, timestamp: Timestamp) {
        self.last_execution.insert(action, timestamp);
    }

    pub fn set_before_notify(&mut self, hook: Option<BeforeNotify>) {
        self.before_notify = hook;
    }

    pub(crate) fn queue_before_save(&mut self, changes: ChangeSet) {
        self.events.push(StoreEvent::BeforeSave { changes });
    }

    /// Merge the result of a finished exchange into the cached records.
    ///
    /// Only entries the server applied are committed; failed records keep
    /// their local modifications. Returns the old and new key of every
    /// record the server assigned an identity to.
    pub fn apply_result(&mut self, result: &ExchangeResult) -> Vec<(RecordId, RecordId)> {
        let mut written = Vec::new();
        let mut rekeyed = Vec::new();
        let mut failed = Vec::new();
        let mut failure_message = None;

        for entry in &result.entries {
            match &entry.outcome {
                Outcome::Created(data) | Outcome::Updated(data) => {
                    if let Some(record) = self.commit_written(&entry.id, data, &entry.sent) {
                        if record.key() != &entry.id {
                            rekeyed.push((entry.id.clone(), record.key().clone()));
                        }
                        written.push(record);
                    }
                }
                Outcome::Opened(data) => {
                    if let Some(record) = self.records.get_mut(&entry.id) {
                        record.merge_server(data);
                        record.mark_opened();
                        written.push(record.clone());
                    }
                }
                Outcome::Destroyed => {
                    if let Some(pos) = self.removed.iter().position(|r| r.key() == &entry.id) {
                        written.push(self.removed.remove(pos));
                    }
                }
                Outcome::Failed(message) => {
                    failed.push(entry.id.clone());
                    failure_message.get_or_insert_with(|| message.clone());
                }
            }
        }

        let is_listing = result.action == Action::List || (result.batch && result.action == Action::Open);
        if is_listing && result.success {
            let records = result
                .listed
                .iter()
                .filter_map(|data| {
                    Record::from_server(self.options.id_properties.clone(), data.clone())
                        .map_err(|err| warn!(store = %self.id, %err, "skipping listed item"))
                        .ok()
                })
                .collect();
            self.load(records);
        }

        // Removals made while the batch was out were sent as still present.
        if result.batch && result.success {
            let (carried, omitted): (Vec<Record>, Vec<Record>) = std::mem::take(&mut self.removed)
                .into_iter()
                .partition(|record| result.sent.contains(record.key()));
            self.removed = carried;
            written.extend(omitted);
        }

        if result.success {
            self.update_execution_time(result.action, result.received_time);
        } else if failed.is_empty() && result.entries.is_empty() {
            failed = result.sent.clone();
            failure_message = result.error.clone();
        }

        if !failed.is_empty() {
            self.events.push(StoreEvent::Exception {
                action: result.action,
                error: failure_message.unwrap_or_else(|| "request failed".to_string()),
                records: failed,
            });
        }

        if !written.is_empty() {
            self.events.push(StoreEvent::Write {
                action: result.action,
                records: written.clone(),
            });
            self.events.push(StoreEvent::Save {
                action: result.action,
                records: written,
            });
        }
        rekeyed
    }

    pub fn take_events(&mut self) -> Vec<StoreEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }

    pub(crate) fn mark_destroyed(&mut self) {
        self.destroyed = true;
    }

    fn record_mut(&mut self, key: &RecordId) -> Result<&mut Record, SyncError> {
        self.records
            .get_mut(key)
            .ok_or_else(|| SyncError::RecordNotFound(key.clone()))
    }

    fn after_edit(&mut self, key: &RecordId, changed: bool) {
        if !changed {
            return;
        }
        if let Some(record) = self.records.get(key) {
            if !record.is_editing() {
                self.events.push(StoreEvent::Update {
                    record: record.clone(),
                    operation: UpdateOperation::Edit,
                });
            }
        }
    }

    fn commit_written(&mut self, key: &RecordId, server: &FieldMap, sent: &FieldMap) -> Option<Record> {
        let index = self.records.get_index_of(key)?;
        let (_, record) = self.records.get_index_mut(index)?;
        let new_key = record.commit_sent(server, sent);
        let snapshot = record.clone();

        if let Some(new_key) = new_key {
            if let Some((_, _, record)) = self.records.shift_remove_full(key) {
                self.records.shift_insert(index, new_key, record);
            }
        }
        Some(snapshot)
    }
}
