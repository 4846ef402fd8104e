use serde_json::Value;
use tracing::debug;

use super::{ChangeSet, Store, StoreEvent, StoreId, UpdateOperation};
use crate::clock::{now_millis, Timestamp};
use crate::notify::NotificationAction;
use crate::record::{FieldMap, Record, RecordId};
use crate::request::Action;

impl Store {
    /// Apply a server push to this store.
    ///
    /// Returns false when the before-notify hook vetoed the notification.
    /// Identities this store does not hold are skipped.
    pub fn on_notify(
        &mut self,
        action: &NotificationAction,
        records: &[RecordId],
        data: &Value,
        received: Timestamp,
        success: bool,
    ) -> bool {
        if let Some(hook) = &self.before_notify {
            if !hook(action, records) {
                debug!(store = %self.id, %action, "notification vetoed");
                return false;
            }
        }

        match action {
            NotificationAction::ObjectModified => {
                for (index, key) in records.iter().enumerate() {
                    if let Some(values) = item_data(data, index) {
                        self.notify_modified(key, values, received);
                    }
                }
            }
            NotificationAction::ObjectDeleted => {
                for key in records {
                    self.notify_deleted(key);
                }
            }
            NotificationAction::ObjectCreated => self.notify_created(data, received),
            NotificationAction::Other(_) => {}
        }

        self.events.push(StoreEvent::Notified {
            action: action.clone(),
            records: records.to_vec(),
            data: data.clone(),
            received,
            success,
        });
        true
    }

    /// Mirror the pending changes another store is about to save.
    pub fn on_external_save(&mut self, origin: StoreId, changes: &ChangeSet) {
        if origin == self.id || self.options.server_only {
            return;
        }

        let now = now_millis();
        for record in &changes.update {
            self.notify_modified(record.key(), record.data(), now);
        }
        for record in &changes.destroy {
            self.notify_deleted(record.key());
        }
    }

    /// Mirror records another store has just written to the server.
    pub fn on_external_write(&mut self, origin: StoreId, action: Action, records: &[Record]) {
        if origin == self.id {
            return;
        }

        match action {
            Action::Create => {
                let Some(collection) = self.options.collection.clone() else {
                    return;
                };
                for record in records {
                    let parent = record.get(&self.options.parent_field);
                    if parent.and_then(Value::as_str) == Some(collection.as_str())
                        && !self.records.contains_key(record.key())
                    {
                        self.insert_copy(record.data().clone());
                    }
                }
            }
            Action::Update | Action::Open => {
                let now = now_millis();
                for record in records {
                    self.notify_modified(record.key(), record.data(), now);
                }
            }
            Action::Destroy => {
                for record in records {
                    self.notify_deleted(record.key());
                }
            }
            Action::List => {}
        }
    }

    fn notify_modified(&mut self, key: &RecordId, values: &FieldMap, received: Timestamp) {
        let Some(record) = self.records.get_mut(key) else {
            debug!(store = %self.id, record = %key, "no cached record to update");
            return;
        };

        let propagate = record.has_event_propagation();
        record.set_event_propagation(false);
        record.reconcile(values, received);
        let snapshot = record.clone();
        record.set_event_propagation(propagate);

        self.events.push(StoreEvent::Update {
            record: snapshot,
            operation: UpdateOperation::Commit,
        });
    }

    fn notify_deleted(&mut self, key: &RecordId) {
        let Some(mut record) = self.records.shift_remove(key) else {
            debug!(store = %self.id, record = %key, "no cached record to delete");
            return;
        };

        // Already gone on the server; nothing must be sent for it.
        record.set_phantom(true);
        record.set_event_propagation(false);
        self.events.push(StoreEvent::Remove { record });
    }

    fn notify_created(&mut self, data: &Value, received: Timestamp) {
        if self.last_execution_time(Action::List) >= received {
            debug!(store = %self.id, received, "listing is newer than creation push");
            return;
        }

        let items: Vec<&FieldMap> = match data {
            Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
            Value::Object(map) => vec![map],
            _ => Vec::new(),
        };

        for values in items {
            if let Some(key) = RecordId::from_data(&self.options.id_properties, values) {
                if !self.records.contains_key(&key) {
                    self.insert_copy(values.clone());
                }
            }
        }
    }

    fn insert_copy(&mut self, data: FieldMap) {
        match Record::from_server(self.options.id_properties.clone(), data) {
            Ok(record) => {
                self.events.push(StoreEvent::Add {
                    records: vec![record.clone()],
                });
                self.records.insert(record.key().clone(), record);
            }
            Err(err) => debug!(store = %self.id, %err, "cannot mirror record"),
        }
    }
}

/// Values for the `index`-th record of a notification: one element of an
/// array payload, or the shared object for every record.
fn item_data(data: &Value, index: usize) -> Option<&FieldMap> {
    match data {
        Value::Array(items) => items.get(index).and_then(Value::as_object),
        Value::Object(map) => Some(map),
        _ => None,
    }
}
