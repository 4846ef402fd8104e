use std::fmt;

use serde::Serialize;
use serde_json::Value;

use super::RecordId;
use crate::clock::{now_millis, Timestamp};
use crate::error::SyncError;

/// Field values of a record, keyed by property name.
pub type FieldMap = serde_json::Map<String, Value>;

#[derive(Clone)]
struct EditSnapshot {
    data: FieldMap,
    modified: FieldMap,
    last_edit: Option<Timestamp>,
}

/// Identity-bearing, dirty-tracked unit of cached state.
///
/// `modified` holds the value each changed field had before the first local
/// edit since the last commit. Two records are equal when their keys are
/// equal, whatever their data.
#[derive(Clone, Serialize)]
pub struct Record {
    key: RecordId,
    id_properties: Vec<String>,
    data: FieldMap,
    modified: FieldMap,
    phantom: bool,
    opened: bool,
    #[serde(skip)]
    last_edit: Option<Timestamp>,
    #[serde(skip)]
    event_propagation: bool,
    #[serde(skip)]
    editing: Option<Box<EditSnapshot>>,
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("key", &self.key)
            .field("data", &self.data)
            .field("modified", &self.modified)
            .field("phantom", &self.phantom)
            .field("opened", &self.opened)
            .field("last_edit", &self.last_edit)
            .finish()
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Record {}

impl Record {
    /// A client-only record with a generated key.
    pub fn phantom<I, S>(id_properties: I, data: FieldMap) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Record {
            key: RecordId::phantom(),
            id_properties: id_properties.into_iter().map(Into::into).collect(),
            data,
            modified: FieldMap::new(),
            phantom: true,
            opened: false,
            last_edit: None,
            event_propagation: true,
            editing: None,
        }
    }

    /// A record hydrated from server data. The identity fields must be present.
    pub fn from_server<I, S>(id_properties: I, data: FieldMap) -> Result<Self, SyncError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id_properties: Vec<String> = id_properties.into_iter().map(Into::into).collect();
        let key = RecordId::from_data(&id_properties, &data).ok_or_else(|| {
            SyncError::MalformedPayload(format!(
                "record data lacks identity fields {:?}",
                id_properties
            ))
        })?;

        Ok(Record {
            key,
            id_properties,
            data,
            modified: FieldMap::new(),
            phantom: false,
            opened: false,
            last_edit: None,
            event_propagation: true,
            editing: None,
        })
    }

    pub fn key(&self) -> &RecordId {
        &self.key
    }

    pub fn id_properties(&self) -> &[String] {
        &self.id_properties
    }

    pub fn is_identity_field(&self, field: &str) -> bool {
        self.id_properties.iter().any(|p| p == field)
    }

    pub fn data(&self) -> &FieldMap {
        &self.data
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    pub fn modified(&self) -> &FieldMap {
        &self.modified
    }

    pub fn is_modified(&self, field: &str) -> bool {
        self.modified.contains_key(field)
    }

    pub fn is_dirty(&self) -> bool {
        !self.modified.is_empty()
    }

    pub fn is_phantom(&self) -> bool {
        self.phantom
    }

    /// Mark the record as not persisted, so removing it issues no destroy.
    pub fn set_phantom(&mut self, phantom: bool) {
        self.phantom = phantom;
    }

    pub fn is_opened(&self) -> bool {
        self.opened
    }

    pub fn mark_opened(&mut self) {
        self.opened = true;
    }

    /// Timestamp of the last local edit that is still uncommitted.
    pub fn last_edit(&self) -> Option<Timestamp> {
        self.last_edit
    }

    pub fn has_event_propagation(&self) -> bool {
        self.event_propagation
    }

    pub fn set_event_propagation(&mut self, propagate: bool) {
        self.event_propagation = propagate;
    }

    pub fn add_id_property(&mut self, property: impl Into<String>) -> Result<(), SyncError> {
        let property = property.into();
        if !self.phantom {
            return Err(SyncError::IdentityImmutable {
                record: self.key.clone(),
                field: property,
            });
        }
        if !self.is_identity_field(&property) {
            self.id_properties.push(property);
        }
        Ok(())
    }

    pub fn has_id_property(&self, property: &str) -> bool {
        self.is_identity_field(property)
    }

    pub fn remove_id_property(&mut self, property: &str) -> Result<(), SyncError> {
        if !self.phantom {
            return Err(SyncError::IdentityImmutable {
                record: self.key.clone(),
                field: property.to_string(),
            });
        }
        self.id_properties.retain(|p| p != property);
        Ok(())
    }

    /// Set a field, stamping the edit with the current time.
    pub fn set(&mut self, field: &str, value: Value) -> Result<bool, SyncError> {
        self.set_at(field, value, now_millis())
    }

    /// Set a field, stamping the edit with `at`. Returns whether anything changed.
    pub fn set_at(&mut self, field: &str, value: Value, at: Timestamp) -> Result<bool, SyncError> {
        let current = self.data.get(field).cloned().unwrap_or(Value::Null);
        if current == value {
            return Ok(false);
        }

        if !self.phantom && self.is_identity_field(field) {
            return Err(SyncError::IdentityImmutable {
                record: self.key.clone(),
                field: field.to_string(),
            });
        }

        match self.modified.get(field) {
            Some(original) if *original == value => {
                self.modified.remove(field);
            }
            Some(_) => {}
            None => {
                self.modified.insert(field.to_string(), current);
            }
        }

        if value.is_null() {
            self.data.remove(field);
        } else {
            self.data.insert(field.to_string(), value);
        }

        self.last_edit = if self.modified.is_empty() { None } else { Some(at) };
        Ok(true)
    }

    /// Accept the current data as persisted.
    pub fn commit(&mut self) {
        self.modified.clear();
        self.last_edit = None;
    }

    /// Restore every modified field to its value before the first local edit.
    pub fn reject(&mut self) {
        for (field, original) in std::mem::take(&mut self.modified) {
            if original.is_null() {
                self.data.remove(&field);
            } else {
                self.data.insert(field, original);
            }
        }
        self.last_edit = None;
    }

    pub fn begin_edit(&mut self) {
        if self.editing.is_none() {
            self.editing = Some(Box::new(EditSnapshot {
                data: self.data.clone(),
                modified: self.modified.clone(),
                last_edit: self.last_edit,
            }));
        }
    }

    pub fn is_editing(&self) -> bool {
        self.editing.is_some()
    }

    pub fn cancel_edit(&mut self) {
        if let Some(snapshot) = self.editing.take() {
            self.data = snapshot.data;
            self.modified = snapshot.modified;
            self.last_edit = snapshot.last_edit;
        }
    }

    /// Finish a grouped edit. Returns whether the data changed since `begin_edit`.
    pub fn end_edit(&mut self) -> bool {
        match self.editing.take() {
            Some(snapshot) => snapshot.data != self.data,
            None => false,
        }
    }

    /// Merge pushed data received at `received`.
    ///
    /// A locally modified field edited after `received` keeps its local value;
    /// every other field takes the pushed value and stops being modified.
    /// Returns the fields where the local edit won.
    pub fn reconcile(&mut self, incoming: &FieldMap, received: Timestamp) -> Vec<String> {
        let local_is_newer = self.last_edit.is_some_and(|edit| received < edit);
        let mut kept = Vec::new();

        for (field, value) in incoming {
            if !self.phantom && self.is_identity_field(field) {
                continue;
            }

            if local_is_newer && self.modified.contains_key(field) {
                if self.data.get(field) == Some(value) {
                    self.modified.remove(field);
                } else {
                    self.modified.insert(field.clone(), value.clone());
                    kept.push(field.clone());
                }
            } else {
                self.modified.remove(field);
                self.data.insert(field.clone(), value.clone());
            }
        }

        if self.modified.is_empty() {
            self.last_edit = None;
        }
        kept
    }

    /// Merge server data without touching locally modified fields.
    pub fn merge_server(&mut self, incoming: &FieldMap) {
        for (field, value) in incoming {
            if self.modified.contains_key(field) {
                self.modified.insert(field.clone(), value.clone());
            } else {
                self.data.insert(field.clone(), value.clone());
            }
        }
    }

    /// Apply the server's answer to a write carrying `sent`.
    ///
    /// Fields whose value still equals what was sent are committed; fields
    /// edited again while the request was in flight stay modified. The record
    /// stops being phantom and is re-keyed from its identity fields. Returns
    /// the new key when it changed.
    pub fn commit_sent(&mut self, server: &FieldMap, sent: &FieldMap) -> Option<RecordId> {
        let edited_since: Vec<String> = self
            .modified
            .keys()
            .filter(|field| sent.get(field.as_str()) != self.data.get(field.as_str()))
            .cloned()
            .collect();

        for (field, value) in server {
            if edited_since.contains(field) {
                self.modified.insert(field.clone(), value.clone());
            } else {
                self.data.insert(field.clone(), value.clone());
            }
        }
        self.modified.retain(|field, _| edited_since.contains(field));
        if self.modified.is_empty() {
            self.last_edit = None;
        }

        self.phantom = false;
        match RecordId::from_data(&self.id_properties, &self.data) {
            Some(key) if key != self.key => {
                self.key = key.clone();
                Some(key)
            }
            _ => None,
        }
    }

    /// Values to send for this record: identity fields plus the fields that
    /// changed, or everything when `all_fields` is set or the record is new.
    pub fn write_values(&self, all_fields: bool) -> FieldMap {
        if all_fields || self.phantom {
            return self.data.clone();
        }

        let mut values = FieldMap::new();
        for property in &self.id_properties {
            if let Some(value) = self.data.get(property) {
                values.insert(property.clone(), value.clone());
            }
        }
        for field in self.modified.keys() {
            values.insert(
                field.clone(),
                self.data.get(field).cloned().unwrap_or(Value::Null),
            );
        }
        values
    }

    /// Identity fields only, as sent for destroy and open.
    pub fn identity_values(&self) -> FieldMap {
        self.id_properties
            .iter()
            .filter_map(|p| self.data.get(p).map(|v| (p.clone(), v.clone())))
            .collect()
    }
}
