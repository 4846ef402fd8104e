use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::FieldMap;

static NEXT_PHANTOM: AtomicU64 = AtomicU64::new(1);

/// Key of a record within a store: the concatenation of its identity fields.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        RecordId(id.into())
    }

    /// A client-side key for a record the server has not created yet.
    pub fn phantom() -> Self {
        let seq = NEXT_PHANTOM.fetch_add(1, Ordering::Relaxed);
        RecordId(format!("phantom-{}", seq))
    }

    /// Build the key from the identity fields present in `data`.
    ///
    /// Returns `None` when any identity field is missing or null.
    pub fn from_data(id_properties: &[String], data: &FieldMap) -> Option<Self> {
        if id_properties.is_empty() {
            return None;
        }

        let mut parts = Vec::with_capacity(id_properties.len());
        for property in id_properties {
            match data.get(property) {
                None | Some(Value::Null) => return None,
                Some(Value::String(s)) => parts.push(s.clone()),
                Some(other) => parts.push(other.to_string()),
            }
        }
        Some(RecordId(parts.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_phantom(&self) -> bool {
        self.0.starts_with("phantom-")
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        RecordId::new(id)
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        RecordId(id)
    }
}
