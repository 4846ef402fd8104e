//! Server push handling: grouping notifications per transaction and
//! delivering them to a listener.

mod dispatcher;
mod push;
mod router;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Timestamp;
use crate::record::RecordId;

pub use dispatcher::NotificationDispatcher;
pub use push::decode_push;
pub use router::StoreNotifier;

/// Kind of server push.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationAction {
    ObjectCreated,
    ObjectModified,
    ObjectDeleted,
    Other(String),
}

impl NotificationAction {
    pub fn as_str(&self) -> &str {
        match self {
            NotificationAction::ObjectCreated => "objectCreated",
            NotificationAction::ObjectModified => "objectModified",
            NotificationAction::ObjectDeleted => "objectDeleted",
            NotificationAction::Other(name) => name,
        }
    }
}

impl From<String> for NotificationAction {
    fn from(name: String) -> Self {
        match name.as_str() {
            "objectCreated" => NotificationAction::ObjectCreated,
            "objectModified" => NotificationAction::ObjectModified,
            "objectDeleted" => NotificationAction::ObjectDeleted,
            _ => NotificationAction::Other(name),
        }
    }
}

impl From<&str> for NotificationAction {
    fn from(name: &str) -> Self {
        NotificationAction::from(name.to_string())
    }
}

impl From<NotificationAction> for String {
    fn from(action: NotificationAction) -> Self {
        action.as_str().to_string()
    }
}

impl fmt::Display for NotificationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver of grouped notifications.
pub trait NotifyListener: Send + Sync {
    fn on_notify(
        &self,
        action: &NotificationAction,
        records: &[RecordId],
        data: &Value,
        received: Timestamp,
        success: bool,
    );
}

impl<F> NotifyListener for F
where
    F: Fn(&NotificationAction, &[RecordId], &Value, Timestamp, bool) + Send + Sync,
{
    fn on_notify(
        &self,
        action: &NotificationAction,
        records: &[RecordId],
        data: &Value,
        received: Timestamp,
        success: bool,
    ) {
        self(action, records, data, received, success)
    }
}
