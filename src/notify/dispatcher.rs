use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::warn;

use super::{NotificationAction, NotifyListener};
use crate::clock::Timestamp;
use crate::guard::isolated;
use crate::record::RecordId;

#[derive(Clone, Debug)]
struct PendingNotification {
    records: Vec<RecordId>,
    data: Value,
}

/// Accumulates one push transaction and replays it grouped by action.
///
/// Groups are delivered in the order their action was first seen, and
/// entries within a group in the order they were added.
pub struct NotificationDispatcher {
    listener: Option<Arc<dyn NotifyListener>>,
    notifications: IndexMap<NotificationAction, Vec<PendingNotification>>,
    received_time: Timestamp,
    module: Option<(String, String)>,
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        NotificationDispatcher {
            listener: None,
            notifications: IndexMap::new(),
            received_time: 0,
            module: None,
        }
    }

    pub fn with_listener(listener: Arc<dyn NotifyListener>) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.set_listener(listener);
        dispatcher
    }

    pub fn set_listener(&mut self, listener: Arc<dyn NotifyListener>) {
        self.listener = Some(listener);
    }

    pub fn has_listener(&self) -> bool {
        self.listener.is_some()
    }

    pub fn received_time(&self) -> Timestamp {
        self.received_time
    }

    /// Number of buffered notifications across all groups.
    pub fn len(&self) -> usize {
        self.notifications.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }

    /// Begin a push transaction. Returns false when `data` is not an object
    /// or there is no listener; the payload must then be dropped.
    pub fn start(&mut self, module_name: &str, module_id: &str, data: &Value, timestamp: Timestamp) -> bool {
        if !data.is_object() {
            warn!(module = module_name, "push body is not an object");
            return false;
        }
        if self.listener.is_none() {
            warn!(module = module_name, "no notify listener configured");
            return false;
        }

        self.notifications.clear();
        self.received_time = timestamp;
        self.module = Some((module_name.to_string(), module_id.to_string()));
        true
    }

    pub fn add_notification(&mut self, action: NotificationAction, records: Vec<RecordId>, data: Value) {
        self.notifications
            .entry(action)
            .or_default()
            .push(PendingNotification { records, data });
    }

    /// Deliver every buffered notification. State is kept until the next
    /// `start`.
    pub fn done(&self, success: bool) {
        let Some(listener) = &self.listener else {
            return;
        };
        for (action, pending) in &self.notifications {
            for notification in pending {
                isolated(action.as_str(), || {
                    listener.on_notify(
                        action,
                        &notification.records,
                        &notification.data,
                        self.received_time,
                        success,
                    )
                });
            }
        }
    }
}
