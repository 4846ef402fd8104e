use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use super::{NotificationAction, NotificationDispatcher};
use crate::record::RecordId;

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(RecordId),
    Many(Vec<RecordId>),
}

impl Default for OneOrMany {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl From<OneOrMany> for Vec<RecordId> {
    fn from(records: OneOrMany) -> Self {
        match records {
            OneOrMany::One(id) => vec![id],
            OneOrMany::Many(ids) => ids,
        }
    }
}

#[derive(Deserialize)]
struct PushItem {
    action: NotificationAction,
    #[serde(default)]
    records: OneOrMany,
    #[serde(default)]
    data: Value,
}

/// Feed the `notifications` list of a started push body into `dispatcher`.
///
/// Items that cannot be decoded are logged and skipped. Returns the number
/// of notifications added.
pub fn decode_push(dispatcher: &mut NotificationDispatcher, body: &Value) -> usize {
    let Some(items) = body.get("notifications").and_then(Value::as_array) else {
        warn!("push body has no notifications list");
        return 0;
    };

    let mut added = 0;
    for (index, item) in items.iter().enumerate() {
        match PushItem::deserialize(item) {
            Ok(item) => {
                dispatcher.add_notification(item.action, item.records.into(), item.data);
                added += 1;
            }
            Err(err) => warn!(index, %err, "skipping undecodable notification"),
        }
    }
    added
}
