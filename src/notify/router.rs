use std::borrow::Cow;

use serde_json::Value;
use tracing::{debug, error};

use super::{NotificationAction, NotifyListener};
use crate::clock::Timestamp;
use crate::record::RecordId;
use crate::registry::StoreRegistry;
use crate::store::StoreHandle;

/// Listener that routes each notification to the registered stores it
/// concerns.
///
/// Creations go to the stores mirroring the parent collection named in the
/// data; everything else goes to the stores holding one of the records.
#[derive(Clone, Debug)]
pub struct StoreNotifier {
    registry: StoreRegistry,
}

impl StoreNotifier {
    pub fn new(registry: StoreRegistry) -> Self {
        StoreNotifier { registry }
    }

    /// Stores to notify, each with the part of `data` it should see.
    fn targets<'a>(
        &self,
        action: &NotificationAction,
        records: &[RecordId],
        data: &'a Value,
    ) -> Vec<(StoreHandle, Cow<'a, Value>)> {
        if *action != NotificationAction::ObjectCreated {
            return self
                .registry
                .stores_containing(records)
                .into_iter()
                .map(|store| (store, Cow::Borrowed(data)))
                .collect();
        }

        let items: Vec<&Value> = match data {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
        self.registry
            .stores()
            .into_iter()
            .filter_map(|store| {
                let options = store.options();
                let collection = options.collection.as_deref()?;
                let created: Vec<Value> = items
                    .iter()
                    .filter(|item| item.get(&options.parent_field).and_then(Value::as_str) == Some(collection))
                    .map(|item| (*item).clone())
                    .collect();
                let payload = match data {
                    _ if created.is_empty() => return None,
                    Value::Array(_) => Cow::Owned(Value::Array(created)),
                    single => Cow::Borrowed(single),
                };
                Some((store, payload))
            })
            .collect()
    }
}

impl NotifyListener for StoreNotifier {
    fn on_notify(
        &self,
        action: &NotificationAction,
        records: &[RecordId],
        data: &Value,
        received: Timestamp,
        success: bool,
    ) {
        let stores = self.targets(action, records, data);
        if stores.is_empty() {
            debug!(%action, records = records.len(), "no registered store holds the notified records");
            return;
        }

        for (store, data) in stores {
            if let Err(err) = store.with(|s| s.on_notify(action, records, &data, received, success)) {
                error!(store = %store.id(), %err, "cannot apply notification");
            }
        }
    }
}
