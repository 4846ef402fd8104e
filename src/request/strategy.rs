use std::sync::Arc;

use serde_json::{json, Value};

use super::{Action, ItemReader, ResponseReader, SentRecord};
use crate::record::Record;
use crate::store::StoreOptions;

/// One request to put on the wire, and the records it carries.
#[derive(Clone, Debug)]
pub struct RequestPlan {
    pub module: String,
    pub action: Action,
    pub payload: Value,
    pub records: Vec<SentRecord>,
}

impl RequestPlan {
    /// A listing of the store's collection.
    pub fn list(options: &StoreOptions, params: Value) -> Self {
        let mut payload = json!({ "collection": options.collection });
        if let (Value::Object(target), Value::Object(extra)) = (&mut payload, params) {
            target.extend(extra);
        }
        RequestPlan {
            module: options.list_module.clone(),
            action: Action::List,
            payload,
            records: Vec::new(),
        }
    }
}

/// Turns store mutations into requests and knows how to read the answers.
pub trait RequestStrategy: Send + Sync {
    /// Whether saves go out as one request holding the full record list.
    fn is_batched(&self) -> bool {
        false
    }

    fn plan(&self, action: Action, records: &[Record], options: &StoreOptions) -> Vec<RequestPlan>;

    fn reader(&self) -> Arc<dyn ResponseReader>;
}

/// One request per record, sent to the store's item module.
#[derive(Clone, Copy, Debug, Default)]
pub struct PerRecordStrategy;

impl RequestStrategy for PerRecordStrategy {
    fn plan(&self, action: Action, records: &[Record], options: &StoreOptions) -> Vec<RequestPlan> {
        records
            .iter()
            .map(|record| {
                let values = match action {
                    Action::Create | Action::Update => record.write_values(options.write_all_fields),
                    Action::Destroy | Action::Open | Action::List => record.identity_values(),
                };
                let mut payload = json!({ "props": values });
                if record.is_phantom() {
                    payload["id"] = Value::String(record.key().to_string());
                }
                RequestPlan {
                    module: options.item_module.clone(),
                    action,
                    payload,
                    records: vec![SentRecord::new(record, values)],
                }
            })
            .collect()
    }

    fn reader(&self) -> Arc<dyn ResponseReader> {
        Arc::new(ItemReader)
    }
}
