use std::sync::Arc;

use serde_json::{json, Map, Value};

use super::BatchReader;
use crate::record::Record;
use crate::request::{Action, RequestPlan, RequestStrategy, ResponseReader, SentRecord};
use crate::store::StoreOptions;

/// Wraps every record of a save into a single request keyed by the owning
/// collection. An empty record list still produces a request carrying only
/// the collection, meaning "nothing remains".
#[derive(Clone, Copy, Debug, Default)]
pub struct BatchStrategy;

impl RequestStrategy for BatchStrategy {
    fn is_batched(&self) -> bool {
        true
    }

    fn plan(&self, action: Action, records: &[Record], options: &StoreOptions) -> Vec<RequestPlan> {
        let mut payload = Map::new();
        payload.insert("collection".to_string(), json!(options.collection));

        let mut sent = Vec::with_capacity(records.len());
        if !records.is_empty() && action != Action::Open {
            let items: Vec<Value> = records
                .iter()
                .map(|record| {
                    let values = match action {
                        Action::Destroy => record.identity_values(),
                        _ => record.write_values(true),
                    };
                    sent.push(SentRecord::new(record, values.clone()));
                    Value::Object(values)
                })
                .collect();
            payload.insert("items".to_string(), Value::Array(items));
        }

        vec![RequestPlan {
            module: options.list_module.clone(),
            action,
            payload: Value::Object(payload),
            records: sent,
        }]
    }

    fn reader(&self) -> Arc<dyn ResponseReader> {
        Arc::new(BatchReader)
    }
}
