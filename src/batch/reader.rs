use serde_json::Value;

use crate::record::FieldMap;
use crate::request::{error_message, Action, RequestCorrelator, ResponseReader};

/// Reads the answer to a batch request.
///
/// `items` lists one result per sent record, in sending order, each with
/// its own `success` flag, optional `item` data and optional `error`. A
/// sent record without a result entry is reported as failed. The exchange
/// succeeds only when every record did.
#[derive(Clone, Copy, Debug, Default)]
pub struct BatchReader;

impl ResponseReader for BatchReader {
    fn read(&self, body: &Value, correlator: &mut RequestCorrelator) -> bool {
        let mut success = body.get("success").and_then(Value::as_bool).unwrap_or(true);
        if let Some(error) = body.get("error") {
            success = false;
            let message = error
                .as_object()
                .map(error_message)
                .unwrap_or_else(|| error.as_str().unwrap_or("batch rejected").to_string());
            correlator.add_error(None, message);
        }

        let results = body
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let sent: Vec<_> = correlator
            .sent()
            .iter()
            .map(|s| (s.key.clone(), s.phantom))
            .collect();

        for (index, (id, phantom)) in sent.into_iter().enumerate() {
            let Some(result) = results.get(index) else {
                success = false;
                correlator.add_error(Some(id), "missing from batch response");
                continue;
            };

            let applied = result.get("success").and_then(Value::as_bool).unwrap_or(true)
                && result.get("error").is_none();
            if !applied {
                success = false;
                let message = match result.get("error") {
                    Some(Value::String(message)) => message.clone(),
                    Some(Value::Object(error)) => error_message(error),
                    _ => "rejected".to_string(),
                };
                correlator.add_error(Some(id), message);
                continue;
            }

            let data: FieldMap = result
                .get("item")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            match correlator.action() {
                Action::Destroy => correlator.add_destroyed(id),
                Action::Open => correlator.add_opened(id, data),
                _ if phantom => correlator.add_created(id, data),
                _ => correlator.add_updated(id, data),
            }
        }

        if correlator.action() == Action::Open {
            for item in results.iter().filter_map(Value::as_object) {
                correlator.add_listed(item.clone());
            }
        }
        success
    }
}
