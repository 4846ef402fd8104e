use serde_json::Value;
use tracing::debug;

use super::{Action, RequestCorrelator};
use crate::record::{FieldMap, RecordId};

/// Decodes a response body into correlator calls.
pub trait ResponseReader: Send + Sync {
    /// Feed `body` into a started `correlator`. Returns the success flag to
    /// pass to `done`.
    fn read(&self, body: &Value, correlator: &mut RequestCorrelator) -> bool;
}

/// Reader for per-record item modules.
///
/// Understands `{"item": ..}` (one object or an array), `{"list": [..]}` for
/// listings, `{"error": ..}` (object or array, optionally carrying the
/// record identity) and an explicit `"success": false`.
#[derive(Clone, Copy, Debug, Default)]
pub struct ItemReader;

impl ResponseReader for ItemReader {
    fn read(&self, body: &Value, correlator: &mut RequestCorrelator) -> bool {
        let mut success = body.get("success").and_then(Value::as_bool).unwrap_or(true);

        let errors = objects(body.get("error"));
        if !errors.is_empty() {
            success = false;
        }
        for error in errors {
            let id = correlator.match_item(error).map(|sent| sent.key.clone());
            correlator.add_error(id, error_message(error));
        }

        let action = correlator.action();
        if action == Action::List {
            let items = objects(body.get("list").or_else(|| body.get("item")));
            for item in items {
                correlator.add_listed(item.clone());
            }
            return success;
        }

        let items = objects(body.get("item"));
        let positional = items.len() == correlator.sent().len();
        for (index, item) in items.into_iter().enumerate() {
            let id = correlator
                .match_item(item)
                .or_else(|| positional.then(|| &correlator.sent()[index]))
                .map(|sent| sent.key.clone());
            let Some(id) = id else {
                debug!(request = %correlator.request_id(), "response item matches no sent record");
                continue;
            };
            match action {
                Action::Create => {
                    let mut data = item.clone();
                    data.remove("id");
                    correlator.add_created(id, data)
                }
                Action::Update => correlator.add_updated(id, item.clone()),
                Action::Open => correlator.add_opened(id, item.clone()),
                Action::Destroy => correlator.add_destroyed(id),
                Action::List => {}
            }
        }

        // Update and delete modules may answer with a bare success flag.
        let unreported: Vec<RecordId> = correlator
            .unreported()
            .into_iter()
            .map(|sent| sent.key.clone())
            .collect();
        for id in unreported {
            match action {
                _ if !success => correlator.add_error(Some(id), "not applied"),
                Action::Update => correlator.add_updated(id, FieldMap::new()),
                Action::Destroy => correlator.add_destroyed(id),
                _ => {}
            }
        }
        success
    }
}

pub(crate) fn objects(value: Option<&Value>) -> Vec<&FieldMap> {
    match value {
        Some(Value::Object(map)) => vec![map],
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_object).collect(),
        _ => Vec::new(),
    }
}

pub(crate) fn error_message(error: &FieldMap) -> String {
    ["message", "display_message", "info"]
        .iter()
        .find_map(|field| error.get(*field).and_then(Value::as_str))
        .unwrap_or("request failed")
        .to_string()
}
