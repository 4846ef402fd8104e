use std::sync::{Arc, Mutex};

use event_emitter_rs::EventEmitter;
use tracing::error;

use super::{ListenerId, RegistryEvent, StoreRegistry};

/// Forwards registry events to an [`EventEmitter`] as JSON strings, keyed by
/// [`RegistryEvent::name`].
#[derive(Clone)]
pub struct EmitterBridge {
    emitter: Arc<Mutex<EventEmitter>>,
}

impl Default for EmitterBridge {
    fn default() -> Self {
        Self::new(EventEmitter::new())
    }
}

impl EmitterBridge {
    pub fn new(emitter: EventEmitter) -> Self {
        EmitterBridge {
            emitter: Arc::new(Mutex::new(emitter)),
        }
    }

    /// Register a listener for an event name such as `"afterrecordwrite"`.
    pub fn on<F>(&self, event: &str, listener: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        match self.emitter.lock() {
            Ok(mut emitter) => {
                emitter.on(event, listener);
            }
            Err(_) => error!(event, "emitter poisoned, listener dropped"),
        }
    }

    pub fn attach(&self, registry: &StoreRegistry) -> ListenerId {
        let emitter = self.emitter.clone();
        registry.subscribe(Arc::new(move |event: &RegistryEvent| {
            let payload = match serde_json::to_string(event) {
                Ok(payload) => payload,
                Err(err) => {
                    error!(event = event.name(), %err, "cannot encode registry event");
                    return;
                }
            };
            match emitter.lock() {
                Ok(mut emitter) => {
                    emitter.emit(event.name(), payload);
                }
                Err(_) => error!(event = event.name(), "emitter poisoned"),
            }
        }))
    }
}
