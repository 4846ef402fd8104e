//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};

use cache_sync::{
    FieldMap, InMemoryTransport, Record, RecordId, RegistryEvent, Session, StoreHandle,
    StoreOptions, StoreRegistry,
};
use serde_json::{json, Value};

static TRACING: Once = Once::new();

/// Route library logs to the test harness. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn map(value: Value) -> FieldMap {
    value.as_object().cloned().unwrap_or_default()
}

pub fn id(key: &str) -> RecordId {
    RecordId::new(key)
}

/// A registry, a recording transport and a session wired together.
pub struct Harness {
    pub registry: StoreRegistry,
    pub transport: InMemoryTransport,
    pub session: Session,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        let registry = StoreRegistry::new();
        let transport = InMemoryTransport::new();
        let session = Session::new(registry.clone(), Arc::new(transport.clone()));
        Harness {
            registry,
            transport,
            session,
        }
    }

    /// A registered store pre-loaded with persisted records.
    pub fn store(&self, options: StoreOptions, records: &[Value]) -> StoreHandle {
        let store = self.registry.create_store(options);
        seed(&store, records);
        store
    }

    pub fn mail_store(&self, ids: &[&str]) -> StoreHandle {
        let records: Vec<Value> = ids
            .iter()
            .map(|id| json!({"entryid": id, "subject": format!("subject {}", id)}))
            .collect();
        self.store(StoreOptions::new("mail"), &records)
    }
}

pub fn seed(store: &StoreHandle, records: &[Value]) {
    let id_properties = store.options().id_properties.clone();
    store
        .with(|s| {
            let records = records
                .iter()
                .map(|data| Record::from_server(id_properties.clone(), map(data.clone())).unwrap())
                .collect();
            s.load(records);
        })
        .unwrap();
}

pub fn set(store: &StoreHandle, key: &str, field: &str, value: Value) {
    store
        .with(|s| s.set(&id(key), field, value))
        .unwrap()
        .unwrap();
}

pub fn set_at(store: &StoreHandle, key: &str, field: &str, value: Value, at: u64) {
    store
        .with(|s| s.set_at(&id(key), field, value, at))
        .unwrap()
        .unwrap();
}

pub fn field(store: &StoreHandle, key: &str, field: &str) -> Option<Value> {
    store
        .get(&id(key))
        .unwrap()
        .and_then(|record| record.get(field).cloned())
}

pub fn is_dirty(store: &StoreHandle, key: &str) -> bool {
    store
        .get(&id(key))
        .unwrap()
        .map(|record| record.is_dirty())
        .unwrap_or(false)
}

/// Collects the names of registry events in delivery order.
pub fn record_events(registry: &StoreRegistry) -> Arc<Mutex<Vec<RegistryEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    registry.subscribe(Arc::new(move |event: &RegistryEvent| {
        sink.lock().unwrap().push(event.clone());
    }));
    seen
}

pub fn names(events: &Arc<Mutex<Vec<RegistryEvent>>>) -> Vec<&'static str> {
    events.lock().unwrap().iter().map(|e| e.name()).collect()
}
