use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use indexmap::IndexMap;
use tracing::{debug, error};

use super::RegistryEvent;
use crate::guard::isolated;
use crate::record::{Record, RecordId};
use crate::request::Action;
use crate::store::{ChangeSet, StoreEvent, StoreHandle, StoreId, StoreOptions, SubscriptionId, WeakStore};

pub type RegistryListener = Arc<dyn Fn(&RegistryEvent) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    store: WeakStore,
    server_only: bool,
    subscription: SubscriptionId,
}

pub(crate) struct RegistryInner {
    stores: RwLock<IndexMap<StoreId, Registration>>,
    listeners: RwLock<Vec<(ListenerId, RegistryListener)>>,
    next_listener: AtomicU64,
}

/// Directory of live, non-standalone stores.
///
/// Rebroadcasts each registered store's lifecycle events to registry
/// listeners and forwards saves and writes to the other stores so their
/// copies stay consistent. Clones share the same directory; independent
/// registries can coexist.
#[derive(Clone)]
pub struct StoreRegistry {
    inner: Arc<RegistryInner>,
}

/// Back-reference from a store to the registry it belongs to.
#[derive(Clone)]
pub(crate) struct WeakRegistry(Weak<RegistryInner>);

impl WeakRegistry {
    pub(crate) fn upgrade(&self) -> Option<StoreRegistry> {
        self.0.upgrade().map(|inner| StoreRegistry { inner })
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("stores", &self.len())
            .finish()
    }
}

impl StoreRegistry {
    pub fn new() -> Self {
        StoreRegistry {
            inner: Arc::new(RegistryInner {
                stores: RwLock::new(IndexMap::new()),
                listeners: RwLock::new(Vec::new()),
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    /// Build a store and register it unless it is standalone.
    pub fn create_store(&self, options: StoreOptions) -> StoreHandle {
        let store = StoreHandle::new(options);
        self.register(&store);
        store
    }

    /// Add a store. Returns false when the store is standalone, destroyed or
    /// already registered.
    pub fn register(&self, store: &StoreHandle) -> bool {
        if store.is_standalone() {
            debug!(store = %store.id(), "standalone store not registered");
            return false;
        }
        if store.is_destroyed() {
            return false;
        }

        let mut stores = match self.inner.stores.write() {
            Ok(stores) => stores,
            Err(_) => {
                error!(store = %store.id(), "registry poisoned, store not registered");
                return false;
            }
        };
        if stores.contains_key(&store.id()) {
            return false;
        }

        let weak = Arc::downgrade(&self.inner);
        let server_only = store.is_server_only();
        let subscription = match store.subscribe(Arc::new(move |origin: StoreId, event: &StoreEvent| {
            if let Some(inner) = weak.upgrade() {
                StoreRegistry { inner }.route(origin, event, server_only);
            }
        })) {
            Ok(subscription) => subscription,
            Err(err) => {
                error!(store = %store.id(), %err, "cannot subscribe to store");
                return false;
            }
        };

        stores.insert(
            store.id(),
            Registration {
                store: store.downgrade(),
                server_only,
                subscription,
            },
        );
        drop(stores);

        store.attach_registry(WeakRegistry(Arc::downgrade(&self.inner)));
        debug!(store = %store.id(), server_only, "store registered");
        true
    }

    /// Remove a store and detach its subscription. Safe to call repeatedly.
    pub fn unregister(&self, store: &StoreHandle) -> bool {
        let removed = self.remove_registration(store.id());
        if let Some(registration) = &removed {
            detach(store, registration);
        }
        removed.is_some()
    }

    /// Like [`unregister`](Self::unregister), by id.
    pub fn unregister_id(&self, id: StoreId) -> bool {
        match self.remove_registration(id) {
            Some(registration) => {
                if let Some(store) = registration.store.upgrade() {
                    detach(&store, &registration);
                }
                true
            }
            None => false,
        }
    }

    pub fn is_registered(&self, id: StoreId) -> bool {
        self.inner
            .stores
            .read()
            .map(|stores| stores.contains_key(&id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inner.stores.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: StoreId) -> Option<StoreHandle> {
        self.inner
            .stores
            .read()
            .ok()?
            .get(&id)
            .and_then(|registration| registration.store.upgrade())
    }

    /// Live registered stores, in registration order.
    pub fn stores(&self) -> Vec<StoreHandle> {
        match self.inner.stores.read() {
            Ok(stores) => stores.values().filter_map(|r| r.store.upgrade()).collect(),
            Err(_) => {
                error!("registry poisoned");
                Vec::new()
            }
        }
    }

    pub fn each(&self, mut f: impl FnMut(&StoreHandle)) {
        for store in self.stores() {
            f(&store);
        }
    }

    /// Registered stores holding at least one of `ids`.
    pub fn stores_containing(&self, ids: &[RecordId]) -> Vec<StoreHandle> {
        self.stores()
            .into_iter()
            .filter(|store| {
                store
                    .read(|s| ids.iter().any(|id| s.contains(id)))
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn subscribe(&self, listener: RegistryListener) -> ListenerId {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        match self.inner.listeners.write() {
            Ok(mut listeners) => listeners.push((id, listener)),
            Err(_) => error!("registry listeners poisoned, listener dropped"),
        }
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        match self.inner.listeners.write() {
            Ok(mut listeners) => {
                let before = listeners.len();
                listeners.retain(|(existing, _)| *existing != id);
                listeners.len() != before
            }
            Err(_) => false,
        }
    }

    /// Announce changes `origin` is about to send, and apply them to every
    /// other store that may hold the same records. Server-only stores are
    /// skipped.
    pub fn route_before_record_save(&self, origin: StoreId, changes: &ChangeSet) {
        let changes = changes.propagatable();
        if changes.is_empty() {
            return;
        }

        self.broadcast(&RegistryEvent::BeforeRecordSave {
            store: origin,
            changes: changes.clone(),
        });
        for (store, server_only) in self.others(origin) {
            if server_only {
                continue;
            }
            isolated("beforerecordsave", || {
                if let Err(err) = store.with(|s| s.on_external_save(origin, &changes)) {
                    error!(store = %store.id(), %err, "cannot apply external save");
                }
            });
        }
    }

    /// Announce records `origin` has written, and mirror them into every
    /// other store.
    pub fn route_after_record_write(&self, origin: StoreId, action: Action, records: &[Record]) {
        let records: Vec<Record> = records
            .iter()
            .filter(|r| r.has_event_propagation())
            .cloned()
            .collect();
        if records.is_empty() {
            return;
        }

        self.broadcast(&RegistryEvent::AfterRecordWrite {
            store: origin,
            action,
            records: records.clone(),
        });
        for (store, _) in self.others(origin) {
            isolated("afterrecordwrite", || {
                if let Err(err) = store.with(|s| s.on_external_write(origin, action, &records)) {
                    error!(store = %store.id(), %err, "cannot apply external write");
                }
            });
        }
    }

    fn route(&self, origin: StoreId, event: &StoreEvent, server_only: bool) {
        match event {
            StoreEvent::Write { action, records } => {
                self.route_after_record_write(origin, *action, records)
            }
            StoreEvent::Exception {
                action,
                error,
                records,
            } => self.broadcast(&RegistryEvent::StoreException {
                store: origin,
                action: *action,
                error: error.clone(),
                records: records.clone(),
            }),
            // Server-only stores hold confirmed state only; nothing else of
            // theirs is routed.
            _ if server_only => {}
            StoreEvent::BeforeSave { changes } => self.route_before_record_save(origin, changes),
            StoreEvent::Save { action, records } => {
                let records: Vec<Record> = records
                    .iter()
                    .filter(|r| r.has_event_propagation())
                    .cloned()
                    .collect();
                if !records.is_empty() {
                    self.broadcast(&RegistryEvent::AfterRecordSave {
                        store: origin,
                        action: *action,
                        records,
                    });
                }
            }
            StoreEvent::Update { record, operation } if record.has_event_propagation() => {
                self.broadcast(&RegistryEvent::AfterRecordUpdate {
                    store: origin,
                    record: record.clone(),
                    operation: *operation,
                })
            }
            StoreEvent::Remove { record } if record.has_event_propagation() => {
                self.broadcast(&RegistryEvent::RecordRemove {
                    store: origin,
                    record: record.clone(),
                })
            }
            _ => {}
        }
    }

    fn broadcast(&self, event: &RegistryEvent) {
        let listeners: Vec<RegistryListener> = match self.inner.listeners.read() {
            Ok(listeners) => listeners.iter().map(|(_, l)| l.clone()).collect(),
            Err(_) => {
                error!(event = event.name(), "registry listeners poisoned");
                return;
            }
        };
        for listener in &listeners {
            isolated(event.name(), || listener(event));
        }
    }

    fn others(&self, origin: StoreId) -> Vec<(StoreHandle, bool)> {
        match self.inner.stores.read() {
            Ok(stores) => stores
                .iter()
                .filter(|(id, _)| **id != origin)
                .filter_map(|(_, r)| r.store.upgrade().map(|s| (s, r.server_only)))
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    fn remove_registration(&self, id: StoreId) -> Option<Registration> {
        match self.inner.stores.write() {
            Ok(mut stores) => stores.shift_remove(&id),
            Err(_) => {
                error!(store = %id, "registry poisoned, store not unregistered");
                None
            }
        }
    }
}

fn detach(store: &StoreHandle, registration: &Registration) {
    if let Err(err) = store.unsubscribe(registration.subscription) {
        error!(store = %store.id(), %err, "cannot detach store subscription");
    }
    store.detach_registry();
}
