use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use tracing::{debug, error};

use super::{Store, StoreEvent, StoreId, StoreOptions};
use crate::error::SyncError;
use crate::guard::isolated;
use crate::record::{Record, RecordId};
use crate::registry::WeakRegistry;

/// Callback receiving every event a store emits.
pub type StoreListener = Arc<dyn Fn(StoreId, &StoreEvent) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Shared {
    id: StoreId,
    options: StoreOptions,
    store: Mutex<Store>,
    subscribers: RwLock<Vec<(SubscriptionId, StoreListener)>>,
    next_subscription: AtomicU64,
    registry: Mutex<Option<WeakRegistry>>,
    destroyed: AtomicBool,
}

/// Shared handle to a store. Clones refer to the same store.
#[derive(Clone)]
pub struct StoreHandle {
    shared: Arc<Shared>,
}

impl fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreHandle")
            .field("id", &self.shared.id)
            .field("name", &self.shared.options.name)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl PartialEq for StoreHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl StoreHandle {
    pub fn new(options: StoreOptions) -> Self {
        let store = Store::new(options.clone());
        StoreHandle {
            shared: Arc::new(Shared {
                id: store.id(),
                options,
                store: Mutex::new(store),
                subscribers: RwLock::new(Vec::new()),
                next_subscription: AtomicU64::new(1),
                registry: Mutex::new(None),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> StoreId {
        self.shared.id
    }

    pub fn options(&self) -> &StoreOptions {
        &self.shared.options
    }

    pub fn is_standalone(&self) -> bool {
        self.shared.options.standalone
    }

    pub fn is_server_only(&self) -> bool {
        self.shared.options.server_only
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.destroyed.load(Ordering::Acquire)
    }

    /// Inspect the store without emitting anything.
    pub fn read<R>(&self, f: impl FnOnce(&Store) -> R) -> Result<R, SyncError> {
        let store = self
            .shared
            .store
            .lock()
            .map_err(|_| SyncError::LockPoisoned("store read"))?;
        Ok(f(&store))
    }

    /// Mutate the store, then deliver the events it queued once the lock is
    /// released.
    pub fn with<R>(&self, f: impl FnOnce(&mut Store) -> R) -> Result<R, SyncError> {
        let (result, events) = {
            let mut store = self
                .shared
                .store
                .lock()
                .map_err(|_| SyncError::LockPoisoned("store write"))?;
            let result = f(&mut store);
            (result, store.take_events())
        };
        self.dispatch(events);
        Ok(result)
    }

    pub fn get(&self, key: &RecordId) -> Result<Option<Record>, SyncError> {
        self.read(|store| store.get(key).cloned())
    }

    pub fn contains(&self, key: &RecordId) -> bool {
        self.read(|store| store.contains(key)).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.read(|store| store.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self, listener: StoreListener) -> Result<SubscriptionId, SyncError> {
        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.shared
            .subscribers
            .write()
            .map_err(|_| SyncError::LockPoisoned("subscribe"))?
            .push((id, listener));
        Ok(id)
    }

    pub fn unsubscribe(&self, subscription: SubscriptionId) -> Result<bool, SyncError> {
        let mut subscribers = self
            .shared
            .subscribers
            .write()
            .map_err(|_| SyncError::LockPoisoned("unsubscribe"))?;
        let before = subscribers.len();
        subscribers.retain(|(id, _)| *id != subscription);
        Ok(subscribers.len() != before)
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared
            .subscribers
            .read()
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }

    /// Tear the store down and leave the registry it belongs to. Safe to
    /// call more than once.
    pub fn destroy(&self) {
        if self.shared.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(mut store) = self.shared.store.lock() {
            store.mark_destroyed();
        }

        let registry = self
            .shared
            .registry
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .and_then(|weak| weak.upgrade());
        if let Some(registry) = registry {
            registry.unregister(self);
        }
        debug!(store = %self.id(), "store destroyed");
    }

    pub(crate) fn downgrade(&self) -> WeakStore {
        WeakStore(Arc::downgrade(&self.shared))
    }

    pub(crate) fn attach_registry(&self, registry: WeakRegistry) {
        if let Ok(mut slot) = self.shared.registry.lock() {
            *slot = Some(registry);
        }
    }

    pub(crate) fn detach_registry(&self) {
        if let Ok(mut slot) = self.shared.registry.lock() {
            *slot = None;
        }
    }

    fn dispatch(&self, events: Vec<StoreEvent>) {
        if events.is_empty() {
            return;
        }
        let listeners: Vec<StoreListener> = match self.shared.subscribers.read() {
            Ok(subscribers) => subscribers.iter().map(|(_, l)| l.clone()).collect(),
            Err(_) => {
                error!(store = %self.id(), "subscriber list poisoned, dropping events");
                return;
            }
        };

        let id = self.id();
        for event in &events {
            for listener in &listeners {
                isolated(event.name(), || listener(id, event));
            }
        }
    }
}

/// Non-owning reference to a store, as held by the registry.
#[derive(Clone)]
pub(crate) struct WeakStore(Weak<Shared>);

impl WeakStore {
    pub(crate) fn upgrade(&self) -> Option<StoreHandle> {
        self.0.upgrade().map(|shared| StoreHandle { shared })
    }
}
