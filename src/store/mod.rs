//! Keyed, insertion-ordered record caches.
//!
//! A [`Store`] is plain data: every mutation queues [`StoreEvent`]s instead of
//! firing them. [`StoreHandle`] owns the store behind a lock and fans the
//! queued events out to subscribers once the lock is released, so a
//! subscriber may safely reach into other stores.

mod events;
mod handle;
mod notify;
mod options;
mod store;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

pub use events::{ChangeSet, StoreEvent, UpdateOperation};
pub use handle::{StoreHandle, StoreListener, SubscriptionId};
pub(crate) use handle::WeakStore;
pub use options::StoreOptions;
pub use store::{BeforeNotify, Store};

static NEXT_STORE: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StoreId(u64);

impl StoreId {
    pub(crate) fn next() -> Self {
        StoreId(NEXT_STORE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store-{}", self.0)
    }
}
