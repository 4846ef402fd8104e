//! Client-side record caches kept consistent with a server.
//!
//! Stores hold dirty-tracked records, the registry routes their events and
//! cross-store updates, and a [`Session`] drives requests, response
//! correlation and server pushes on a single cooperative event loop.

pub mod batch;
mod clock;
mod error;
mod guard;
pub mod notify;
mod record;
pub mod registry;
pub mod request;
pub mod session;
pub mod store;

pub use batch::{BatchOutcome, BatchPhase, BatchSession, BatchStrategy};
pub use clock::{now_millis, Timestamp};
pub use error::{SyncError, TransportError};
pub use notify::{NotificationAction, NotificationDispatcher, NotifyListener, StoreNotifier};
pub use record::{FieldMap, Record, RecordId};
pub use registry::{RegistryEvent, StoreRegistry};
pub use request::{
    Action, ExchangeResult, InMemoryTransport, Outcome, RequestCorrelator, RequestId, Transport,
};
pub use session::{Session, SessionConfig};
pub use store::{ChangeSet, Store, StoreEvent, StoreHandle, StoreId, StoreOptions};

#[cfg(feature = "emitter")]
pub use registry::EmitterBridge;

// Re-export the EventEmitter from the event_emitter_rs crate
#[cfg(feature = "emitter")]
pub use event_emitter_rs::EventEmitter;
