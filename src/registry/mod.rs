//! Injected directory of live stores and the event funnel across them.

#[cfg(feature = "emitter")]
mod emitter;
mod events;
mod registry;

#[cfg(feature = "emitter")]
pub use emitter::EmitterBridge;
pub use events::RegistryEvent;
pub use registry::{ListenerId, RegistryListener, StoreRegistry};
pub(crate) use registry::WeakRegistry;
