//! Cooperative event loop connecting stores, the transport and server pushes.

mod config;
mod session;

pub use config::SessionConfig;
pub use session::{RequestStatus, Session};
