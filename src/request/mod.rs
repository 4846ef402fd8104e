//! Outgoing requests and the correlation of their responses.
//!
//! A [`RequestStrategy`] turns store mutations into [`RequestPlan`]s, a
//! [`Transport`] sends them, and a [`RequestCorrelator`] paired with a
//! [`ResponseReader`] turns the answer back into an [`ExchangeResult`] for
//! the originating store.

mod correlator;
mod queue;
mod reader;
mod result;
mod strategy;
mod transport;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

pub use correlator::{CompletionTarget, RequestCorrelator, SentRecord};
pub use queue::IdentityQueue;
pub use reader::{ItemReader, ResponseReader};
pub(crate) use reader::error_message;
pub use result::{ExchangeResult, Outcome, ResultEntry};
pub use strategy::{PerRecordStrategy, RequestPlan, RequestStrategy};
pub use transport::{InMemoryTransport, OutgoingRequest, Transport};

static NEXT_REQUEST: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Create,
    Update,
    Destroy,
    Open,
    List,
}

impl Action {
    /// Mutations are serialized per record identity; reads are not.
    pub fn is_mutating(self) -> bool {
        matches!(self, Action::Create | Action::Update | Action::Destroy)
    }

    /// Action name understood by the server module.
    pub fn server_action(self) -> &'static str {
        match self {
            Action::Create | Action::Update => "save",
            Action::Destroy => "delete",
            Action::Open => "open",
            Action::List => "list",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Create => "create",
            Action::Update => "update",
            Action::Destroy => "destroy",
            Action::Open => "open",
            Action::List => "list",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    pub fn new(id: u64) -> Self {
        RequestId(id)
    }

    pub(crate) fn next() -> Self {
        RequestId(NEXT_REQUEST.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}
