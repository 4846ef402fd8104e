//! Saves sent as one ordered list request per store.
//!
//! Used for collections whose server semantics depend on seeing the whole
//! list at once, such as rule sets.

mod reader;
mod session;
mod strategy;

pub use reader::BatchReader;
pub use session::{BatchOutcome, BatchPhase, BatchSession};
pub use strategy::BatchStrategy;
