mod identity;
mod record;

pub use identity::RecordId;
pub use record::{FieldMap, Record};
