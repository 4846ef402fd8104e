use thiserror::Error;

use crate::record::RecordId;
use crate::store::StoreId;

/// Failure raised by the transport layer for a single request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("request timed out")]
    Timeout,
    #[error("request rejected: {0}")]
    Rejected(String),
    #[error("request cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("lock poisoned during {0}")]
    LockPoisoned(&'static str),
    #[error("identity field {field} of record {record} cannot change once persisted")]
    IdentityImmutable { record: RecordId, field: String },
    #[error("record {0} already exists in this store")]
    DuplicateRecord(RecordId),
    #[error("record {0} not found")]
    RecordNotFound(RecordId),
    #[error("a batch for store {store} is still being sent")]
    BatchInFlight { store: StoreId },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}
