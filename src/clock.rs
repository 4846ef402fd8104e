use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch, as stamped by the transport layer.
pub type Timestamp = u64;

pub fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as Timestamp)
        .unwrap_or(0)
}
