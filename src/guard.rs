use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::error;

/// Run a callback supplied by another component, containing any panic so the
/// caller can carry on with its remaining listeners.
pub(crate) fn isolated<F: FnOnce()>(context: &str, callback: F) -> bool {
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(()) => true,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            error!(context, %message, "listener panicked");
            false
        }
    }
}
