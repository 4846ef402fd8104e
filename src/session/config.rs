use serde::{Deserialize, Serialize};

use crate::error::SyncError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Prepended to every module name put on the wire.
    pub module_prefix: String,
    /// Cancel a store's outstanding `list` (or an `open` of the same record)
    /// when a new one is issued.
    pub cancel_previous_reads: bool,
    /// Upper bound on turns a single `run_until_idle` call processes.
    pub max_turns_per_run: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            module_prefix: String::new(),
            cancel_previous_reads: true,
            max_turns_per_run: 10_000,
        }
    }
}

impl SessionConfig {
    pub fn from_json(json: &str) -> Result<Self, SyncError> {
        let config: SessionConfig =
            serde_json::from_str(json).map_err(|err| SyncError::Config(err.to_string()))?;
        if config.max_turns_per_run == 0 {
            return Err(SyncError::Config("max_turns_per_run must be positive".to_string()));
        }
        Ok(config)
    }

    pub fn with_module_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.module_prefix = prefix.into();
        self
    }

    pub fn with_cancel_previous_reads(mut self, cancel: bool) -> Self {
        self.cancel_previous_reads = cancel;
        self
    }

    pub fn with_max_turns_per_run(mut self, turns: usize) -> Self {
        self.max_turns_per_run = turns;
        self
    }
}
