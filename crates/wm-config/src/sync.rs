//! Sync engine tuning.

use serde::{Deserialize, Serialize};

/// Checkpoints older than this are never resumed (one hour).
const fn default_checkpoint_max_age_secs() -> u64 {
    3600
}

/// Default number of history entries shown by status views.
const fn default_history_limit() -> usize {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    /// Maximum age, in seconds, of a checkpoint that may still be resumed.
    #[serde(default = "default_checkpoint_max_age_secs")]
    pub checkpoint_max_age_secs: u64,

    /// Default `limit` for sync history queries.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Tolerate dependencies that are not part of the sync batch.
    #[serde(default)]
    pub allow_missing_dependencies: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            checkpoint_max_age_secs: default_checkpoint_max_age_secs(),
            history_limit: default_history_limit(),
            allow_missing_dependencies: false,
        }
    }
}
