//! Conflict strategy overrides.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use wm_core::enums::ConflictResolutionStrategy;

/// Per-field strategy overrides layered on top of the built-in table.
///
/// ```toml
/// [conflicts.strategies]
/// title = "local_wins"
/// ```
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ConflictConfig {
    #[serde(default)]
    pub strategies: BTreeMap<String, ConflictResolutionStrategy>,
}

impl ConflictConfig {
    #[must_use]
    pub fn has_overrides(&self) -> bool {
        !self.strategies.is_empty()
    }
}
