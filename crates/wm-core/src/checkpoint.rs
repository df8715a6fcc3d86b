//! Durable snapshot of sync progress.
//!
//! Checkpoints are stored as JSON in the sync-state key-value store under
//! `sync_checkpoint_{id}`, with a copy under `latest_checkpoint`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::enums::SyncPhase;

/// Key holding the most recent checkpoint.
pub const LATEST_CHECKPOINT_KEY: &str = "latest_checkpoint";

/// Prefix of per-checkpoint keys.
pub const CHECKPOINT_KEY_PREFIX: &str = "sync_checkpoint_";

/// Store key for a checkpoint id.
#[must_use]
pub fn checkpoint_key(checkpoint_id: &str) -> String {
    format!("{CHECKPOINT_KEY_PREFIX}{checkpoint_id}")
}

/// A remote call already performed during the guarded phase.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct RemoteOperation {
    /// What was done, e.g. `create_issue`, `update_milestone`.
    pub action: String,
    pub entity_id: String,
    /// Remote identifier returned by the call, when there is one.
    #[serde(default)]
    pub remote_id: Option<String>,
    pub performed_at: DateTime<Utc>,
}

impl RemoteOperation {
    #[must_use]
    pub fn new(action: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            entity_id: entity_id.into(),
            remote_id: None,
            performed_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_remote_id(mut self, remote_id: impl Into<String>) -> Self {
        self.remote_id = Some(remote_id.into());
        self
    }
}

/// Snapshot taken before a risky sync phase.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SyncCheckpoint {
    pub checkpoint_id: String,
    pub timestamp: DateTime<Utc>,
    pub phase: SyncPhase,
    /// Entity id → tagged entity snapshot.
    #[serde(default)]
    pub baseline_state: BTreeMap<String, serde_json::Value>,
    /// Ids carrying uncommitted local changes when the snapshot was taken.
    #[serde(default)]
    pub modified_issues: Vec<String>,
    #[serde(default)]
    pub github_operations: Vec<RemoteOperation>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl SyncCheckpoint {
    /// Store key for this checkpoint.
    #[must_use]
    pub fn key(&self) -> String {
        checkpoint_key(&self.checkpoint_id)
    }

    /// Age of the checkpoint relative to `now`.
    #[must_use]
    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp
    }

    /// Whether `action` was already performed for `entity_id`.
    #[must_use]
    pub fn was_performed(&self, action: &str, entity_id: &str) -> bool {
        self.github_operations
            .iter()
            .any(|op| op.action == action && op.entity_id == entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint() -> SyncCheckpoint {
        SyncCheckpoint {
            checkpoint_id: "0123456789abcdef".into(),
            timestamp: Utc::now(),
            phase: SyncPhase::Push,
            baseline_state: BTreeMap::new(),
            modified_issues: vec![],
            github_operations: vec![RemoteOperation::new("create_issue", "i1").with_remote_id("42")],
            metadata: serde_json::Map::new(),
        }
    }

    #[test]
    fn key_uses_prefix() {
        assert_eq!(checkpoint().key(), "sync_checkpoint_0123456789abcdef");
    }

    #[test]
    fn was_performed_matches_action_and_entity() {
        let cp = checkpoint();
        assert!(cp.was_performed("create_issue", "i1"));
        assert!(!cp.was_performed("create_issue", "i2"));
        assert!(!cp.was_performed("update_issue", "i1"));
    }

    #[test]
    fn decodes_with_missing_collections() {
        let json = r#"{"checkpoint_id":"abc","timestamp":"2026-01-01T00:00:00Z","phase":"fetch"}"#;
        let cp: SyncCheckpoint = serde_json::from_str(json).unwrap();
        assert_eq!(cp.phase, SyncPhase::Fetch);
        assert!(cp.baseline_state.is_empty());
        assert!(cp.github_operations.is_empty());
    }
}
