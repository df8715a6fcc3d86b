//! Per-entity sync history.
//!
//! `SyncMetadata` is stored in the entity's `github_sync_metadata` field so it
//! survives restarts. History is append-only; counters are derived on append.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::enums::SyncStatus;

/// Outcome of a single sync attempt for one entity.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SyncRecord {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    #[serde(default)]
    pub local_changes: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub remote_changes: Option<serde_json::Map<String, serde_json::Value>>,
    /// How a conflict was settled, e.g. `"remote_wins: title"`.
    #[serde(default)]
    pub conflict_resolution: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl SyncRecord {
    #[must_use]
    pub const fn had_conflict(&self) -> bool {
        self.conflict_resolution.is_some()
    }
}

/// Aggregated sync history for one entity.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SyncMetadata {
    #[serde(default)]
    pub sync_count: u64,
    #[serde(default)]
    pub successful_syncs: u64,
    #[serde(default)]
    pub last_sync_status: SyncStatus,
    #[serde(default)]
    pub last_sync_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub history: Vec<SyncRecord>,
}

impl SyncMetadata {
    /// Append a record and update the counters.
    ///
    /// Status precedence: a successful attempt is `success`; a failed attempt
    /// that carried a conflict resolution is `conflict`; anything else is `error`.
    pub fn append(&mut self, record: SyncRecord) {
        self.sync_count += 1;
        if record.success {
            self.successful_syncs += 1;
        }
        self.last_sync_status = if record.success {
            SyncStatus::Success
        } else if record.had_conflict() {
            SyncStatus::Conflict
        } else {
            SyncStatus::Error
        };
        self.last_sync_at = Some(record.timestamp);
        self.history.push(record);
    }

    /// Percentage of attempts that succeeded; `0.0` before the first attempt.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.sync_count == 0 {
            return 0.0;
        }
        self.successful_syncs as f64 / self.sync_count as f64 * 100.0
    }

    #[must_use]
    pub fn conflict_count(&self) -> u64 {
        self.history.iter().filter(|r| r.had_conflict()).count() as u64
    }

    /// The `limit` most recent records, newest first.
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<SyncRecord> {
        self.history.iter().rev().take(limit).cloned().collect()
    }
}

/// Health summary across a set of entities.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct SyncStatistics {
    pub total_issues: u64,
    pub never_synced: u64,
    pub total_sync_attempts: u64,
    pub successful_syncs: u64,
    pub total_conflicts: u64,
    pub success_rate: f64,
    pub conflict_rate: f64,
}
