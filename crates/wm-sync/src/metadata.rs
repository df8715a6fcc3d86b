//! Per-entity sync history and health statistics.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::{Map, Value};
use wm_config::SyncConfig;
use wm_core::entities::EntityRecord;
use wm_core::metadata::{SyncMetadata, SyncRecord, SyncStatistics};
use wm_core::store::EntityStore;

use crate::error::SyncError;

/// Decoded metadata keyed by entity id, owned by one service instance.
#[derive(Debug, Default)]
pub struct MetadataCache {
    entries: HashMap<String, SyncMetadata>,
}

impl MetadataCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&SyncMetadata> {
        self.entries.get(id)
    }

    pub fn insert(&mut self, id: impl Into<String>, metadata: SyncMetadata) {
        self.entries.insert(id.into(), metadata);
    }

    pub fn remove(&mut self, id: &str) -> Option<SyncMetadata> {
        self.entries.remove(id)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// What happened during one sync attempt for one entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncOutcome {
    pub success: bool,
    pub local_changes: Option<Map<String, Value>>,
    pub remote_changes: Option<Map<String, Value>>,
    pub conflict_resolution: Option<String>,
    pub error_message: Option<String>,
}

impl SyncOutcome {
    #[must_use]
    pub fn success() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    /// A failed attempt that stopped on a conflict.
    #[must_use]
    pub fn conflict(resolution: impl Into<String>) -> Self {
        Self {
            conflict_resolution: Some(resolution.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_local_changes(mut self, changes: Map<String, Value>) -> Self {
        self.local_changes = Some(changes);
        self
    }

    #[must_use]
    pub fn with_remote_changes(mut self, changes: Map<String, Value>) -> Self {
        self.remote_changes = Some(changes);
        self
    }

    fn into_record(self) -> SyncRecord {
        SyncRecord {
            timestamp: Utc::now(),
            success: self.success,
            local_changes: self.local_changes,
            remote_changes: self.remote_changes,
            conflict_resolution: self.conflict_resolution,
            error_message: self.error_message,
        }
    }
}

/// Records sync attempts onto entity records and derives statistics.
pub struct SyncMetadataService<'a, S> {
    store: &'a S,
    cache: MetadataCache,
    history_limit: usize,
}

impl<'a, S: EntityStore> SyncMetadataService<'a, S> {
    #[must_use]
    pub fn new(store: &'a S, config: &SyncConfig) -> Self {
        Self {
            store,
            cache: MetadataCache::new(),
            history_limit: config.history_limit,
        }
    }

    #[must_use]
    pub const fn cache(&self) -> &MetadataCache {
        &self.cache
    }

    /// Metadata for a record: cached copy, else decoded from the record,
    /// else a zeroed history.
    pub fn get_metadata(&mut self, record: &EntityRecord) -> SyncMetadata {
        if let Some(cached) = self.cache.get(record.id()) {
            return cached.clone();
        }

        let metadata = match record.github_sync_metadata.as_ref() {
            None | Some(Value::Null) => SyncMetadata::default(),
            Some(raw) => match serde_json::from_value::<SyncMetadata>(raw.clone()) {
                Ok(metadata) => metadata,
                Err(error) => {
                    tracing::warn!(
                        entity_id = %record.id(),
                        %error,
                        "undecodable sync metadata, starting fresh"
                    );
                    SyncMetadata::default()
                }
            },
        };
        self.cache.insert(record.id(), metadata.clone());
        metadata
    }

    /// Append an attempt to the record's history and persist the record.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Serialization` if the metadata cannot be encoded,
    /// or `SyncError::Storage` if the store rejects the update.
    pub async fn record_sync(
        &mut self,
        record: &mut EntityRecord,
        outcome: SyncOutcome,
    ) -> Result<SyncMetadata, SyncError> {
        let mut metadata = self.get_metadata(record);
        metadata.append(outcome.into_record());
        let mut updated = record.clone();
        updated.github_sync_metadata = Some(serde_json::to_value(&metadata)?);

        self.store
            .update_entity(&updated)
            .await
            .map_err(SyncError::storage)?;
        *record = updated;

        tracing::debug!(
            entity_id = %record.id(),
            status = %metadata.last_sync_status,
            sync_count = metadata.sync_count,
            "recorded sync attempt"
        );
        self.cache.insert(record.id(), metadata.clone());
        Ok(metadata)
    }

    /// Most recent history entries first; `None` uses `sync.history_limit`.
    pub fn get_sync_history(
        &mut self,
        record: &EntityRecord,
        limit: Option<usize>,
    ) -> Vec<SyncRecord> {
        let limit = limit.unwrap_or(self.history_limit);
        self.get_metadata(record).recent(limit)
    }

    /// Aggregate health over a set of records.
    #[allow(clippy::cast_precision_loss)]
    pub fn get_statistics(&mut self, records: &[EntityRecord]) -> SyncStatistics {
        let mut stats = SyncStatistics {
            total_issues: records.len() as u64,
            ..SyncStatistics::default()
        };

        for record in records {
            let metadata = self.get_metadata(record);
            if metadata.sync_count == 0 {
                stats.never_synced += 1;
            }
            stats.total_sync_attempts += metadata.sync_count;
            stats.successful_syncs += metadata.successful_syncs;
            stats.total_conflicts += metadata.conflict_count();
        }

        if stats.total_sync_attempts > 0 {
            let attempts = stats.total_sync_attempts as f64;
            stats.success_rate = stats.successful_syncs as f64 / attempts * 100.0;
            stats.conflict_rate = stats.total_conflicts as f64 / attempts * 100.0;
        }
        stats
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Drop the cached metadata for one entity.
    pub fn invalidate(&mut self, id: &str) {
        self.cache.remove(id);
    }
}
