//! Checkpoint creation, resume, and rollback.
//!
//! A checkpoint is written before each risky phase and removed once the phase
//! completes. On the next start the latest checkpoint decides whether the
//! interrupted run can be resumed or has to be rolled back.

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use wm_config::SyncConfig;
use wm_core::checkpoint::{
    CHECKPOINT_KEY_PREFIX, LATEST_CHECKPOINT_KEY, RemoteOperation, SyncCheckpoint, checkpoint_key,
};
use wm_core::entities::{Entity, EntityRecord};
use wm_core::enums::SyncPhase;
use wm_core::store::{EntityStore, SyncStateStore};

use crate::error::SyncError;

/// Derive a checkpoint id: the first 16 hex chars of
/// `sha256("{timestamp_rfc3339}:{phase}")`.
#[must_use]
pub fn checkpoint_id(timestamp: DateTime<Utc>, phase: SyncPhase) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{phase}", timestamp.to_rfc3339()).as_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(16);
    id
}

/// Manages checkpoints in a [`SyncStateStore`].
pub struct SyncCheckpointManager<'a, S> {
    store: &'a S,
    max_age: Duration,
}

impl<'a, S> SyncCheckpointManager<'a, S> {
    /// Manager using `sync.checkpoint_max_age_secs` as the resume window.
    #[must_use]
    pub fn new(store: &'a S, config: &SyncConfig) -> Self {
        let secs = i64::try_from(config.checkpoint_max_age_secs).unwrap_or(i64::MAX);
        Self::with_max_age(store, Duration::try_seconds(secs).unwrap_or(Duration::MAX))
    }

    #[must_use]
    pub const fn with_max_age(store: &'a S, max_age: Duration) -> Self {
        Self { store, max_age }
    }

    #[must_use]
    pub const fn max_age(&self) -> Duration {
        self.max_age
    }
}

impl<S: SyncStateStore> SyncCheckpointManager<'_, S> {
    /// Snapshot `entities` and persist a new latest checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Serialization` if an entity cannot be snapshotted,
    /// or `SyncError::Storage` if the write fails.
    pub async fn create_checkpoint(
        &self,
        phase: SyncPhase,
        entities: &[EntityRecord],
        github_operations: Vec<RemoteOperation>,
        metadata: Map<String, Value>,
    ) -> Result<SyncCheckpoint, SyncError> {
        if let Some(previous) = self.get_latest_checkpoint().await {
            if previous.phase != phase && !previous.phase.can_transition_to(phase) {
                tracing::warn!(
                    previous = %previous.phase,
                    next = %phase,
                    checkpoint_id = %previous.checkpoint_id,
                    "checkpoint phase out of order"
                );
            }
        }

        let timestamp = Utc::now();
        let mut checkpoint = SyncCheckpoint {
            checkpoint_id: checkpoint_id(timestamp, phase),
            timestamp,
            phase,
            baseline_state: Default::default(),
            modified_issues: Vec::new(),
            github_operations,
            metadata,
        };
        for record in entities {
            checkpoint
                .baseline_state
                .insert(record.id().to_string(), record.entity.to_value()?);
            if record.modified {
                checkpoint.modified_issues.push(record.id().to_string());
            }
        }

        self.save_checkpoint(&checkpoint).await?;
        tracing::info!(
            checkpoint_id = %checkpoint.checkpoint_id,
            %phase,
            entities = checkpoint.baseline_state.len(),
            modified = checkpoint.modified_issues.len(),
            "created sync checkpoint"
        );
        Ok(checkpoint)
    }

    /// Persist a checkpoint under its own key and as the latest one, in a
    /// single write.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` if encoding or the store write fails.
    pub async fn save_checkpoint(&self, checkpoint: &SyncCheckpoint) -> Result<(), SyncError> {
        let json = serde_json::to_string(checkpoint)?;
        self.store
            .set_all(&[
                (checkpoint.key(), json.clone()),
                (LATEST_CHECKPOINT_KEY.to_string(), json),
            ])
            .await
            .map_err(SyncError::storage)
    }

    /// Read the latest checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` if the store read fails or the stored value does
    /// not decode.
    pub async fn load_latest_checkpoint(&self) -> Result<Option<SyncCheckpoint>, SyncError> {
        let Some(json) = self
            .store
            .get(LATEST_CHECKPOINT_KEY)
            .await
            .map_err(SyncError::storage)?
        else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&json)?))
    }

    /// The latest checkpoint, treating read and decode failures as absent.
    pub async fn get_latest_checkpoint(&self) -> Option<SyncCheckpoint> {
        match self.load_latest_checkpoint().await {
            Ok(checkpoint) => checkpoint,
            Err(error) => {
                tracing::warn!(%error, "could not read latest checkpoint, treating as absent");
                None
            }
        }
    }

    /// Whether the latest checkpoint may be resumed now.
    pub async fn can_resume(&self) -> (bool, Option<SyncCheckpoint>) {
        self.can_resume_at(Utc::now()).await
    }

    /// Whether the latest checkpoint may be resumed at `now`: it must be
    /// younger than the configured maximum age and in `fetch` or `push`.
    pub async fn can_resume_at(&self, now: DateTime<Utc>) -> (bool, Option<SyncCheckpoint>) {
        let Some(checkpoint) = self.get_latest_checkpoint().await else {
            return (false, None);
        };
        let fresh = checkpoint.age_at(now) < self.max_age;
        let resumable = fresh && checkpoint.phase.is_resumable();
        tracing::debug!(
            checkpoint_id = %checkpoint.checkpoint_id,
            phase = %checkpoint.phase,
            fresh,
            resumable,
            "checked checkpoint for resume"
        );
        (resumable, Some(checkpoint))
    }

    /// Append a performed remote call to the latest checkpoint.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::NoCheckpoint` if there is no latest checkpoint, or
    /// a storage/serialization error from the re-write.
    pub async fn record_operation(
        &self,
        operation: RemoteOperation,
    ) -> Result<SyncCheckpoint, SyncError> {
        let mut checkpoint = self
            .load_latest_checkpoint()
            .await?
            .ok_or(SyncError::NoCheckpoint)?;
        tracing::debug!(
            checkpoint_id = %checkpoint.checkpoint_id,
            action = %operation.action,
            entity_id = %operation.entity_id,
            "recording remote operation"
        );
        checkpoint.github_operations.push(operation);
        self.save_checkpoint(&checkpoint).await?;
        Ok(checkpoint)
    }

    /// Every stored checkpoint that decodes, newest first.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Storage` if listing or reading keys fails.
    pub async fn list_checkpoints(&self) -> Result<Vec<SyncCheckpoint>, SyncError> {
        let keys = self
            .store
            .keys_with_prefix(CHECKPOINT_KEY_PREFIX)
            .await
            .map_err(SyncError::storage)?;

        let mut checkpoints = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(json) = self.store.get(&key).await.map_err(SyncError::storage)? else {
                continue;
            };
            match serde_json::from_str::<SyncCheckpoint>(&json) {
                Ok(checkpoint) => checkpoints.push(checkpoint),
                Err(error) => tracing::warn!(%key, %error, "skipping undecodable checkpoint"),
            }
        }
        checkpoints.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(checkpoints)
    }

    /// Delete one checkpoint, and the latest pointer if it refers to it.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Storage` if a delete fails.
    pub async fn clear_checkpoint(&self, checkpoint_id: &str) -> Result<(), SyncError> {
        self.store
            .delete(&checkpoint_key(checkpoint_id))
            .await
            .map_err(SyncError::storage)?;

        if self
            .get_latest_checkpoint()
            .await
            .is_some_and(|latest| latest.checkpoint_id == checkpoint_id)
        {
            self.store
                .delete(LATEST_CHECKPOINT_KEY)
                .await
                .map_err(SyncError::storage)?;
        }
        tracing::debug!(checkpoint_id, "cleared checkpoint");
        Ok(())
    }

    /// Delete every checkpoint and the latest pointer. Returns how many
    /// per-checkpoint keys were removed.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Storage` if listing or deleting fails.
    pub async fn clear_all_checkpoints(&self) -> Result<usize, SyncError> {
        let keys = self
            .store
            .keys_with_prefix(CHECKPOINT_KEY_PREFIX)
            .await
            .map_err(SyncError::storage)?;
        for key in &keys {
            self.store.delete(key).await.map_err(SyncError::storage)?;
        }
        self.store
            .delete(LATEST_CHECKPOINT_KEY)
            .await
            .map_err(SyncError::storage)?;
        tracing::info!(cleared = keys.len(), "cleared all checkpoints");
        Ok(keys.len())
    }
}

impl<S: SyncStateStore + EntityStore> SyncCheckpointManager<'_, S> {
    /// Restore every snapshotted entity and clear the checkpoint.
    ///
    /// Entities that no longer exist, snapshots that do not decode, and
    /// failed writes are logged and skipped. Returns `false` only if the
    /// checkpoint itself could not be cleared.
    pub async fn rollback_to_checkpoint(&self, checkpoint: &SyncCheckpoint) -> bool {
        let mut restored = 0_usize;
        let mut skipped = 0_usize;

        for (id, snapshot) in &checkpoint.baseline_state {
            match self.restore_entity(id, snapshot).await {
                Ok(()) => restored += 1,
                Err(error) => {
                    skipped += 1;
                    tracing::warn!(entity_id = %id, %error, "rollback skipped entity");
                }
            }
        }

        tracing::info!(
            checkpoint_id = %checkpoint.checkpoint_id,
            restored,
            skipped,
            "rolled back to checkpoint"
        );

        match self.clear_checkpoint(&checkpoint.checkpoint_id).await {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(
                    checkpoint_id = %checkpoint.checkpoint_id,
                    %error,
                    "rollback could not clear checkpoint"
                );
                false
            }
        }
    }

    async fn restore_entity(&self, id: &str, snapshot: &Value) -> Result<(), SyncError> {
        let entity: Entity = serde_json::from_value(snapshot.clone())?;
        let mut record = EntityStore::get_entity(self.store, id)
            .await
            .map_err(SyncError::storage)?
            .ok_or_else(|| SyncError::EntityNotFound(id.to_string()))?;

        record.entity = entity;
        record.clear_modified();
        record.updated_at = Utc::now();
        EntityStore::update_entity(self.store, &record)
            .await
            .map_err(SyncError::storage)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use serde_json::json;
    use wm_core::entities::Issue;
    use wm_db::WmDb;

    use super::*;

    async fn test_db() -> WmDb {
        WmDb::open_local(":memory:").await.unwrap()
    }

    fn issue(id: &str, title: &str) -> Issue {
        serde_json::from_value(json!({"id": id, "title": title})).unwrap()
    }

    fn checkpoint_at(phase: SyncPhase, timestamp: DateTime<Utc>) -> SyncCheckpoint {
        SyncCheckpoint {
            checkpoint_id: checkpoint_id(timestamp, phase),
            timestamp,
            phase,
            baseline_state: Default::default(),
            modified_issues: Vec::new(),
            github_operations: Vec::new(),
            metadata: Map::new(),
        }
    }

    #[test]
    fn checkpoint_id_is_stable_hex() {
        let ts = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let id = checkpoint_id(ts, SyncPhase::Fetch);
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, checkpoint_id(ts, SyncPhase::Fetch));
        assert_ne!(id, checkpoint_id(ts, SyncPhase::Push));
    }

    #[tokio::test]
    async fn create_snapshots_entities_and_sets_latest() {
        let db = test_db().await;
        let manager = SyncCheckpointManager::new(&db, &SyncConfig::default());

        let clean = EntityRecord::new(issue("i1", "clean"));
        let mut dirty = EntityRecord::new(issue("i2", "dirty"));
        dirty.mark_modified(Map::from_iter([("title".to_string(), json!("dirty"))]));

        let mut metadata = Map::new();
        metadata.insert("trigger".into(), json!("manual"));
        let created = manager
            .create_checkpoint(SyncPhase::Fetch, &[clean, dirty], Vec::new(), metadata)
            .await
            .unwrap();

        assert_eq!(created.modified_issues, vec!["i2".to_string()]);
        assert_eq!(created.baseline_state["i1"]["entity_type"], "issue");
        assert_eq!(created.baseline_state["i2"]["title"], "dirty");

        let latest = manager.load_latest_checkpoint().await.unwrap().unwrap();
        assert_eq!(latest, created);
        let own = db.get(&created.key()).await.unwrap();
        assert!(own.is_some());
    }

    #[rstest]
    #[case(SyncPhase::Fetch, 10, true)]
    #[case(SyncPhase::Push, 59, true)]
    #[case(SyncPhase::Fetch, 120, false)]
    #[case(SyncPhase::BaselineUpdate, 10, false)]
    #[case(SyncPhase::Complete, 1, false)]
    #[tokio::test]
    async fn resume_depends_on_age_and_phase(
        #[case] phase: SyncPhase,
        #[case] minutes_old: i64,
        #[case] expected: bool,
    ) {
        let db = test_db().await;
        let manager = SyncCheckpointManager::new(&db, &SyncConfig::default());
        let now = Utc::now();
        let checkpoint = checkpoint_at(phase, now - Duration::minutes(minutes_old));
        manager.save_checkpoint(&checkpoint).await.unwrap();

        let (resumable, latest) = manager.can_resume_at(now).await;
        assert_eq!(resumable, expected);
        assert_eq!(latest, Some(checkpoint));
    }

    #[tokio::test]
    async fn no_checkpoint_cannot_resume() {
        let db = test_db().await;
        let manager = SyncCheckpointManager::new(&db, &SyncConfig::default());
        assert_eq!(manager.can_resume().await, (false, None));
    }

    #[tokio::test]
    async fn corrupt_latest_reads_as_absent() {
        let db = test_db().await;
        db.set(LATEST_CHECKPOINT_KEY, "{not json").await.unwrap();
        let manager = SyncCheckpointManager::new(&db, &SyncConfig::default());

        assert!(manager.load_latest_checkpoint().await.is_err());
        assert!(manager.get_latest_checkpoint().await.is_none());
        assert_eq!(manager.can_resume().await, (false, None));
    }

    #[tokio::test]
    async fn shorter_max_age_from_config() {
        let db = test_db().await;
        let config = SyncConfig {
            checkpoint_max_age_secs: 60,
            ..SyncConfig::default()
        };
        let manager = SyncCheckpointManager::new(&db, &config);
        assert_eq!(manager.max_age(), Duration::seconds(60));

        let now = Utc::now();
        manager
            .save_checkpoint(&checkpoint_at(SyncPhase::Push, now - Duration::minutes(2)))
            .await
            .unwrap();
        assert!(!manager.can_resume_at(now).await.0);
    }

    #[tokio::test]
    async fn record_operation_appends_to_latest() {
        let db = test_db().await;
        let manager = SyncCheckpointManager::new(&db, &SyncConfig::default());

        let err = manager
            .record_operation(RemoteOperation::new("update_issue", "i1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NoCheckpoint));

        manager
            .create_checkpoint(SyncPhase::Push, &[], Vec::new(), Map::new())
            .await
            .unwrap();
        manager
            .record_operation(RemoteOperation::new("update_issue", "i1").with_remote_id("42"))
            .await
            .unwrap();

        let latest = manager.get_latest_checkpoint().await.unwrap();
        assert!(latest.was_performed("update_issue", "i1"));
        assert!(!latest.was_performed("create_issue", "i1"));

        // The per-id copy is kept in step with the latest pointer.
        let own: SyncCheckpoint =
            serde_json::from_str(&db.get(&latest.key()).await.unwrap().unwrap()).unwrap();
        assert_eq!(own.github_operations.len(), 1);
    }

    #[tokio::test]
    async fn list_is_newest_first_and_skips_garbage() {
        let db = test_db().await;
        let manager = SyncCheckpointManager::new(&db, &SyncConfig::default());
        let now = Utc::now();
        let older = checkpoint_at(SyncPhase::Fetch, now - Duration::minutes(5));
        let newer = checkpoint_at(SyncPhase::Push, now);
        manager.save_checkpoint(&older).await.unwrap();
        manager.save_checkpoint(&newer).await.unwrap();
        db.set(&checkpoint_key("broken"), "[]").await.unwrap();

        let listed = manager.list_checkpoints().await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|c| c.checkpoint_id.as_str()).collect();
        assert_eq!(ids, vec![newer.checkpoint_id.as_str(), older.checkpoint_id.as_str()]);
    }

    #[tokio::test]
    async fn clear_checkpoint_only_drops_matching_latest() {
        let db = test_db().await;
        let manager = SyncCheckpointManager::new(&db, &SyncConfig::default());
        let now = Utc::now();
        let older = checkpoint_at(SyncPhase::Fetch, now - Duration::minutes(5));
        let newer = checkpoint_at(SyncPhase::Push, now);
        manager.save_checkpoint(&older).await.unwrap();
        manager.save_checkpoint(&newer).await.unwrap();

        manager.clear_checkpoint(&older.checkpoint_id).await.unwrap();
        assert_eq!(manager.get_latest_checkpoint().await, Some(newer.clone()));

        manager.clear_checkpoint(&newer.checkpoint_id).await.unwrap();
        assert!(manager.get_latest_checkpoint().await.is_none());

        // Idempotent.
        manager.clear_checkpoint(&newer.checkpoint_id).await.unwrap();
        assert!(manager.list_checkpoints().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_all_removes_everything() {
        let db = test_db().await;
        let manager = SyncCheckpointManager::new(&db, &SyncConfig::default());
        for phase in [SyncPhase::Fetch, SyncPhase::Push] {
            manager
                .create_checkpoint(phase, &[], Vec::new(), Map::new())
                .await
                .unwrap();
        }

        let cleared = manager.clear_all_checkpoints().await.unwrap();
        assert_eq!(cleared, 2);
        assert!(manager.get_latest_checkpoint().await.is_none());
        assert_eq!(manager.clear_all_checkpoints().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rollback_restores_snapshot_and_skips_missing() {
        let db = test_db().await;
        let original = EntityRecord::new(issue("i1", "Before"));
        db.insert_entity(&original).await.unwrap();

        let manager = SyncCheckpointManager::new(&db, &SyncConfig::default());
        let ghost = EntityRecord::new(issue("ghost", "never stored"));
        let checkpoint = manager
            .create_checkpoint(SyncPhase::Push, &[original, ghost], Vec::new(), Map::new())
            .await
            .unwrap();

        // Local edit made during the failed phase.
        let mut edited = db.find_entity("i1").await.unwrap().unwrap();
        if let Entity::Issue(issue) = &mut edited.entity {
            issue.title = "After".into();
        }
        edited.mark_modified(Map::from_iter([("title".to_string(), json!("After"))]));
        db.replace_entity(&edited).await.unwrap();

        assert!(manager.rollback_to_checkpoint(&checkpoint).await);

        let restored = db.find_entity("i1").await.unwrap().unwrap();
        match &restored.entity {
            Entity::Issue(issue) => assert_eq!(issue.title, "Before"),
            other => panic!("expected issue, got {other:?}"),
        }
        assert!(!restored.modified);
        assert!(restored.local_changes.is_none());
        assert!(db.find_entity("ghost").await.unwrap().is_none());
        assert!(manager.get_latest_checkpoint().await.is_none());
    }

    #[tokio::test]
    async fn rollback_skips_undecodable_snapshot() {
        let db = test_db().await;
        let manager = SyncCheckpointManager::new(&db, &SyncConfig::default());
        let mut checkpoint = checkpoint_at(SyncPhase::Push, Utc::now());
        checkpoint
            .baseline_state
            .insert("i1".into(), json!({"entity_type": "epic"}));
        manager.save_checkpoint(&checkpoint).await.unwrap();

        assert!(manager.rollback_to_checkpoint(&checkpoint).await);
        assert!(manager.list_checkpoints().await.unwrap().is_empty());
    }
}
