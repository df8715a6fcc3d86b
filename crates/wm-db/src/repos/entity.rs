//! Entity repository: records plus their sync bookkeeping.

use wm_core::entities::{Entity, EntityRecord};
use wm_core::enums::EntityType;
use wm_core::store::EntityStore;

use crate::WmDb;
use crate::error::DatabaseError;
use crate::helpers::{
    get_opt_string, parse_datetime, parse_enum, parse_optional_json, to_optional_json,
};

const SELECT_COLS: &str =
    "entity_type, data, github_sync_metadata, modified, local_changes, updated_at";

fn row_to_record(row: &libsql::Row) -> Result<EntityRecord, DatabaseError> {
    let entity_type: EntityType = parse_enum(&row.get::<String>(0)?)?;
    let data: serde_json::Value = serde_json::from_str(&row.get::<String>(1)?)
        .map_err(|e| DatabaseError::Query(format!("Invalid entity data: {e}")))?;
    let entity = Entity::from_record(entity_type, &data)?;

    let local_changes = match parse_optional_json(get_opt_string(row, 4)?.as_deref())? {
        Some(serde_json::Value::Object(map)) => Some(map),
        Some(other) => {
            return Err(DatabaseError::Query(format!(
                "local_changes is not an object: {other}"
            )));
        }
        None => None,
    };

    Ok(EntityRecord {
        entity,
        github_sync_metadata: parse_optional_json(get_opt_string(row, 2)?.as_deref())?,
        modified: row.get::<i64>(3)? != 0,
        local_changes,
        updated_at: parse_datetime(&row.get::<String>(5)?)?,
    })
}

/// Column values shared by insert and update.
struct RecordColumns {
    data: String,
    metadata: Option<String>,
    modified: i64,
    local_changes: Option<String>,
    updated_at: String,
}

impl RecordColumns {
    fn from_record(record: &EntityRecord) -> Result<Self, DatabaseError> {
        let data = record
            .entity
            .to_value()
            .and_then(|v| serde_json::to_string(&v))
            .map_err(|e| DatabaseError::Other(e.into()))?;
        Ok(Self {
            data,
            metadata: to_optional_json(record.github_sync_metadata.as_ref())?,
            modified: i64::from(record.modified),
            local_changes: to_optional_json(record.local_changes.as_ref())?,
            updated_at: record.updated_at.to_rfc3339(),
        })
    }
}

impl WmDb {
    /// Insert a new record. Fails if the id already exists.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` on serialization or constraint failure.
    pub async fn insert_entity(&self, record: &EntityRecord) -> Result<(), DatabaseError> {
        let cols = RecordColumns::from_record(record)?;
        self.conn()
            .execute(
                "INSERT INTO entities (id, entity_type, data, github_sync_metadata, modified, local_changes, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                libsql::params![
                    record.id(),
                    record.entity_type().as_str(),
                    cols.data,
                    cols.metadata,
                    cols.modified,
                    cols.local_changes,
                    cols.updated_at
                ],
            )
            .await?;
        Ok(())
    }

    /// Insert or replace a record.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` on serialization or query failure.
    pub async fn upsert_entity(&self, record: &EntityRecord) -> Result<(), DatabaseError> {
        let cols = RecordColumns::from_record(record)?;
        self.conn()
            .execute(
                "INSERT INTO entities (id, entity_type, data, github_sync_metadata, modified, local_changes, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    entity_type = excluded.entity_type,
                    data = excluded.data,
                    github_sync_metadata = excluded.github_sync_metadata,
                    modified = excluded.modified,
                    local_changes = excluded.local_changes,
                    updated_at = excluded.updated_at",
                libsql::params![
                    record.id(),
                    record.entity_type().as_str(),
                    cols.data,
                    cols.metadata,
                    cols.modified,
                    cols.local_changes,
                    cols.updated_at
                ],
            )
            .await?;
        Ok(())
    }

    /// Load one record by id.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails or the row cannot be decoded.
    pub async fn find_entity(&self, id: &str) -> Result<Option<EntityRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SELECT_COLS} FROM entities WHERE id = ?1"),
                [id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_record(&row)?)),
            None => Ok(None),
        }
    }

    /// Overwrite an existing record.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::NotFound` if no entity has the record's id.
    pub async fn replace_entity(&self, record: &EntityRecord) -> Result<(), DatabaseError> {
        let cols = RecordColumns::from_record(record)?;
        let changed = self
            .conn()
            .execute(
                "UPDATE entities SET entity_type = ?1, data = ?2, github_sync_metadata = ?3,
                    modified = ?4, local_changes = ?5, updated_at = ?6
                 WHERE id = ?7",
                libsql::params![
                    record.entity_type().as_str(),
                    cols.data,
                    cols.metadata,
                    cols.modified,
                    cols.local_changes,
                    cols.updated_at,
                    record.id()
                ],
            )
            .await?;
        if changed == 0 {
            return Err(DatabaseError::NotFound(record.id().to_string()));
        }
        Ok(())
    }

    /// List records in insertion order, optionally filtered by type.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails or a row cannot be decoded.
    pub async fn list_entities(
        &self,
        entity_type: Option<EntityType>,
    ) -> Result<Vec<EntityRecord>, DatabaseError> {
        let mut rows = match entity_type {
            Some(t) => {
                self.conn()
                    .query(
                        &format!(
                            "SELECT {SELECT_COLS} FROM entities WHERE entity_type = ?1 ORDER BY rowid"
                        ),
                        [t.as_str()],
                    )
                    .await?
            }
            None => {
                self.conn()
                    .query(
                        &format!("SELECT {SELECT_COLS} FROM entities ORDER BY rowid"),
                        (),
                    )
                    .await?
            }
        };

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(row_to_record(&row)?);
        }
        Ok(records)
    }

    /// Records carrying uncommitted local changes.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails or a row cannot be decoded.
    pub async fn list_modified_entities(&self) -> Result<Vec<EntityRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {SELECT_COLS} FROM entities WHERE modified = 1 ORDER BY rowid"),
                (),
            )
            .await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(row_to_record(&row)?);
        }
        Ok(records)
    }
}

impl EntityStore for WmDb {
    type Error = DatabaseError;

    async fn get_entity(&self, id: &str) -> Result<Option<EntityRecord>, DatabaseError> {
        self.find_entity(id).await
    }

    async fn update_entity(&self, record: &EntityRecord) -> Result<(), DatabaseError> {
        self.replace_entity(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wm_core::entities::{Issue, Milestone};

    async fn test_db() -> WmDb {
        WmDb::open_local(":memory:").await.unwrap()
    }

    fn issue_record(id: &str) -> EntityRecord {
        let entity = Entity::from_record(
            EntityType::Issue,
            &json!({"id": id, "title": "Fix sync", "labels": ["bug"], "milestone_id": "m1"}),
        )
        .unwrap();
        EntityRecord::new(entity)
    }

    #[tokio::test]
    async fn insert_and_get_roundtrip() {
        let db = test_db().await;
        let record = issue_record("i1");
        db.insert_entity(&record).await.unwrap();

        let loaded = db.get_entity("i1").await.unwrap().unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn get_missing_returns_none() {
        let db = test_db().await;
        assert!(db.get_entity("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_persists_markers_and_metadata() {
        let db = test_db().await;
        let mut record = issue_record("i1");
        db.insert_entity(&record).await.unwrap();

        let mut changes = serde_json::Map::new();
        changes.insert("title".into(), json!("Local title"));
        record.mark_modified(changes);
        record.github_sync_metadata = Some(json!({"sync_count": 1}));
        db.update_entity(&record).await.unwrap();

        let loaded = db.get_entity("i1").await.unwrap().unwrap();
        assert!(loaded.modified);
        assert_eq!(loaded.local_changes.unwrap()["title"], json!("Local title"));
        assert_eq!(loaded.github_sync_metadata, Some(json!({"sync_count": 1})));
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let db = test_db().await;
        let err = db.update_entity(&issue_record("ghost")).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound(ref id) if id == "ghost"));
    }

    #[tokio::test]
    async fn list_filters_by_type_in_insertion_order() {
        let db = test_db().await;
        let milestone = Milestone {
            id: "m1".into(),
            title: "v1".into(),
            description: None,
            status: wm_core::enums::MilestoneStatus::Open,
            project_id: None,
            depends_on_milestone_id: None,
            due_date: None,
            github_milestone_number: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        };
        db.insert_entity(&issue_record("i2")).await.unwrap();
        db.insert_entity(&EntityRecord::new(milestone)).await.unwrap();
        db.insert_entity(&issue_record("i1")).await.unwrap();

        let issues = db.list_entities(Some(EntityType::Issue)).await.unwrap();
        let ids: Vec<&str> = issues.iter().map(EntityRecord::id).collect();
        assert_eq!(ids, vec!["i2", "i1"]);
        assert_eq!(db.list_entities(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn upsert_replaces_existing() {
        let db = test_db().await;
        db.upsert_entity(&issue_record("i1")).await.unwrap();

        let mut record = issue_record("i1");
        if let Entity::Issue(Issue { title, .. }) = &mut record.entity {
            *title = "Renamed".into();
        }
        db.upsert_entity(&record).await.unwrap();

        let loaded = db.get_entity("i1").await.unwrap().unwrap();
        match loaded.entity {
            Entity::Issue(issue) => assert_eq!(issue.title, "Renamed"),
            other => panic!("expected issue, got {other:?}"),
        }
        assert_eq!(db.list_entities(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn modified_listing() {
        let db = test_db().await;
        let mut dirty = issue_record("i1");
        dirty.mark_modified(serde_json::Map::new());
        db.insert_entity(&dirty).await.unwrap();
        db.insert_entity(&issue_record("i2")).await.unwrap();

        let modified = db.list_modified_entities().await.unwrap();
        assert_eq!(modified.len(), 1);
        assert_eq!(modified[0].id(), "i1");
    }
}
