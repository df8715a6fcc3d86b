//! Sync-state repository: string key-value pairs for checkpoints.

use chrono::Utc;
use wm_core::store::SyncStateStore;

use crate::WmDb;
use crate::error::DatabaseError;

const UPSERT_SQL: &str = "INSERT INTO sync_state (key, value, updated_at) VALUES (?1, ?2, ?3)
     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at";

impl WmDb {
    /// Read a sync-state value.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn get_state(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT value FROM sync_state WHERE key = ?1", [key])
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row.get::<String>(0)?)),
            None => Ok(None),
        }
    }

    /// Insert or overwrite a sync-state value.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the statement fails.
    pub async fn set_state(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                UPSERT_SQL,
                libsql::params![key, value, Utc::now().to_rfc3339()],
            )
            .await?;
        Ok(())
    }

    /// Write several values in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if any statement fails; nothing is written then.
    pub async fn set_states(&self, entries: &[(String, String)]) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn().transaction().await?;
        for (key, value) in entries {
            tx.execute(
                UPSERT_SQL,
                libsql::params![key.as_str(), value.as_str(), now.as_str()],
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Delete a sync-state value. Missing keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the statement fails.
    pub async fn delete_state(&self, key: &str) -> Result<(), DatabaseError> {
        self.conn()
            .execute("DELETE FROM sync_state WHERE key = ?1", [key])
            .await?;
        Ok(())
    }

    /// Keys beginning with `prefix`, sorted ascending.
    ///
    /// Compares with `substr` rather than `LIKE` so `_` in prefixes is literal.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the query fails.
    pub async fn state_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, DatabaseError> {
        let len = i64::try_from(prefix.chars().count())
            .map_err(|e| DatabaseError::Other(e.into()))?;
        let mut rows = self
            .conn()
            .query(
                "SELECT key FROM sync_state WHERE substr(key, 1, ?2) = ?1 ORDER BY key",
                libsql::params![prefix, len],
            )
            .await?;
        let mut keys = Vec::new();
        while let Some(row) = rows.next().await? {
            keys.push(row.get::<String>(0)?);
        }
        Ok(keys)
    }
}

impl SyncStateStore for WmDb {
    type Error = DatabaseError;

    async fn get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        self.get_state(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.set_state(key, value).await
    }

    async fn set_all(&self, entries: &[(String, String)]) -> Result<(), DatabaseError> {
        self.set_states(entries).await
    }

    async fn delete(&self, key: &str) -> Result<(), DatabaseError> {
        self.delete_state(key).await
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, DatabaseError> {
        self.state_keys_with_prefix(prefix).await
    }
}
