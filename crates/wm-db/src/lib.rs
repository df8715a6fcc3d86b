//! # wm-db
//!
//! libSQL storage for Waymark.
//!
//! Holds the local copy of synced entities together with their sync
//! bookkeeping, and the key-value `sync_state` table used for checkpoints.
//! `WmDb` implements both `wm_core::store` traits so the sync engine never
//! touches SQL directly.

pub mod error;
pub mod helpers;
mod migrations;
pub mod repos;

use std::path::Path;

use error::DatabaseError;
use libsql::Builder;
use wm_config::DatabaseConfig;

/// Central database handle for Waymark state.
pub struct WmDb {
    #[allow(dead_code)]
    db: libsql::Database,
    conn: libsql::Connection,
}

impl WmDb {
    /// Open the database configured under `[database]`, creating its parent
    /// directory when the path points at a file.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Io` if the parent directory cannot be created,
    /// otherwise the errors of [`open_local`](Self::open_local).
    pub async fn open(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        if !config.is_in_memory() {
            if let Some(parent) = Path::new(&config.path).parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)?;
                }
            }
        }
        Self::open_local(&config.path).await
    }

    /// Open a local database at the given path, or `":memory:"` for tests.
    ///
    /// Runs migrations automatically on first open.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError` if the database cannot be opened or
    /// migrations fail.
    pub async fn open_local(path: &str) -> Result<Self, DatabaseError> {
        let db = Builder::new_local(path).build().await?;
        let conn = db.connect()?;

        let wm_db = Self { db, conn };
        wm_db.run_migrations().await?;
        tracing::debug!(path, "opened waymark database");
        Ok(wm_db)
    }

    /// Access the underlying libSQL connection for direct queries.
    #[must_use]
    pub const fn conn(&self) -> &libsql::Connection {
        &self.conn
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> WmDb {
        WmDb::open_local(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn open_local_creates_schema() {
        let db = test_db().await;

        for table in ["entities", "sync_state"] {
            let mut rows = db
                .conn()
                .query(
                    "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                )
                .await
                .unwrap();
            let row = rows.next().await.unwrap();
            assert!(row.is_some(), "table '{table}' should exist");
        }
    }

    #[tokio::test]
    async fn idempotent_migrations() {
        let db = test_db().await;
        // Running migrations twice must not fail
        db.run_migrations().await.unwrap();
    }

    #[tokio::test]
    async fn entity_type_check_constraint() {
        let db = test_db().await;
        let result = db
            .conn()
            .execute(
                "INSERT INTO entities (id, entity_type, data) VALUES ('x1', 'epic', '{}')",
                (),
            )
            .await;
        assert!(result.is_err(), "unknown entity_type should be rejected");
    }

    #[tokio::test]
    async fn open_from_config_creates_parent_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(".waymark").join("nested").join("waymark.db");
        let config = DatabaseConfig {
            path: path.to_str().unwrap().to_string(),
        };

        let db = WmDb::open(&config).await.unwrap();
        db.conn()
            .execute("INSERT INTO sync_state (key, value) VALUES ('k', 'v')", ())
            .await
            .unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn open_from_config_in_memory() {
        let config = DatabaseConfig {
            path: ":memory:".into(),
        };
        let db = WmDb::open(&config).await.unwrap();
        let mut rows = db
            .conn()
            .query("SELECT COUNT(*) FROM entities", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 0);
    }

    #[tokio::test]
    async fn opens_file_backed_database() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("waymark.db");
        let path = path.to_str().unwrap();

        {
            let db = WmDb::open_local(path).await.unwrap();
            db.conn()
                .execute(
                    "INSERT INTO sync_state (key, value) VALUES ('k', 'v')",
                    (),
                )
                .await
                .unwrap();
        }

        let db = WmDb::open_local(path).await.unwrap();
        let mut rows = db
            .conn()
            .query("SELECT value FROM sync_state WHERE key = 'k'", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<String>(0).unwrap(), "v");
    }
}
