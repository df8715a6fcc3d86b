//! Database error types for wm-db.

use thiserror::Error;

/// Errors from database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// A SQL query failed or returned data that could not be decoded.
    #[error("Query failed: {0}")]
    Query(String),

    /// Schema migration failed.
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Expected a result row but none was returned.
    #[error("No result returned")]
    NoResult,

    /// An update targeted an entity that does not exist.
    #[error("Entity not found: {0}")]
    NotFound(String),

    /// Underlying libSQL error.
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// The database file location could not be prepared.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored record did not map onto a typed entity.
    #[error(transparent)]
    Core(#[from] wm_core::errors::CoreError),

    /// Catch-all for unexpected errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
