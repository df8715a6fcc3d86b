//! Sync engine error types.

use thiserror::Error;

/// Errors surfaced by the stateful sync components.
///
/// Graph problems and conflict ambiguity are reported as data, never as
/// `SyncError`.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The backing entity or sync-state store failed.
    #[error("Storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A checkpoint or metadata payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The prompt channel failed while asking for input.
    #[error("Prompt I/O error: {0}")]
    Prompt(#[from] std::io::Error),

    /// An entity named by the caller does not exist in the store.
    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    /// There is no latest checkpoint to operate on.
    #[error("No checkpoint available")]
    NoCheckpoint,
}

impl SyncError {
    /// Wrap a store error.
    pub fn storage<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Storage(Box::new(error))
    }
}
