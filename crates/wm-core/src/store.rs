//! Storage ports required by the sync engine.
//!
//! `wm-db` implements both traits on top of libSQL. The sync components only
//! see these traits, so tests can substitute stores that fail on purpose.

use std::error::Error as StdError;

use crate::entities::EntityRecord;

/// Entity records keyed by id.
///
/// Ids are unique across projects, milestones, and issues.
#[allow(async_fn_in_trait)]
pub trait EntityStore {
    type Error: StdError + Send + Sync + 'static;

    /// Load a record, or `None` if no entity has this id.
    async fn get_entity(&self, id: &str) -> Result<Option<EntityRecord>, Self::Error>;

    /// Overwrite an existing record (entity fields, sync metadata, markers).
    async fn update_entity(&self, record: &EntityRecord) -> Result<(), Self::Error>;
}

/// String key-value store for sync bookkeeping (checkpoints).
#[allow(async_fn_in_trait)]
pub trait SyncStateStore {
    type Error: StdError + Send + Sync + 'static;

    async fn get(&self, key: &str) -> Result<Option<String>, Self::Error>;

    async fn set(&self, key: &str, value: &str) -> Result<(), Self::Error>;

    /// Write several entries so that either all or none become visible.
    async fn set_all(&self, entries: &[(String, String)]) -> Result<(), Self::Error>;

    /// Delete a key. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), Self::Error>;

    /// All keys starting with `prefix`, in ascending order.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, Self::Error>;
}
