use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::Entity;
use crate::enums::EntityType;

/// An entity as held by the local store, with its sync bookkeeping.
///
/// `modified` and `local_changes` mark uncommitted local edits. They are
/// cleared by a rollback or once the change has been pushed.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct EntityRecord {
    pub entity: Entity,
    /// Serialized `SyncMetadata`; owned by the metadata service.
    #[serde(default)]
    pub github_sync_metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub modified: bool,
    #[serde(default)]
    pub local_changes: Option<serde_json::Map<String, serde_json::Value>>,
    pub updated_at: DateTime<Utc>,
}

impl EntityRecord {
    #[must_use]
    pub fn new(entity: impl Into<Entity>) -> Self {
        Self {
            entity: entity.into(),
            github_sync_metadata: None,
            modified: false,
            local_changes: None,
            updated_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        self.entity.id()
    }

    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        self.entity.entity_type()
    }

    /// Record uncommitted local field changes.
    pub fn mark_modified(&mut self, changes: serde_json::Map<String, serde_json::Value>) {
        self.modified = true;
        match self.local_changes.as_mut() {
            Some(existing) => existing.extend(changes),
            None => self.local_changes = Some(changes),
        }
    }

    pub fn clear_modified(&mut self) {
        self.modified = false;
        self.local_changes = None;
    }
}
