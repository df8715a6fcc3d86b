//! Entity structs for the synced Waymark domain objects.
//!
//! `Entity` is the tagged union passed between the sync components. Remote and
//! persisted data arrive as loosely-typed JSON records and are mapped onto the
//! union with [`Entity::from_record`] at the storage boundary.

mod issue;
mod milestone;
mod project;
mod record;

pub use issue::Issue;
pub use milestone::Milestone;
pub use project::Project;
pub use record::EntityRecord;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::enums::EntityType;
use crate::errors::CoreError;

/// Any entity that takes part in a sync.
///
/// Serialized with an `entity_type` tag so checkpoint snapshots can be decoded
/// without knowing the type up front.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(tag = "entity_type", rename_all = "snake_case")]
pub enum Entity {
    Project(Project),
    Milestone(Milestone),
    Issue(Issue),
}

impl Entity {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Project(p) => &p.id,
            Self::Milestone(m) => &m.id,
            Self::Issue(i) => &i.id,
        }
    }

    #[must_use]
    pub const fn entity_type(&self) -> EntityType {
        match self {
            Self::Project(_) => EntityType::Project,
            Self::Milestone(_) => EntityType::Milestone,
            Self::Issue(_) => EntityType::Issue,
        }
    }

    /// Map a loosely-typed record onto the union.
    ///
    /// Unknown keys are ignored and missing optional fields take their
    /// defaults, so partial remote payloads still map as long as they carry an
    /// `id`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidRecord` if the record is not an object, has no
    /// non-empty string `id`, or a present field has the wrong shape.
    pub fn from_record(
        entity_type: EntityType,
        record: &serde_json::Value,
    ) -> Result<Self, CoreError> {
        let invalid = |reason: String| CoreError::InvalidRecord {
            entity_type: entity_type.to_string(),
            reason,
        };

        let object = record
            .as_object()
            .ok_or_else(|| invalid("record is not an object".into()))?;
        match object.get("id").and_then(serde_json::Value::as_str) {
            Some(id) if !id.is_empty() => {}
            _ => return Err(invalid("missing id".into())),
        }

        let value = record.clone();
        let entity = match entity_type {
            EntityType::Project => serde_json::from_value(value).map(Self::Project),
            EntityType::Milestone => serde_json::from_value(value).map(Self::Milestone),
            EntityType::Issue => serde_json::from_value(value).map(Self::Issue),
        };
        entity.map_err(|e| invalid(e.to_string()))
    }

    /// Serialize to the tagged JSON form used in snapshots.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if serialization fails.
    pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Dependency ids declared by a loosely-typed record of `entity_type`, in the
/// order of [`EntityType::dependency_fields`]. Null, empty, and repeated ids
/// are dropped.
#[must_use]
pub fn declared_dependencies(entity_type: EntityType, record: &serde_json::Value) -> Vec<String> {
    let mut deps: Vec<String> = Vec::new();
    for field in entity_type.dependency_fields() {
        if let Some(dep) = record.get(*field).and_then(serde_json::Value::as_str) {
            if !dep.is_empty() && !deps.iter().any(|d| d == dep) {
                deps.push(dep.to_string());
            }
        }
    }
    deps
}

impl From<Project> for Entity {
    fn from(value: Project) -> Self {
        Self::Project(value)
    }
}

impl From<Milestone> for Entity {
    fn from(value: Milestone) -> Self {
        Self::Milestone(value)
    }
}

impl From<Issue> for Entity {
    fn from(value: Issue) -> Self {
        Self::Issue(value)
    }
}
