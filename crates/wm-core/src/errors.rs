//! Cross-cutting error types for Waymark.
//!
//! Domain-specific errors (`DatabaseError`, `SyncError`, `ConfigError`) live in
//! their respective crates.

use thiserror::Error;

/// Errors raised while mapping data onto core types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A loosely-typed record could not be mapped onto a typed entity.
    #[error("Invalid {entity_type} record: {reason}")]
    InvalidRecord { entity_type: String, reason: String },
}
