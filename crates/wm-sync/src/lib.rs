//! # wm-sync
//!
//! Sync consistency engine for Waymark.
//!
//! The pure components decide *what* to apply:
//! - [`DependencyResolver`] orders a fetched batch so foreign-key targets come first
//! - [`ConflictResolver`] settles fields that diverged on both sides
//! - [`SyncPlanner`] turns both into a go/no-go [`SyncPlan`]
//!
//! The stateful components work against the `wm_core::store` traits:
//! - [`SyncCheckpointManager`] snapshots progress and rolls back interrupted runs
//! - [`SyncMetadataService`] keeps per-entity sync history and health statistics
//! - [`BaselineSelector`] asks which side is the baseline on the first sync

pub mod baseline;
pub mod checkpoint;
pub mod conflict;
pub mod dependency;
pub mod error;
pub mod metadata;
pub mod plan;

pub use baseline::{
    BaselineSelectionResult, BaselineSelector, ChangedIssue, IoPrompter, Prompter,
};
pub use checkpoint::SyncCheckpointManager;
pub use conflict::{Conflict, ConflictResolver, IssueResolution, StrategyTable};
pub use dependency::{DependencyResolver, EntityBatch, ResolutionResult, ResolvedEntity};
pub use error::SyncError;
pub use metadata::{MetadataCache, SyncMetadataService, SyncOutcome};
pub use plan::{BlockingReason, SyncPlan, SyncPlanner};
