//! Go/no-go decision before any remote mutation.

use std::fmt;

use serde::{Deserialize, Serialize};
use wm_config::SyncConfig;

use crate::conflict::{CRITICAL_FIELDS, IssueResolution};
use crate::dependency::ResolutionResult;

/// Why a sync must not proceed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockingReason {
    MissingDependency { entity_id: String, missing: Vec<String> },
    CircularDependency { chain: Vec<String> },
    CriticalConflict { issue_id: String, fields: Vec<String> },
}

impl fmt::Display for BlockingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingDependency { entity_id, missing } => {
                write!(f, "{entity_id} depends on missing {}", missing.join(", "))
            }
            Self::CircularDependency { chain } => {
                write!(f, "circular dependency {}", chain.join(" -> "))
            }
            Self::CriticalConflict { issue_id, fields } => {
                write!(f, "{issue_id} has conflicting {} needing review", fields.join(", "))
            }
        }
    }
}

/// Ordered entities plus per-issue conflict outcomes for one sync run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncPlan {
    pub resolution: ResolutionResult,
    pub conflicts: Vec<IssueResolution>,
    /// Missing dependencies are tolerated; cycles and critical conflicts still block.
    #[serde(default)]
    pub allow_missing: bool,
}

impl SyncPlan {
    /// True when the run must stop before touching the remote.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        !self.resolution.circular_dependencies.is_empty()
            || (!self.allow_missing && !self.resolution.missing_dependencies.is_empty())
            || self
                .conflicts
                .iter()
                .any(IssueResolution::has_critical_conflicts)
    }

    /// Every reason the plan is blocked, in a stable order: missing
    /// dependencies, cycles, then critical conflicts.
    #[must_use]
    pub fn blocking_reasons(&self) -> Vec<BlockingReason> {
        let missing = self
            .resolution
            .missing_dependencies
            .iter()
            .filter(|_| !self.allow_missing)
            .map(|(entity_id, missing)| BlockingReason::MissingDependency {
                entity_id: entity_id.clone(),
                missing: missing.clone(),
            });
        let cycles = self
            .resolution
            .circular_dependencies
            .iter()
            .map(|chain| BlockingReason::CircularDependency {
                chain: chain.clone(),
            });
        let critical = self.conflicts.iter().filter_map(|conflict| {
            let fields: Vec<String> = conflict
                .flagged
                .iter()
                .filter(|f| CRITICAL_FIELDS.contains(&f.as_str()))
                .cloned()
                .collect();
            (!fields.is_empty()).then(|| BlockingReason::CriticalConflict {
                issue_id: conflict.issue_id.clone(),
                fields,
            })
        });

        missing.chain(cycles).chain(critical).collect()
    }

    /// Issues with flagged but non-critical fields; they can be applied with
    /// the flagged fields held back.
    #[must_use]
    pub fn needs_review(&self) -> Vec<&IssueResolution> {
        self.conflicts
            .iter()
            .filter(|c| c.needs_review() && !c.has_critical_conflicts())
            .collect()
    }
}

/// Combines dependency ordering and conflict outcomes into a [`SyncPlan`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncPlanner {
    allow_missing: bool,
}

impl SyncPlanner {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            allow_missing: false,
        }
    }

    /// Planner honouring `sync.allow_missing_dependencies`.
    #[must_use]
    pub const fn from_config(config: &SyncConfig) -> Self {
        Self {
            allow_missing: config.allow_missing_dependencies,
        }
    }

    #[must_use]
    pub fn plan(&self, resolution: ResolutionResult, conflicts: Vec<IssueResolution>) -> SyncPlan {
        let plan = SyncPlan {
            resolution,
            conflicts,
            allow_missing: self.allow_missing,
        };
        if plan.is_blocked() {
            for reason in plan.blocking_reasons() {
                tracing::warn!(%reason, "sync blocked");
            }
        } else {
            if !plan.resolution.missing_dependencies.is_empty() {
                tracing::warn!(
                    entities = plan.resolution.missing_dependencies.len(),
                    "proceeding with unresolved dependencies"
                );
            }
            tracing::debug!(
                entities = plan.resolution.ordered_entities.len(),
                conflicts = plan.conflicts.len(),
                "sync plan ready"
            );
        }
        plan
    }
}
