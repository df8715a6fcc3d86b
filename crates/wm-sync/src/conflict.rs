//! Field-level conflict resolution.
//!
//! Three-way diff detection happens upstream; this module only decides, per
//! field, whether a value can be applied automatically or must wait for a
//! human. The decision is driven by a [`StrategyTable`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use wm_config::ConflictConfig;
use wm_core::enums::ConflictResolutionStrategy;

/// Fields whose conflicts block a sync until reviewed.
pub const CRITICAL_FIELDS: [&str; 3] = ["status", "assignee", "milestone"];

/// Separator placed between local and remote text by `merge_append`.
pub const MERGE_APPEND_SEPARATOR: &str = "\n\n--- REMOTE CHANGES ---\n";

/// Field name → strategy. Fields without an entry are flagged for review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyTable {
    strategies: BTreeMap<String, ConflictResolutionStrategy>,
}

impl Default for StrategyTable {
    fn default() -> Self {
        use ConflictResolutionStrategy::{FlagForReview, MergeAppend, MergeUnion, RemoteWins};

        let entries = [
            ("status", FlagForReview),
            ("assignee", FlagForReview),
            ("milestone", FlagForReview),
            ("priority", FlagForReview),
            ("due_date", FlagForReview),
            ("labels", MergeUnion),
            ("description", MergeAppend),
            ("content", MergeAppend),
            ("title", RemoteWins),
            ("updated_at", RemoteWins),
            ("closed_at", RemoteWins),
            ("github_issue_number", RemoteWins),
        ];
        Self {
            strategies: entries
                .into_iter()
                .map(|(field, strategy)| (field.to_string(), strategy))
                .collect(),
        }
    }
}

impl StrategyTable {
    /// A table with no entries: every field is flagged for review.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            strategies: BTreeMap::new(),
        }
    }

    /// Built-in table with `[conflicts.strategies]` overrides applied.
    #[must_use]
    pub fn from_config(config: &ConflictConfig) -> Self {
        let mut table = Self::default();
        for (field, strategy) in &config.strategies {
            table.set(field.clone(), *strategy);
        }
        table
    }

    #[must_use]
    pub fn get(&self, field: &str) -> ConflictResolutionStrategy {
        self.strategies.get(field).copied().unwrap_or_default()
    }

    pub fn set(&mut self, field: impl Into<String>, strategy: ConflictResolutionStrategy) {
        self.strategies.insert(field.into(), strategy);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ConflictResolutionStrategy)> {
        self.strategies.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// Fields that diverged on both sides for one issue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub issue_id: String,
    pub field_names: Vec<String>,
    pub local: Map<String, Value>,
    pub remote: Map<String, Value>,
    #[serde(default)]
    pub local_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub remote_updated_at: Option<DateTime<Utc>>,
}

impl Conflict {
    /// Build a conflict, dropping repeated field names.
    #[must_use]
    pub fn new(
        issue_id: impl Into<String>,
        field_names: impl IntoIterator<Item = impl Into<String>>,
        local: Map<String, Value>,
        remote: Map<String, Value>,
    ) -> Self {
        let mut fields: Vec<String> = Vec::new();
        for name in field_names {
            let name = name.into();
            if !fields.contains(&name) {
                fields.push(name);
            }
        }
        Self {
            issue_id: issue_id.into(),
            field_names: fields,
            local,
            remote,
            local_updated_at: None,
            remote_updated_at: None,
        }
    }

    #[must_use]
    pub fn with_timestamps(
        mut self,
        local_updated_at: Option<DateTime<Utc>>,
        remote_updated_at: Option<DateTime<Utc>>,
    ) -> Self {
        self.local_updated_at = local_updated_at;
        self.remote_updated_at = remote_updated_at;
        self
    }
}

/// Per-issue outcome of conflict resolution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueResolution {
    pub issue_id: String,
    /// Values safe to apply now.
    pub resolved: Map<String, Value>,
    /// Fields that need a human decision.
    pub flagged: Vec<String>,
    /// Values computed for flagged fields, shown to the reviewer only.
    pub drafts: Map<String, Value>,
}

impl IssueResolution {
    #[must_use]
    pub fn has_critical_conflicts(&self) -> bool {
        ConflictResolver::has_critical_conflicts(&self.flagged)
    }

    #[must_use]
    pub fn needs_review(&self) -> bool {
        !self.flagged.is_empty()
    }
}

/// Applies a [`StrategyTable`] to conflicting fields.
#[derive(Debug, Clone, Default)]
pub struct ConflictResolver {
    table: StrategyTable,
}

impl ConflictResolver {
    /// Resolver with the built-in strategy table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_table(table: StrategyTable) -> Self {
        Self { table }
    }

    #[must_use]
    pub const fn table(&self) -> &StrategyTable {
        &self.table
    }

    #[must_use]
    pub fn strategy_for(&self, field: &str) -> ConflictResolutionStrategy {
        self.table.get(field)
    }

    /// Resolve a single field. Returns the value to use (if any) and whether
    /// the field must be reviewed.
    ///
    /// `base` is accepted for symmetry with the diff that produced the
    /// conflict; none of the current strategies consult it.
    #[must_use]
    pub fn resolve_conflict(
        &self,
        field: &str,
        _base: &Value,
        local: &Value,
        remote: &Value,
    ) -> (Option<Value>, bool) {
        match self.strategy_for(field) {
            ConflictResolutionStrategy::FlagForReview => (None, true),
            ConflictResolutionStrategy::RemoteWins => (Some(remote.clone()), false),
            ConflictResolutionStrategy::LocalWins => (Some(local.clone()), false),
            ConflictResolutionStrategy::MergeUnion => (Some(merge_union(local, remote)), false),
            ConflictResolutionStrategy::MergeAppend => (Some(merge_append(local, remote)), true),
        }
    }

    /// Resolve every listed field of one issue.
    ///
    /// Fields absent from an object are treated as `null`.
    #[must_use]
    pub fn resolve_issue_conflicts(
        &self,
        issue_id: &str,
        base: &Map<String, Value>,
        local: &Map<String, Value>,
        remote: &Map<String, Value>,
        conflict_fields: &[String],
    ) -> IssueResolution {
        let mut resolution = IssueResolution {
            issue_id: issue_id.to_string(),
            ..IssueResolution::default()
        };

        for field in conflict_fields {
            let (value, flagged) = self.resolve_conflict(
                field,
                base.get(field).unwrap_or(&Value::Null),
                local.get(field).unwrap_or(&Value::Null),
                remote.get(field).unwrap_or(&Value::Null),
            );
            tracing::debug!(
                issue_id,
                field = %field,
                strategy = %self.strategy_for(field),
                flagged,
                "resolved field conflict"
            );

            match (value, flagged) {
                (Some(value), true) if !value.is_null() => {
                    resolution.flagged.push(field.clone());
                    resolution.drafts.insert(field.clone(), value);
                }
                (_, true) => resolution.flagged.push(field.clone()),
                (Some(value), false) if !value.is_null() => {
                    resolution.resolved.insert(field.clone(), value);
                }
                (_, false) => {}
            }
        }

        if resolution.has_critical_conflicts() {
            tracing::info!(
                issue_id,
                flagged = ?resolution.flagged,
                "issue has critical conflicts"
            );
        }
        resolution
    }

    /// Resolve a [`Conflict`] against the given base object.
    #[must_use]
    pub fn resolve(&self, conflict: &Conflict, base: &Map<String, Value>) -> IssueResolution {
        self.resolve_issue_conflicts(
            &conflict.issue_id,
            base,
            &conflict.local,
            &conflict.remote,
            &conflict.field_names,
        )
    }

    /// True if any flagged field is one of [`CRITICAL_FIELDS`].
    #[must_use]
    pub fn has_critical_conflicts<S: AsRef<str>>(flagged: &[S]) -> bool {
        flagged
            .iter()
            .any(|field| CRITICAL_FIELDS.contains(&field.as_ref()))
    }
}

/// Coerce a value to list items: arrays as-is, `null`/`""` as empty,
/// anything else as a single item.
fn as_items(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        Value::String(s) if s.is_empty() => Vec::new(),
        other => vec![other.clone()],
    }
}

/// Local items in order, then remote items not already present.
fn merge_union(local: &Value, remote: &Value) -> Value {
    let mut merged: Vec<Value> = Vec::new();
    for item in as_items(local).into_iter().chain(as_items(remote)) {
        if !merged.contains(&item) {
            merged.push(item);
        }
    }
    Value::Array(merged)
}

fn text_of(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn merge_append(local: &Value, remote: &Value) -> Value {
    Value::String(format!(
        "{}{MERGE_APPEND_SEPARATOR}{}",
        text_of(local),
        text_of(remote)
    ))
}
