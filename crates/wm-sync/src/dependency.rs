//! Dependency ordering for a fetched sync batch.
//!
//! Every entity becomes a node in a `DiGraph`; an edge `dep → entity` is added
//! for each declared dependency that is present in the batch. The resolver
//! reports missing references and cycles as data and produces an application
//! order in which dependencies always come before their dependents.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use rustworkx_core::petgraph::Direction;
use rustworkx_core::petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use wm_config::SyncConfig;
use wm_core::entities::declared_dependencies;
use wm_core::enums::EntityType;

/// Loosely-typed records fetched for one sync run, grouped by type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityBatch {
    #[serde(default)]
    pub projects: Vec<Value>,
    #[serde(default)]
    pub milestones: Vec<Value>,
    #[serde(default)]
    pub issues: Vec<Value>,
}

impl EntityBatch {
    #[must_use]
    pub fn records(&self, entity_type: EntityType) -> &[Value] {
        match entity_type {
            EntityType::Project => &self.projects,
            EntityType::Milestone => &self.milestones,
            EntityType::Issue => &self.issues,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.projects.is_empty() && self.milestones.is_empty() && self.issues.is_empty()
    }
}

/// One entry of the application order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedEntity {
    pub entity_type: EntityType,
    pub id: String,
    pub data: Value,
}

/// Outcome of ordering a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub ordered_entities: Vec<ResolvedEntity>,
    /// Each chain reads "a depends on b depends on ... a".
    pub circular_dependencies: Vec<Vec<String>>,
    /// Entity id → dependency ids not present in the batch, in declaration order.
    pub missing_dependencies: BTreeMap<String, Vec<String>>,
}

impl ResolutionResult {
    /// True when a cycle or a missing reference was found.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.circular_dependencies.is_empty() || !self.missing_dependencies.is_empty()
    }

    /// Ids in application order.
    #[must_use]
    pub fn ordered_ids(&self) -> Vec<&str> {
        self.ordered_entities.iter().map(|e| e.id.as_str()).collect()
    }
}

/// Node payload: one entity and the ids it declares as dependencies.
#[derive(Debug, Clone)]
struct DependencyNode {
    entity_type: EntityType,
    id: String,
    data: Value,
    depends_on: Vec<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    New,
    OnStack,
    Done,
}

/// Orders entities so that foreign-key targets are applied first.
#[derive(Debug, Clone, Copy, Default)]
pub struct DependencyResolver {
    allow_missing: bool,
}

impl DependencyResolver {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            allow_missing: false,
        }
    }

    /// Resolver honouring `sync.allow_missing_dependencies`.
    #[must_use]
    pub const fn from_config(config: &SyncConfig) -> Self {
        Self {
            allow_missing: config.allow_missing_dependencies,
        }
    }

    #[must_use]
    pub const fn allows_missing(&self) -> bool {
        self.allow_missing
    }

    /// [`resolve`](Self::resolve) with the configured allow-missing flag.
    #[must_use]
    pub fn resolve_batch(&self, batch: &EntityBatch) -> ResolutionResult {
        self.resolve(batch, self.allow_missing)
    }

    /// Build the dependency graph for `batch` and compute an application order.
    ///
    /// With `allow_missing`, entities that have missing dependencies (and
    /// everything downstream of them) are moved to the end of the order
    /// instead of being interleaved with fully resolved entities.
    #[must_use]
    pub fn resolve(&self, batch: &EntityBatch, allow_missing: bool) -> ResolutionResult {
        let (graph, index) = Self::build_nodes(batch);
        let (graph, missing) = Self::link(graph, &index);

        let circular_dependencies = Self::find_cycles(&graph, &index);
        for chain in &circular_dependencies {
            tracing::warn!(cycle = %chain.join(" -> "), "circular dependency in sync batch");
        }

        let sorted = Self::kahn_order(&graph);
        let order = if allow_missing && !missing.is_empty() {
            Self::defer_unresolved(&graph, &index, &missing, sorted)
        } else {
            sorted
        };

        let ordered_entities = order
            .into_iter()
            .map(|idx| {
                let node = &graph[idx];
                ResolvedEntity {
                    entity_type: node.entity_type,
                    id: node.id.clone(),
                    data: node.data.clone(),
                }
            })
            .collect::<Vec<_>>();

        tracing::debug!(
            entities = graph.node_count(),
            ordered = ordered_entities.len(),
            cycles = circular_dependencies.len(),
            missing = missing.len(),
            "resolved sync batch order"
        );

        ResolutionResult {
            ordered_entities,
            circular_dependencies,
            missing_dependencies: missing,
        }
    }

    /// Add one node per usable record, in discovery order.
    fn build_nodes(batch: &EntityBatch) -> (DiGraph<DependencyNode, ()>, HashMap<String, NodeIndex>) {
        let mut graph = DiGraph::new();
        let mut index: HashMap<String, NodeIndex> = HashMap::new();

        for entity_type in EntityType::ALL {
            for record in batch.records(entity_type) {
                let Some(id) = record
                    .get("id")
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
                else {
                    tracing::debug!(%entity_type, "skipping record without an id");
                    continue;
                };
                if index.contains_key(id) {
                    tracing::warn!(%entity_type, entity_id = id, "duplicate id in sync batch, keeping first");
                    continue;
                }
                let idx = graph.add_node(DependencyNode {
                    entity_type,
                    id: id.to_string(),
                    data: record.clone(),
                    depends_on: declared_dependencies(entity_type, record),
                });
                index.insert(id.to_string(), idx);
            }
        }

        (graph, index)
    }

    /// Add `dep → entity` edges and collect references that do not resolve.
    fn link(
        mut graph: DiGraph<DependencyNode, ()>,
        index: &HashMap<String, NodeIndex>,
    ) -> (DiGraph<DependencyNode, ()>, BTreeMap<String, Vec<String>>) {
        let mut missing: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let nodes: Vec<NodeIndex> = graph.node_indices().collect();

        for idx in nodes {
            let deps = graph[idx].depends_on.clone();
            for dep in deps {
                if let Some(&dep_idx) = index.get(&dep) {
                    graph.add_edge(dep_idx, idx, ());
                } else {
                    missing.entry(graph[idx].id.clone()).or_default().push(dep);
                }
            }
        }

        (graph, missing)
    }

    /// Depth-first search over "depends on" links, reporting every back edge
    /// as a cycle reconstructed from the DFS stack.
    ///
    /// The walk keeps its own frame stack of `(node, next dependency)` so long
    /// chains do not grow the call stack.
    fn find_cycles(
        graph: &DiGraph<DependencyNode, ()>,
        index: &HashMap<String, NodeIndex>,
    ) -> Vec<Vec<String>> {
        let mut state = vec![Visit::New; graph.node_count()];
        let mut frames: Vec<(NodeIndex, usize)> = Vec::new();
        let mut cycles = Vec::new();

        for start in graph.node_indices() {
            if state[start.index()] != Visit::New {
                continue;
            }
            state[start.index()] = Visit::OnStack;
            frames.push((start, 0));

            while let Some(frame) = frames.last_mut() {
                let (node, next) = *frame;
                let Some(dep) = graph[node].depends_on.get(next) else {
                    state[node.index()] = Visit::Done;
                    frames.pop();
                    continue;
                };
                frame.1 += 1;

                let Some(&dep_idx) = index.get(dep) else {
                    continue;
                };
                match state[dep_idx.index()] {
                    Visit::New => {
                        state[dep_idx.index()] = Visit::OnStack;
                        frames.push((dep_idx, 0));
                    }
                    Visit::OnStack => {
                        if let Some(pos) = frames.iter().position(|&(n, _)| n == dep_idx) {
                            let mut chain: Vec<String> = frames[pos..]
                                .iter()
                                .map(|&(n, _)| graph[n].id.clone())
                                .collect();
                            chain.push(graph[dep_idx].id.clone());
                            cycles.push(chain);
                        }
                    }
                    Visit::Done => {}
                }
            }
        }
        cycles
    }

    /// Kahn's algorithm with a FIFO queue. Nodes on or behind a cycle never
    /// reach in-degree zero and are left out.
    fn kahn_order(graph: &DiGraph<DependencyNode, ()>) -> Vec<NodeIndex> {
        let mut in_degree: Vec<usize> = graph
            .node_indices()
            .map(|idx| graph.neighbors_directed(idx, Direction::Incoming).count())
            .collect();

        let mut queue: VecDeque<NodeIndex> = graph
            .node_indices()
            .filter(|idx| in_degree[idx.index()] == 0)
            .collect();
        let mut order = Vec::with_capacity(graph.node_count());

        while let Some(idx) = queue.pop_front() {
            order.push(idx);
            let mut dependents: Vec<NodeIndex> =
                graph.neighbors_directed(idx, Direction::Outgoing).collect();
            dependents.sort_unstable();
            for dependent in dependents {
                let degree = &mut in_degree[dependent.index()];
                *degree = degree.saturating_sub(1);
                if *degree == 0 {
                    queue.push_back(dependent);
                }
            }
        }
        order
    }

    /// Move entities with missing dependencies, and their transitive
    /// dependents, behind everything that resolved cleanly.
    fn defer_unresolved(
        graph: &DiGraph<DependencyNode, ()>,
        index: &HashMap<String, NodeIndex>,
        missing: &BTreeMap<String, Vec<String>>,
        sorted: Vec<NodeIndex>,
    ) -> Vec<NodeIndex> {
        let mut held: HashSet<NodeIndex> = HashSet::new();
        let mut frontier: VecDeque<NodeIndex> = VecDeque::new();

        for (id, deps) in missing {
            tracing::warn!(
                entity_id = %id,
                missing = %deps.join(", "),
                "applying entity with unresolved dependencies last"
            );
            if let Some(&idx) = index.get(id) {
                if held.insert(idx) {
                    frontier.push_back(idx);
                }
            }
        }
        while let Some(idx) = frontier.pop_front() {
            for dependent in graph.neighbors_directed(idx, Direction::Outgoing) {
                if held.insert(dependent) {
                    frontier.push_back(dependent);
                }
            }
        }

        let (deferred, resolved): (Vec<NodeIndex>, Vec<NodeIndex>) =
            sorted.into_iter().partition(|idx| held.contains(idx));
        resolved.into_iter().chain(deferred).collect()
    }
}
