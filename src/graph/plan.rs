//! Execution plan types.
//!
//! An execution plan is a topological order of one environment's graph,
//! along with the dependency edges it was computed from and the grouping
//! into waves used for display and parallel scheduling.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::node::{NodeId, ResourceKind};
use super::resource_graph::ResourceGraph;

/// An ordered sequence of nodes consistent with the dependency DAG.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Environment the plan belongs to.
    pub environment: String,
    /// When the plan was computed.
    pub created_at: DateTime<Utc>,
    /// Topological order.
    order: Vec<NodeId>,
    /// Resolved dependencies per node, indexed by [`NodeId::index`].
    dependencies: Vec<Vec<NodeId>>,
    /// Nodes grouped by dependency depth.
    waves: Vec<Vec<NodeId>>,
}

/// A single step of a plan, with names resolved for display.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedStep {
    /// Position in the plan (1-based).
    pub position: usize,
    /// Wave the step belongs to (1-based).
    pub wave: usize,
    /// Resource name.
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Names of the resources this step waits for.
    pub depends_on: Vec<String>,
    /// Whether a failure of this step is tolerated.
    pub best_effort: bool,
}

impl ExecutionPlan {
    pub(crate) fn new(
        environment: &str,
        order: Vec<NodeId>,
        dependencies: Vec<Vec<NodeId>>,
    ) -> Self {
        let waves = compute_waves(&order, &dependencies);
        Self {
            environment: environment.to_string(),
            created_at: Utc::now(),
            order,
            dependencies,
            waves,
        }
    }

    /// Nodes in execution order.
    #[must_use]
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    /// Number of planned nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if the plan has nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Direct dependencies of a node (explicit and inferred).
    #[must_use]
    pub fn dependencies(&self, id: NodeId) -> &[NodeId] {
        self.dependencies.get(id.index()).map_or(&[], Vec::as_slice)
    }

    /// Nodes grouped into waves; every node's dependencies live in earlier waves.
    #[must_use]
    pub fn waves(&self) -> &[Vec<NodeId>] {
        &self.waves
    }

    /// Position of a node in the plan.
    #[must_use]
    pub fn position(&self, id: NodeId) -> Option<usize> {
        self.order.iter().position(|candidate| *candidate == id)
    }

    /// Names of the planned nodes in order.
    #[must_use]
    pub fn names<'g>(&self, graph: &'g ResourceGraph) -> Vec<&'g str> {
        self.order
            .iter()
            .filter_map(|id| graph.node(*id))
            .map(|node| node.name())
            .collect()
    }

    /// Describes every step with names resolved against `graph`.
    #[must_use]
    pub fn steps(&self, graph: &ResourceGraph) -> Vec<PlannedStep> {
        let wave_of = |id: NodeId| {
            self.waves
                .iter()
                .position(|wave| wave.contains(&id))
                .map_or(0, |w| w + 1)
        };

        self.order
            .iter()
            .enumerate()
            .filter_map(|(i, id)| {
                let node = graph.node(*id)?;
                Some(PlannedStep {
                    position: i + 1,
                    wave: wave_of(*id),
                    name: node.name().to_string(),
                    kind: node.kind(),
                    depends_on: self
                        .dependencies(*id)
                        .iter()
                        .filter_map(|dep| graph.node(*dep))
                        .map(|dep| dep.name().to_string())
                        .collect(),
                    best_effort: node.is_best_effort(),
                })
            })
            .collect()
    }
}

/// Assigns each node the wave after its deepest dependency.
fn compute_waves(order: &[NodeId], dependencies: &[Vec<NodeId>]) -> Vec<Vec<NodeId>> {
    let mut depth = vec![0usize; dependencies.len()];
    let mut waves: Vec<Vec<NodeId>> = Vec::new();

    for id in order {
        let level = dependencies
            .get(id.index())
            .into_iter()
            .flatten()
            .map(|dep| depth[dep.index()] + 1)
            .max()
            .unwrap_or(0);
        depth[id.index()] = level;

        if waves.len() <= level {
            waves.resize_with(level + 1, Vec::new);
        }
        waves[level].push(*id);
    }

    waves
}

impl std::fmt::Display for PlannedStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}. {} {}", self.position, self.kind, self.name)?;
        if !self.depends_on.is_empty() {
            write!(f, " (after {})", self.depends_on.join(", "))?;
        }
        if self.best_effort {
            write!(f, " [best-effort]")?;
        }
        Ok(())
    }
}

impl std::fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.order.is_empty() {
            return write!(f, "Nothing to apply in '{}'", self.environment);
        }
        write!(
            f,
            "Execution plan for '{}': {} resources in {} waves",
            self.environment,
            self.order.len(),
            self.waves.len()
        )
    }
}
