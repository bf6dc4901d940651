//! Plan executor.
//!
//! Walks an [`ExecutionPlan`] and applies every node through the provider.
//! A node is started only once all of its dependencies have executed. Up to
//! `max_parallel` provider calls run at the same time; with a limit of one the
//! plan order is followed exactly.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{ClusterformError, ProviderError, Result};
use crate::graph::{ExecutionPlan, NodeId, NodeStatus, Outputs, ResourceGraph, ResourceKind};
use crate::provider::ResourceProvider;

/// Cooperative stop flag shared between the caller and running executors.
///
/// Triggering it stops scheduling of nodes that have not started yet.
/// Provider calls already in flight are left to finish.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    /// Creates an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop.
    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns true once a stop was requested.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A node whose provider call failed.
#[derive(Debug, Clone, Serialize)]
pub struct NodeFailure {
    /// Resource name.
    pub node: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Error message.
    pub error: String,
    /// Whether the failure was tolerated.
    pub best_effort: bool,
}

/// Outcome of executing one environment's plan.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    /// Environment name.
    pub environment: String,
    /// Executed nodes in completion order.
    pub executed: Vec<String>,
    /// Failed nodes in completion order.
    pub failures: Vec<NodeFailure>,
    /// Nodes that could not run because an ancestor failed.
    pub skipped: Vec<String>,
    /// Nodes never started because execution stopped early.
    pub not_started: Vec<String>,
    /// Whether an abort was requested during execution.
    pub aborted: bool,
    /// Outputs of executed nodes.
    pub outputs: BTreeMap<String, Outputs>,
}

impl ExecutionResult {
    fn new(environment: &str) -> Self {
        Self {
            environment: environment.to_string(),
            executed: Vec::new(),
            failures: Vec::new(),
            skipped: Vec::new(),
            not_started: Vec::new(),
            aborted: false,
            outputs: BTreeMap::new(),
        }
    }

    /// The failure that stopped execution, if any.
    #[must_use]
    pub fn fatal_failure(&self) -> Option<&NodeFailure> {
        self.failures.iter().find(|f| !f.best_effort)
    }

    /// Returns true if the plan ran to completion without a fatal failure.
    #[must_use]
    pub fn success(&self) -> bool {
        self.fatal_failure().is_none() && !self.aborted && self.not_started.is_empty()
    }

    /// One-line human summary.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut parts = vec![format!("{} executed", self.executed.len())];
        if !self.failures.is_empty() {
            parts.push(format!("{} failed", self.failures.len()));
        }
        if !self.skipped.is_empty() {
            parts.push(format!("{} skipped", self.skipped.len()));
        }
        if !self.not_started.is_empty() {
            parts.push(format!("{} not started", self.not_started.len()));
        }
        parts.join(", ")
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.environment, self.summary())?;
        if self.aborted {
            write!(f, " (aborted)")?;
        }
        if let Some(failure) = self.fatal_failure() {
            write!(f, " - {} failed: {}", failure.node, failure.error)?;
        }
        Ok(())
    }
}

type NodeOutcome = (NodeId, std::result::Result<Outputs, ProviderError>);

/// Executor for resource plans.
pub struct PlanExecutor {
    /// Provider applying the resources.
    provider: Arc<dyn ResourceProvider>,
    /// Maximum provider calls in flight.
    max_parallel: usize,
    /// Stop flag.
    abort: AbortSignal,
}

impl PlanExecutor {
    /// Creates an executor that applies one node at a time.
    #[must_use]
    pub fn new(provider: Arc<dyn ResourceProvider>) -> Self {
        Self {
            provider,
            max_parallel: 1,
            abort: AbortSignal::new(),
        }
    }

    /// Sets the maximum number of concurrent provider calls.
    #[must_use]
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    /// Shares an abort signal with the caller.
    #[must_use]
    pub fn with_abort_signal(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    /// Executes `plan` against `graph`, recording statuses and outputs in the graph.
    ///
    /// Provider failures are reported in the returned [`ExecutionResult`],
    /// not as errors.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph rejects a status transition or a
    /// provider task panics.
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        graph: &mut ResourceGraph,
    ) -> Result<ExecutionResult> {
        info!(
            "Executing plan for {} with {} resources (parallelism {})",
            plan.environment,
            plan.len(),
            self.max_parallel
        );

        let mut result = ExecutionResult::new(&plan.environment);
        let mut tasks: JoinSet<NodeOutcome> = JoinSet::new();
        let mut in_flight: HashSet<NodeId> = HashSet::new();
        let mut halted = false;

        loop {
            if !halted && self.abort.is_aborted() {
                warn!("Abort requested, no further resources will be started");
                result.aborted = true;
                halted = true;
            }

            if !halted {
                self.schedule(plan, graph, &mut tasks, &mut in_flight, &mut result, &mut halted)?;
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };

            let (id, outcome) = joined.map_err(|e| {
                error!("Provider task panicked: {e}");
                ClusterformError::internal(format!("Provider task panicked: {e}"))
            })?;
            in_flight.remove(&id);

            match outcome {
                Ok(outputs) => {
                    let name = node_name(graph, id);
                    debug!("'{name}' executed");
                    graph.complete(id, outputs.clone())?;
                    result.outputs.insert(name.clone(), outputs);
                    result.executed.push(name);
                }
                Err(e) => {
                    if record_failure(graph, id, e.to_string(), &mut result)? {
                        halted = true;
                    }
                }
            }
        }

        finish(plan, graph, &mut result)?;

        info!("Plan for {}: {}", result.environment, result.summary());
        Ok(result)
    }

    /// Starts every node whose dependencies have executed, in plan order,
    /// until the parallelism limit is reached.
    fn schedule(
        &self,
        plan: &ExecutionPlan,
        graph: &mut ResourceGraph,
        tasks: &mut JoinSet<NodeOutcome>,
        in_flight: &mut HashSet<NodeId>,
        result: &mut ExecutionResult,
        halted: &mut bool,
    ) -> Result<()> {
        for &id in plan.order() {
            if *halted || in_flight.len() >= self.max_parallel {
                break;
            }
            if status_of(graph, id) != Some(NodeStatus::Declared) {
                continue;
            }

            if blocked_by_failure(plan, graph, id) {
                skip(graph, id, result)?;
                continue;
            }
            let ready = plan
                .dependencies(id)
                .iter()
                .all(|dep| status_of(graph, *dep) == Some(NodeStatus::Executed));
            if !ready {
                continue;
            }

            graph.transition(id, NodeStatus::Ready)?;
            graph.transition(id, NodeStatus::Executing)?;

            let inputs = match graph.resolve_inputs(id) {
                Ok(inputs) => inputs,
                Err(e) => {
                    *halted |= record_failure(graph, id, e.to_string(), result)?;
                    continue;
                }
            };

            let Some(node) = graph.node(id) else {
                continue;
            };
            let kind = node.kind();
            let name = node.name().to_string();
            let provider = Arc::clone(&self.provider);

            debug!("Starting {kind} '{name}'");
            in_flight.insert(id);
            tasks.spawn(async move {
                let outcome = provider.apply(kind, &name, &inputs).await;
                (id, outcome)
            });
        }
        Ok(())
    }
}

/// Marks a node failed. Returns true if the failure stops the plan.
fn record_failure(
    graph: &mut ResourceGraph,
    id: NodeId,
    error: String,
    result: &mut ExecutionResult,
) -> Result<bool> {
    graph.transition(id, NodeStatus::Failed)?;
    let Some(node) = graph.node(id) else {
        return Ok(false);
    };

    let best_effort = node.is_best_effort();
    if best_effort {
        warn!("Best-effort {} '{}' failed: {error}", node.kind(), node.name());
    } else {
        error!("{} '{}' failed: {error}", node.kind(), node.name());
    }

    result.failures.push(NodeFailure {
        node: node.name().to_string(),
        kind: node.kind(),
        error,
        best_effort,
    });
    Ok(!best_effort)
}

/// Sorts nodes that never started into skipped and not started.
fn finish(
    plan: &ExecutionPlan,
    graph: &mut ResourceGraph,
    result: &mut ExecutionResult,
) -> Result<()> {
    for &id in plan.order() {
        if status_of(graph, id) != Some(NodeStatus::Declared) {
            continue;
        }
        if blocked_by_failure(plan, graph, id) {
            skip(graph, id, result)?;
        } else {
            result.not_started.push(node_name(graph, id));
        }
    }
    Ok(())
}

fn skip(graph: &mut ResourceGraph, id: NodeId, result: &mut ExecutionResult) -> Result<()> {
    graph.transition(id, NodeStatus::Skipped)?;
    let name = node_name(graph, id);
    debug!("Skipping '{name}', an ancestor did not execute");
    result.skipped.push(name);
    Ok(())
}

fn blocked_by_failure(plan: &ExecutionPlan, graph: &ResourceGraph, id: NodeId) -> bool {
    plan.dependencies(id).iter().any(|dep| {
        matches!(
            status_of(graph, *dep),
            Some(NodeStatus::Failed | NodeStatus::Skipped)
        )
    })
}

fn status_of(graph: &ResourceGraph, id: NodeId) -> Option<NodeStatus> {
    graph.node(id).map(|node| node.status())
}

fn node_name(graph: &ResourceGraph, id: NodeId) -> String {
    graph
        .node(id)
        .map_or_else(|| format!("#{}", id.index()), |node| node.name().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{DependencyResolver, Inputs, Value};
    use crate::provider::SimulatedProvider;
    use std::time::Duration;

    fn refs(targets: &[(&str, &str)]) -> Inputs {
        targets
            .iter()
            .map(|(node, field)| (format!("{node}_{field}"), Value::reference(*node, *field)))
            .collect()
    }

    async fn run(
        graph: &mut ResourceGraph,
        provider: Arc<SimulatedProvider>,
        max_parallel: usize,
    ) -> ExecutionResult {
        let plan = DependencyResolver::new().resolve(graph).unwrap();
        PlanExecutor::new(provider)
            .with_max_parallel(max_parallel)
            .execute(&plan, graph)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_failed_dependency_is_never_applied() {
        let mut graph = ResourceGraph::new("test");
        let a = graph.declare("a", ResourceKind::Role, Inputs::new()).unwrap();
        let b = graph
            .declare("b", ResourceKind::InstanceProfile, refs(&[("a", "name")]))
            .unwrap();
        let provider = Arc::new(SimulatedProvider::new().fail_on("a", "access denied"));

        let result = run(&mut graph, Arc::clone(&provider), 1).await;

        assert!(result.executed.is_empty());
        assert_eq!(result.fatal_failure().unwrap().node, "a");
        assert_eq!(result.skipped, vec!["b"]);
        assert!(!result.success());
        assert_eq!(provider.calls(), vec!["a"]);
        assert_eq!(graph.node(a).unwrap().status(), NodeStatus::Failed);
        assert_eq!(graph.node(b).unwrap().status(), NodeStatus::Skipped);
        assert!(graph.node(a).unwrap().outputs().is_empty());
    }

    #[tokio::test]
    async fn test_join_waits_for_both_parents() {
        let mut graph = ResourceGraph::new("test");
        let c = graph
            .declare("c", ResourceKind::Cluster, refs(&[("a", "arn"), ("b", "arn")]))
            .unwrap();
        graph.declare("a", ResourceKind::Role, Inputs::new()).unwrap();
        graph.declare("b", ResourceKind::Role, Inputs::new()).unwrap();
        let provider = Arc::new(SimulatedProvider::new());

        let result = run(&mut graph, Arc::clone(&provider), 1).await;

        assert!(result.success());
        assert_eq!(result.executed, vec!["a", "b", "c"]);
        assert_eq!(provider.calls(), vec!["a", "b", "c"]);
        assert_eq!(
            graph.output(c, "name").unwrap(),
            Value::from("c"),
        );
        assert!(result.outputs["a"].contains_key("arn"));
    }

    #[tokio::test]
    async fn test_best_effort_failure_does_not_stop_plan() {
        let mut graph = ResourceGraph::new("test");
        let role = graph.declare("role", ResourceKind::Role, Inputs::new()).unwrap();
        let attach = graph
            .declare("attach", ResourceKind::PolicyAttachment, refs(&[("role", "name")]))
            .unwrap();
        graph.set_best_effort(attach, true).unwrap();
        let audit = graph
            .declare("audit", ResourceKind::ConfigFile, refs(&[("attach", "id")]))
            .unwrap();
        graph
            .declare("ns", ResourceKind::Namespace, refs(&[("role", "arn")]))
            .unwrap();
        let provider = Arc::new(SimulatedProvider::new().fail_on("attach", "already attached"));

        let result = run(&mut graph, provider, 1).await;

        assert!(result.success());
        assert_eq!(result.executed, vec!["role", "ns"]);
        assert_eq!(result.failures.len(), 1);
        assert!(result.failures[0].best_effort);
        assert!(result.fatal_failure().is_none());
        assert_eq!(result.skipped, vec!["audit"]);
        assert_eq!(graph.node(role).unwrap().status(), NodeStatus::Executed);
        assert_eq!(graph.node(audit).unwrap().status(), NodeStatus::Skipped);
    }

    #[tokio::test]
    async fn test_fatal_failure_stops_independent_nodes() {
        let mut graph = ResourceGraph::new("test");
        graph.declare("a", ResourceKind::Role, Inputs::new()).unwrap();
        graph.declare("b", ResourceKind::Namespace, Inputs::new()).unwrap();
        let provider = Arc::new(SimulatedProvider::new().fail_on("a", "boom"));

        let result = run(&mut graph, Arc::clone(&provider), 1).await;

        assert_eq!(result.not_started, vec!["b"]);
        assert!(result.skipped.is_empty());
        assert_eq!(provider.calls(), vec!["a"]);
        assert_eq!(result.to_string(), "test: 0 executed, 1 failed, 1 not started - a failed: Simulated failure for 'a': boom");
    }

    #[tokio::test]
    async fn test_missing_output_fails_the_consumer() {
        let mut graph = ResourceGraph::new("test");
        graph.declare("a", ResourceKind::Role, Inputs::new()).unwrap();
        graph
            .declare("b", ResourceKind::Namespace, refs(&[("a", "missing")]))
            .unwrap();

        let result = run(&mut graph, Arc::new(SimulatedProvider::new()), 1).await;

        assert_eq!(result.executed, vec!["a"]);
        let failure = result.fatal_failure().unwrap();
        assert_eq!(failure.node, "b");
        assert!(failure.error.contains("a.missing"));
    }

    #[tokio::test]
    async fn test_abort_before_start_runs_nothing() {
        let mut graph = ResourceGraph::new("test");
        graph.declare("a", ResourceKind::Role, Inputs::new()).unwrap();
        graph.declare("b", ResourceKind::Role, refs(&[("a", "arn")])).unwrap();
        let provider = Arc::new(SimulatedProvider::new());
        let plan = DependencyResolver::new().resolve(&graph).unwrap();

        let abort = AbortSignal::new();
        abort.trigger();
        let result = PlanExecutor::new(Arc::clone(&provider) as Arc<dyn ResourceProvider>)
            .with_abort_signal(abort)
            .execute(&plan, &mut graph)
            .await
            .unwrap();

        assert!(result.aborted);
        assert!(!result.success());
        assert_eq!(result.not_started, vec!["a", "b"]);
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_parallel_execution_respects_ancestry() {
        let mut graph = ResourceGraph::new("test");
        graph.declare("cluster", ResourceKind::Cluster, Inputs::new()).unwrap();
        let children: Vec<String> = (0..4).map(|i| format!("ns{i}")).collect();
        for child in &children {
            graph
                .declare(child.as_str(), ResourceKind::Namespace, refs(&[("cluster", "name")]))
                .unwrap();
        }
        let fan_in: Vec<(&str, &str)> = children.iter().map(|c| (c.as_str(), "name")).collect();
        graph
            .declare("chart", ResourceKind::ChartInstall, refs(&fan_in))
            .unwrap();

        let provider = Arc::new(SimulatedProvider::new().with_latency(Duration::from_millis(20)));
        let result = run(&mut graph, Arc::clone(&provider), 3).await;

        assert!(result.success());
        assert_eq!(result.executed.len(), 6);
        let calls = provider.calls();
        assert_eq!(calls.first().map(String::as_str), Some("cluster"));
        assert_eq!(calls.last().map(String::as_str), Some("chart"));
        assert!(provider.max_in_flight() > 1);
        assert!(provider.max_in_flight() <= 3);
    }

    #[tokio::test]
    async fn test_single_slot_follows_plan_order() {
        let mut graph = ResourceGraph::new("test");
        graph.declare("ns", ResourceKind::Namespace, refs(&[("cluster", "name")])).unwrap();
        graph.declare("role", ResourceKind::Role, Inputs::new()).unwrap();
        graph.declare("cluster", ResourceKind::Cluster, refs(&[("role", "arn")])).unwrap();
        graph.declare("policy", ResourceKind::Policy, Inputs::new()).unwrap();

        let plan = DependencyResolver::new().resolve(&graph).unwrap();
        let expected: Vec<String> = plan.names(&graph).into_iter().map(String::from).collect();
        let provider = Arc::new(SimulatedProvider::new().with_latency(Duration::from_millis(2)));

        let result = PlanExecutor::new(Arc::clone(&provider) as Arc<dyn ResourceProvider>)
            .execute(&plan, &mut graph)
            .await
            .unwrap();

        assert_eq!(result.executed, expected);
        assert_eq!(provider.calls(), expected);
        assert_eq!(provider.max_in_flight(), 1);
    }
}
