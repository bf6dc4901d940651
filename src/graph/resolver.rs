//! Dependency resolution.
//!
//! Orders a [`ResourceGraph`] topologically using a depth-first traversal
//! with three marks. Roots and dependencies are visited in declaration order,
//! so the same graph always yields the same plan.

use tracing::debug;

use crate::error::GraphError;

use super::node::NodeId;
use super::plan::ExecutionPlan;
use super::resource_graph::ResourceGraph;

/// Traversal mark of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Computes execution plans from resource graphs.
#[derive(Debug, Default, Clone, Copy)]
pub struct DependencyResolver;

impl DependencyResolver {
    /// Creates a new resolver.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Orders the graph so every node comes after all of its dependencies.
    ///
    /// Dependencies are the explicit `depends_on` edges plus one implicit
    /// edge per deferred reference in the node's inputs.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::CycleDetected`] naming the cycle members, or
    /// [`GraphError::UnresolvedReference`] if an input references a node
    /// that is not declared, or [`GraphError::InvalidReference`] for a
    /// malformed `$ref` object.
    pub fn resolve(&self, graph: &ResourceGraph) -> Result<ExecutionPlan, GraphError> {
        let edges = graph
            .nodes()
            .map(|(id, _)| graph.dependencies_of(id))
            .collect::<Result<Vec<_>, _>>()?;

        let mut marks = vec![Mark::Unvisited; edges.len()];
        let mut order = Vec::with_capacity(edges.len());

        for root in 0..edges.len() {
            if marks[root] != Mark::Unvisited {
                continue;
            }

            // Each frame is (node, index of the next dependency to visit).
            let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
            marks[root] = Mark::InProgress;

            while let Some(frame) = stack.last_mut() {
                let node = frame.0;
                if let Some(dep) = edges[node].get(frame.1).map(|d| d.index()) {
                    frame.1 += 1;
                    match marks[dep] {
                        Mark::Unvisited => {
                            marks[dep] = Mark::InProgress;
                            stack.push((dep, 0));
                        }
                        Mark::InProgress => return Err(cycle_error(graph, &stack, dep)),
                        Mark::Done => {}
                    }
                } else {
                    marks[node] = Mark::Done;
                    order.push(NodeId(node));
                    stack.pop();
                }
            }
        }

        debug!(
            "Resolved {} resources for environment {}",
            order.len(),
            graph.environment()
        );

        Ok(ExecutionPlan::new(graph.environment(), order, edges))
    }
}

/// Builds the cycle error from the traversal stack, closing the loop on `back_edge`.
fn cycle_error(graph: &ResourceGraph, stack: &[(usize, usize)], back_edge: usize) -> GraphError {
    let start = stack
        .iter()
        .position(|(node, _)| *node == back_edge)
        .unwrap_or(0);

    let name = |index: usize| {
        graph
            .node(NodeId(index))
            .map_or_else(|| format!("#{index}"), |n| n.name().to_string())
    };

    let mut members: Vec<String> = stack[start..].iter().map(|(node, _)| name(*node)).collect();
    members.push(name(back_edge));

    GraphError::CycleDetected { members }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::ResourceKind;
    use crate::graph::value::{Inputs, Value};

    fn refs(targets: &[&str]) -> Inputs {
        targets
            .iter()
            .enumerate()
            .map(|(i, t)| (format!("in{i}"), Value::reference(*t, "out")))
            .collect()
    }

    fn assert_topological(graph: &ResourceGraph, plan: &ExecutionPlan) {
        for (id, _) in graph.nodes() {
            let pos = plan.position(id).unwrap();
            for dep in graph.dependencies_of(id).unwrap() {
                assert!(plan.position(dep).unwrap() < pos);
            }
        }
    }

    #[test]
    fn test_reference_orders_dependency_first() {
        // B is declared first but references A.
        let mut graph = ResourceGraph::new("test");
        graph.declare("b", ResourceKind::Namespace, refs(&["a"])).unwrap();
        graph.declare("a", ResourceKind::Cluster, Inputs::new()).unwrap();

        let plan = DependencyResolver::new().resolve(&graph).unwrap();
        assert_eq!(plan.names(&graph), vec!["a", "b"]);
    }

    #[test]
    fn test_diamond_keeps_declaration_order_for_ties() {
        let mut graph = ResourceGraph::new("test");
        graph.declare("a", ResourceKind::Role, Inputs::new()).unwrap();
        graph.declare("b", ResourceKind::Role, Inputs::new()).unwrap();
        graph.declare("c", ResourceKind::Cluster, refs(&["a", "b"])).unwrap();

        let plan = DependencyResolver::new().resolve(&graph).unwrap();
        assert_eq!(plan.names(&graph), vec!["a", "b", "c"]);
        assert_eq!(plan.waves().len(), 2);
    }

    #[test]
    fn test_roots_in_declaration_order() {
        let mut graph = ResourceGraph::new("test");
        for name in ["z", "y", "x"] {
            graph.declare(name, ResourceKind::Namespace, Inputs::new()).unwrap();
        }
        let plan = DependencyResolver::new().resolve(&graph).unwrap();
        assert_eq!(plan.names(&graph), vec!["z", "y", "x"]);
    }

    #[test]
    fn test_explicit_and_implicit_edges_mixed() {
        let mut graph = ResourceGraph::new("test");
        let chart = graph
            .declare("chart", ResourceKind::ChartInstall, refs(&["cluster"]))
            .unwrap();
        let ns = graph
            .declare("ns", ResourceKind::Namespace, refs(&["cluster"]))
            .unwrap();
        graph.declare("cluster", ResourceKind::Cluster, refs(&["role"])).unwrap();
        graph.declare("role", ResourceKind::Role, Inputs::new()).unwrap();
        graph.add_dependency(chart, ns).unwrap();

        let plan = DependencyResolver::new().resolve(&graph).unwrap();
        assert_eq!(plan.names(&graph), vec!["role", "cluster", "ns", "chart"]);
        assert_topological(&graph, &plan);
    }

    #[test]
    fn test_cycle_detected_with_members() {
        let mut graph = ResourceGraph::new("test");
        graph.declare("a", ResourceKind::Role, refs(&["c"])).unwrap();
        graph.declare("b", ResourceKind::Role, refs(&["a"])).unwrap();
        graph.declare("c", ResourceKind::Role, refs(&["b"])).unwrap();

        let err = DependencyResolver::new().resolve(&graph).unwrap_err();
        assert_eq!(
            err,
            GraphError::CycleDetected {
                members: vec![
                    String::from("a"),
                    String::from("c"),
                    String::from("b"),
                    String::from("a"),
                ]
            }
        );
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let mut graph = ResourceGraph::new("test");
        graph.declare("a", ResourceKind::Role, refs(&["a"])).unwrap();

        let err = DependencyResolver::new().resolve(&graph).unwrap_err();
        assert_eq!(
            err,
            GraphError::CycleDetected {
                members: vec![String::from("a"), String::from("a")]
            }
        );
    }

    #[test]
    fn test_cycle_behind_acyclic_prefix() {
        let mut graph = ResourceGraph::new("test");
        graph.declare("root", ResourceKind::Role, Inputs::new()).unwrap();
        let x = graph.declare("x", ResourceKind::Role, refs(&["root"])).unwrap();
        let y = graph.declare("y", ResourceKind::Role, refs(&["x"])).unwrap();
        graph.add_dependency(x, y).unwrap();

        assert!(matches!(
            DependencyResolver::new().resolve(&graph),
            Err(GraphError::CycleDetected { .. })
        ));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let mut graph = ResourceGraph::new("prod");
        graph.declare("ns", ResourceKind::Namespace, refs(&["cluster"])).unwrap();
        graph.declare("role", ResourceKind::Role, Inputs::new()).unwrap();
        graph.declare("cluster", ResourceKind::Cluster, refs(&["role"])).unwrap();
        graph.declare("chart", ResourceKind::ChartInstall, refs(&["ns", "cluster"])).unwrap();
        graph.declare("sa", ResourceKind::ServiceAccount, refs(&["cluster"])).unwrap();

        let resolver = DependencyResolver::new();
        let first = resolver.resolve(&graph).unwrap();
        let second = resolver.resolve(&graph).unwrap();
        assert_eq!(first.order(), second.order());
        assert_topological(&graph, &first);
    }

    #[test]
    fn test_larger_graph_is_topological() {
        // Each node i references i/2 and i/3 when those differ from i.
        let mut graph = ResourceGraph::new("test");
        for i in (0..40).rev() {
            let targets: Vec<String> = [i / 2, i / 3]
                .into_iter()
                .filter(|t| *t != i)
                .map(|t| format!("n{t}"))
                .collect();
            let target_refs: Vec<&str> = targets.iter().map(String::as_str).collect();
            graph
                .declare(format!("n{i}"), ResourceKind::Namespace, refs(&target_refs))
                .unwrap();
        }

        let plan = DependencyResolver::new().resolve(&graph).unwrap();
        assert_eq!(plan.len(), 40);
        assert_topological(&graph, &plan);
    }
}
