//! The per-environment resource graph.

use std::collections::{BTreeSet, HashMap};
use tracing::debug;

use crate::error::GraphError;

use super::node::{NodeId, NodeStatus, ResourceKind, ResourceNode};
use super::value::{Inputs, OutputRef, Outputs, Value};

/// Declared resources of one environment, in declaration order.
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    /// Environment this graph belongs to.
    environment: String,
    /// Nodes indexed by [`NodeId`].
    nodes: Vec<ResourceNode>,
    /// Name index.
    by_name: HashMap<String, NodeId>,
}

impl ResourceGraph {
    /// Creates an empty graph for an environment.
    #[must_use]
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            nodes: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    /// Environment name.
    #[must_use]
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Declares a new node.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicateName`] if the name is already declared.
    pub fn declare(
        &mut self,
        name: impl Into<String>,
        kind: ResourceKind,
        inputs: Inputs,
    ) -> Result<NodeId, GraphError> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(GraphError::DuplicateName { name });
        }

        let id = NodeId(self.nodes.len());
        debug!("Declared {kind} '{name}' in {}", self.environment);
        self.by_name.insert(name.clone(), id);
        self.nodes.push(ResourceNode::new(name, kind, inputs));
        Ok(id)
    }

    /// Adds an explicit dependency: `node` runs after `depends_on`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::SelfDependency`] if both handles are the same
    /// node, or [`GraphError::UnknownNode`] for a foreign handle.
    pub fn add_dependency(&mut self, node: NodeId, depends_on: NodeId) -> Result<(), GraphError> {
        self.check(depends_on)?;
        let target = self.node_mut(node)?;
        if node == depends_on {
            return Err(GraphError::SelfDependency {
                name: target.name.clone(),
            });
        }
        target.depends_on.insert(depends_on);
        Ok(())
    }

    /// Marks a node as best-effort (or not).
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] for a foreign handle.
    pub fn set_best_effort(&mut self, node: NodeId, best_effort: bool) -> Result<(), GraphError> {
        self.node_mut(node)?.best_effort = best_effort;
        Ok(())
    }

    /// Returns a deferred reference to an output of `node`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnknownNode`] for a foreign handle.
    pub fn reference(&self, node: NodeId, field: &str) -> Result<Value, GraphError> {
        let target = self.node(node).ok_or_else(|| unknown(node))?;
        Ok(Value::reference(target.name.clone(), field))
    }

    /// Reads an output of an executed node.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnresolvedReference`] if the node has not
    /// executed or did not produce the field.
    pub fn output(&self, node: NodeId, field: &str) -> Result<Value, GraphError> {
        let target = self.node(node).ok_or_else(|| unknown(node))?;
        self.resolve_ref(&OutputRef::new(target.name.clone(), field))
    }

    /// Resolves a deferred reference against recorded outputs.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnresolvedReference`] if the target is unknown,
    /// not yet executed, or lacks the field.
    pub fn resolve_ref(&self, reference: &OutputRef) -> Result<Value, GraphError> {
        let unresolved = || GraphError::UnresolvedReference {
            node: reference.node.clone(),
            field: reference.field.clone(),
        };

        let node = self.get(&reference.node).ok_or_else(unresolved)?;
        if !node.is_executed() {
            return Err(unresolved());
        }

        let mut path = reference.path();
        let head = path.next().ok_or_else(unresolved)?;
        node.outputs
            .get(head)
            .and_then(|value| value.lookup_path(path))
            .cloned()
            .ok_or_else(unresolved)
    }

    /// Resolves every input of `node` into literal values.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnresolvedReference`] for any reference whose
    /// target has not produced the field.
    pub fn resolve_inputs(&self, node: NodeId) -> Result<Inputs, GraphError> {
        let target = self.node(node).ok_or_else(|| unknown(node))?;
        let lookup = |r: &OutputRef| self.resolve_ref(r);
        target
            .inputs
            .iter()
            .map(|(key, value)| value.resolve(&lookup).map(|v| (key.clone(), v)))
            .collect()
    }

    /// Returns explicit and reference-derived dependencies of `node`,
    /// sorted by declaration order.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::UnresolvedReference`] if an input references a
    /// node that is not declared in this graph, or
    /// [`GraphError::InvalidReference`] if a `$ref` object is malformed.
    pub fn dependencies_of(&self, node: NodeId) -> Result<Vec<NodeId>, GraphError> {
        let target = self.node(node).ok_or_else(|| unknown(node))?;
        let mut deps: BTreeSet<NodeId> = target.explicit_dependencies().clone();

        for value in target.inputs.values() {
            value
                .check_references()
                .map_err(|message| GraphError::InvalidReference {
                    name: target.name().to_string(),
                    message,
                })?;
            for reference in value.references() {
                let id = self.id_of(&reference.node).ok_or_else(|| {
                    GraphError::UnresolvedReference {
                        node: reference.node.clone(),
                        field: reference.field.clone(),
                    }
                })?;
                deps.insert(id);
            }
        }

        Ok(deps.into_iter().collect())
    }

    /// Returns the node for a handle.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&ResourceNode> {
        self.nodes.get(id.0)
    }

    /// Returns the node with the given name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ResourceNode> {
        self.id_of(name).and_then(|id| self.node(id))
    }

    /// Returns the handle of the node with the given name.
    #[must_use]
    pub fn id_of(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    /// Iterates over nodes in declaration order.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &ResourceNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (NodeId(i), n))
    }

    /// Number of declared nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no node is declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Moves a node to a new lifecycle status.
    pub(crate) fn transition(&mut self, id: NodeId, next: NodeStatus) -> Result<(), GraphError> {
        let node = self.node_mut(id)?;
        if !node.status.can_transition_to(next) {
            return Err(GraphError::InvalidTransition {
                name: node.name.clone(),
                from: node.status.to_string(),
                to: next.to_string(),
            });
        }
        debug!("{} '{}': {} -> {next}", node.kind, node.name, node.status);
        node.status = next;
        Ok(())
    }

    /// Records outputs and marks the node executed.
    pub(crate) fn complete(&mut self, id: NodeId, outputs: Outputs) -> Result<(), GraphError> {
        self.transition(id, NodeStatus::Executed)?;
        self.node_mut(id)?.outputs = outputs;
        Ok(())
    }

    fn check(&self, id: NodeId) -> Result<(), GraphError> {
        self.node(id).map(|_| ()).ok_or_else(|| unknown(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut ResourceNode, GraphError> {
        self.nodes.get_mut(id.0).ok_or_else(|| unknown(id))
    }
}

fn unknown(id: NodeId) -> GraphError {
    GraphError::UnknownNode {
        name: format!("#{}", id.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(pairs: &[(&str, Value)]) -> Inputs {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut graph = ResourceGraph::new("test");
        graph
            .declare("test-cluster", ResourceKind::Cluster, Inputs::new())
            .unwrap();
        let err = graph
            .declare("test-cluster", ResourceKind::Cluster, Inputs::new())
            .unwrap_err();
        assert_eq!(
            err,
            GraphError::DuplicateName {
                name: String::from("test-cluster")
            }
        );
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_same_name_in_different_environments() {
        let mut test = ResourceGraph::new("test");
        let mut prod = ResourceGraph::new("prod");
        assert!(test.declare("cluster", ResourceKind::Cluster, Inputs::new()).is_ok());
        assert!(prod.declare("cluster", ResourceKind::Cluster, Inputs::new()).is_ok());
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut graph = ResourceGraph::new("test");
        let a = graph.declare("a", ResourceKind::Role, Inputs::new()).unwrap();
        assert_eq!(
            graph.add_dependency(a, a),
            Err(GraphError::SelfDependency {
                name: String::from("a")
            })
        );
    }

    #[test]
    fn test_unknown_handle_rejected() {
        let mut graph = ResourceGraph::new("test");
        let a = graph.declare("a", ResourceKind::Role, Inputs::new()).unwrap();
        let err = graph.add_dependency(a, NodeId(42)).unwrap_err();
        assert!(matches!(err, GraphError::UnknownNode { .. }));
    }

    #[test]
    fn test_output_unresolved_before_execution() {
        let mut graph = ResourceGraph::new("test");
        let role = graph.declare("role", ResourceKind::Role, Inputs::new()).unwrap();
        assert_eq!(
            graph.output(role, "arn"),
            Err(GraphError::UnresolvedReference {
                node: String::from("role"),
                field: String::from("arn"),
            })
        );
        assert!(graph.node(role).unwrap().outputs().is_empty());
    }

    #[test]
    fn test_output_after_completion() {
        let mut graph = ResourceGraph::new("test");
        let cluster = graph
            .declare("cluster", ResourceKind::Cluster, Inputs::new())
            .unwrap();
        graph.transition(cluster, NodeStatus::Ready).unwrap();
        graph.transition(cluster, NodeStatus::Executing).unwrap();

        let mut outputs = Outputs::new();
        outputs.insert(
            String::from("kubeconfig"),
            Value::map([("server", "https://cluster.example")]),
        );
        graph.complete(cluster, outputs).unwrap();

        assert_eq!(
            graph.output(cluster, "kubeconfig.server"),
            Ok(Value::from("https://cluster.example"))
        );
        assert!(graph.output(cluster, "endpoint").is_err());
    }

    #[test]
    fn test_implicit_dependencies_from_references() {
        let mut graph = ResourceGraph::new("test");
        let role = graph.declare("role", ResourceKind::Role, Inputs::new()).unwrap();
        let policy = graph.declare("policy", ResourceKind::Policy, Inputs::new()).unwrap();
        let attachment = graph
            .declare(
                "attachment",
                ResourceKind::PolicyAttachment,
                inputs(&[
                    ("role", Value::reference("role", "name")),
                    ("meta", Value::map([("role_arn", Value::reference("role", "arn"))])),
                ]),
            )
            .unwrap();
        graph.add_dependency(attachment, policy).unwrap();

        assert_eq!(graph.dependencies_of(attachment).unwrap(), vec![role, policy]);
    }

    #[test]
    fn test_reference_to_undeclared_node() {
        let mut graph = ResourceGraph::new("test");
        let ns = graph
            .declare(
                "ns",
                ResourceKind::Namespace,
                inputs(&[("kubeconfig", Value::reference("missing-cluster", "kubeconfig"))]),
            )
            .unwrap();
        assert!(matches!(
            graph.dependencies_of(ns),
            Err(GraphError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn test_malformed_reference_fails_instead_of_dropping_the_edge() {
        let mut graph = ResourceGraph::new("test");
        graph
            .declare("test-aws-demo", ResourceKind::Cluster, Inputs::new())
            .unwrap();
        let ns_inputs: Inputs =
            serde_yaml::from_str("kubeconfig:\n  $ref: \"test-aws-demo\"\n").unwrap();
        let ns = graph
            .declare("test-ns", ResourceKind::Namespace, ns_inputs)
            .unwrap();

        assert!(matches!(
            graph.dependencies_of(ns),
            Err(GraphError::InvalidReference { ref name, .. }) if name == "test-ns"
        ));
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut graph = ResourceGraph::new("test");
        let a = graph.declare("a", ResourceKind::Role, Inputs::new()).unwrap();
        assert!(matches!(
            graph.transition(a, NodeStatus::Executed),
            Err(GraphError::InvalidTransition { .. })
        ));
    }
}
