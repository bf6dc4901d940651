//! Resource node types.
//!
//! A resource node is one declared infrastructure object. Nodes are created
//! through [`ResourceGraph::declare`](super::ResourceGraph::declare), keep
//! their inputs unchanged afterwards, and move through the lifecycle
//! `Declared -> Ready -> Executing -> Executed | Failed` exactly once.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::value::{Inputs, Outputs};

/// Handle of a node inside its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Returns the declaration index of the node.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Kinds of resources a stack can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Identity role.
    Role,
    /// Access policy document.
    Policy,
    /// Attachment of a managed policy to a role.
    PolicyAttachment,
    /// Instance profile wrapping a role.
    InstanceProfile,
    /// Managed Kubernetes control plane.
    Cluster,
    /// Worker node group.
    NodeGroup,
    /// Kubernetes namespace.
    Namespace,
    /// Kubernetes service account.
    ServiceAccount,
    /// Chart installation.
    ChartInstall,
    /// Raw manifest file applied to the cluster.
    ConfigFile,
}

impl ResourceKind {
    /// Every kind, in a stable order.
    pub const ALL: [Self; 10] = [
        Self::Role,
        Self::Policy,
        Self::PolicyAttachment,
        Self::InstanceProfile,
        Self::Cluster,
        Self::NodeGroup,
        Self::Namespace,
        Self::ServiceAccount,
        Self::ChartInstall,
        Self::ConfigFile,
    ];

    /// Returns the snake_case identifier of the kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Role => "role",
            Self::Policy => "policy",
            Self::PolicyAttachment => "policy_attachment",
            Self::InstanceProfile => "instance_profile",
            Self::Cluster => "cluster",
            Self::NodeGroup => "node_group",
            Self::Namespace => "namespace",
            Self::ServiceAccount => "service_account",
            Self::ChartInstall => "chart_install",
            Self::ConfigFile => "config_file",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("Unknown resource kind: {s}"))
    }
}

/// Lifecycle status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    /// Declared, waiting for its ancestors.
    Declared,
    /// All ancestors executed; may be scheduled.
    Ready,
    /// Provider call in flight.
    Executing,
    /// Applied successfully, outputs available.
    Executed,
    /// Provider call failed.
    Failed,
    /// Never scheduled because an ancestor did not execute.
    Skipped,
}

impl NodeStatus {
    /// Returns true for statuses a node never leaves.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Executed | Self::Failed | Self::Skipped)
    }

    /// Returns true if moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Declared, Self::Ready | Self::Skipped)
                | (Self::Ready, Self::Executing | Self::Skipped)
                | (Self::Executing, Self::Executed | Self::Failed)
        )
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            Self::Declared => "declared",
            Self::Ready => "ready",
            Self::Executing => "executing",
            Self::Executed => "executed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{status}")
    }
}

/// One declared infrastructure object.
#[derive(Debug, Clone)]
pub struct ResourceNode {
    pub(crate) name: String,
    pub(crate) kind: ResourceKind,
    pub(crate) inputs: Inputs,
    pub(crate) outputs: Outputs,
    pub(crate) depends_on: BTreeSet<NodeId>,
    pub(crate) best_effort: bool,
    pub(crate) status: NodeStatus,
}

impl ResourceNode {
    pub(crate) const fn new(name: String, kind: ResourceKind, inputs: Inputs) -> Self {
        Self {
            name,
            kind,
            inputs,
            outputs: Outputs::new(),
            depends_on: BTreeSet::new(),
            best_effort: false,
            status: NodeStatus::Declared,
        }
    }

    /// Unique name of the node within its graph.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resource kind.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Declared inputs, possibly containing deferred references.
    #[must_use]
    pub const fn inputs(&self) -> &Inputs {
        &self.inputs
    }

    /// Outputs recorded after successful execution; empty before that.
    #[must_use]
    pub const fn outputs(&self) -> &Outputs {
        &self.outputs
    }

    /// Explicitly declared dependencies.
    #[must_use]
    pub const fn explicit_dependencies(&self) -> &BTreeSet<NodeId> {
        &self.depends_on
    }

    /// Whether a failure of this node lets the rest of the plan continue.
    #[must_use]
    pub const fn is_best_effort(&self) -> bool {
        self.best_effort
    }

    /// Current lifecycle status.
    #[must_use]
    pub const fn status(&self) -> NodeStatus {
        self.status
    }

    /// Returns true once the node has executed successfully.
    #[must_use]
    pub fn is_executed(&self) -> bool {
        self.status == NodeStatus::Executed
    }
}
