//! Desired-state resource graph.
//!
//! This module holds the resource node model, the dependency resolver that
//! turns a graph into an execution plan, and the exporter for named outputs.

mod export;
mod node;
mod plan;
mod resolver;
mod resource_graph;
mod value;

pub use export::{ExportEntry, ResolvedExports, StateExporter};
pub use node::{NodeId, NodeStatus, ResourceKind, ResourceNode};
pub use plan::{ExecutionPlan, PlannedStep};
pub use resolver::DependencyResolver;
pub use resource_graph::ResourceGraph;
pub use value::{Inputs, OutputRef, Outputs, Value};
