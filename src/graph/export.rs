//! Named outputs published for external consumption.
//!
//! Exports are declared alongside the graph (usually as references to node
//! outputs) and resolved once the plan has executed. Declaration order is
//! preserved so consumers always see the same ordering.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ExportError;

use super::resource_graph::ResourceGraph;
use super::value::{OutputRef, Value};

/// A declared export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportEntry {
    /// Export name.
    pub name: String,
    /// Exported value, possibly a deferred reference.
    pub value: Value,
}

/// Registry of named exports in declaration order.
#[derive(Debug, Clone, Default)]
pub struct StateExporter {
    entries: Vec<ExportEntry>,
}

/// Exports after resolution against an executed graph.
#[derive(Debug, Clone, Default)]
pub struct ResolvedExports {
    /// Concrete values, in declaration order.
    pub values: Vec<ExportEntry>,
    /// Names of exports whose source never produced a value.
    pub unresolved: Vec<String>,
}

impl StateExporter {
    /// Creates an empty exporter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Records a named export.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::DuplicateExport`] if the name is taken.
    pub fn export(&mut self, name: impl Into<String>, value: Value) -> Result<(), ExportError> {
        let name = name.into();
        if self.entries.iter().any(|entry| entry.name == name) {
            return Err(ExportError::DuplicateExport { name });
        }
        self.entries.push(ExportEntry { name, value });
        Ok(())
    }

    /// Declared exports in declaration order.
    #[must_use]
    pub fn entries(&self) -> &[ExportEntry] {
        &self.entries
    }

    /// Returns true if nothing is exported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every reference made by an export.
    #[must_use]
    pub fn references(&self) -> Vec<&OutputRef> {
        self.entries
            .iter()
            .flat_map(|entry| entry.value.references())
            .collect()
    }

    /// Resolves exports against the outputs recorded in `graph`.
    #[must_use]
    pub fn resolve(&self, graph: &ResourceGraph) -> ResolvedExports {
        let lookup = |r: &OutputRef| graph.resolve_ref(r);
        let mut resolved = ResolvedExports::default();

        for entry in &self.entries {
            match entry.value.resolve(&lookup) {
                Ok(value) => resolved.values.push(ExportEntry {
                    name: entry.name.clone(),
                    value,
                }),
                Err(e) => {
                    warn!("Export '{}' is unavailable: {e}", entry.name);
                    resolved.unresolved.push(entry.name.clone());
                }
            }
        }

        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::{NodeStatus, ResourceKind};
    use crate::graph::value::{Inputs, Outputs};

    #[test]
    fn test_duplicate_export_rejected() {
        let mut exporter = StateExporter::new();
        exporter.export("test-kubeconfig", Value::from("a")).unwrap();
        assert_eq!(
            exporter.export("test-kubeconfig", Value::from("b")),
            Err(ExportError::DuplicateExport {
                name: String::from("test-kubeconfig")
            })
        );
        assert_eq!(exporter.entries().len(), 1);
    }

    #[test]
    fn test_declaration_order_preserved() {
        let mut exporter = StateExporter::new();
        for name in ["zeta", "alpha", "mid"] {
            exporter.export(name, Value::from(name)).unwrap();
        }
        let graph = ResourceGraph::new("test");
        let resolved = exporter.resolve(&graph);
        let names: Vec<&str> = resolved.values.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_resolve_references() {
        let mut graph = ResourceGraph::new("test");
        let cluster = graph
            .declare("test-aws-demo", ResourceKind::Cluster, Inputs::new())
            .unwrap();
        graph
            .declare("test-app-ns", ResourceKind::Namespace, Inputs::new())
            .unwrap();

        let mut exporter = StateExporter::new();
        exporter
            .export("test-kubeconfig", Value::reference("test-aws-demo", "kubeconfig"))
            .unwrap();
        exporter
            .export("test-app-namespace", Value::reference("test-app-ns", "name"))
            .unwrap();
        assert_eq!(exporter.references().len(), 2);

        graph.transition(cluster, NodeStatus::Ready).unwrap();
        graph.transition(cluster, NodeStatus::Executing).unwrap();
        let mut outputs = Outputs::new();
        outputs.insert(String::from("kubeconfig"), Value::from("apiVersion: v1"));
        graph.complete(cluster, outputs).unwrap();

        let resolved = exporter.resolve(&graph);
        assert_eq!(resolved.values.len(), 1);
        assert_eq!(resolved.values[0].value, Value::from("apiVersion: v1"));
        assert_eq!(resolved.unresolved, vec![String::from("test-app-namespace")]);
    }
}
