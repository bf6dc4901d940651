//! State types for tracking applied stacks.
//!
//! One [`StackState`] is kept per environment. It records what the last
//! runs applied, the outputs the provider returned and the exports that
//! were published from them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::graph::{ExportEntry, NodeStatus, Outputs, ResolvedExports, ResourceKind, Value};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Maximum number of history entries kept.
const MAX_HISTORY: usize = 100;

/// The recorded state of one environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackState {
    /// State format version.
    pub version: String,
    /// Project name.
    pub project: String,
    /// Environment name.
    pub environment: String,
    /// Hash of the last applied configuration.
    pub config_hash: String,
    /// Resources by name.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceRecord>,
    /// Published exports, in declaration order.
    #[serde(default)]
    pub exports: Vec<ExportRecord>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Run history (recent entries).
    #[serde(default)]
    pub history: Vec<RunHistoryEntry>,
}

/// Recorded state of one resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Status after the last run that touched the resource.
    pub status: NodeStatus,
    /// Outputs of the last successful apply.
    #[serde(default)]
    pub outputs: Outputs,
    /// Hash of the inputs last sent to the provider.
    #[serde(default)]
    pub input_hash: String,
    /// Error of the last failed apply.
    #[serde(default)]
    pub error: Option<String>,
    /// When the record last changed.
    pub updated_at: DateTime<Utc>,
}

/// A published export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportRecord {
    /// Export name.
    pub name: String,
    /// Concrete exported value.
    pub value: Value,
    /// When the value was last published.
    pub updated_at: DateTime<Utc>,
}

/// A single entry in the run history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunHistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Configuration hash at time of the run.
    pub config_hash: String,
    /// Number of resources executed.
    pub executed: usize,
    /// Resources that failed.
    #[serde(default)]
    pub failed: Vec<String>,
    /// Resources skipped because an ancestor failed.
    #[serde(default)]
    pub skipped: Vec<String>,
    /// Whether the run succeeded.
    pub success: bool,
    /// Optional error message.
    #[serde(default)]
    pub error: Option<String>,
}

impl StackState {
    /// Creates a new empty state.
    #[must_use]
    pub fn new(project: &str, environment: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            project: project.to_string(),
            environment: environment.to_string(),
            config_hash: String::new(),
            resources: BTreeMap::new(),
            exports: Vec::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets a resource by name.
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&ResourceRecord> {
        self.resources.get(name)
    }

    /// Records a successful apply.
    pub fn record_executed(
        &mut self,
        name: &str,
        kind: ResourceKind,
        outputs: Outputs,
        input_hash: &str,
    ) {
        self.resources.insert(
            name.to_string(),
            ResourceRecord {
                kind,
                status: NodeStatus::Executed,
                outputs,
                input_hash: input_hash.to_string(),
                error: None,
                updated_at: Utc::now(),
            },
        );
        self.last_updated = Utc::now();
    }

    /// Records a failed or skipped resource, keeping earlier outputs.
    pub fn record_not_applied(
        &mut self,
        name: &str,
        kind: ResourceKind,
        status: NodeStatus,
        error: Option<String>,
    ) {
        let now = Utc::now();
        self.resources
            .entry(name.to_string())
            .and_modify(|record| {
                record.status = status;
                record.error.clone_from(&error);
                record.updated_at = now;
            })
            .or_insert_with(|| ResourceRecord {
                kind,
                status,
                outputs: Outputs::new(),
                input_hash: String::new(),
                error,
                updated_at: now,
            });
        self.last_updated = now;
    }

    /// Publishes resolved exports.
    ///
    /// Exports that did not resolve in this run keep their previous value.
    /// The result follows the declaration order of `declared`.
    pub fn update_exports(&mut self, declared: &[ExportEntry], resolved: &ResolvedExports) {
        let now = Utc::now();
        let mut previous: BTreeMap<String, ExportRecord> = std::mem::take(&mut self.exports)
            .into_iter()
            .map(|record| (record.name.clone(), record))
            .collect();

        for entry in declared {
            if let Some(value) = resolved.values.iter().find(|v| v.name == entry.name) {
                self.exports.push(ExportRecord {
                    name: entry.name.clone(),
                    value: value.value.clone(),
                    updated_at: now,
                });
            } else if let Some(record) = previous.remove(&entry.name) {
                self.exports.push(record);
            }
        }
        self.last_updated = now;
    }

    /// Gets an export by name.
    #[must_use]
    pub fn export(&self, name: &str) -> Option<&ExportRecord> {
        self.exports.iter().find(|e| e.name == name)
    }

    /// Adds a history entry.
    pub fn add_history(&mut self, entry: RunHistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }

    /// Names of resources whose last apply succeeded.
    #[must_use]
    pub fn executed_resources(&self) -> Vec<&str> {
        self.resources
            .iter()
            .filter(|(_, r)| r.status == NodeStatus::Executed)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

impl RunHistoryEntry {
    /// Creates a history entry for a finished run.
    #[must_use]
    pub fn new(config_hash: &str, executed: usize) -> Self {
        Self {
            timestamp: Utc::now(),
            config_hash: config_hash.to_string(),
            executed,
            failed: Vec::new(),
            skipped: Vec::new(),
            success: true,
            error: None,
        }
    }

    /// Marks the entry failed.
    #[must_use]
    pub fn failed(mut self, failed: Vec<String>, skipped: Vec<String>, error: &str) -> Self {
        self.failed = failed;
        self.skipped = skipped;
        self.success = false;
        self.error = Some(error.to_string());
        self
    }
}
