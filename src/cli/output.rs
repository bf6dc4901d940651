//! Output formatting for CLI commands.
//!
//! Every formatter returns a string; text output is colored and tabular,
//! JSON output is meant for scripts.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::config::{ConfigHasher, StackConfig, ValidationResult};
use crate::engine::{PlannedEnvironment, RunReport};
use crate::graph::{NodeStatus, ResourceKind};
use crate::state::{LockInfo, StackState};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    format: OutputFormat,
}

/// Plan step row for table display.
#[derive(Tabled)]
struct PlanStepRow {
    #[tabled(rename = "#")]
    position: usize,
    #[tabled(rename = "Wave")]
    wave: usize,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Resource")]
    name: String,
    #[tabled(rename = "Depends on")]
    depends_on: String,
}

/// Resource row for state display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    name: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Inputs")]
    input_hash: String,
}

/// Export row for outputs display.
#[derive(Tabled)]
struct ExportRow {
    #[tabled(rename = "Environment")]
    environment: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Value")]
    value: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns true for JSON output.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, OutputFormat::Json)
    }

    /// Formats a validation result with a summary of the stack.
    #[must_use]
    pub fn format_validation(
        &self,
        config: &StackConfig,
        result: &ValidationResult,
        show_warnings: bool,
    ) -> String {
        if self.is_json() {
            let json = serde_json::json!({
                "valid": result.is_valid(),
                "errors": result.errors.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "warnings": result.warnings,
                "project": config.project.name,
                "environments": config.environments,
                "resources_per_environment": config.resource_names().len(),
            });
            return to_json(&json);
        }

        let mut output = String::new();
        if result.is_valid() {
            let _ = writeln!(output, "{} Configuration is valid", "✓".green());
        } else {
            let _ = writeln!(
                output,
                "{} Configuration has {} error(s):",
                "✗".red(),
                result.error_count()
            );
            for error in &result.errors {
                let _ = writeln!(output, "   - {error}");
            }
        }

        if show_warnings && !result.warnings.is_empty() {
            let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
            for warning in &result.warnings {
                let _ = writeln!(output, "   - {warning}");
            }
        }

        let _ = writeln!(output, "\nConfiguration summary:");
        let _ = writeln!(output, "   Project: {}", config.project.name);
        let _ = writeln!(output, "   Environments: {}", config.environments.join(", "));
        let _ = writeln!(
            output,
            "   Resources per environment: {}",
            config.resource_names().len()
        );
        output
    }

    /// Formats the plans of every environment.
    #[must_use]
    pub fn format_plans(&self, planned: &[PlannedEnvironment]) -> String {
        if self.is_json() {
            let plans: Vec<PlanJson<'_>> = planned
                .iter()
                .map(|p| PlanJson {
                    environment: p.environment(),
                    steps: p.plan.steps(&p.stack.graph),
                    exports: p
                        .stack
                        .exporter
                        .entries()
                        .iter()
                        .map(|e| e.name.as_str())
                        .collect(),
                })
                .collect();
            return to_json(&plans);
        }

        let mut output = String::new();
        for p in planned {
            let _ = writeln!(
                output,
                "\n📋 Plan for {} ({} resources, {} waves)\n",
                p.environment().bold(),
                p.plan.len(),
                p.plan.waves().len()
            );

            let rows: Vec<PlanStepRow> = p
                .plan
                .steps(&p.stack.graph)
                .into_iter()
                .map(|step| PlanStepRow {
                    position: step.position,
                    wave: step.wave,
                    kind: format_kind(step.kind, step.best_effort),
                    name: step.name,
                    depends_on: truncate(&step.depends_on.join(", "), 48),
                })
                .collect();
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');

            let exports: Vec<&str> = p
                .stack
                .exporter
                .entries()
                .iter()
                .map(|e| e.name.as_str())
                .collect();
            if !exports.is_empty() {
                let _ = writeln!(output, "\n   Exports: {}", exports.join(", "));
            }
        }
        output
    }

    /// Formats the outcome of an apply run.
    #[must_use]
    pub fn format_run(&self, report: &RunReport) -> String {
        if self.is_json() {
            return to_json(report);
        }

        let mut output = String::new();
        for env in &report.environments {
            let marker = if env.success() {
                "✓".green()
            } else {
                "✗".red()
            };
            let _ = writeln!(output, "{marker} {env}");

            if let Some(result) = &env.result {
                for failure in &result.failures {
                    let label = if failure.best_effort {
                        "tolerated".yellow()
                    } else {
                        "failed".red()
                    };
                    let _ = writeln!(output, "   {label} {}: {}", failure.node, failure.error);
                }
                for name in &result.skipped {
                    let _ = writeln!(output, "   {} {name}", "skipped".dimmed());
                }
                if !result.not_started.is_empty() {
                    let _ = writeln!(
                        output,
                        "   {} {}",
                        "not started:".dimmed(),
                        result.not_started.join(", ")
                    );
                }
            }
            for export in &env.exports {
                let _ = writeln!(
                    output,
                    "   {} {} = {}",
                    "export".cyan(),
                    export.name,
                    truncate(&export.value.to_string(), 60)
                );
            }
        }

        let status = if report.success() {
            "Apply complete".green()
        } else {
            "Apply finished with failures".red()
        };
        let _ = writeln!(output, "\n{status}");
        output
    }

    /// Formats the published exports of several environments.
    #[must_use]
    pub fn format_outputs(&self, states: &[StackState]) -> String {
        if self.is_json() {
            let map: serde_json::Map<String, serde_json::Value> = states
                .iter()
                .map(|state| {
                    let exports: serde_json::Map<String, serde_json::Value> = state
                        .exports
                        .iter()
                        .map(|e| {
                            (
                                e.name.clone(),
                                serde_json::to_value(&e.value).unwrap_or_default(),
                            )
                        })
                        .collect();
                    (state.environment.clone(), serde_json::Value::Object(exports))
                })
                .collect();
            return to_json(&map);
        }

        let rows: Vec<ExportRow> = states
            .iter()
            .flat_map(|state| {
                state.exports.iter().map(|e| ExportRow {
                    environment: state.environment.clone(),
                    name: e.name.clone(),
                    value: truncate(&e.value.to_string(), 80),
                })
            })
            .collect();

        if rows.is_empty() {
            return String::from("No outputs recorded. Run 'clusterform apply' first.\n");
        }
        format!("{}\n", Table::new(rows))
    }

    /// Formats the state of one environment.
    #[must_use]
    pub fn format_state(&self, state: &StackState, lock: Option<&LockInfo>) -> String {
        if self.is_json() {
            let json = serde_json::json!({ "state": state, "lock": lock });
            return to_json(&json);
        }

        let hasher = ConfigHasher::new();
        let mut output = String::new();
        let _ = write!(
            output,
            "\n💾 State: {}/{}\n\n",
            state.project, state.environment
        );
        let _ = writeln!(output, "   Version: {}", state.version);
        let _ = writeln!(output, "   Config hash: {}", hasher.short_hash(&state.config_hash));
        let _ = writeln!(output, "   Last updated: {}", state.last_updated);
        match lock {
            Some(lock) if !lock.is_expired() => {
                let _ = writeln!(
                    output,
                    "   Lock: {} by {} ({}s left)",
                    lock.lock_id.yellow(),
                    lock.holder,
                    lock.remaining_secs()
                );
            }
            Some(lock) => {
                let _ = writeln!(output, "   Lock: {} (expired)", lock.lock_id.dimmed());
            }
            None => {}
        }

        if !state.resources.is_empty() {
            let rows: Vec<ResourceRow> = state
                .resources
                .iter()
                .map(|(name, record)| ResourceRow {
                    name: name.clone(),
                    kind: record.kind.to_string(),
                    status: format_status(record.status),
                    input_hash: hasher.short_hash(&record.input_hash),
                })
                .collect();
            output.push('\n');
            output.push_str(&Table::new(rows).to_string());
            output.push('\n');
        }

        if !state.history.is_empty() {
            let _ = writeln!(output, "\n   Recent history ({}):", state.history.len());
            for entry in state.history.iter().rev().take(5) {
                let marker = if entry.success { "✓" } else { "✗" };
                let _ = writeln!(
                    output,
                    "     {marker} {} - {} executed{}",
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.executed,
                    entry
                        .error
                        .as_ref()
                        .map_or_else(String::new, |e| format!(", {e}"))
                );
            }
        }
        output
    }
}

#[derive(Serialize)]
struct PlanJson<'a> {
    environment: &'a str,
    steps: Vec<crate::graph::PlannedStep>,
    exports: Vec<&'a str>,
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

fn format_kind(kind: ResourceKind, best_effort: bool) -> String {
    if best_effort {
        format!("{kind} {}", "(best effort)".dimmed())
    } else {
        kind.to_string()
    }
}

fn format_status(status: NodeStatus) -> String {
    match status {
        NodeStatus::Executed => "executed".green().to_string(),
        NodeStatus::Failed => "failed".red().to_string(),
        NodeStatus::Skipped => "skipped".yellow().to_string(),
        other => other.to_string().dimmed().to_string(),
    }
}

/// Truncates a string to at most `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{head}...")
    }
}
