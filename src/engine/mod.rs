//! Execution engine.
//!
//! [`PlanExecutor`] applies one environment's plan; [`StackRunner`] plans
//! every environment up front and then applies them concurrently.

mod executor;
mod runner;

pub use executor::{AbortSignal, ExecutionResult, NodeFailure, PlanExecutor};
pub use runner::{EnvironmentReport, PlannedEnvironment, RunReport, StackRunner};
