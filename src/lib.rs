// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Clusterform
//!
//! Declarative, dependency-ordered provisioning of managed Kubernetes cluster
//! stacks, one isomorphic stack per environment.
//!
//! ## Overview
//!
//! A stack file describes identity roles and policies, a managed cluster, its
//! node groups and the in-cluster resources that run on it. Clusterform turns
//! that description into a resource graph per environment, orders it, and
//! applies it through a provider:
//!
//! 1. **Declare**: every environment gets its own [`graph::ResourceGraph`],
//!    where outputs of one resource are deferred references in the inputs of
//!    another.
//! 2. **Plan**: the [`graph::DependencyResolver`] derives a deterministic
//!    topological order and rejects cycles. No resource is applied unless
//!    every environment plans cleanly.
//! 3. **Execute**: the [`engine::PlanExecutor`] applies nodes once their
//!    dependencies have executed, honouring best-effort failures and aborts.
//! 4. **Export**: named outputs such as `{env}-kubeconfig` are resolved and
//!    recorded in the environment's state.
//!
//! ## Modules
//!
//! - [`config`]: Stack file parsing, validation and hashing
//! - [`graph`]: Resource nodes, references, ordering and exports
//! - [`stack`]: Building environment graphs from the stack file
//! - [`engine`]: Plan execution and concurrent environment runs
//! - [`provider`]: The provisioning boundary (HTTP and simulated)
//! - [`state`]: Per-environment state storage backends (local, S3)
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! project:
//!   name: aws-demo
//! environments: [test, prod]
//! cluster:
//!   name: '{env}-aws-demo'
//! node_groups:
//!   - name: '{env}-aws-demo-ng1'
//!     instance_type: t2.small
//! namespaces:
//!   - name: '{env}-app-ns'
//!     namespace: '{env}-app'
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod provider;
pub mod stack;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, StackConfig};
pub use engine::{AbortSignal, ExecutionResult, PlanExecutor, RunReport, StackRunner};
pub use error::{ClusterformError, Result};
pub use graph::{DependencyResolver, ExecutionPlan, ResourceGraph, StateExporter, Value};
pub use provider::{HttpProvider, ResourceProvider, SimulatedProvider};
pub use stack::{EnvironmentStack, StackBuilder};
pub use state::{LocalStateStore, S3StateStore, StackState, StateStore};
