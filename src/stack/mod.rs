//! Stack assembly.
//!
//! Turns a parsed [`StackConfig`](crate::config::StackConfig) and its input
//! files into one resource graph per environment.

mod builder;
mod inputs;

pub use builder::{EnvironmentStack, StackBuilder};
pub use inputs::{InputDocument, InputFiles};
