//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Clusterform - declarative Kubernetes cluster stacks, one per environment.
#[derive(Parser, Debug)]
#[command(name = "clusterform")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the stack file.
    #[arg(short, long, global = true, env = "CLUSTERFORM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Log format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new stack from the bundled template.
    Init {
        /// Directory to initialize (defaults to current directory).
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Force overwrite existing files.
        #[arg(short, long)]
        force: bool,
    },

    /// Validate the stack file.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Build and order every environment without applying anything.
    Plan {
        /// Only plan this environment.
        #[arg(short, long)]
        env: Option<String>,

        /// Use the in-process provider for the network lookup.
        #[arg(long)]
        simulate: bool,
    },

    /// Apply the stack to every environment.
    Apply {
        /// Only apply this environment.
        #[arg(short, long)]
        env: Option<String>,

        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,

        /// Run against the in-process provider; no state is recorded.
        #[arg(long)]
        simulate: bool,

        /// Maximum concurrent provider calls per environment.
        #[arg(short, long)]
        parallelism: Option<usize>,
    },

    /// Show the exports recorded by the last apply.
    Outputs {
        /// Only show this environment.
        #[arg(short, long)]
        env: Option<String>,
    },

    /// Manage state backend.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show the recorded state.
    Show {
        /// Only show this environment.
        #[arg(short, long)]
        env: Option<String>,
    },

    /// Unlock the state of an environment.
    Unlock {
        /// Environment to unlock.
        #[arg(short, long)]
        env: String,

        /// Lock ID to unlock.
        #[arg(long)]
        lock_id: Option<String>,

        /// Remove the lock whoever holds it.
        #[arg(long)]
        force: bool,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Log format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable log lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}
