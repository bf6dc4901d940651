//! Error types for the clusterform provisioning system.
//!
//! Errors fall into two phases. Plan-time errors (graph, export and
//! configuration problems) are detected before any resource is applied and
//! always abort the whole run. Apply-time errors come back from the provider
//! while a plan executes and only affect the environment they occurred in.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for clusterform.
#[derive(Debug, Error)]
pub enum ClusterformError {
    /// Resource graph errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Export registry errors.
    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Provider capability errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Run orchestration errors.
    #[error("Run error: {0}")]
    Run(#[from] RunError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while declaring or ordering the resource graph.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    /// A node with the same name is already declared in this graph.
    #[error("Duplicate resource name: {name}")]
    DuplicateName {
        /// The duplicated name.
        name: String,
    },

    /// A node was asked to depend on itself.
    #[error("Resource '{name}' cannot depend on itself")]
    SelfDependency {
        /// The offending node.
        name: String,
    },

    /// A node handle does not belong to this graph.
    #[error("Unknown resource: {name}")]
    UnknownNode {
        /// The unknown node name or handle.
        name: String,
    },

    /// The dependency edges contain a cycle.
    #[error("Dependency cycle detected: {}", .members.join(" -> "))]
    CycleDetected {
        /// Cycle members in traversal order.
        members: Vec<String>,
    },

    /// A deferred reference could not be resolved.
    #[error("Unresolved reference to '{node}.{field}'")]
    UnresolvedReference {
        /// Referenced node.
        node: String,
        /// Referenced output field.
        field: String,
    },

    /// An input holds a `$ref` object that is not a `NODE.FIELD` reference.
    #[error("Invalid reference in '{name}': {message}")]
    InvalidReference {
        /// The node declaring the input.
        name: String,
        /// What is wrong with the reference.
        message: String,
    },

    /// A node was moved through an invalid lifecycle transition.
    #[error("Invalid transition for '{name}': {from} -> {to}")]
    InvalidTransition {
        /// The node name.
        name: String,
        /// Current status.
        from: String,
        /// Requested status.
        to: String,
    },
}

/// Errors raised by the state exporter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExportError {
    /// An export with the same name has already been recorded.
    #[error("Duplicate export name: {name}")]
    DuplicateExport {
        /// The duplicated export name.
        name: String,
    },
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// A static input file is missing or malformed.
    #[error("Input file {path}: {message}")]
    InputFile {
        /// Path of the input file.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },
}

/// Errors surfaced by a provider capability during apply.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Authentication against the provider failed.
    #[error("Provider authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// The provider answered with a non-success status.
    #[error("Provider request failed: {status} - {message}")]
    ApiRequestFailed {
        /// HTTP status code.
        status: u16,
        /// Error message from the provider.
        message: String,
    },

    /// Rate limited.
    #[error("Provider rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Network error.
    #[error("Network error communicating with provider: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// The provider answered with something we could not understand.
    #[error("Invalid response from provider: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },

    /// The provider refused to create or update the resource.
    #[error("Provider rejected {kind} '{name}': {reason}")]
    Rejected {
        /// Resource kind.
        kind: String,
        /// Resource name.
        name: String,
        /// Reason given by the provider.
        reason: String,
    },

    /// A failure injected by the simulated provider.
    #[error("Simulated failure for '{name}': {message}")]
    Injected {
        /// Resource name.
        name: String,
        /// Injected message.
        message: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Local filesystem backend error.
    #[error("Local state backend error: {message}")]
    LocalError {
        /// Description of the filesystem error.
        message: String,
    },

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Run orchestration errors.
#[derive(Debug, Error)]
pub enum RunError {
    /// The run was aborted before completion.
    #[error("Run aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },

    /// One or more environments failed to apply.
    #[error("{failed} of {total} environments failed to apply")]
    EnvironmentsFailed {
        /// Number of failed environments.
        failed: usize,
        /// Number of environments in the run.
        total: usize,
    },
}

/// Result type alias for clusterform operations.
pub type Result<T> = std::result::Result<T, ClusterformError>;

impl ClusterformError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if the error is detected before any provider call.
    ///
    /// Plan-time errors are always fatal to the whole run.
    #[must_use]
    pub const fn is_plan_time(&self) -> bool {
        matches!(self, Self::Graph(_) | Self::Export(_) | Self::Config(_))
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates an input file error.
    #[must_use]
    pub fn input_file(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::InputFile {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates an API request error.
    #[must_use]
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }

    /// Returns true if the provider call may succeed when retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::NetworkError { .. } => true,
            Self::ApiRequestFailed { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            Self::NetworkError { .. } | Self::ApiRequestFailed { .. } => Some(1),
            _ => None,
        }
    }
}

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a local backend error with the given message.
    #[must_use]
    pub fn local(message: impl Into<String>) -> Self {
        Self::LocalError {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}
