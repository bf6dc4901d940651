//! Configuration module for clusterform stacks.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `clusterform.yaml`
//! - Validation of configuration values
//! - Computing configuration hashes for change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{ConfigParser, DEFAULT_CONFIG_FILES, PROVIDER_TOKEN_VAR, find_config_file};
pub use spec::{
    ChartConfig, ClusterConfig, ENV_TOKEN, ExecutionConfig, ExportConfig, IamConfig,
    ManifestConfig, NamespaceConfig, NetworkConfig, NodeGroupConfig, PolicyConfig,
    ProjectConfig, ProviderConfig, RoleConfig, ServiceAccountConfig, StackConfig, StateBackend,
    StateConfig, attachment_name, for_env,
};
pub use validator::{ConfigValidator, InputFormat, ValidationError, ValidationResult, input_format};
