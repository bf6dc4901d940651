//! Configuration parser for loading stack files.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::spec::StackConfig;

/// Environment variable holding the provider token.
pub const PROVIDER_TOKEN_VAR: &str = "CLUSTERFORM_PROVIDER_TOKEN";

/// Configuration parser for loading stack configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<StackConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<StackConfig> {
        debug!("Parsing YAML configuration");

        let config: StackConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            }
        })?;

        debug!(
            "Parsed stack '{}' with {} environments",
            config.project.name,
            config.environments.len()
        );
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Recognised variables are `CLUSTERFORM_PROJECT_NAME`,
    /// `CLUSTERFORM_ENVIRONMENTS` (comma separated),
    /// `CLUSTERFORM_PROVIDER_ENDPOINT`, `CLUSTERFORM_STATE_BUCKET` and
    /// `CLUSTERFORM_STATE_PREFIX`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<StackConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config, |name| std::env::var(name).ok());
        Ok(config)
    }

    /// Applies overrides read through `lookup` to the configuration.
    pub fn apply_env_overrides<F>(config: &mut StackConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("CLUSTERFORM_PROJECT_NAME") {
            debug!("Overriding project.name from environment");
            config.project.name = name;
        }

        if let Some(environments) = lookup("CLUSTERFORM_ENVIRONMENTS") {
            debug!("Overriding environments from environment");
            config.environments = environments
                .split(',')
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(endpoint) = lookup("CLUSTERFORM_PROVIDER_ENDPOINT") {
            debug!("Overriding provider.endpoint from environment");
            config.provider.endpoint = Some(endpoint);
        }

        if let Some(bucket) = lookup("CLUSTERFORM_STATE_BUCKET") {
            debug!("Overriding state.bucket from environment");
            config.state.bucket = Some(bucket);
        }

        if let Some(prefix) = lookup("CLUSTERFORM_STATE_PREFIX") {
            debug!("Overriding state.prefix from environment");
            config.state.prefix = Some(prefix);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| ConfigError::ParseError {
                message: format!("Failed to load .env file: {e}"),
                location: Some(env_path.display().to_string()),
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Gets the provider token from environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not set.
    pub fn provider_token() -> Result<String> {
        std::env::var(PROVIDER_TOKEN_VAR).map_err(|_| {
            ConfigError::MissingEnvVar {
                name: String::from(PROVIDER_TOKEN_VAR),
            }
            .into()
        })
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["clusterform.yaml", "clusterform.yml", "stack.yaml"];

/// Finds the configuration file in the given directory or its parents.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StateBackend;
    use crate::error::ClusterformError;
    use std::collections::HashMap;

    const STACK: &str = r"
project:
  name: aws-demo
environments: [test, prod]
state:
  backend: s3
  bucket: demo-state
cluster:
  name: '{env}-aws-demo'
";

    #[test]
    fn test_parse_minimal_config() {
        let config = ConfigParser::new().parse_yaml(STACK, None).unwrap();
        assert_eq!(config.project.name, "aws-demo");
        assert_eq!(config.environments, vec!["test", "prod"]);
        assert_eq!(config.state.backend, StateBackend::S3);
    }

    #[test]
    fn test_parse_error_carries_location() {
        let err = ConfigParser::new()
            .parse_yaml("project: [", Some(Path::new("clusterform.yaml")))
            .unwrap_err();
        assert!(matches!(
            err,
            ClusterformError::Config(ConfigError::ParseError { location: Some(ref l), .. })
                if l == "clusterform.yaml"
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ConfigParser::new().parse_yaml(STACK, None).unwrap();
        let vars: HashMap<&str, &str> = [
            ("CLUSTERFORM_ENVIRONMENTS", "staging, prod,"),
            ("CLUSTERFORM_PROVIDER_ENDPOINT", "http://localhost:9000"),
            ("CLUSTERFORM_STATE_PREFIX", "stacks/demo"),
        ]
        .into_iter()
        .collect();

        ConfigParser::apply_env_overrides(&mut config, |name| {
            vars.get(name).map(ToString::to_string)
        });

        assert_eq!(config.project.name, "aws-demo");
        assert_eq!(config.environments, vec!["staging", "prod"]);
        assert_eq!(config.provider.endpoint.as_deref(), Some("http://localhost:9000"));
        assert_eq!(config.state.prefix.as_deref(), Some("stacks/demo"));
        assert_eq!(config.state.bucket.as_deref(), Some("demo-state"));
    }

    #[test]
    fn test_find_config_file_searches_parents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("clusterform.yaml"), STACK).unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, dir.path().join("clusterform.yaml"));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigParser::new()
            .load_file(dir.path().join("nope.yaml"))
            .unwrap_err();
        assert!(matches!(
            err,
            ClusterformError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}
