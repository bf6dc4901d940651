//! Configuration validation for stack files.
//!
//! This module checks a stack configuration for values that would only fail
//! later, at plan or apply time, and reports all of them at once.

use crate::error::{ConfigError, Result};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use tracing::debug;

use super::spec::{
    ENV_TOKEN, StackConfig, StateBackend, attachment_name, for_env,
};
use crate::graph::ResourceKind;

/// Upper bound for `execution.max_parallel`.
const MAX_PARALLEL_LIMIT: usize = 64;

/// Validator for stack configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a stack configuration.
    ///
    /// # Errors
    ///
    /// Returns the first error found if validation fails.
    pub fn validate(&self, config: &StackConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if let Some(first_error) = result.errors.first() {
            return Err(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }
            .into());
        }

        debug!(
            "Configuration validation passed with {} warnings",
            result.warnings.len()
        );
        Ok(result)
    }

    /// Collects every error and warning without failing.
    #[must_use]
    pub fn check(&self, config: &StackConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_project(config, &mut result);
        Self::validate_state(config, &mut result);
        Self::validate_provider(config, &mut result);
        Self::validate_execution(config, &mut result);
        Self::validate_network(config, &mut result);
        Self::validate_inputs(config, &mut result);
        Self::validate_resource_names(config, &mut result);
        Self::validate_iam(config, &mut result);
        Self::validate_node_groups(config, &mut result);
        Self::validate_kubernetes(config, &mut result);
        Self::validate_dependencies(config, &mut result);
        Self::validate_exports(config, &mut result);

        result
    }

    fn validate_project(config: &StackConfig, result: &mut ValidationResult) {
        if config.project.name.is_empty() {
            result.error("project.name", "Project name cannot be empty");
        } else if !is_valid_name(&config.project.name) {
            result.error(
                "project.name",
                format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    config.project.name
                ),
            );
        }

        if config.environments.is_empty() {
            result.error("environments", "At least one environment is required");
        }

        let mut seen = HashSet::new();
        for (i, env) in config.environments.iter().enumerate() {
            let field = format!("environments[{i}]");
            if !is_valid_name(env) {
                result.error(
                    &field,
                    format!("Environment name '{env}' must be lowercase alphanumeric with hyphens"),
                );
            }
            if !seen.insert(env.as_str()) {
                result.error(field, format!("Duplicate environment: {env}"));
            }
        }
    }

    fn validate_state(config: &StackConfig, result: &mut ValidationResult) {
        let state = &config.state;
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.as_ref().is_none_or(String::is_empty) {
                    result.error(
                        "state.bucket",
                        "S3 bucket name is required when using S3 backend",
                    );
                }
            }
            StateBackend::Local => {
                if state.bucket.is_some() {
                    result.warn("state.bucket is ignored by the local backend");
                }
                if state.path.as_ref().is_some_and(String::is_empty) {
                    result.error("state.path", "Local state path cannot be empty");
                }
            }
        }
    }

    fn validate_provider(config: &StackConfig, result: &mut ValidationResult) {
        let provider = &config.provider;
        if let Some(endpoint) = &provider.endpoint
            && !is_http_url(endpoint)
        {
            result.error(
                "provider.endpoint",
                format!("Provider endpoint '{endpoint}' must be an http(s) URL"),
            );
        }
        if provider.timeout_secs == 0 {
            result.error("provider.timeout_secs", "Timeout must be at least 1 second");
        }
        if provider.max_retries == 0 {
            result.warn("provider.max_retries is 0; every request is attempted once");
        }
    }

    fn validate_execution(config: &StackConfig, result: &mut ValidationResult) {
        let max_parallel = config.execution.max_parallel;
        if max_parallel == 0 || max_parallel > MAX_PARALLEL_LIMIT {
            result.error(
                "execution.max_parallel",
                format!("max_parallel must be between 1 and {MAX_PARALLEL_LIMIT}, got {max_parallel}"),
            );
        }
        if config.is_best_effort_kind(ResourceKind::Cluster) {
            result.warn("Cluster failures are best-effort; dependent resources will be skipped");
        }
    }

    fn validate_network(config: &StackConfig, result: &mut ValidationResult) {
        let Some(network) = &config.network else {
            return;
        };
        if network.vpc_id.is_empty() {
            result.error("network.vpc_id", "VPC id cannot be empty");
        }
        if network.subnet_ids.is_empty() {
            result.error("network.subnet_ids", "At least one subnet is required");
        }
    }

    fn validate_inputs(config: &StackConfig, result: &mut ValidationResult) {
        for (alias, path) in &config.inputs {
            if input_format(path).is_none() {
                result.error(
                    format!("inputs.{alias}"),
                    format!("Input '{path}' must be a .json, .yaml or .yml file"),
                );
            }
        }

        for (i, policy) in config.iam.policies.iter().enumerate() {
            Self::expect_input(
                config,
                &policy.document,
                InputFormat::Json,
                format!("iam.policies[{i}].document"),
                result,
            );
        }
        for (i, manifest) in config.manifests.iter().enumerate() {
            Self::expect_input(
                config,
                &manifest.file,
                InputFormat::Yaml,
                format!("manifests[{i}].file"),
                result,
            );
        }
    }

    fn expect_input(
        config: &StackConfig,
        alias: &str,
        format: InputFormat,
        field: String,
        result: &mut ValidationResult,
    ) {
        match config.inputs.get(alias) {
            None => result.error(field, format!("Unknown input '{alias}'")),
            Some(path) if input_format(path) != Some(format) => {
                result.error(field, format!("Input '{alias}' ({path}) is not {format:?}"));
            }
            Some(_) => {}
        }
    }

    fn validate_resource_names(config: &StackConfig, result: &mut ValidationResult) {
        let names = config.resource_names();

        for (kind, name) in &names {
            if !is_valid_resource_name(name) {
                result.error(
                    format!("{kind}.name"),
                    format!("Resource name '{name}' may only contain letters, digits, '-', '_' and '.'"),
                );
            }
            if config.environments.len() > 1 && !name.contains(ENV_TOKEN) {
                result.warn(format!(
                    "{kind} '{name}' has no {ENV_TOKEN} token and gets the same name in every environment"
                ));
            }
        }

        for env in &config.environments {
            let mut seen = HashSet::new();
            for (kind, name) in &names {
                let concrete = for_env(name, env);
                if !seen.insert(concrete.clone()) {
                    result.error(
                        format!("{kind}.name"),
                        format!("Duplicate resource name '{concrete}' in environment '{env}'"),
                    );
                }
            }
        }
    }

    fn validate_iam(config: &StackConfig, result: &mut ValidationResult) {
        let role_names: BTreeSet<&str> = config.iam.roles.iter().map(|r| r.name.as_str()).collect();

        for (i, role) in config.iam.roles.iter().enumerate() {
            if role.assume_service.is_empty() {
                result.error(
                    format!("iam.roles[{i}].assume_service"),
                    "Assume-role service cannot be empty",
                );
            }
            for (j, arn) in role.managed_policies.iter().enumerate() {
                if arn.is_empty() {
                    result.error(
                        format!("iam.roles[{i}].managed_policies[{j}]"),
                        format!("Empty policy ARN for {}", attachment_name(&role.name, j)),
                    );
                }
            }
        }

        for (i, role) in config.cluster.instance_roles.iter().enumerate() {
            if !role_names.contains(role.as_str()) {
                result.error(
                    format!("cluster.instance_roles[{i}]"),
                    format!("Unknown role '{role}'"),
                );
            }
        }
    }

    fn validate_node_groups(config: &StackConfig, result: &mut ValidationResult) {
        let profiles: BTreeSet<&str> = config
            .iam
            .roles
            .iter()
            .filter_map(|r| r.instance_profile.as_deref())
            .collect();

        for (i, group) in config.node_groups.iter().enumerate() {
            let field = format!("node_groups[{i}]");
            if group.instance_type.is_empty() {
                result.error(format!("{field}.instance_type"), "Instance type cannot be empty");
            }
            if group.max_size == 0 {
                result.error(format!("{field}.max_size"), "max_size must be at least 1");
            }
            if group.min_size > group.desired_capacity || group.desired_capacity > group.max_size {
                result.error(
                    format!("{field}.desired_capacity"),
                    format!(
                        "Expected min_size <= desired_capacity <= max_size, got {} <= {} <= {}",
                        group.min_size, group.desired_capacity, group.max_size
                    ),
                );
            }
            if let Some(profile) = &group.instance_profile
                && !profiles.contains(profile.as_str())
            {
                result.error(
                    format!("{field}.instance_profile"),
                    format!("Unknown instance profile '{profile}'"),
                );
            }
        }
    }

    fn validate_kubernetes(config: &StackConfig, result: &mut ValidationResult) {
        for env in &config.environments {
            for (i, ns) in config.namespaces.iter().enumerate() {
                check_k8s_name(&ns.namespace, env, &format!("namespaces[{i}].namespace"), result);
            }
            for (i, sa) in config.service_accounts.iter().enumerate() {
                let field = format!("service_accounts[{i}]");
                check_k8s_name(&sa.account, env, &format!("{field}.account"), result);
                check_k8s_name(&sa.namespace, env, &format!("{field}.namespace"), result);
            }
            for (i, chart) in config.charts.iter().enumerate() {
                check_k8s_name(&chart.namespace, env, &format!("charts[{i}].namespace"), result);
            }
        }

        for (i, chart) in config.charts.iter().enumerate() {
            if chart.chart.is_empty() {
                result.error(format!("charts[{i}].chart"), "Chart name cannot be empty");
            }
            if !is_http_url(&chart.repo) {
                result.error(
                    format!("charts[{i}].repo"),
                    format!("Chart repository '{}' must be an http(s) URL", chart.repo),
                );
            }
        }
    }

    fn validate_dependencies(config: &StackConfig, result: &mut ValidationResult) {
        let declared: BTreeSet<String> = config
            .resource_names()
            .into_iter()
            .map(|(_, name)| name)
            .collect();

        let lists = std::iter::once(("cluster", &config.cluster.depends_on))
            .chain(config.node_groups.iter().map(|g| ("node_groups", &g.depends_on)))
            .chain(config.namespaces.iter().map(|n| ("namespaces", &n.depends_on)))
            .chain(config.service_accounts.iter().map(|s| ("service_accounts", &s.depends_on)))
            .chain(config.charts.iter().map(|c| ("charts", &c.depends_on)))
            .chain(config.manifests.iter().map(|m| ("manifests", &m.depends_on)));

        for (section, depends_on) in lists {
            for dep in depends_on {
                if !declared.contains(dep) {
                    result.error(
                        format!("{section}.depends_on"),
                        format!("Unknown dependency '{dep}'"),
                    );
                }
            }
        }
    }

    fn validate_exports(config: &StackConfig, result: &mut ValidationResult) {
        let mut seen = HashSet::new();
        for (i, export) in config.exports.iter().enumerate() {
            if export.name.is_empty() {
                result.error(format!("exports[{i}].name"), "Export name cannot be empty");
            }
            if !seen.insert(export.name.as_str()) {
                result.error(
                    format!("exports[{i}].name"),
                    format!("Duplicate export name: {}", export.name),
                );
            }
            if export.value.is_resolved() {
                result.warn(format!("Export '{}' is a literal value", export.name));
            }
        }
    }
}

/// Kind of content an input file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// A single JSON document.
    Json,
    /// One or more YAML documents.
    Yaml,
}

/// Returns the input format implied by a file extension.
#[must_use]
pub fn input_format(path: &str) -> Option<InputFormat> {
    match Path::new(path).extension().and_then(|e| e.to_str()) {
        Some("json") => Some(InputFormat::Json),
        Some("yaml" | "yml") => Some(InputFormat::Yaml),
        _ => None,
    }
}

fn check_k8s_name(template: &str, env: &str, field: &str, result: &mut ValidationResult) {
    let name = for_env(template, env);
    if !is_valid_name(&name) {
        result.error(
            field,
            format!("'{name}' is not a valid Kubernetes name (environment '{env}')"),
        );
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Resource names may carry the `{env}` token and mixed case.
fn is_valid_resource_name(name: &str) -> bool {
    let bare = name.replace(ENV_TOKEN, "env");
    !bare.is_empty()
        && bare.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
        && bare
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    let mut chars = name.chars();

    // First character must be a letter
    if let Some(first) = chars.next()
        && !first.is_ascii_lowercase()
    {
        return false;
    }

    // Rest must be lowercase alphanumeric or hyphen
    for c in chars {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
            return false;
        }
    }

    // Cannot end with hyphen
    if name.ends_with('-') {
        return false;
    }

    true
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn parse(yaml: &str) -> StackConfig {
        ConfigParser::new().parse_yaml(yaml, None).unwrap()
    }

    const VALID: &str = r"
project:
  name: aws-demo
environments: [test, prod]
inputs:
  controller_policy: elb-policy.json
  elb_crd: aws-elb-crd.yaml
iam:
  roles:
    - name: '{env}-node-role'
      managed_policies: [arn:aws:iam::aws:policy/AmazonEKSWorkerNodePolicy]
      instance_profile: '{env}-instance-profile'
  policies:
    - name: '{env}-controller-policy'
      document: controller_policy
cluster:
  name: '{env}-aws-demo'
  instance_roles: ['{env}-node-role']
node_groups:
  - name: '{env}-aws-demo-ng1'
    instance_type: t2.small
namespaces:
  - name: '{env}-app-ns'
    namespace: '{env}-app'
charts:
  - name: '{env}-argo-cd'
    chart: argo-cd
    repo: https://argoproj.github.io/argo-helm
    namespace: argocd
    depends_on: ['{env}-app-ns']
manifests:
  - name: '{env}-elb-crd'
    file: elb_crd
";

    #[test]
    fn test_valid_config_passes() {
        let result = ConfigValidator::new().validate(&parse(VALID)).unwrap();
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 0);
    }

    #[test]
    fn test_collects_all_errors() {
        let yaml = r"
project:
  name: Demo
environments: [test, test]
execution:
  max_parallel: 0
cluster:
  name: '{env}-aws-demo'
node_groups:
  - name: '{env}-ng'
    instance_type: t2.small
    min_size: 4
charts:
  - name: '{env}-chart'
    chart: argo-cd
    repo: ftp://example.com
    namespace: Argo
    depends_on: [missing]
manifests:
  - name: '{env}-crd'
    file: nowhere
";
        let result = ConfigValidator::new().check(&parse(yaml));
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();

        assert!(fields.contains(&"project.name"));
        assert!(fields.contains(&"environments[1]"));
        assert!(fields.contains(&"execution.max_parallel"));
        assert!(fields.contains(&"node_groups[0].desired_capacity"));
        assert!(fields.contains(&"charts[0].repo"));
        assert!(fields.contains(&"charts[0].namespace"));
        assert!(fields.contains(&"charts.depends_on"));
        assert!(fields.contains(&"manifests[0].file"));
        assert!(ConfigValidator::new().validate(&parse(yaml)).is_err());
    }

    #[test]
    fn test_duplicate_names_after_substitution() {
        let yaml = r"
project:
  name: demo
environments: [test]
cluster:
  name: '{env}-cluster'
namespaces:
  - name: test-cluster
    namespace: app
";
        let result = ConfigValidator::new().check(&parse(yaml));
        assert!(
            result
                .errors
                .iter()
                .any(|e| e.message.contains("Duplicate resource name 'test-cluster'"))
        );
    }

    #[test]
    fn test_missing_env_token_warns_for_multiple_environments() {
        let yaml = r"
project:
  name: demo
environments: [test, prod]
cluster:
  name: shared-cluster
";
        let result = ConfigValidator::new().validate(&parse(yaml)).unwrap();
        assert_eq!(result.warning_count(), 1);
        assert!(result.warnings[0].contains("shared-cluster"));
    }

    #[test]
    fn test_policy_document_must_be_json() {
        let yaml = r"
project:
  name: demo
environments: [test]
inputs:
  crd: aws-elb-crd.yaml
iam:
  policies:
    - name: '{env}-policy'
      document: crd
cluster:
  name: '{env}-cluster'
";
        let result = ConfigValidator::new().check(&parse(yaml));
        assert_eq!(result.error_count(), 1);
        assert_eq!(result.errors[0].field, "iam.policies[0].document");
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("argocd"));
        assert!(is_valid_name("test-app"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Argo"));
        assert!(!is_valid_name("1app"));
        assert!(!is_valid_name("app-"));
        assert!(is_valid_resource_name("{env}-AWSLoadBalancerControllerIAMPolicy"));
        assert!(!is_valid_resource_name("{env} cluster"));
    }
}
