//! Stack file types for clusterform.
//!
//! This module defines the structs that map to the `clusterform.yaml` file.
//! A stack is a template: every string may contain the `{env}` token, which
//! is replaced by the environment name when the graph for that environment
//! is built.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::graph::{ResourceKind, Value};

/// Token replaced by the environment name.
pub const ENV_TOKEN: &str = "{env}";

/// The root configuration structure of a stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackConfig {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// Deployment targets, in order.
    pub environments: Vec<String>,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Provider endpoint configuration.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// Execution tuning.
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Pinned network placement; looked up through the provider if absent.
    #[serde(default)]
    pub network: Option<NetworkConfig>,
    /// Static input files, keyed by alias, relative to the stack file.
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
    /// Identity roles and policies.
    #[serde(default)]
    pub iam: IamConfig,
    /// Managed cluster.
    pub cluster: ClusterConfig,
    /// Worker node groups.
    #[serde(default)]
    pub node_groups: Vec<NodeGroupConfig>,
    /// Kubernetes namespaces.
    #[serde(default)]
    pub namespaces: Vec<NamespaceConfig>,
    /// Kubernetes service accounts.
    #[serde(default)]
    pub service_accounts: Vec<ServiceAccountConfig>,
    /// Chart installations.
    #[serde(default)]
    pub charts: Vec<ChartConfig>,
    /// Raw manifests applied to the cluster.
    #[serde(default)]
    pub manifests: Vec<ManifestConfig>,
    /// Additional named exports.
    #[serde(default)]
    pub exports: Vec<ExportConfig>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Project name.
    pub name: String,
    /// Cloud region, passed through to the provider.
    #[serde(default)]
    pub region: Option<String>,
    /// Tags applied to every resource.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type (local or s3).
    #[serde(default)]
    pub backend: StateBackend,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Local state directory (for local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// Provisioning service configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Service base URL. Required unless running simulated.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Attempts per request for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base delay between attempts in milliseconds.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

/// Execution tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecutionConfig {
    /// Maximum concurrent provider calls per environment.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Kinds whose failures do not stop the plan.
    #[serde(default = "default_best_effort_kinds")]
    pub best_effort_kinds: Vec<ResourceKind>,
}

/// Pinned network placement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkConfig {
    /// Virtual network identifier.
    pub vpc_id: String,
    /// Subnets for the cluster.
    pub subnet_ids: Vec<String>,
}

/// Identity configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IamConfig {
    /// Roles to create.
    #[serde(default)]
    pub roles: Vec<RoleConfig>,
    /// Access policies to create.
    #[serde(default)]
    pub policies: Vec<PolicyConfig>,
}

/// An identity role with its managed policy attachments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleConfig {
    /// Role name.
    pub name: String,
    /// Service principal allowed to assume the role.
    #[serde(default = "default_assume_service")]
    pub assume_service: String,
    /// Managed policy ARNs attached to the role.
    #[serde(default)]
    pub managed_policies: Vec<String>,
    /// Name of an instance profile wrapping the role.
    #[serde(default)]
    pub instance_profile: Option<String>,
    /// Overrides the best-effort default of the role node.
    #[serde(default)]
    pub best_effort: Option<bool>,
}

/// An access policy whose document comes from an input file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyConfig {
    /// Policy name.
    pub name: String,
    /// Human description.
    #[serde(default)]
    pub description: Option<String>,
    /// Policy path.
    #[serde(default = "default_policy_path")]
    pub path: String,
    /// Alias of the JSON input holding the policy document.
    pub document: String,
    /// Overrides the best-effort default.
    #[serde(default)]
    pub best_effort: Option<bool>,
}

/// Managed cluster configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Cluster name.
    pub name: String,
    /// Kubernetes version.
    #[serde(default)]
    pub version: Option<String>,
    /// Whether to skip the provider's default node group.
    #[serde(default = "default_true")]
    pub skip_default_node_group: bool,
    /// Whether to create an OIDC identity provider.
    #[serde(default = "default_true")]
    pub create_oidc_provider: bool,
    /// Roles registered with the cluster authentication.
    #[serde(default)]
    pub instance_roles: Vec<String>,
    /// Explicit dependencies.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Worker node group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeGroupConfig {
    /// Node group name.
    pub name: String,
    /// Instance type.
    pub instance_type: String,
    /// Desired node count.
    #[serde(default = "default_desired_capacity")]
    pub desired_capacity: u32,
    /// Minimum node count.
    #[serde(default = "default_min_size")]
    pub min_size: u32,
    /// Maximum node count.
    #[serde(default = "default_max_size")]
    pub max_size: u32,
    /// Node labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Instance profile name, if any.
    #[serde(default)]
    pub instance_profile: Option<String>,
    /// Explicit dependencies.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Overrides the best-effort default.
    #[serde(default)]
    pub best_effort: Option<bool>,
}

/// Kubernetes namespace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamespaceConfig {
    /// Resource name.
    pub name: String,
    /// Namespace name inside the cluster.
    pub namespace: String,
    /// Explicit dependencies.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Overrides the best-effort default.
    #[serde(default)]
    pub best_effort: Option<bool>,
}

/// Kubernetes service account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceAccountConfig {
    /// Resource name.
    pub name: String,
    /// Account name inside the cluster.
    pub account: String,
    /// Namespace of the account.
    pub namespace: String,
    /// Annotations; values may be references.
    #[serde(default)]
    pub annotations: BTreeMap<String, Value>,
    /// Explicit dependencies.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Overrides the best-effort default.
    #[serde(default)]
    pub best_effort: Option<bool>,
}

/// Chart installation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChartConfig {
    /// Resource name.
    pub name: String,
    /// Chart name in the repository.
    pub chart: String,
    /// Chart repository URL.
    pub repo: String,
    /// Target namespace.
    pub namespace: String,
    /// Chart version.
    #[serde(default)]
    pub version: Option<String>,
    /// Prefix for the generated resource names.
    #[serde(default)]
    pub resource_prefix: Option<String>,
    /// Chart values; may contain references.
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
    /// Explicit dependencies.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Overrides the best-effort default.
    #[serde(default)]
    pub best_effort: Option<bool>,
}

/// Raw manifest file applied to the cluster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestConfig {
    /// Resource name.
    pub name: String,
    /// Alias of the YAML input holding the manifest documents.
    pub file: String,
    /// Prefix for the generated resource names.
    #[serde(default)]
    pub resource_prefix: Option<String>,
    /// Explicit dependencies.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Overrides the best-effort default.
    #[serde(default)]
    pub best_effort: Option<bool>,
}

/// Named export.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportConfig {
    /// Export name.
    pub name: String,
    /// Exported value, usually a reference.
    pub value: Value,
}

// Default value functions

const fn default_timeout_secs() -> u64 {
    30
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_retry_delay_ms() -> u64 {
    1000
}

const fn default_max_parallel() -> usize {
    1
}

fn default_best_effort_kinds() -> Vec<ResourceKind> {
    vec![ResourceKind::PolicyAttachment]
}

fn default_assume_service() -> String {
    String::from("ec2.amazonaws.com")
}

fn default_policy_path() -> String {
    String::from("/")
}

const fn default_true() -> bool {
    true
}

const fn default_desired_capacity() -> u32 {
    3
}

const fn default_min_size() -> u32 {
    1
}

const fn default_max_size() -> u32 {
    3
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            best_effort_kinds: default_best_effort_kinds(),
        }
    }
}

impl StackConfig {
    /// Returns true if failures of `kind` are tolerated by default.
    #[must_use]
    pub fn is_best_effort_kind(&self, kind: ResourceKind) -> bool {
        self.execution.best_effort_kinds.contains(&kind)
    }

    /// Returns true if the stack targets `environment`.
    #[must_use]
    pub fn has_environment(&self, environment: &str) -> bool {
        self.environments.iter().any(|e| e == environment)
    }

    /// Every templated resource name declared by the stack, with its kind.
    ///
    /// Names are returned before `{env}` substitution, in declaration order.
    #[must_use]
    pub fn resource_names(&self) -> Vec<(ResourceKind, String)> {
        let mut names = Vec::new();

        for role in &self.iam.roles {
            names.push((ResourceKind::Role, role.name.clone()));
            for i in 0..role.managed_policies.len() {
                names.push((ResourceKind::PolicyAttachment, attachment_name(&role.name, i)));
            }
            if let Some(profile) = &role.instance_profile {
                names.push((ResourceKind::InstanceProfile, profile.clone()));
            }
        }
        for policy in &self.iam.policies {
            names.push((ResourceKind::Policy, policy.name.clone()));
        }
        names.push((ResourceKind::Cluster, self.cluster.name.clone()));
        names.extend(
            self.node_groups
                .iter()
                .map(|g| (ResourceKind::NodeGroup, g.name.clone())),
        );
        names.extend(
            self.namespaces
                .iter()
                .map(|n| (ResourceKind::Namespace, n.name.clone())),
        );
        names.extend(
            self.service_accounts
                .iter()
                .map(|s| (ResourceKind::ServiceAccount, s.name.clone())),
        );
        names.extend(
            self.charts
                .iter()
                .map(|c| (ResourceKind::ChartInstall, c.name.clone())),
        );
        names.extend(
            self.manifests
                .iter()
                .map(|m| (ResourceKind::ConfigFile, m.name.clone())),
        );

        names
    }
}

/// Name of the `index`-th managed policy attachment of a role.
#[must_use]
pub fn attachment_name(role: &str, index: usize) -> String {
    format!("{role}-policy-{index}")
}

/// Replaces the `{env}` token in `template`.
#[must_use]
pub fn for_env(template: &str, environment: &str) -> String {
    template.replace(ENV_TOKEN, environment)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r"
project:
  name: demo
environments: [test]
cluster:
  name: '{env}-cluster'
";

    #[test]
    fn test_defaults() {
        let config: StackConfig = serde_yaml::from_str(MINIMAL).unwrap();
        assert_eq!(config.state.backend, StateBackend::Local);
        assert_eq!(config.execution.max_parallel, 1);
        assert!(config.is_best_effort_kind(ResourceKind::PolicyAttachment));
        assert!(!config.is_best_effort_kind(ResourceKind::Cluster));
        assert_eq!(config.provider.max_retries, 3);
        assert!(config.cluster.skip_default_node_group);
        assert!(config.network.is_none());
    }

    #[test]
    fn test_resource_names_include_generated_attachments() {
        let yaml = r"
project:
  name: demo
environments: [test]
iam:
  roles:
    - name: '{env}-node-role'
      managed_policies: [a, b]
      instance_profile: '{env}-instance-profile'
cluster:
  name: '{env}-cluster'
";
        let config: StackConfig = serde_yaml::from_str(yaml).unwrap();
        let names: Vec<String> = config.resource_names().into_iter().map(|(_, n)| n).collect();
        assert_eq!(
            names,
            vec![
                "{env}-node-role",
                "{env}-node-role-policy-0",
                "{env}-node-role-policy-1",
                "{env}-instance-profile",
                "{env}-cluster",
            ]
        );
    }

    #[test]
    fn test_reference_values_in_chart() {
        let yaml = r"
name: '{env}-aws-elb'
chart: aws-load-balancer-controller
repo: https://aws.github.io/eks-charts
namespace: kube-system
values:
  clusterName: { $ref: '{env}-cluster.name' }
  image: { tag: v2.3.0 }
";
        let chart: ChartConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            chart.values["clusterName"],
            Value::reference("{env}-cluster", "name")
        );
        assert!(chart.values["image"].get("tag").is_some());
    }

    #[test]
    fn test_for_env() {
        assert_eq!(for_env("{env}-aws-demo", "prod"), "prod-aws-demo");
        assert_eq!(for_env("kube-system", "prod"), "kube-system");
    }
}
