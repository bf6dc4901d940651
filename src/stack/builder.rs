//! Per-environment graph construction.
//!
//! The builder turns the stack template into one [`ResourceGraph`] per
//! environment. Every environment gets the same shape; only names, the
//! `{env}` token and the shared network placement flow into the inputs.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::{ENV_TOKEN, StackConfig, attachment_name, for_env};
use crate::error::{GraphError, Result};
use crate::graph::{
    DependencyResolver, ExecutionPlan, Inputs, NodeId, ResourceGraph, ResourceKind,
    StateExporter, Value,
};
use crate::provider::NetworkContext;

use super::inputs::InputFiles;

/// Output of the cluster holding its access configuration.
const KUBECONFIG_FIELD: &str = "kubeconfig";

/// The graph and exports of one environment.
#[derive(Debug, Clone)]
pub struct EnvironmentStack {
    /// Declared resources.
    pub graph: ResourceGraph,
    /// Declared exports.
    pub exporter: StateExporter,
}

impl EnvironmentStack {
    /// Environment name.
    #[must_use]
    pub fn environment(&self) -> &str {
        self.graph.environment()
    }

    /// Resolves the execution plan of the graph.
    ///
    /// # Errors
    ///
    /// Returns a graph error for cycles, malformed references or references
    /// to undeclared resources.
    pub fn plan(&self) -> Result<ExecutionPlan> {
        Ok(DependencyResolver::new().resolve(&self.graph)?)
    }
}

/// Builds environment graphs from a stack configuration.
#[derive(Debug, Clone)]
pub struct StackBuilder<'a> {
    config: &'a StackConfig,
    inputs: &'a InputFiles,
    network: Arc<NetworkContext>,
}

/// Declaration helper bound to one environment.
struct EnvBuilder<'a> {
    config: &'a StackConfig,
    env: &'a str,
    graph: ResourceGraph,
    /// Explicit dependencies by node, still templated.
    pending_deps: Vec<(NodeId, &'a [String])>,
}

impl<'a> StackBuilder<'a> {
    /// Creates a builder sharing one network lookup across environments.
    #[must_use]
    pub const fn new(
        config: &'a StackConfig,
        inputs: &'a InputFiles,
        network: Arc<NetworkContext>,
    ) -> Self {
        Self {
            config,
            inputs,
            network,
        }
    }

    /// Builds the graph and exports of `environment`.
    ///
    /// # Errors
    ///
    /// Returns a plan-time error for duplicate names, unknown dependencies,
    /// missing inputs, duplicate exports or exports of undeclared resources.
    pub fn build(&self, environment: &str) -> Result<EnvironmentStack> {
        let mut env = EnvBuilder {
            config: self.config,
            env: environment,
            graph: ResourceGraph::new(environment),
            pending_deps: Vec::new(),
        };

        self.declare_iam(&mut env)?;
        let cluster = self.declare_cluster(&mut env)?;
        self.declare_workloads(&mut env, cluster)?;
        env.link_dependencies()?;

        let exporter = self.declare_exports(&env)?;
        debug!(
            "Built {} resources and {} exports for {environment}",
            env.graph.len(),
            exporter.entries().len()
        );

        Ok(EnvironmentStack {
            graph: env.graph,
            exporter,
        })
    }

    fn declare_iam(&self, env: &mut EnvBuilder<'a>) -> Result<()> {
        for role in &self.config.iam.roles {
            let role_name = env.name(&role.name);
            let assume_role_policy = serde_json::json!({
                "Version": "2012-10-17",
                "Statement": [{
                    "Effect": "Allow",
                    "Action": ["sts:AssumeRole"],
                    "Principal": { "Service": [role.assume_service] },
                }],
            });

            let mut inputs = env.tagged();
            inputs.insert(String::from("name"), Value::from(role_name.clone()));
            inputs.insert(
                String::from("assume_role_policy"),
                Value::from(assume_role_policy.to_string()),
            );
            let role_id = env.declare(&role.name, ResourceKind::Role, inputs, role.best_effort, &[])?;

            for (i, arn) in role.managed_policies.iter().enumerate() {
                let mut inputs = Inputs::new();
                inputs.insert(String::from("policy_arn"), Value::from(arn.as_str()));
                inputs.insert(String::from("role"), env.graph.reference(role_id, "name")?);
                env.declare(
                    &attachment_name(&role.name, i),
                    ResourceKind::PolicyAttachment,
                    inputs,
                    None,
                    &[],
                )?;
            }

            if let Some(profile) = &role.instance_profile {
                let mut inputs = Inputs::new();
                inputs.insert(String::from("name"), Value::from(env.name(profile)));
                inputs.insert(String::from("role"), env.graph.reference(role_id, "name")?);
                env.declare(profile, ResourceKind::InstanceProfile, inputs, None, &[])?;
            }
        }

        for policy in &self.config.iam.policies {
            let name = env.name(&policy.name);
            let mut inputs = env.tagged();
            inputs.insert(String::from("name"), Value::from(name.clone()));
            inputs.insert(String::from("path"), Value::from(policy.path.as_str()));
            inputs.insert(
                String::from("description"),
                Value::from(policy.description.clone().unwrap_or(name)),
            );
            inputs.insert(
                String::from("policy"),
                Value::from(self.inputs.json(&policy.document)?),
            );
            env.declare(&policy.name, ResourceKind::Policy, inputs, policy.best_effort, &[])?;
        }

        Ok(())
    }

    fn declare_cluster(&self, env: &mut EnvBuilder<'a>) -> Result<NodeId> {
        let cluster = &self.config.cluster;
        let mut inputs = env.tagged();
        inputs.insert(String::from("name"), Value::from(env.name(&cluster.name)));
        inputs.insert(
            String::from("skip_default_node_group"),
            Value::from(cluster.skip_default_node_group),
        );
        inputs.insert(
            String::from("create_oidc_provider"),
            Value::from(cluster.create_oidc_provider),
        );
        inputs.insert(String::from("vpc_id"), Value::from(self.network.vpc_id.as_str()));
        inputs.insert(
            String::from("subnet_ids"),
            Value::List(
                self.network
                    .subnet_ids
                    .iter()
                    .map(|s| Value::from(s.as_str()))
                    .collect(),
            ),
        );
        if let Some(version) = &cluster.version {
            inputs.insert(String::from("version"), Value::from(version.as_str()));
        }
        if let Some(region) = &self.config.project.region {
            inputs.insert(String::from("region"), Value::from(region.as_str()));
        }
        if !cluster.instance_roles.is_empty() {
            let roles = cluster
                .instance_roles
                .iter()
                .map(|role| Value::reference(env.name(role), "arn"))
                .collect();
            inputs.insert(String::from("instance_role_arns"), Value::List(roles));
        }

        env.declare(&cluster.name, ResourceKind::Cluster, inputs, None, &cluster.depends_on)
    }

    fn declare_workloads(&self, env: &mut EnvBuilder<'a>, cluster: NodeId) -> Result<()> {
        let kubeconfig = env.graph.reference(cluster, KUBECONFIG_FIELD)?;

        for group in &self.config.node_groups {
            let mut inputs = Inputs::new();
            inputs.insert(String::from("name"), Value::from(env.name(&group.name)));
            inputs.insert(String::from("cluster"), env.graph.reference(cluster, "core")?);
            inputs.insert(
                String::from("instance_type"),
                Value::from(group.instance_type.as_str()),
            );
            inputs.insert(
                String::from("desired_capacity"),
                Value::from(group.desired_capacity),
            );
            inputs.insert(String::from("min_size"), Value::from(group.min_size));
            inputs.insert(String::from("max_size"), Value::from(group.max_size));
            if !group.labels.is_empty() {
                inputs.insert(
                    String::from("labels"),
                    Value::map(group.labels.iter().map(|(k, v)| (k.clone(), env.name(v)))),
                );
            }
            if let Some(profile) = &group.instance_profile {
                inputs.insert(
                    String::from("instance_profile"),
                    Value::reference(env.name(profile), "name"),
                );
            }
            env.declare(
                &group.name,
                ResourceKind::NodeGroup,
                inputs,
                group.best_effort,
                &group.depends_on,
            )?;
        }

        for ns in &self.config.namespaces {
            let mut inputs = Inputs::new();
            inputs.insert(String::from(KUBECONFIG_FIELD), kubeconfig.clone());
            inputs.insert(
                String::from("metadata"),
                Value::map([("name", env.name(&ns.namespace))]),
            );
            env.declare(
                &ns.name,
                ResourceKind::Namespace,
                inputs,
                ns.best_effort,
                &ns.depends_on,
            )?;
        }

        for sa in &self.config.service_accounts {
            let annotations: BTreeMap<String, Value> = sa
                .annotations
                .iter()
                .map(|(k, v)| (k.clone(), env.value(v)))
                .collect();
            let mut metadata = BTreeMap::new();
            metadata.insert(String::from("name"), Value::from(env.name(&sa.account)));
            metadata.insert(String::from("namespace"), Value::from(env.name(&sa.namespace)));
            if !annotations.is_empty() {
                metadata.insert(String::from("annotations"), Value::Map(annotations));
            }

            let mut inputs = Inputs::new();
            inputs.insert(String::from(KUBECONFIG_FIELD), kubeconfig.clone());
            inputs.insert(String::from("metadata"), Value::Map(metadata));
            env.declare(
                &sa.name,
                ResourceKind::ServiceAccount,
                inputs,
                sa.best_effort,
                &sa.depends_on,
            )?;
        }

        for chart in &self.config.charts {
            let mut inputs = Inputs::new();
            inputs.insert(String::from(KUBECONFIG_FIELD), kubeconfig.clone());
            inputs.insert(String::from("chart"), Value::from(chart.chart.as_str()));
            inputs.insert(String::from("repo"), Value::from(chart.repo.as_str()));
            inputs.insert(String::from("namespace"), Value::from(env.name(&chart.namespace)));
            inputs.insert(
                String::from("resource_prefix"),
                Value::from(env.prefix(chart.resource_prefix.as_deref())),
            );
            if let Some(version) = &chart.version {
                inputs.insert(String::from("version"), Value::from(version.as_str()));
            }
            inputs.insert(
                String::from("values"),
                Value::Map(
                    chart
                        .values
                        .iter()
                        .map(|(k, v)| (k.clone(), env.value(v)))
                        .collect(),
                ),
            );
            env.declare(
                &chart.name,
                ResourceKind::ChartInstall,
                inputs,
                chart.best_effort,
                &chart.depends_on,
            )?;
        }

        for manifest in &self.config.manifests {
            let mut inputs = Inputs::new();
            inputs.insert(String::from(KUBECONFIG_FIELD), kubeconfig.clone());
            inputs.insert(
                String::from("documents"),
                Value::List(self.inputs.yaml(&manifest.file)?.to_vec()),
            );
            inputs.insert(
                String::from("resource_prefix"),
                Value::from(env.prefix(manifest.resource_prefix.as_deref())),
            );
            env.declare(
                &manifest.name,
                ResourceKind::ConfigFile,
                inputs,
                manifest.best_effort,
                &manifest.depends_on,
            )?;
        }

        Ok(())
    }

    fn declare_exports(&self, env: &EnvBuilder<'a>) -> Result<StateExporter> {
        let mut exporter = StateExporter::new();
        let cluster = env.name(&self.config.cluster.name);
        exporter.export(
            format!("{}-kubeconfig", env.env),
            Value::reference(cluster, KUBECONFIG_FIELD),
        )?;

        for export in &self.config.exports {
            let name = env.name(&export.name);
            let value = env.value(&export.value);
            value
                .check_references()
                .map_err(|message| GraphError::InvalidReference {
                    name: name.clone(),
                    message,
                })?;
            exporter.export(name, value)?;
        }

        for reference in exporter.references() {
            if env.graph.id_of(&reference.node).is_none() {
                return Err(GraphError::UnresolvedReference {
                    node: reference.node.clone(),
                    field: reference.field.clone(),
                }
                .into());
            }
        }

        Ok(exporter)
    }
}

impl<'a> EnvBuilder<'a> {
    fn name(&self, template: &str) -> String {
        for_env(template, self.env)
    }

    fn value(&self, template: &Value) -> Value {
        template.substitute(ENV_TOKEN, self.env)
    }

    fn prefix(&self, template: Option<&str>) -> String {
        template.map_or_else(|| self.env.to_string(), |p| self.name(p))
    }

    /// Inputs pre-filled with the project and environment tags.
    fn tagged(&self) -> Inputs {
        let mut tags: BTreeMap<String, Value> = self
            .config
            .project
            .tags
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(self.name(v))))
            .collect();
        tags.insert(
            String::from("project"),
            Value::from(self.config.project.name.as_str()),
        );
        tags.insert(String::from("environment"), Value::from(self.env));

        let mut inputs = Inputs::new();
        inputs.insert(String::from("tags"), Value::Map(tags));
        inputs
    }

    fn declare(
        &mut self,
        template: &str,
        kind: ResourceKind,
        inputs: Inputs,
        best_effort: Option<bool>,
        depends_on: &'a [String],
    ) -> Result<NodeId> {
        let id = self.graph.declare(self.name(template), kind, inputs)?;
        let best_effort = best_effort.unwrap_or_else(|| self.config.is_best_effort_kind(kind));
        self.graph.set_best_effort(id, best_effort)?;
        if !depends_on.is_empty() {
            self.pending_deps.push((id, depends_on));
        }
        Ok(id)
    }

    /// Adds explicit dependencies once every node is declared.
    fn link_dependencies(&mut self) -> Result<()> {
        for (id, depends_on) in std::mem::take(&mut self.pending_deps) {
            for dep in depends_on {
                let name = self.name(dep);
                let target = self
                    .graph
                    .id_of(&name)
                    .ok_or(GraphError::UnknownNode { name })?;
                self.graph.add_dependency(id, target)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::error::ClusterformError;
    use crate::graph::NodeStatus;

    const STACK: &str = r"
project:
  name: aws-demo
environments: [test, prod]
inputs:
  controller_policy: elb-policy.json
  elb_crd: aws-elb-crd.yaml
iam:
  roles:
    - name: '{env}-node-role'
      managed_policies:
        - arn:aws:iam::aws:policy/AmazonEKSWorkerNodePolicy
        - arn:aws:iam::aws:policy/AmazonEKS_CNI_Policy
      instance_profile: '{env}-instance-profile'
  policies:
    - name: '{env}-controller-policy'
      document: controller_policy
cluster:
  name: '{env}-aws-demo'
node_groups:
  - name: '{env}-aws-demo-ng1'
    instance_type: t2.small
namespaces:
  - name: '{env}-argocd-ns'
    namespace: argocd
  - name: '{env}-app-ns'
    namespace: '{env}-app'
service_accounts:
  - name: '{env}-iam-serviceaccount'
    account: aws-load-balancer-controller
    namespace: kube-system
    annotations:
      eks.amazonaws.com/role-arn: { $ref: '{env}-controller-policy.arn' }
charts:
  - name: '{env}-argo-cd'
    chart: argo-cd
    repo: https://argoproj.github.io/argo-helm
    namespace: argocd
    depends_on: ['{env}-argocd-ns']
  - name: '{env}-aws-elb'
    chart: aws-load-balancer-controller
    repo: https://aws.github.io/eks-charts
    namespace: kube-system
    values:
      clusterName: { $ref: '{env}-aws-demo.name' }
      image: { tag: v2.3.0 }
manifests:
  - name: '{env}-elb-crd'
    file: elb_crd
";

    struct Fixture {
        config: StackConfig,
        inputs: InputFiles,
        _dir: tempfile::TempDir,
    }

    fn fixture(yaml: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("elb-policy.json"), r#"{"Version":"2012-10-17"}"#).unwrap();
        std::fs::write(
            dir.path().join("aws-elb-crd.yaml"),
            "apiVersion: apiextensions.k8s.io/v1\nkind: CustomResourceDefinition\n",
        )
        .unwrap();
        let config = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        let inputs = InputFiles::load(&config, dir.path()).unwrap();
        Fixture {
            config,
            inputs,
            _dir: dir,
        }
    }

    fn network() -> Arc<NetworkContext> {
        Arc::new(NetworkContext {
            vpc_id: String::from("vpc-1"),
            subnet_ids: vec![String::from("subnet-a")],
        })
    }

    #[test]
    fn test_builds_isomorphic_graphs() {
        let f = fixture(STACK);
        let builder = StackBuilder::new(&f.config, &f.inputs, network());

        let test = builder.build("test").unwrap();
        let prod = builder.build("prod").unwrap();

        assert_eq!(test.graph.len(), 13);
        assert_eq!(test.graph.len(), prod.graph.len());
        assert!(test.graph.get("test-aws-demo").is_some());
        assert!(prod.graph.get("prod-aws-demo").is_some());
        assert!(test.graph.get("prod-aws-demo").is_none());

        let test_kinds: Vec<ResourceKind> = test.graph.nodes().map(|(_, n)| n.kind()).collect();
        let prod_kinds: Vec<ResourceKind> = prod.graph.nodes().map(|(_, n)| n.kind()).collect();
        assert_eq!(test_kinds, prod_kinds);
    }

    #[test]
    fn test_plan_orders_cluster_before_workloads() {
        let f = fixture(STACK);
        let stack = StackBuilder::new(&f.config, &f.inputs, network())
            .build("test")
            .unwrap();
        let plan = stack.plan().unwrap();
        let names = plan.names(&stack.graph);
        let pos = |name: &str| names.iter().position(|n| *n == name).unwrap();

        assert!(pos("test-node-role") < pos("test-node-role-policy-0"));
        assert!(pos("test-node-role") < pos("test-instance-profile"));
        assert!(pos("test-aws-demo") < pos("test-aws-demo-ng1"));
        assert!(pos("test-argocd-ns") < pos("test-argo-cd"));
        assert!(pos("test-controller-policy") < pos("test-iam-serviceaccount"));
        assert!(pos("test-aws-demo") < pos("test-aws-elb"));
        assert!(pos("test-aws-demo") < pos("test-elb-crd"));
    }

    #[test]
    fn test_env_token_substituted_in_inputs() {
        let f = fixture(STACK);
        let stack = StackBuilder::new(&f.config, &f.inputs, network())
            .build("prod")
            .unwrap();

        let app = stack.graph.get("prod-app-ns").unwrap();
        assert_eq!(
            app.inputs()["metadata"].get("name"),
            Some(&Value::from("prod-app"))
        );
        let elb = stack.graph.get("prod-aws-elb").unwrap();
        assert_eq!(
            elb.inputs()["values"].get("clusterName"),
            Some(&Value::reference("prod-aws-demo", "name"))
        );
        assert_eq!(elb.inputs()["resource_prefix"], Value::from("prod"));
        let cluster = stack.graph.get("prod-aws-demo").unwrap();
        assert_eq!(cluster.inputs()["vpc_id"], Value::from("vpc-1"));
        assert_eq!(cluster.status(), NodeStatus::Declared);
    }

    #[test]
    fn test_best_effort_defaults_and_overrides() {
        let yaml = STACK.replace(
            "    namespace: argocd\n    depends_on",
            "    namespace: argocd\n    best_effort: true\n    depends_on",
        );
        let f = fixture(&yaml);
        let stack = StackBuilder::new(&f.config, &f.inputs, network())
            .build("test")
            .unwrap();

        assert!(stack.graph.get("test-node-role-policy-1").unwrap().is_best_effort());
        assert!(!stack.graph.get("test-node-role").unwrap().is_best_effort());
        assert!(stack.graph.get("test-argo-cd").unwrap().is_best_effort());
    }

    #[test]
    fn test_kubeconfig_exported() {
        let f = fixture(STACK);
        let stack = StackBuilder::new(&f.config, &f.inputs, network())
            .build("test")
            .unwrap();

        let entries = stack.exporter.entries();
        assert_eq!(entries[0].name, "test-kubeconfig");
        assert_eq!(entries[0].value, Value::reference("test-aws-demo", "kubeconfig"));
    }

    #[test]
    fn test_unknown_dependency_is_plan_time_error() {
        let yaml = STACK.replace("depends_on: ['{env}-argocd-ns']", "depends_on: ['{env}-nope']");
        let f = fixture(&yaml);
        let err = StackBuilder::new(&f.config, &f.inputs, network())
            .build("test")
            .unwrap_err();

        assert!(err.is_plan_time());
        assert!(matches!(
            err,
            ClusterformError::Graph(GraphError::UnknownNode { ref name }) if name == "test-nope"
        ));
    }

    #[test]
    fn test_export_of_undeclared_resource_rejected() {
        let yaml = format!(
            "{STACK}exports:\n  - name: '{{env}}-endpoint'\n    value: {{ $ref: '{{env}}-missing.endpoint' }}\n"
        );
        let f = fixture(&yaml);
        let err = StackBuilder::new(&f.config, &f.inputs, network())
            .build("test")
            .unwrap_err();

        assert!(matches!(
            err,
            ClusterformError::Graph(GraphError::UnresolvedReference { ref node, .. }) if node == "test-missing"
        ));
    }

    #[test]
    fn test_malformed_reference_is_plan_time_error() {
        let yaml = STACK.replace(
            "clusterName: { $ref: '{env}-aws-demo.name' }",
            "clusterName: { $ref: '{env}-aws-demo' }",
        );
        let f = fixture(&yaml);
        let stack = StackBuilder::new(&f.config, &f.inputs, network())
            .build("test")
            .unwrap();

        let err = stack.plan().unwrap_err();
        assert!(err.is_plan_time());
        assert!(matches!(
            err,
            ClusterformError::Graph(GraphError::InvalidReference { ref name, .. }) if name == "test-aws-elb"
        ));
    }

    #[test]
    fn test_malformed_export_reference_rejected() {
        let yaml = format!(
            "{STACK}exports:\n  - name: '{{env}}-endpoint'\n    value: {{ $ref: '{{env}}-aws-demo' }}\n"
        );
        let f = fixture(&yaml);
        let err = StackBuilder::new(&f.config, &f.inputs, network())
            .build("test")
            .unwrap_err();

        assert!(matches!(
            err,
            ClusterformError::Graph(GraphError::InvalidReference { ref name, .. }) if name == "test-endpoint"
        ));
    }

    #[test]
    fn test_duplicate_kubeconfig_export_rejected() {
        let yaml = format!(
            "{STACK}exports:\n  - name: '{{env}}-kubeconfig'\n    value: {{ $ref: '{{env}}-aws-demo.kubeconfig' }}\n"
        );
        let f = fixture(&yaml);
        let err = StackBuilder::new(&f.config, &f.inputs, network())
            .build("test")
            .unwrap_err();

        assert!(matches!(err, ClusterformError::Export(_)));
    }
}
