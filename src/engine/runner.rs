//! Stack runner.
//!
//! Drives a whole run: every selected environment is built and planned
//! first, and only when all of them pass are the environments applied, each
//! in its own task with its own state and lock.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::{ConfigHasher, ConfigValidator, StackConfig};
use crate::error::{ClusterformError, ConfigError, Result, RunError};
use crate::graph::{ExecutionPlan, ExportEntry, NodeStatus};
use crate::provider::{NetworkContext, ResourceProvider};
use crate::stack::{EnvironmentStack, InputFiles, StackBuilder};
use crate::state::{RunHistoryEntry, StackState, StateStore, generate_holder_id};

use super::executor::{AbortSignal, ExecutionResult, PlanExecutor};

/// An environment whose graph was built and ordered.
#[derive(Debug, Clone)]
pub struct PlannedEnvironment {
    /// Declared resources and exports.
    pub stack: EnvironmentStack,
    /// Resolved execution order.
    pub plan: ExecutionPlan,
}

impl PlannedEnvironment {
    /// Environment name.
    #[must_use]
    pub fn environment(&self) -> &str {
        self.stack.environment()
    }
}

/// Outcome of applying one environment.
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentReport {
    /// Environment name.
    pub environment: String,
    /// Execution outcome, absent if the environment never started.
    pub result: Option<ExecutionResult>,
    /// Exports resolved by this run.
    pub exports: Vec<ExportEntry>,
    /// Exports whose source resource did not execute.
    pub unresolved_exports: Vec<String>,
    /// State or lock error that affected this environment.
    pub error: Option<String>,
}

impl EnvironmentReport {
    fn new(environment: &str) -> Self {
        Self {
            environment: environment.to_string(),
            result: None,
            exports: Vec::new(),
            unresolved_exports: Vec::new(),
            error: None,
        }
    }

    /// Returns true if the plan completed and its state was recorded.
    #[must_use]
    pub fn success(&self) -> bool {
        self.error.is_none() && self.result.as_ref().is_some_and(ExecutionResult::success)
    }
}

impl fmt::Display for EnvironmentReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.result {
            Some(result) => write!(f, "{result}")?,
            None => write!(f, "{}: not applied", self.environment)?,
        }
        if let Some(error) = &self.error {
            write!(f, " ({error})")?;
        }
        Ok(())
    }
}

/// Outcome of a whole run, one report per environment in configuration order.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Per-environment reports.
    pub environments: Vec<EnvironmentReport>,
}

impl RunReport {
    /// Returns true if every environment succeeded.
    #[must_use]
    pub fn success(&self) -> bool {
        self.environments.iter().all(EnvironmentReport::success)
    }

    /// Gets the report of an environment.
    #[must_use]
    pub fn environment(&self, name: &str) -> Option<&EnvironmentReport> {
        self.environments.iter().find(|e| e.environment == name)
    }

    /// Turns a failed run into an error.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Aborted`] if the run was interrupted, otherwise
    /// [`RunError::EnvironmentsFailed`] when any environment failed.
    pub fn ensure_success(&self) -> Result<()> {
        if self
            .environments
            .iter()
            .any(|e| e.result.as_ref().is_some_and(|r| r.aborted))
        {
            return Err(RunError::Aborted {
                reason: String::from("interrupted"),
            }
            .into());
        }

        let failed = self.environments.iter().filter(|e| !e.success()).count();
        if failed > 0 {
            return Err(RunError::EnvironmentsFailed {
                failed,
                total: self.environments.len(),
            }
            .into());
        }
        Ok(())
    }
}

/// Runs a stack configuration against a provider.
pub struct StackRunner {
    config: StackConfig,
    base_dir: PathBuf,
    provider: Arc<dyn ResourceProvider>,
    store: Option<Arc<dyn StateStore>>,
    abort: AbortSignal,
    max_parallel: usize,
    only: Option<String>,
    hasher: ConfigHasher,
}

impl StackRunner {
    /// Creates a runner; input files are resolved against `base_dir`.
    #[must_use]
    pub fn new(
        config: StackConfig,
        base_dir: impl Into<PathBuf>,
        provider: Arc<dyn ResourceProvider>,
    ) -> Self {
        let max_parallel = config.execution.max_parallel;
        Self {
            config,
            base_dir: base_dir.into(),
            provider,
            store: None,
            abort: AbortSignal::new(),
            max_parallel,
            only: None,
            hasher: ConfigHasher::new(),
        }
    }

    /// Persists state and exports to `store`. Without a store nothing is recorded.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Shares an abort signal with every environment.
    #[must_use]
    pub fn with_abort_signal(mut self, abort: AbortSignal) -> Self {
        self.abort = abort;
        self
    }

    /// Overrides the configured parallelism.
    #[must_use]
    pub const fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    /// Restricts the run to one environment.
    #[must_use]
    pub fn only_environment(mut self, environment: Option<String>) -> Self {
        self.only = environment;
        self
    }

    /// Environments selected for this run.
    fn selected(&self) -> Result<Vec<&str>> {
        match &self.only {
            Some(env) if self.config.has_environment(env) => Ok(vec![env.as_str()]),
            Some(env) => Err(ConfigError::validation(
                format!("Unknown environment '{env}'"),
                "environments",
            )
            .into()),
            None => Ok(self.config.environments.iter().map(String::as_str).collect()),
        }
    }

    /// Builds and plans every selected environment without applying anything.
    ///
    /// # Errors
    ///
    /// Returns the first configuration, input-file, graph or export error of
    /// any environment, or a provider error from the network lookup.
    pub async fn prepare(&self) -> Result<Vec<PlannedEnvironment>> {
        ConfigValidator::new().validate(&self.config)?;
        let environments = self.selected()?;
        let inputs = InputFiles::load(&self.config, &self.base_dir)?;
        let network = self.network().await?;

        let builder = StackBuilder::new(&self.config, &inputs, network);
        let mut planned = Vec::with_capacity(environments.len());
        for env in environments {
            let stack = builder.build(env)?;
            let plan = stack.plan()?;
            info!("Planned {} resources for {env}", plan.len());
            planned.push(PlannedEnvironment { stack, plan });
        }
        Ok(planned)
    }

    async fn network(&self) -> Result<Arc<NetworkContext>> {
        if let Some(pinned) = &self.config.network {
            return Ok(Arc::new(NetworkContext {
                vpc_id: pinned.vpc_id.clone(),
                subnet_ids: pinned.subnet_ids.clone(),
            }));
        }

        info!("Looking up default network through {}", self.provider.name());
        let network = self.provider.lookup_network().await?;
        Ok(Arc::new(network))
    }

    /// Plans every environment, then applies them concurrently.
    ///
    /// A failure in one environment never stops the others. Provider and
    /// state failures are reported per environment in the [`RunReport`].
    ///
    /// # Errors
    ///
    /// Returns a plan-time error before any resource is applied, or an
    /// internal error if an environment task panics.
    pub async fn run(&self) -> Result<RunReport> {
        let planned = self.prepare().await?;
        self.apply(planned).await
    }

    /// Applies environments planned by [`StackRunner::prepare`], concurrently.
    ///
    /// # Errors
    ///
    /// Returns an internal error if an environment task panics.
    pub async fn apply(&self, planned: Vec<PlannedEnvironment>) -> Result<RunReport> {
        let order: Vec<String> = planned.iter().map(|p| p.environment().to_string()).collect();
        let config_hash = self.hasher.hash_config(&self.config);
        let holder = generate_holder_id();

        let mut tasks = JoinSet::new();
        for environment in planned {
            let executor = PlanExecutor::new(Arc::clone(&self.provider))
                .with_max_parallel(self.max_parallel)
                .with_abort_signal(self.abort.clone());
            let job = EnvironmentJob {
                project: self.config.project.name.clone(),
                config_hash: config_hash.clone(),
                holder: holder.clone(),
                store: self.store.clone(),
                executor,
            };
            tasks.spawn(job.run(environment));
        }

        let mut reports = Vec::with_capacity(order.len());
        while let Some(joined) = tasks.join_next().await {
            let report = joined.map_err(|e| {
                error!("Environment task panicked: {e}");
                ClusterformError::internal(format!("Environment task panicked: {e}"))
            })?;
            reports.push(report);
        }
        reports.sort_by_key(|r| order.iter().position(|e| *e == r.environment));

        Ok(RunReport {
            environments: reports,
        })
    }
}

/// Everything one environment task owns.
struct EnvironmentJob {
    project: String,
    config_hash: String,
    holder: String,
    store: Option<Arc<dyn StateStore>>,
    executor: PlanExecutor,
}

impl EnvironmentJob {
    async fn run(self, planned: PlannedEnvironment) -> EnvironmentReport {
        let environment = planned.environment().to_string();
        let mut report = EnvironmentReport::new(&environment);

        let Some(store) = self.store.clone() else {
            self.execute(planned, &mut report, None).await;
            return report;
        };

        let lock = match store.acquire_lock(&environment, &self.holder).await {
            Ok(lock) => lock,
            Err(e) => {
                error!("Cannot lock state of {environment}: {e}");
                report.error = Some(e.to_string());
                return report;
            }
        };

        let mut state = match store.load(&environment).await {
            Ok(state) => state.unwrap_or_else(|| StackState::new(&self.project, &environment)),
            Err(e) => {
                error!("Cannot load state of {environment}: {e}");
                report.error = Some(e.to_string());
                release(store.as_ref(), &environment, &lock.lock_id).await;
                return report;
            }
        };

        self.execute(planned, &mut report, Some(&mut state)).await;

        if report.result.is_some()
            && let Err(e) = store.save(&state).await
        {
            error!("Cannot save state of {environment}: {e}");
            report.error = Some(e.to_string());
        }
        release(store.as_ref(), &environment, &lock.lock_id).await;
        report
    }

    async fn execute(
        &self,
        mut planned: PlannedEnvironment,
        report: &mut EnvironmentReport,
        state: Option<&mut StackState>,
    ) {
        let result = match self
            .executor
            .execute(&planned.plan, &mut planned.stack.graph)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                error!("Execution of {} failed: {e}", report.environment);
                report.error = Some(e.to_string());
                return;
            }
        };

        let exports = planned.stack.exporter.resolve(&planned.stack.graph);
        if !exports.unresolved.is_empty() {
            warn!(
                "{}: exports not resolved: {}",
                report.environment,
                exports.unresolved.join(", ")
            );
        }

        if let Some(state) = state {
            self.record(state, &planned, &result);
            state.update_exports(planned.stack.exporter.entries(), &exports);
        }

        report.exports = exports.values;
        report.unresolved_exports = exports.unresolved;
        report.result = Some(result);
    }

    /// Writes the outcome of every touched resource into `state`.
    fn record(&self, state: &mut StackState, planned: &PlannedEnvironment, result: &ExecutionResult) {
        let hasher = ConfigHasher::new();
        let graph = &planned.stack.graph;

        for name in &result.executed {
            if let Some(node) = graph.get(name) {
                let input_hash = hasher.hash_inputs(node.kind(), name, node.inputs());
                state.record_executed(name, node.kind(), node.outputs().clone(), &input_hash);
            }
        }
        for failure in &result.failures {
            state.record_not_applied(
                &failure.node,
                failure.kind,
                NodeStatus::Failed,
                Some(failure.error.clone()),
            );
        }
        for name in &result.skipped {
            if let Some(node) = graph.get(name) {
                state.record_not_applied(name, node.kind(), NodeStatus::Skipped, None);
            }
        }

        state.config_hash.clone_from(&self.config_hash);
        let entry = RunHistoryEntry::new(&self.config_hash, result.executed.len());
        let entry = if result.success() {
            entry
        } else {
            let reason = result
                .fatal_failure()
                .map_or_else(|| String::from("aborted"), |f| format!("{}: {}", f.node, f.error));
            entry.failed(
                result.failures.iter().map(|f| f.node.clone()).collect(),
                result.skipped.clone(),
                &reason,
            )
        };
        state.add_history(entry);
    }
}

async fn release(store: &dyn StateStore, environment: &str, lock_id: &str) {
    if let Err(e) = store.release_lock(environment, lock_id).await {
        warn!("Failed to release state lock of {environment}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;
    use crate::graph::Value;
    use crate::provider::SimulatedProvider;
    use crate::state::LocalStateStore;

    const STACK: &str = r"
project:
  name: aws-demo
environments: [test, prod]
inputs:
  controller_policy: elb-policy.json
iam:
  roles:
    - name: '{env}-node-role'
      managed_policies:
        - arn:aws:iam::aws:policy/AmazonEKSWorkerNodePolicy
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
  - name: '{env}-app-ns'
    namespace: '{env}-app'
";

    fn stack_dir(with_policy: bool) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        if with_policy {
            std::fs::write(dir.path().join("elb-policy.json"), r#"{"Version":"2012-10-17"}"#)
                .unwrap();
        }
        dir
    }

    fn config() -> StackConfig {
        ConfigParser::new().parse_yaml(STACK, None).unwrap()
    }

    #[tokio::test]
    async fn test_applies_every_environment_and_records_state() {
        let dir = stack_dir(true);
        let store = Arc::new(LocalStateStore::with_base_dir(dir.path().join(".clusterform")));
        let provider = Arc::new(SimulatedProvider::new());

        let report = StackRunner::new(config(), dir.path(), provider)
            .with_store(store.clone())
            .run()
            .await
            .unwrap();

        assert!(report.success());
        assert!(report.ensure_success().is_ok());
        let names: Vec<&str> = report.environments.iter().map(|e| e.environment.as_str()).collect();
        assert_eq!(names, vec!["test", "prod"]);

        let test = store.load("test").await.unwrap().unwrap();
        assert_eq!(test.history.len(), 1);
        assert!(test.history[0].success);
        assert!(!test.config_hash.is_empty());
        assert_eq!(test.resource("test-aws-demo").unwrap().input_hash.len(), 64);
        assert!(matches!(
            test.export("test-kubeconfig").map(|e| &e.value),
            Some(Value::Map(_))
        ));
        assert!(!store.is_locked("test").await.unwrap());
    }

    #[tokio::test]
    async fn test_environments_fail_independently() {
        let dir = stack_dir(true);
        let store = Arc::new(LocalStateStore::with_base_dir(dir.path().join(".clusterform")));
        let provider = Arc::new(SimulatedProvider::new().fail_on("prod-aws-demo", "quota exceeded"));

        let report = StackRunner::new(config(), dir.path(), provider)
            .with_store(store.clone())
            .run()
            .await
            .unwrap();

        assert!(report.environment("test").unwrap().success());
        let prod = report.environment("prod").unwrap();
        assert!(!prod.success());
        let result = prod.result.as_ref().unwrap();
        assert_eq!(result.fatal_failure().unwrap().node, "prod-aws-demo");
        assert!(!result.executed.contains(&String::from("prod-aws-demo-ng1")));
        assert_eq!(prod.unresolved_exports, vec![String::from("prod-kubeconfig")]);

        let err = report.ensure_success().unwrap_err();
        assert!(matches!(
            err,
            ClusterformError::Run(RunError::EnvironmentsFailed { failed: 1, total: 2 })
        ));

        let prod_state = store.load("prod").await.unwrap().unwrap();
        assert_eq!(prod_state.resource("prod-aws-demo").unwrap().status, NodeStatus::Failed);
        assert!(!prod_state.history[0].success);
    }

    #[tokio::test]
    async fn test_missing_input_fails_before_any_provider_call() {
        let dir = stack_dir(false);
        let provider = Arc::new(SimulatedProvider::new());

        let err = StackRunner::new(config(), dir.path(), provider.clone())
            .run()
            .await
            .unwrap_err();

        assert!(err.is_plan_time());
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_plan_time_error_in_one_environment_stops_all() {
        let dir = stack_dir(true);
        let mut config = config();
        config.namespaces[0].depends_on = vec![String::from("{env}-missing")];
        let provider = Arc::new(SimulatedProvider::new());

        let err = StackRunner::new(config, dir.path(), provider.clone())
            .run()
            .await
            .unwrap_err();

        assert!(err.is_plan_time());
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_only_environment() {
        let dir = stack_dir(true);
        let provider = Arc::new(SimulatedProvider::new());

        let runner = StackRunner::new(config(), dir.path(), provider.clone())
            .only_environment(Some(String::from("prod")));
        let report = runner.run().await.unwrap();
        assert_eq!(report.environments.len(), 1);
        assert!(provider.calls().iter().all(|name| name.starts_with("prod-")));

        let unknown = StackRunner::new(config(), dir.path(), provider)
            .only_environment(Some(String::from("staging")));
        assert!(unknown.prepare().await.is_err());
    }

    #[tokio::test]
    async fn test_locked_environment_is_reported() {
        let dir = stack_dir(true);
        let store = Arc::new(LocalStateStore::with_base_dir(dir.path().join(".clusterform")));
        store.acquire_lock("test", "someone-else").await.unwrap();
        let provider = Arc::new(SimulatedProvider::new());

        let report = StackRunner::new(config(), dir.path(), provider.clone())
            .with_store(store)
            .run()
            .await
            .unwrap();

        let test = report.environment("test").unwrap();
        assert!(test.result.is_none());
        assert!(test.error.as_deref().unwrap().contains("someone-else"));
        assert!(report.environment("prod").unwrap().success());
        assert!(provider.calls().iter().all(|name| name.starts_with("prod-")));
    }

    #[tokio::test]
    async fn test_bundled_template_applies() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("elb-policy.json"),
            include_str!("../../templates/elb-policy.json"),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("aws-elb-crd.yaml"),
            include_str!("../../templates/aws-elb-crd.yaml"),
        )
        .unwrap();
        let config = ConfigParser::new()
            .parse_yaml(include_str!("../../templates/clusterform.yaml"), None)
            .unwrap();
        let provider = Arc::new(SimulatedProvider::new());

        let report = StackRunner::new(config, dir.path(), provider.clone())
            .run()
            .await
            .unwrap();

        assert!(report.success());
        assert_eq!(provider.calls().len(), 30);
        let exports: Vec<&str> = report
            .environment("prod")
            .unwrap()
            .exports
            .iter()
            .map(|e| e.name.as_str())
            .collect();
        assert_eq!(exports, vec!["prod-kubeconfig", "prod-endpoint"]);
    }

    #[tokio::test]
    async fn test_pinned_network_skips_lookup() {
        let dir = stack_dir(true);
        let mut config = config();
        config.network = Some(crate::config::NetworkConfig {
            vpc_id: String::from("vpc-pinned"),
            subnet_ids: vec![String::from("subnet-1")],
        });
        let provider = Arc::new(SimulatedProvider::new());

        let planned = StackRunner::new(config, dir.path(), provider)
            .prepare()
            .await
            .unwrap();
        let cluster = planned[0].stack.graph.get("test-aws-demo").unwrap();
        assert_eq!(cluster.inputs()["vpc_id"], Value::from("vpc-pinned"));
    }
}
