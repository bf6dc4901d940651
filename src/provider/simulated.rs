//! In-process provider.
//!
//! Produces deterministic outputs per resource kind without touching any
//! real infrastructure. Used for `--simulate` runs and throughout the tests,
//! where failures can be injected by resource name.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::info;

use crate::error::ProviderError;
use crate::graph::{Inputs, Outputs, ResourceKind, Value};

use super::{NetworkContext, ResourceProvider};

/// Account identifier used in generated ARNs.
const ACCOUNT_ID: &str = "000000000000";

/// Deterministic provider for dry runs and tests.
#[derive(Debug, Default)]
pub struct SimulatedProvider {
    /// Names that fail with the given message.
    failures: HashMap<String, String>,
    /// Artificial latency per apply call.
    latency: Option<Duration>,
    /// Applied resource names, in call order.
    calls: Mutex<Vec<String>>,
    /// Calls currently in flight.
    in_flight: AtomicUsize,
    /// Highest number of concurrent calls observed.
    max_in_flight: AtomicUsize,
}

impl SimulatedProvider {
    /// Creates a provider that succeeds for every resource.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every apply of `name` fail with `message`.
    #[must_use]
    pub fn fail_on(mut self, name: impl Into<String>, message: impl Into<String>) -> Self {
        self.failures.insert(name.into(), message.into());
        self
    }

    /// Adds latency to every apply call.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Names passed to `apply`, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Highest number of concurrent apply calls seen so far.
    #[must_use]
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, name: &str) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(name.to_string());
        }
    }
}

#[async_trait]
impl ResourceProvider for SimulatedProvider {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn lookup_network(&self) -> Result<NetworkContext, ProviderError> {
        Ok(NetworkContext {
            vpc_id: String::from("vpc-0simulated"),
            subnet_ids: vec![
                String::from("subnet-0simulated-a"),
                String::from("subnet-0simulated-b"),
            ],
        })
    }

    async fn apply(
        &self,
        kind: ResourceKind,
        name: &str,
        inputs: &Inputs,
    ) -> Result<Outputs, ProviderError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.record(name);
        info!("Simulating {kind} '{name}'");

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(message) = self.failures.get(name) {
            return Err(ProviderError::Injected {
                name: name.to_string(),
                message: message.clone(),
            });
        }

        Ok(simulated_outputs(kind, name, inputs))
    }
}

/// Outputs a real provider would return for `kind`.
fn simulated_outputs(kind: ResourceKind, name: &str, inputs: &Inputs) -> Outputs {
    let mut outputs = Outputs::new();
    let mut put = |key: &str, value: Value| {
        outputs.insert(key.to_string(), value);
    };

    match kind {
        ResourceKind::Role => {
            put("name", Value::from(name));
            put("arn", Value::from(format!("arn:aws:iam::{ACCOUNT_ID}:role/{name}")));
        }
        ResourceKind::Policy => {
            put("name", Value::from(name));
            put("arn", Value::from(format!("arn:aws:iam::{ACCOUNT_ID}:policy/{name}")));
        }
        ResourceKind::PolicyAttachment => {
            put("id", Value::from(format!("{name}-attachment")));
        }
        ResourceKind::InstanceProfile => {
            put("name", Value::from(name));
            put(
                "arn",
                Value::from(format!("arn:aws:iam::{ACCOUNT_ID}:instance-profile/{name}")),
            );
        }
        ResourceKind::Cluster => {
            let endpoint = format!("https://{name}.eks.simulated.local");
            put("name", Value::from(name));
            put("endpoint", Value::from(endpoint.clone()));
            put(
                "core",
                Value::map([(
                    "oidc_provider_arn",
                    Value::from(format!(
                        "arn:aws:iam::{ACCOUNT_ID}:oidc-provider/oidc.{name}.simulated.local"
                    )),
                )]),
            );
            put(
                "kubeconfig",
                Value::map([
                    ("api_version", Value::from("v1")),
                    ("cluster", Value::from(name)),
                    ("server", Value::from(endpoint)),
                ]),
            );
        }
        ResourceKind::NodeGroup => {
            put("name", Value::from(name));
            put("status", Value::from("ACTIVE"));
        }
        ResourceKind::Namespace | ResourceKind::ServiceAccount => {
            let metadata_name = inputs
                .get("metadata")
                .and_then(|m| m.get("name"))
                .and_then(Value::as_str)
                .unwrap_or(name);
            put("name", Value::from(metadata_name));
        }
        ResourceKind::ChartInstall => {
            put("name", Value::from(name));
            put("status", Value::from("deployed"));
            put("revision", Value::from(1_i64));
        }
        ResourceKind::ConfigFile => {
            put("name", Value::from(name));
            put("applied", Value::from(true));
        }
    }

    outputs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cluster_outputs() {
        let provider = SimulatedProvider::new();
        let outputs = provider
            .apply(ResourceKind::Cluster, "test-aws-demo", &Inputs::new())
            .await
            .unwrap();

        assert_eq!(outputs["name"], Value::from("test-aws-demo"));
        assert!(outputs["kubeconfig"].get("server").is_some());
        assert!(outputs["core"].get("oidc_provider_arn").is_some());
    }

    #[tokio::test]
    async fn test_namespace_uses_metadata_name() {
        let mut inputs = Inputs::new();
        inputs.insert(
            String::from("metadata"),
            Value::map([("name", Value::from("argocd"))]),
        );

        let outputs = SimulatedProvider::new()
            .apply(ResourceKind::Namespace, "test-argocd-ns", &inputs)
            .await
            .unwrap();
        assert_eq!(outputs["name"], Value::from("argocd"));
    }

    #[tokio::test]
    async fn test_injected_failure_and_call_log() {
        let provider = SimulatedProvider::new().fail_on("b", "quota exceeded");

        provider
            .apply(ResourceKind::Role, "a", &Inputs::new())
            .await
            .unwrap();
        let err = provider
            .apply(ResourceKind::Role, "b", &Inputs::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::Injected { ref name, .. } if name == "b"));
        assert_eq!(provider.calls(), vec!["a", "b"]);
        assert_eq!(provider.max_in_flight(), 1);
    }
}
