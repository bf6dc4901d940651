//! Provider boundary.
//!
//! A provider performs the real create/read/update work for a resource. The
//! graph evaluator never interprets resource semantics itself: it resolves
//! inputs, hands them to [`ResourceProvider::apply`] and records the outputs.

mod http;
mod simulated;

pub use http::HttpProvider;
pub use simulated::SimulatedProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::graph::{Inputs, Outputs, ResourceKind};

/// Network placement shared by every environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkContext {
    /// Identifier of the virtual network.
    pub vpc_id: String,
    /// Subnets the cluster is placed in.
    pub subnet_ids: Vec<String>,
}

/// External capability that applies resources.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Short provider name for logs.
    fn name(&self) -> &str;

    /// Looks up the default network the clusters are placed in.
    async fn lookup_network(&self) -> Result<NetworkContext, ProviderError>;

    /// Creates or updates a resource and returns its outputs.
    async fn apply(
        &self,
        kind: ResourceKind,
        name: &str,
        inputs: &Inputs,
    ) -> Result<Outputs, ProviderError>;
}
