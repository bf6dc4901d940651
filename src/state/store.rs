//! State store trait definition.
//!
//! Every backend keeps one state document and one lock per environment.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::config::{StateBackend, StateConfig};
use crate::error::{ClusterformError, ConfigError, Result, StateError};

use super::lock::LockInfo;
use super::local::LocalStateStore;
use super::s3::S3StateStore;
use super::types::{STATE_VERSION, StackState};

/// Default local state directory, relative to the stack file.
pub const STATE_DIR: &str = ".clusterform";

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Loads the state of an environment.
    ///
    /// Returns `None` if no state exists yet.
    async fn load(&self, environment: &str) -> Result<Option<StackState>>;

    /// Saves the state of the environment named in `state`.
    async fn save(&self, state: &StackState) -> Result<()>;

    /// Acquires the lock of an environment.
    async fn acquire_lock(&self, environment: &str, holder: &str) -> Result<LockInfo>;

    /// Releases the lock of an environment if `lock_id` still holds it.
    async fn release_lock(&self, environment: &str, lock_id: &str) -> Result<()>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self, environment: &str) -> Result<Option<LockInfo>>;

    /// Checks if the environment is locked.
    async fn is_locked(&self, environment: &str) -> Result<bool> {
        Ok(self
            .get_lock_info(environment)
            .await?
            .is_some_and(|lock| !lock.is_expired()))
    }

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

/// Opens the backend selected by the `state` section.
///
/// A relative local path is resolved against `base_dir`.
///
/// # Errors
///
/// Returns an error if the S3 bucket is missing.
pub async fn open_store(config: &StateConfig, base_dir: &Path) -> Result<Arc<dyn StateStore>> {
    match config.backend {
        StateBackend::Local => {
            let dir = config
                .path
                .as_ref()
                .map_or_else(|| base_dir.join(STATE_DIR), |p| base_dir.join(p));
            Ok(Arc::new(LocalStateStore::with_base_dir(dir)))
        }
        StateBackend::S3 => {
            let bucket = config.bucket.as_deref().ok_or_else(|| {
                ConfigError::validation("S3 bucket not configured", "state.bucket")
            })?;
            let store =
                S3StateStore::new(bucket, config.prefix.as_deref(), config.region.as_deref()).await;
            Ok(Arc::new(store))
        }
    }
}

/// Parses a stored state document and checks its version.
pub(crate) fn decode_state(content: &str) -> Result<StackState> {
    let state: StackState = serde_json::from_str(content).map_err(|e| {
        ClusterformError::State(StateError::Corrupted {
            message: format!("Failed to parse state: {e}"),
        })
    })?;

    if state.version != STATE_VERSION {
        return Err(ClusterformError::State(StateError::VersionMismatch {
            expected: STATE_VERSION.to_string(),
            found: state.version,
        }));
    }
    Ok(state)
}

/// Serializes a state document.
pub(crate) fn encode_state(state: &StackState) -> Result<String> {
    serde_json::to_string_pretty(state).map_err(|e| {
        ClusterformError::State(StateError::serialization(format!(
            "Failed to serialize state: {e}"
        )))
    })
}

/// Parses a stored lock document.
pub(crate) fn decode_lock(content: &str) -> Result<LockInfo> {
    serde_json::from_str(content).map_err(|e| {
        ClusterformError::State(StateError::Corrupted {
            message: format!("Failed to parse lock: {e}"),
        })
    })
}
