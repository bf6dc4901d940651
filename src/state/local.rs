//! Local file-based state storage backend.
//!
//! Layout: `<base_dir>/<environment>/state.json` with a sibling
//! `state.lock`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{ClusterformError, Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo, holder_or_generated};
use super::store::{StateStore, decode_lock, decode_state, encode_state};
use super::types::StackState;

/// State file name.
const STATE_FILE: &str = "state.json";

/// Lock file name.
const LOCK_FILE: &str = "state.lock";

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    base_dir: PathBuf,
}

impl LocalStateStore {
    /// Creates a store rooted at `base_dir`.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Directory holding one environment's files.
    #[must_use]
    pub fn environment_dir(&self, environment: &str) -> PathBuf {
        self.base_dir.join(environment)
    }

    fn state_path(&self, environment: &str) -> PathBuf {
        self.environment_dir(environment).join(STATE_FILE)
    }

    fn lock_path(&self, environment: &str) -> PathBuf {
        self.environment_dir(environment).join(LOCK_FILE)
    }

    async fn ensure_dir(dir: &Path) -> Result<()> {
        if !dir.exists() {
            debug!("Creating state directory: {}", dir.display());
            fs::create_dir_all(dir).await.map_err(|e| {
                ClusterformError::State(StateError::local(format!(
                    "Failed to create state directory: {e}"
                )))
            })?;
        }
        Ok(())
    }

    async fn read_lock_file(&self, environment: &str) -> Result<Option<LockInfo>> {
        let path = self.lock_path(environment);
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await.map_err(|e| {
            ClusterformError::State(StateError::Corrupted {
                message: format!("Failed to read lock file: {e}"),
            })
        })?;
        decode_lock(&content).map(Some)
    }

    async fn delete_lock_file(&self, environment: &str) -> Result<()> {
        let path = self.lock_path(environment);
        if path.exists() {
            fs::remove_file(&path).await.map_err(|e| {
                ClusterformError::State(StateError::LockFailed {
                    message: format!("Failed to delete lock file: {e}"),
                })
            })?;
        }
        Ok(())
    }
}

/// Writes `content` to `path` through a temporary file and a rename.
async fn write_atomic(path: &Path, content: &str) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    let io_err = |what: &str, e: std::io::Error| {
        ClusterformError::State(StateError::local(format!("Failed to {what}: {e}")))
    };

    let mut file = fs::File::create(&temp_path)
        .await
        .map_err(|e| io_err("create temp state file", e))?;
    file.write_all(content.as_bytes())
        .await
        .map_err(|e| io_err("write state file", e))?;
    file.sync_all()
        .await
        .map_err(|e| io_err("sync state file", e))?;

    fs::rename(&temp_path, path)
        .await
        .map_err(|e| io_err("rename state file", e))
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn load(&self, environment: &str) -> Result<Option<StackState>> {
        let path = self.state_path(environment);
        if !path.exists() {
            debug!("State file does not exist: {}", path.display());
            return Ok(None);
        }

        debug!("Loading state from: {}", path.display());
        let content = fs::read_to_string(&path).await.map_err(|e| {
            ClusterformError::State(StateError::Corrupted {
                message: format!("Failed to read state file: {e}"),
            })
        })?;
        decode_state(&content).map(Some)
    }

    async fn save(&self, state: &StackState) -> Result<()> {
        Self::ensure_dir(&self.environment_dir(&state.environment)).await?;
        let path = self.state_path(&state.environment);
        info!("Saving state to: {}", path.display());

        write_atomic(&path, &encode_state(state)?).await
    }

    async fn acquire_lock(&self, environment: &str, holder: &str) -> Result<LockInfo> {
        if let Some(existing) = self.read_lock_file(environment).await? {
            if !existing.is_expired() {
                return Err(ClusterformError::State(StateError::LockedByOther {
                    holder: existing.holder,
                    since: existing.acquired_at.to_rfc3339(),
                }));
            }
            debug!("Expired lock found for '{environment}', taking over");
            self.delete_lock_file(environment).await?;
        }

        Self::ensure_dir(&self.environment_dir(environment)).await?;
        let lock_info = LockInfo::new(environment, &holder_or_generated(holder));
        let content = serde_json::to_string_pretty(&lock_info).map_err(|e| {
            ClusterformError::State(StateError::serialization(format!(
                "Failed to serialize lock: {e}"
            )))
        })?;

        // Fails if another process created the lock in the meantime.
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.lock_path(environment))
            .await
            .map_err(|e| {
                ClusterformError::State(StateError::LockFailed {
                    message: format!("Failed to create lock file: {e}"),
                })
            })?;
        file.write_all(content.as_bytes()).await.map_err(|e| {
            ClusterformError::State(StateError::LockFailed {
                message: format!("Failed to write lock file: {e}"),
            })
        })?;

        info!(
            "Acquired state lock for '{environment}': {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );
        Ok(lock_info)
    }

    async fn release_lock(&self, environment: &str, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file(environment).await? {
            if existing.lock_id == lock_id {
                self.delete_lock_file(environment).await?;
                info!("Released state lock for '{environment}': {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }
        Ok(())
    }

    async fn get_lock_info(&self, environment: &str) -> Result<Option<LockInfo>> {
        self.read_lock_file(environment).await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}
