//! S3-based state storage backend.
//!
//! Keys: `<prefix>/<environment>/state.json` and
//! `<prefix>/<environment>/state.lock`.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use crate::error::{ClusterformError, Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LockInfo, holder_or_generated};
use super::store::{StateStore, decode_lock, decode_state, encode_state};
use super::types::StackState;

/// State object name.
const STATE_KEY: &str = "state.json";

/// Lock object name.
const LOCK_KEY: &str = "state.lock";

/// S3-based state store.
#[derive(Debug)]
pub struct S3StateStore {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3StateStore {
    /// Creates a store using the AWS configuration from the environment.
    pub async fn new(bucket: &str, prefix: Option<&str>, region: Option<&str>) -> Self {
        let config = if let Some(region) = region {
            aws_config::from_env()
                .region(aws_config::Region::new(region.to_string()))
                .load()
                .await
        } else {
            aws_config::load_from_env().await
        };

        Self::with_client(Client::new(&config), bucket, prefix)
    }

    /// Creates a store with an existing client.
    #[must_use]
    pub fn with_client(client: Client, bucket: &str, prefix: Option<&str>) -> Self {
        let prefix = prefix
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .map(|p| format!("{p}/"))
            .unwrap_or_default();

        Self {
            client,
            bucket: bucket.to_string(),
            prefix,
        }
    }

    fn key(&self, environment: &str, file: &str) -> String {
        format!("{}{environment}/{file}", self.prefix)
    }

    async fn get_object(&self, key: &str) -> Result<Option<String>> {
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(response) => {
                let bytes = response.body.collect().await.map_err(|e| {
                    ClusterformError::State(StateError::s3(format!(
                        "Failed to read S3 object: {e}"
                    )))
                })?;

                let content = String::from_utf8(bytes.to_vec()).map_err(|e| {
                    ClusterformError::State(StateError::Corrupted {
                        message: format!("Invalid UTF-8 in S3 object: {e}"),
                    })
                })?;
                Ok(Some(content))
            }
            Err(sdk_err) => {
                let service_err = sdk_err.into_service_error();
                if service_err.is_no_such_key() {
                    Ok(None)
                } else {
                    Err(ClusterformError::State(StateError::s3(format!(
                        "S3 get error: {service_err}"
                    ))))
                }
            }
        }
    }

    async fn put_object(&self, key: &str, content: String) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(content.into_bytes().into())
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| ClusterformError::State(StateError::s3(format!("S3 put error: {e}"))))?;
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                ClusterformError::State(StateError::s3(format!("S3 delete error: {e}")))
            })?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for S3StateStore {
    async fn load(&self, environment: &str) -> Result<Option<StackState>> {
        let key = self.key(environment, STATE_KEY);
        debug!("Loading state from s3://{}/{key}", self.bucket);

        match self.get_object(&key).await? {
            Some(json) => decode_state(&json).map(Some),
            None => {
                debug!("No state found in S3 for '{environment}'");
                Ok(None)
            }
        }
    }

    async fn save(&self, state: &StackState) -> Result<()> {
        let key = self.key(&state.environment, STATE_KEY);
        info!("Saving state to s3://{}/{key}", self.bucket);

        self.put_object(&key, encode_state(state)?).await
    }

    async fn acquire_lock(&self, environment: &str, holder: &str) -> Result<LockInfo> {
        if let Some(existing) = self.get_lock_info(environment).await? {
            if !existing.is_expired() {
                return Err(ClusterformError::State(StateError::LockedByOther {
                    holder: existing.holder,
                    since: existing.acquired_at.to_rfc3339(),
                }));
            }
            debug!("Expired lock found for '{environment}', taking over");
        }

        let lock_info = LockInfo::new(environment, &holder_or_generated(holder));
        let content = serde_json::to_string_pretty(&lock_info).map_err(|e| {
            ClusterformError::State(StateError::serialization(format!(
                "Failed to serialize lock: {e}"
            )))
        })?;
        self.put_object(&self.key(environment, LOCK_KEY), content)
            .await?;

        info!(
            "Acquired state lock for '{environment}': {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );
        Ok(lock_info)
    }

    async fn release_lock(&self, environment: &str, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.get_lock_info(environment).await? {
            if existing.lock_id == lock_id {
                self.delete_object(&self.key(environment, LOCK_KEY)).await?;
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
        match self.get_object(&self.key(environment, LOCK_KEY)).await? {
            Some(content) => decode_lock(&content).map(Some),
            None => Ok(None),
        }
    }

    fn backend_type(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::config::{BehaviorVersion, Region};

    fn offline_client() -> Client {
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .build();
        Client::from_conf(config)
    }

    #[test]
    fn test_keys_are_scoped_per_environment() {
        let store = S3StateStore::with_client(offline_client(), "bucket", Some("/stacks/demo/"));
        assert_eq!(store.key("test", STATE_KEY), "stacks/demo/test/state.json");
        assert_eq!(store.key("prod", LOCK_KEY), "stacks/demo/prod/state.lock");
    }

    #[test]
    fn test_empty_prefix() {
        let store = S3StateStore::with_client(offline_client(), "bucket", Some("/"));
        assert_eq!(store.key("test", STATE_KEY), "test/state.json");
        assert_eq!(store.backend_type(), "s3");
    }
}
