//! HTTP provider client.
//!
//! Talks to a provisioning service over JSON. Each resource is applied with
//! `POST <endpoint>/v1/resources/<kind>` and the shared network lookup is
//! `GET <endpoint>/v1/network/default`. Transient failures are retried here,
//! never in the execution engine.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode, header};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, trace};

use crate::error::ProviderError;
use crate::graph::{Inputs, Outputs, ResourceKind};

use super::{NetworkContext, ResourceProvider};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum number of attempts for transient failures.
const MAX_RETRIES: u32 = 3;

/// Base delay between retries in milliseconds.
const RETRY_DELAY_MS: u64 = 1000;

/// Provider backed by a remote provisioning service.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    /// HTTP client.
    client: Client,
    /// Service base URL, without trailing slash.
    endpoint: String,
    /// Bearer token.
    token: String,
    /// Attempts per request.
    max_retries: u32,
    /// Base backoff delay.
    retry_delay: Duration,
}

#[derive(Debug, Serialize)]
struct ApplyRequest<'a> {
    kind: ResourceKind,
    name: &'a str,
    inputs: &'a Inputs,
}

#[derive(Debug, Deserialize)]
struct ApplyResponse {
    #[serde(default)]
    outputs: Outputs,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(alias = "error")]
    message: String,
}

impl HttpProvider {
    /// Creates a client for `endpoint` authenticated with `token`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(endpoint: &str, token: &str) -> Result<Self, ProviderError> {
        Self::with_timeout(endpoint, token, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(
        endpoint: &str,
        token: &str,
        timeout_secs: u64,
    ) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ProviderError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.to_string(),
            max_retries: MAX_RETRIES,
            retry_delay: Duration::from_millis(RETRY_DELAY_MS),
        })
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = if max_retries == 0 { 1 } else { max_retries };
        self.retry_delay = retry_delay;
        self
    }

    /// Sends a request, retrying transient failures with linear backoff.
    async fn execute<T, F>(&self, build: F) -> Result<T, ProviderError>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let mut last_error = None;

        for attempt in 0..self.max_retries {
            if attempt > 0 {
                let delay = last_error
                    .as_ref()
                    .map_or(self.retry_delay, |e| self.backoff(e, attempt));
                debug!("Retry attempt {attempt} of {} in {delay:?}", self.max_retries);
                tokio::time::sleep(delay).await;
            }

            match self.execute_once(build()).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() => last_error = Some(e),
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::network("Max retries exceeded")))
    }

    /// Rate limits wait as long as the service asks; everything else backs off linearly.
    fn backoff(&self, error: &ProviderError, attempt: u32) -> Duration {
        match error {
            ProviderError::RateLimited { .. } => error
                .retry_delay_secs()
                .map_or(self.retry_delay, Duration::from_secs),
            _ => self.retry_delay * attempt,
        }
    }

    /// Executes a single request.
    async fn execute_once<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, ProviderError> {
        let response = request
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .send()
            .await
            .map_err(|e| ProviderError::network(format!("Request failed: {e}")))?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            return Err(ProviderError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(ProviderError::AuthenticationFailed {
                message: String::from("Invalid provider token"),
            });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body).map_or(body, |b| b.message);
            return Err(ProviderError::api_error(status.as_u16(), message));
        }

        response.json().await.map_err(|e| ProviderError::InvalidResponse {
            message: format!("Failed to parse response: {e}"),
        })
    }
}

#[async_trait]
impl ResourceProvider for HttpProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn lookup_network(&self) -> Result<NetworkContext, ProviderError> {
        let url = format!("{}/v1/network/default", self.endpoint);
        trace!("GET {url}");
        let network: NetworkContext = self.execute(|| self.client.get(&url)).await?;
        debug!(
            "Default network {} with {} subnets",
            network.vpc_id,
            network.subnet_ids.len()
        );
        Ok(network)
    }

    async fn apply(
        &self,
        kind: ResourceKind,
        name: &str,
        inputs: &Inputs,
    ) -> Result<Outputs, ProviderError> {
        let url = format!("{}/v1/resources/{kind}", self.endpoint);
        let body = ApplyRequest { kind, name, inputs };
        info!("Applying {kind} '{name}'");

        let result = self
            .execute::<ApplyResponse, _>(|| {
                self.client
                    .post(&url)
                    .header(header::CONTENT_TYPE, "application/json")
                    .json(&body)
            })
            .await;

        match result {
            Ok(response) => Ok(response.outputs),
            Err(ProviderError::ApiRequestFailed { status, message })
                if status == StatusCode::CONFLICT.as_u16()
                    || status == StatusCode::UNPROCESSABLE_ENTITY.as_u16() =>
            {
                Err(ProviderError::Rejected {
                    kind: kind.to_string(),
                    name: name.to_string(),
                    reason: message,
                })
            }
            Err(e) => Err(e),
        }
    }
}
