//! Dispatcher: sends a built request with per-attempt timeout and retries
//! transient failures with exponential backoff.

pub mod retry;
pub mod transport;

pub use retry::RetryPolicy;
pub use transport::{RawResponse, ReqwestTransport, Transport};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::providers::ResponseFormat;
use crate::request::BuiltRequest;

/// Longest error body kept in a [`DispatchError::Status`].
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Decoded response body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Json(serde_json::Value),
    Text(String),
}

impl Payload {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Payload::Json(v) => Some(v),
            Payload::Text(_) => None,
        }
    }

    /// Pretty JSON, or the text as is.
    pub fn to_pretty_string(&self) -> String {
        match self {
            Payload::Json(v) => serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string()),
            Payload::Text(t) => t.clone(),
        }
    }
}

/// A successful provider response.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub provider: String,
    pub status: u16,
    pub payload: Payload,
    /// Attempts made, including the successful one.
    pub attempts: u32,
    pub elapsed: Duration,
    pub fetched_at: DateTime<Utc>,
    pub request_id: Uuid,
}

/// Sends requests through a [`Transport`] with retry and timeout.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, config: &DispatchConfig) -> Self {
        Self {
            transport,
            policy: RetryPolicy::from_config(config),
            timeout: config.timeout,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Send `request`, retrying transient failures.
    ///
    /// Dropping the returned future cancels the in-flight attempt.
    pub async fn send(&self, request: &BuiltRequest) -> Result<ProviderResponse, DispatchError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "dispatch",
            %request_id,
            provider = %request.provider,
            method = %request.method,
        );
        self.send_with_retry(request, request_id)
            .instrument(span)
            .await
    }

    async fn send_with_retry(
        &self,
        request: &BuiltRequest,
        request_id: Uuid,
    ) -> Result<ProviderResponse, DispatchError> {
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            tracing::debug!(
                attempt,
                max_attempts = self.policy.max_attempts,
                url = %request.redacted_url(),
                "Sending provider request"
            );

            let result = self.attempt(request).await;
            let err = match result {
                Ok(raw) => {
                    let payload = decode(&request.provider, request.response_format, &raw)?;
                    tracing::info!(
                        attempt,
                        status = raw.status,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Provider request succeeded"
                    );
                    return Ok(ProviderResponse {
                        provider: request.provider.clone(),
                        status: raw.status,
                        payload,
                        attempts: attempt,
                        elapsed: started.elapsed(),
                        fetched_at: Utc::now(),
                        request_id,
                    });
                }
                Err(err) => err,
            };

            if !err.is_transient() {
                tracing::warn!(attempt, error = %err, "Provider request failed, not retrying");
                return Err(err);
            }

            if attempt >= self.policy.max_attempts {
                tracing::warn!(
                    attempt,
                    max_attempts = self.policy.max_attempts,
                    error = %err,
                    "Provider request failed, attempts exhausted"
                );
                return Err(DispatchError::Exhausted {
                    provider: request.provider.clone(),
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.policy.backoff(attempt);
            tracing::warn!(
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Provider request failed, retrying after delay"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// One attempt. Non-2xx statuses come back as errors.
    async fn attempt(&self, request: &BuiltRequest) -> Result<RawResponse, DispatchError> {
        let raw = tokio::time::timeout(self.timeout, self.transport.execute(request, self.timeout))
            .await
            .map_err(|_| DispatchError::Timeout {
                provider: request.provider.clone(),
                timeout: self.timeout,
            })??;

        if (200..300).contains(&raw.status) {
            Ok(raw)
        } else {
            Err(DispatchError::Status {
                provider: request.provider.clone(),
                status: raw.status,
                body: raw.body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            })
        }
    }
}

fn decode(
    provider: &str,
    format: ResponseFormat,
    raw: &RawResponse,
) -> Result<Payload, DispatchError> {
    let parse_json = || {
        serde_json::from_str(&raw.body)
            .map(Payload::Json)
            .map_err(|e| DispatchError::InvalidResponse {
                provider: provider.to_string(),
                reason: format!("body is not valid JSON: {e}"),
            })
    };

    match format {
        ResponseFormat::Json => parse_json(),
        ResponseFormat::Text => Ok(Payload::Text(raw.body.clone())),
        ResponseFormat::Auto => {
            let declared_json = raw
                .content_type
                .as_deref()
                .is_some_and(|ct| ct.to_ascii_lowercase().contains("json"));
            if declared_json {
                return parse_json();
            }
            let trimmed = raw.body.trim_start();
            if (trimmed.starts_with('{') || trimmed.starts_with('['))
                && let Ok(payload) = parse_json()
            {
                return Ok(payload);
            }
            Ok(Payload::Text(raw.body.clone()))
        }
    }
}
