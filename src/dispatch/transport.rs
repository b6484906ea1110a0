//! The HTTP seam. The dispatcher only sees [`Transport`]; the default
//! implementation is reqwest.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;

use crate::error::DispatchError;
use crate::providers::HttpMethod;
use crate::request::BuiltRequest;

/// An undecoded response. Any status is `Ok`; the dispatcher classifies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
}

/// Performs one HTTP exchange.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(
        &self,
        request: &BuiltRequest,
        timeout: Duration,
    ) -> Result<RawResponse, DispatchError>;
}

/// reqwest-backed transport (rustls).
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client (proxies, custom roots, ...).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(
        &self,
        request: &BuiltRequest,
        timeout: Duration,
    ) -> Result<RawResponse, DispatchError> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(request.url.clone()),
            HttpMethod::Post => self.client.post(request.url.clone()),
        };
        builder = builder.timeout(timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| map_error(&request.provider, timeout, e))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| map_error(&request.provider, timeout, e))?;

        Ok(RawResponse {
            status,
            content_type,
            body,
        })
    }
}

fn map_error(provider: &str, timeout: Duration, error: reqwest::Error) -> DispatchError {
    if error.is_timeout() {
        DispatchError::Timeout {
            provider: provider.to_string(),
            timeout,
        }
    } else if error.is_builder() {
        DispatchError::RequestFailed {
            provider: provider.to_string(),
            reason: error.to_string(),
        }
    } else if error.is_connect() || error.is_request() || error.is_body() {
        DispatchError::Connection {
            provider: provider.to_string(),
            reason: error.to_string(),
        }
    } else {
        DispatchError::RequestFailed {
            provider: provider.to_string(),
            reason: error.to_string(),
        }
    }
}
