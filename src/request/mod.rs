//! Request construction: descriptor + function + caller input → a concrete
//! HTTP request. No network I/O happens here.

mod builder;

pub use builder::{RequestBuilder, build_request};

use std::fmt;

use indexmap::IndexMap;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::providers::{HttpMethod, ResponseFormat};

const REDACTED: &str = "[REDACTED]";

/// Caller input for one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallArgs {
    /// Values for `{placeholder}` tokens in paths and parameter templates.
    pub bindings: IndexMap<String, String>,
    /// Query (or body) parameters. These win over every template default.
    pub params: IndexMap<String, String>,
    /// Extra headers. Never replace a header the provider declares.
    pub headers: IndexMap<String, String>,
}

impl CallArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.bindings.insert(name.into(), value.into());
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// A fully resolved request, ready for a transport.
#[derive(Clone)]
pub struct BuiltRequest {
    pub provider: String,
    pub method: HttpMethod,
    pub url: Url,
    pub headers: IndexMap<String, String>,
    /// JSON body for GraphQL and POST functions.
    pub body: Option<serde_json::Value>,
    pub response_format: ResponseFormat,
    /// Kept only to scrub it from logs.
    secret: Option<SecretString>,
}

impl BuiltRequest {
    /// The URL with any credential replaced by a marker, for logging.
    pub fn redacted_url(&self) -> String {
        self.scrub(self.url.as_str())
    }

    /// Headers with any credential replaced by a marker, for logging.
    pub fn redacted_headers(&self) -> IndexMap<String, String> {
        self.headers
            .iter()
            .map(|(k, v)| (k.clone(), self.scrub(v)))
            .collect()
    }

    /// Look up a header case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn scrub(&self, text: &str) -> String {
        let Some(secret) = &self.secret else {
            return text.to_string();
        };
        let raw = secret.expose_secret();
        if raw.is_empty() {
            return text.to_string();
        }
        let path_form = urlencoding::encode(raw);
        let query_form: String = url::form_urlencoded::byte_serialize(raw.as_bytes()).collect();
        text.replace(raw, REDACTED)
            .replace(&*path_form, REDACTED)
            .replace(&query_form, REDACTED)
    }
}

impl fmt::Debug for BuiltRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltRequest")
            .field("provider", &self.provider)
            .field("method", &self.method)
            .field("url", &self.redacted_url())
            .field("headers", &self.redacted_headers())
            .field("body", &self.body)
            .field("response_format", &self.response_format)
            .finish()
    }
}
