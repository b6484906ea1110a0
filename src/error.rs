//! Error types for the provider hub.

use std::time::Duration;

/// Top-level error type for a provider call.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Access denied: {0}")]
    Denied(#[from] DeniedError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

impl Error {
    /// The underlying error's message, without the category prefix.
    pub fn reason(&self) -> String {
        match self {
            Error::Config(e) => e.to_string(),
            Error::Lookup(e) => e.to_string(),
            Error::Secret(e) => e.to_string(),
            Error::Template(e) => e.to_string(),
            Error::Denied(e) => e.to_string(),
            Error::Dispatch(e) => e.to_string(),
        }
    }
}

/// Configuration-related errors. All of these are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required field `{field}` in {source_name} (entry {index})")]
    MissingField {
        source_name: String,
        index: usize,
        field: &'static str,
    },

    #[error("Duplicate provider name `{name}` (first seen in {first}, again in {second})")]
    DuplicateProvider {
        name: String,
        first: String,
        second: String,
    },

    #[error("Provider {provider}: {message}")]
    InvalidProvider { provider: String, message: String },

    #[error("Provider {provider}, function {function}: placeholder `{placeholder}` cannot be supplied")]
    UnknownPlaceholder {
        provider: String,
        function: String,
        placeholder: String,
    },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Tier flag `{flag}` decreases from {lower_tier} ({lower}) to {higher_tier} ({higher})")]
    TierNotMonotonic {
        flag: String,
        lower_tier: String,
        lower: i64,
        higher_tier: String,
        higher: i64,
    },

    #[error("Missing tier profile: {0}")]
    MissingTier(String),

    #[error("Failed to parse {source_name}: {reason}")]
    ParseError { source_name: String, reason: String },

    #[error("Failed to read {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub(crate) fn read_file(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::ReadFile {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Unknown names requested by a caller.
#[derive(Debug, thiserror::Error)]
pub enum LookupError {
    #[error("Provider {name} not found")]
    ProviderNotFound { name: String },

    #[error("Function {function} not found on provider {provider}")]
    FunctionNotFound { provider: String, function: String },

    #[error("Unknown tier: {name}")]
    UnknownTier { name: String },

    #[error("Unknown category: {name}")]
    UnknownCategory { name: String },
}

/// Credential resolution errors. Surfaced to the caller, never retried.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("Secret `{id}` required by provider {provider} is not in the secret store")]
    Missing { provider: String, id: String },

    #[error("Failed to read secret store {path}: {reason}")]
    StoreUnreadable { path: String, reason: String },
}

/// Placeholder substitution errors.
#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("Unresolved placeholder `{{{placeholder}}}` in `{template}` for provider {provider}")]
    Unresolved {
        provider: String,
        template: String,
        placeholder: String,
    },

    #[error("Required parameter `{param}` was not supplied for {provider}.{function}")]
    MissingParameter {
        provider: String,
        function: String,
        param: String,
    },

    #[error("Malformed template `{template}`: {reason}")]
    Malformed { template: String, reason: String },

    #[error("Built URL for provider {provider} is invalid: {reason}")]
    InvalidUrl { provider: String, reason: String },
}

/// Tier gate denials. Shown to the end user as an upgrade prompt.
#[derive(Debug, thiserror::Error)]
pub enum DeniedError {
    #[error("{capability} is not enabled for the {tier} tier. Please upgrade your plan.")]
    CapabilityDisabled { tier: String, capability: String },

    #[error("Parameter `{param}` for {capability} must be an integer, got `{value}`")]
    NonNumericQuota {
        capability: String,
        param: String,
        value: String,
    },
}

/// Transport and response failures.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Provider {provider} returned HTTP {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Connection to provider {provider} failed: {reason}")]
    Connection { provider: String, reason: String },

    #[error("Request to provider {provider} failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Provider {provider} failed after {attempts} attempts: {last}")]
    Exhausted {
        provider: String,
        attempts: u32,
        last: Box<DispatchError>,
    },

    #[error("All providers failed: {}", summarize(.failures))]
    AllProvidersFailed { failures: Vec<(String, String)> },

    #[error("No providers configured for category {category}")]
    NoProvidersAvailable { category: String },
}

fn summarize(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(provider, reason)| format!("{provider}: {reason}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl DispatchError {
    /// Whether the failure is worth another attempt against the same provider.
    ///
    /// Timeouts, connection failures, 5xx and 429 are transient. Other 4xx
    /// responses are caller or configuration faults and surface immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Connection { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::RequestFailed { .. }
            | Self::InvalidResponse { .. }
            | Self::Exhausted { .. }
            | Self::AllProvidersFailed { .. }
            | Self::NoProvidersAvailable { .. } => false,
        }
    }

    /// HTTP status of the failure, looking through retry exhaustion.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Exhausted { last, .. } => last.status(),
            _ => None,
        }
    }
}

/// Result type alias for the provider hub.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: u16) -> DispatchError {
        DispatchError::Status {
            provider: "CoinGecko".to_string(),
            status: code,
            body: String::new(),
        }
    }

    #[test]
    fn server_errors_are_transient() {
        assert!(status(500).is_transient());
        assert!(status(503).is_transient());
        assert!(status(429).is_transient());
    }

    #[test]
    fn client_errors_are_not_transient() {
        assert!(!status(400).is_transient());
        assert!(!status(401).is_transient());
        assert!(!status(404).is_transient());
    }

    #[test]
    fn timeouts_and_resets_are_transient() {
        let timeout = DispatchError::Timeout {
            provider: "NewsAPI".to_string(),
            timeout: Duration::from_secs(10),
        };
        let reset = DispatchError::Connection {
            provider: "NewsAPI".to_string(),
            reason: "connection reset by peer".to_string(),
        };
        assert!(timeout.is_transient());
        assert!(reset.is_transient());
    }

    #[test]
    fn exhausted_exposes_last_status() {
        let err = DispatchError::Exhausted {
            provider: "CoinGecko".to_string(),
            attempts: 3,
            last: Box::new(status(502)),
        };
        assert!(!err.is_transient());
        assert_eq!(err.status(), Some(502));
    }

    #[test]
    fn all_providers_failed_lists_each_failure() {
        let err = DispatchError::AllProvidersFailed {
            failures: vec![
                ("TMDb".to_string(), "HTTP 500".to_string()),
                ("Jikan".to_string(), "timed out".to_string()),
            ],
        };
        assert_eq!(
            err.to_string(),
            "All providers failed: TMDb: HTTP 500; Jikan: timed out"
        );
    }

    #[test]
    fn reason_drops_category_prefix() {
        let err = Error::from(status(500));
        assert_eq!(err.to_string(), "Dispatch error: Provider CoinGecko returned HTTP 500: ");
        assert_eq!(err.reason(), "Provider CoinGecko returned HTTP 500: ");
    }

    #[test]
    fn read_file_error_names_the_path() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "not found");
        let err = ConfigError::read_file(std::path::Path::new("data/news_apis.yaml"), io);
        assert_eq!(err.to_string(), "Failed to read data/news_apis.yaml: not found");
    }

    #[test]
    fn denied_message_prompts_upgrade() {
        let err = DeniedError::CapabilityDisabled {
            tier: "free".to_string(),
            capability: "document summarization".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "document summarization is not enabled for the free tier. Please upgrade your plan."
        );
    }
}
