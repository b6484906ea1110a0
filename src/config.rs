//! Configuration types.
//!
//! App-wide settings and the tier table come from `config.yml`; dispatch
//! tuning comes from environment variables.

use std::path::Path;
use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::tiers::{FlagValue, TierTable};

/// Application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_app_name")]
    pub name: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            name: default_app_name(),
        }
    }
}

fn default_app_name() -> String {
    "Unified AI Assistant".to_string()
}

/// LLM settings. Carried for callers that summarize provider output.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: String,
    pub model: String,
    pub temperature: f32,
    /// Character budget of text handed to the summarizer.
    pub max_summary_input_chars: usize,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            temperature: 0.7,
            max_summary_input_chars: 10_000,
        }
    }
}

/// Retrieval settings for uploaded documents.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RagSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embedding_mode: String,
    pub embedding_model: String,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 100,
            embedding_mode: "local".to_string(),
            embedding_model: "all-MiniLM-L6-v2".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebScrapingSettings {
    pub timeout_seconds: u64,
}

impl Default for WebScrapingSettings {
    fn default() -> Self {
        Self { timeout_seconds: 10 }
    }
}

#[derive(Debug, Deserialize)]
struct RawAppConfig {
    #[serde(default)]
    app: AppSettings,
    #[serde(default)]
    llm: LlmSettings,
    #[serde(default)]
    rag: RagSettings,
    #[serde(default)]
    web_scraping: WebScrapingSettings,
    #[serde(default)]
    tiers: Option<IndexMap<String, IndexMap<String, FlagValue>>>,
}

/// Contents of `config.yml`. Loaded once at startup and shared by `Arc`.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app: AppSettings,
    pub llm: LlmSettings,
    pub rag: RagSettings,
    pub web_scraping: WebScrapingSettings,
    pub tiers: TierTable,
}

impl AppConfig {
    /// Load from a file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        let source_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("config.yml");
        Self::parse_named(source_name, &content)
    }

    /// Parse `config.yml` content.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Self::parse_named("config.yml", content)
    }

    fn parse_named(source_name: &str, content: &str) -> Result<Self, ConfigError> {
        let raw: RawAppConfig =
            serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
                source_name: source_name.to_string(),
                reason: e.to_string(),
            })?;

        let tiers = raw.tiers.ok_or_else(|| ConfigError::InvalidValue {
            key: "tiers".to_string(),
            message: "section is required".to_string(),
        })?;
        let tiers = TierTable::from_raw(tiers)?;

        let config = Self {
            app: raw.app,
            llm: raw.llm,
            rag: raw.rag,
            web_scraping: raw.web_scraping,
            tiers,
        };
        config.validate()?;

        tracing::info!(
            app = %config.app.name,
            llm_provider = %config.llm.provider,
            llm_model = %config.llm.model,
            "Loaded app config"
        );
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::InvalidValue {
                key: "llm.temperature".to_string(),
                message: format!("must be between 0 and 2, got {}", self.llm.temperature),
            });
        }
        if self.rag.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "rag.chunk_size".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if self.rag.chunk_overlap >= self.rag.chunk_size {
            return Err(ConfigError::InvalidValue {
                key: "rag.chunk_overlap".to_string(),
                message: format!(
                    "must be smaller than chunk_size ({})",
                    self.rag.chunk_size
                ),
            });
        }
        if self.web_scraping.timeout_seconds == 0 {
            return Err(ConfigError::InvalidValue {
                key: "web_scraping.timeout_seconds".to_string(),
                message: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Per-attempt timeout for outbound provider calls.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.web_scraping.timeout_seconds)
    }
}

/// Dispatcher tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Attempts per call, including the first.
    pub max_attempts: u32,
    /// Wait before the first retry; doubles on each further retry.
    pub base_backoff: Duration,
    /// Upper bound for a single wait.
    pub max_backoff: Duration,
    /// Add up to 25% random jitter to each wait.
    pub jitter: bool,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            jitter: true,
            timeout: Duration::from_secs(10),
        }
    }
}

impl DispatchConfig {
    /// Build from `PROVIDER_HUB_*` environment variables. Unset or
    /// unparseable values fall back to the defaults.
    pub fn from_env() -> Self {
        Self::from_env_with_defaults(Self::default())
    }

    /// Like [`from_env`](Self::from_env), but unset variables fall back to
    /// `defaults` instead of the built-in values.
    pub fn from_env_with_defaults(defaults: Self) -> Self {
        Self::from_lookup_with_defaults(defaults, |key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self::from_lookup_with_defaults(Self::default(), lookup)
    }

    pub fn from_lookup_with_defaults(
        defaults: Self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let parse_u64 = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        let max_attempts = lookup("PROVIDER_HUB_MAX_ATTEMPTS")
            .and_then(|s| s.trim().parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(defaults.max_attempts);

        let base_backoff = parse_u64("PROVIDER_HUB_BACKOFF_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.base_backoff);

        let max_backoff = parse_u64("PROVIDER_HUB_MAX_BACKOFF_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.max_backoff)
            .max(base_backoff);

        let jitter = lookup("PROVIDER_HUB_JITTER")
            .map(|s| !matches!(s.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
            .unwrap_or(defaults.jitter);

        let timeout = parse_u64("PROVIDER_HUB_TIMEOUT_SECS")
            .filter(|n| *n > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.timeout);

        Self {
            max_attempts,
            base_backoff,
            max_backoff,
            jitter,
            timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
