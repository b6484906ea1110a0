//! Declarative provider descriptors and the registry that holds them.
//!
//! A provider is a third-party API described in YAML: a base endpoint, an
//! optional credential slot, static headers, default query parameters and a
//! set of named functions (relative path + parameter template).

mod descriptor;
pub mod registry;

pub use descriptor::parse_document;
pub use registry::{ConfigSource, ProviderRegistry};

use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::LookupError;

/// Query parameter used for free-text search when a provider declares none.
pub const DEFAULT_QUERY_PARAM: &str = "q";

/// GraphQL variable carrying the query text in a category search.
pub const SEARCH_VARIABLE: &str = "search";

/// Domain a provider belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Finance,
    Crypto,
    CurrencyExchange,
    News,
    Weather,
    Medical,
    Maps,
    Media,
    Sports,
    Search,
}

impl Category {
    pub const ALL: [Category; 10] = [
        Category::Finance,
        Category::Crypto,
        Category::CurrencyExchange,
        Category::News,
        Category::Weather,
        Category::Medical,
        Category::Maps,
        Category::Media,
        Category::Sports,
        Category::Search,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Finance => "finance",
            Category::Crypto => "crypto",
            Category::CurrencyExchange => "currency_exchange",
            Category::News => "news",
            Category::Weather => "weather",
            Category::Medical => "medical",
            Category::Maps => "maps",
            Category::Media => "media",
            Category::Sports => "sports",
            Category::Search => "search",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = LookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Category::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| LookupError::UnknownCategory {
                name: s.to_string(),
            })
    }
}

/// Where a credential value comes from.
#[derive(Debug, Clone)]
pub enum Credential {
    /// Embedded directly in configuration.
    Literal(SecretString),
    /// Named secret, looked up through the secret store at call time.
    SecretRef(String),
}

impl PartialEq for Credential {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Credential::Literal(a), Credential::Literal(b)) => {
                a.expose_secret() == b.expose_secret()
            }
            (Credential::SecretRef(a), Credential::SecretRef(b)) => a == b,
            _ => false,
        }
    }
}

/// A provider's credential: parameter/header name plus its value source.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialSlot {
    /// Query parameter or header name. Absent for path-embedded keys.
    pub key_name: Option<String>,
    pub value: Credential,
}

/// How a header-borne key is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderScheme {
    /// `<key_name>: <secret>`
    Raw,
    /// `<key_name>: Bearer <secret>`
    Bearer,
}

/// Header carrying a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderAuth {
    pub key_name: String,
    pub scheme: HeaderScheme,
}

/// Request-shaping strategy, fixed when the descriptor is loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestStrategy {
    /// No credential; plain REST query parameters.
    Open,
    /// Key sent as a query parameter named `key_name`.
    QueryParam { key_name: String },
    /// Key sent in a request header.
    Header(HeaderAuth),
    /// Key substituted into `{api_key}` in the endpoint or function path.
    PathEmbedded,
    /// GraphQL: the query text travels in a JSON body, not the URL.
    GraphQlBody {
        query_param: String,
        auth: Option<HeaderAuth>,
    },
}

/// How to decode a provider's response body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// Decide from the `Content-Type` header and body shape.
    #[default]
    Auto,
    Json,
    Text,
}

/// HTTP method of a function call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => f.write_str("GET"),
            HttpMethod::Post => f.write_str("POST"),
        }
    }
}

/// A value in `default_params` or a function's parameter template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateValue {
    /// `""` in YAML: the caller must supply it.
    Required,
    /// `~` in YAML: sent only when the caller supplies it.
    Optional,
    /// A string default, possibly containing `{placeholder}` tokens.
    Value(String),
    /// A number or boolean default. JSON bodies keep its YAML type.
    Literal(serde_json::Value),
}

impl TemplateValue {
    /// Query-string form of a literal.
    pub fn literal_text(value: &serde_json::Value) -> String {
        match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// A named operation offered by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    /// Relative path appended to the provider endpoint.
    pub path: String,
    pub params: IndexMap<String, TemplateValue>,
    pub method: HttpMethod,
    pub description: Option<String>,
}

/// A validated provider description.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderDescriptor {
    pub name: String,
    pub category: Category,
    /// Base URL; may contain `{api_key}` for path-embedded keys.
    pub endpoint: String,
    pub credential: Option<CredentialSlot>,
    pub headers: IndexMap<String, String>,
    pub default_params: IndexMap<String, TemplateValue>,
    pub functions: IndexMap<String, Function>,
    /// Free-text query parameter, when declared.
    pub query_param: Option<String>,
    /// Provider-specific result-count parameter (SerpAPI's `num`), clamped
    /// like `max_results`.
    pub count_param: Option<String>,
    /// GraphQL document used for category search. The query text is passed
    /// as the `$search` variable.
    pub search_query: Option<String>,
    pub response_format: ResponseFormat,
    pub strategy: RequestStrategy,
    pub description: Option<String>,
}

impl ProviderDescriptor {
    /// Look up a function by name.
    pub fn function(&self, name: &str) -> Result<&Function, LookupError> {
        self.functions
            .get(name)
            .ok_or_else(|| LookupError::FunctionNotFound {
                provider: self.name.clone(),
                function: name.to_string(),
            })
    }

    /// Parameter used for free-text search.
    pub fn search_param(&self) -> &str {
        self.query_param.as_deref().unwrap_or(DEFAULT_QUERY_PARAM)
    }

    /// Whether calls need a credential at all.
    pub fn requires_credential(&self) -> bool {
        self.credential.is_some()
    }
}
