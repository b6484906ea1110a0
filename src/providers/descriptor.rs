//! YAML descriptor parsing and load-time validation.
//!
//! Documents come in two shapes, both used by the domain config files:
//!
//! ```yaml
//! apis: [ ... ]
//! search_apis: [ ... ]
//! ```
//!
//! or a bare top-level list of descriptors. Documents with neither (the SMTP
//! settings file, for example) contribute no providers.

use std::borrow::Cow;

use indexmap::IndexMap;
use secrecy::SecretString;
use serde::Deserialize;
use serde_yaml::Value;
use url::Url;

use super::{
    Category, Credential, CredentialSlot, Function, HeaderAuth, HeaderScheme, HttpMethod,
    ProviderDescriptor, RequestStrategy, ResponseFormat, TemplateValue,
};
use crate::error::ConfigError;
use crate::template::{self, API_KEY_PLACEHOLDER};

/// Prefix of the string form of a secret reference.
const SECRET_REF_PREFIX: &str = "load_from_secrets.";

/// Fields every descriptor must carry.
const REQUIRED_FIELDS: [&str; 3] = ["name", "type", "endpoint"];

#[derive(Debug, Deserialize)]
struct RawProvider {
    name: String,
    #[serde(rename = "type")]
    category: String,
    endpoint: String,
    #[serde(default)]
    key_name: Option<String>,
    #[serde(default)]
    key_value: Option<RawCredential>,
    #[serde(default)]
    headers: IndexMap<String, Value>,
    #[serde(default)]
    default_params: IndexMap<String, Value>,
    #[serde(default)]
    functions: IndexMap<String, RawFunction>,
    #[serde(default)]
    query_param: Option<String>,
    #[serde(default)]
    count_param: Option<String>,
    #[serde(default)]
    search_query: Option<String>,
    #[serde(default)]
    in_header: bool,
    #[serde(default)]
    response_format: ResponseFormat,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawCredential {
    Plain(String),
    Secret { secret: String },
    Literal { literal: String },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawFunction {
    Path(String),
    Full {
        #[serde(default)]
        path: String,
        #[serde(default)]
        params: IndexMap<String, Value>,
        #[serde(default)]
        method: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
}

/// Parse one YAML document into validated descriptors.
///
/// `source_name` only labels error messages.
pub fn parse_document(
    source_name: &str,
    content: &str,
) -> Result<Vec<ProviderDescriptor>, ConfigError> {
    let doc: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
        source_name: source_name.to_string(),
        reason: e.to_string(),
    })?;

    let entries: Vec<Value> = match doc {
        Value::Null => Vec::new(),
        Value::Sequence(items) => items,
        Value::Mapping(map) => {
            let mut items = Vec::new();
            for section in ["apis", "search_apis"] {
                match map.get(section) {
                    Some(Value::Sequence(list)) => items.extend(list.iter().cloned()),
                    Some(Value::Null) | None => {}
                    Some(_) => {
                        return Err(ConfigError::ParseError {
                            source_name: source_name.to_string(),
                            reason: format!("`{section}` must be a list"),
                        });
                    }
                }
            }
            items
        }
        _ => {
            return Err(ConfigError::ParseError {
                source_name: source_name.to_string(),
                reason: "expected a mapping or a list of providers".to_string(),
            });
        }
    };

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            check_required(source_name, index, &entry)?;
            let raw: RawProvider =
                serde_yaml::from_value(entry).map_err(|e| ConfigError::ParseError {
                    source_name: source_name.to_string(),
                    reason: format!("entry {index}: {e}"),
                })?;
            raw.to_descriptor()
        })
        .collect()
}

fn check_required(source_name: &str, index: usize, entry: &Value) -> Result<(), ConfigError> {
    for field in REQUIRED_FIELDS {
        let present = entry
            .get(field)
            .and_then(scalar_to_string)
            .is_some_and(|s| !s.trim().is_empty());
        if !present {
            return Err(ConfigError::MissingField {
                source_name: source_name.to_string(),
                index,
                field,
            });
        }
    }
    Ok(())
}

/// Render a YAML scalar as a string. `None` for null, sequences and mappings.
fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl RawCredential {
    fn into_credential(self) -> Option<Credential> {
        match self {
            RawCredential::Plain(s) => {
                let s = s.trim();
                if s.is_empty() {
                    None
                } else if let Some(id) = s.strip_prefix(SECRET_REF_PREFIX) {
                    Some(Credential::SecretRef(id.to_string()))
                } else {
                    Some(Credential::Literal(SecretString::from(s.to_string())))
                }
            }
            RawCredential::Secret { secret } if !secret.trim().is_empty() => {
                Some(Credential::SecretRef(secret.trim().to_string()))
            }
            RawCredential::Literal { literal } if !literal.is_empty() => {
                Some(Credential::Literal(SecretString::from(literal)))
            }
            _ => None,
        }
    }
}

impl RawProvider {
    fn invalid(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::InvalidProvider {
            provider: self.name.clone(),
            message: message.into(),
        }
    }

    fn to_descriptor(&self) -> Result<ProviderDescriptor, ConfigError> {
        let category: Category = self
            .category
            .parse()
            .map_err(|_| self.invalid(format!("unknown type `{}`", self.category)))?;

        validate_endpoint(self)?;

        let headers = scalar_map(self, "headers", &self.headers)?;
        let default_params = convert_params(self, "default_params", &self.default_params)?;

        let key_name = self
            .key_name
            .as_ref()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());

        let credential = self
            .key_value
            .clone()
            .and_then(RawCredential::into_credential)
            .map(|value| CredentialSlot {
                key_name: key_name.clone(),
                value,
            });

        let mut functions = IndexMap::with_capacity(self.functions.len());
        for (name, raw) in &self.functions {
            let function = convert_function(self, name, raw, credential.is_some())?;
            functions.insert(name.clone(), function);
        }

        let mut referenced = template_placeholders(self, "default_params", &default_params)?;
        referenced.retain(|p| p == API_KEY_PLACEHOLDER);
        if credential.is_none() && !referenced.is_empty() {
            return Err(ConfigError::UnknownPlaceholder {
                provider: self.name.clone(),
                function: "<default_params>".to_string(),
                placeholder: API_KEY_PLACEHOLDER.to_string(),
            });
        }

        let strategy = select_strategy(self, &headers, credential.as_ref(), &functions)?;

        let search_query = non_empty(&self.search_query);
        if search_query.is_some() && !matches!(strategy, RequestStrategy::GraphQlBody { .. }) {
            return Err(self.invalid("search_query only applies to GraphQL providers"));
        }

        Ok(ProviderDescriptor {
            name: self.name.clone(),
            category,
            endpoint: self.endpoint.trim().to_string(),
            credential,
            headers,
            default_params,
            functions,
            query_param: non_empty(&self.query_param),
            count_param: non_empty(&self.count_param),
            search_query,
            response_format: self.response_format,
            strategy,
            description: self.description.clone(),
        })
    }
}

fn validate_endpoint(raw: &RawProvider) -> Result<(), ConfigError> {
    let names = template::placeholders(&raw.endpoint).map_err(|e| raw.invalid(e.to_string()))?;
    if let Some(other) = names.iter().find(|n| n.as_str() != API_KEY_PLACEHOLDER) {
        return Err(ConfigError::UnknownPlaceholder {
            provider: raw.name.clone(),
            function: "<endpoint>".to_string(),
            placeholder: other.clone(),
        });
    }

    // Placeholders only ever fill path segments, so a stand-in is enough to
    // check the rest of the URL.
    let sample = template::render(&raw.endpoint, |_| Some(Cow::Borrowed("x")))
        .unwrap_or_else(|_| raw.endpoint.clone());
    let url = Url::parse(sample.trim()).map_err(|e| raw.invalid(format!("invalid endpoint: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(raw.invalid(format!(
            "endpoint scheme must be http or https, got `{}`",
            url.scheme()
        )));
    }
    Ok(())
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// `""` is required, `~` optional, strings are templates and numbers or
/// booleans keep their type.
fn convert_params(
    raw: &RawProvider,
    label: &str,
    values: &IndexMap<String, Value>,
) -> Result<IndexMap<String, TemplateValue>, ConfigError> {
    let mut params = IndexMap::with_capacity(values.len());
    for (key, value) in values {
        let template_value = match value {
            Value::Null => TemplateValue::Optional,
            Value::String(s) if s.is_empty() => TemplateValue::Required,
            Value::String(s) => TemplateValue::Value(s.clone()),
            Value::Bool(b) => TemplateValue::Literal(serde_json::Value::Bool(*b)),
            Value::Number(n) => TemplateValue::Literal(number_to_json(n)),
            _ => return Err(raw.invalid(format!("{label}: param {key} must be a scalar"))),
        };
        params.insert(key.clone(), template_value);
    }
    Ok(params)
}

fn number_to_json(n: &serde_yaml::Number) -> serde_json::Value {
    if let Some(i) = n.as_i64() {
        serde_json::Value::from(i)
    } else if let Some(u) = n.as_u64() {
        serde_json::Value::from(u)
    } else {
        n.as_f64()
            .and_then(serde_json::Number::from_f64)
            .map(serde_json::Value::Number)
            .unwrap_or_else(|| serde_json::Value::String(n.to_string()))
    }
}

/// Placeholders referenced by the string templates in `params`.
fn template_placeholders(
    raw: &RawProvider,
    label: &str,
    params: &IndexMap<String, TemplateValue>,
) -> Result<Vec<String>, ConfigError> {
    let mut referenced = Vec::new();
    for value in params.values() {
        if let TemplateValue::Value(v) = value {
            referenced.extend(
                template::placeholders(v).map_err(|e| raw.invalid(format!("{label}: {e}")))?,
            );
        }
    }
    Ok(referenced)
}

fn scalar_map(
    raw: &RawProvider,
    field: &str,
    values: &IndexMap<String, Value>,
) -> Result<IndexMap<String, String>, ConfigError> {
    let mut out = IndexMap::with_capacity(values.len());
    for (key, value) in values {
        match value {
            Value::Null => continue,
            other => {
                let s = scalar_to_string(other)
                    .ok_or_else(|| raw.invalid(format!("{field}.{key} must be a scalar")))?;
                out.insert(key.clone(), s);
            }
        }
    }
    Ok(out)
}

fn convert_function(
    raw: &RawProvider,
    name: &str,
    function: &RawFunction,
    has_credential: bool,
) -> Result<Function, ConfigError> {
    let (path, raw_params, method, description) = match function {
        RawFunction::Path(path) => (path.clone(), IndexMap::new(), None, None),
        RawFunction::Full {
            path,
            params,
            method,
            description,
        } => (
            path.clone(),
            params.clone(),
            method.clone(),
            description.clone(),
        ),
    };

    let method = match method.as_deref().map(str::trim) {
        None | Some("") => HttpMethod::Get,
        Some(m) if m.eq_ignore_ascii_case("get") => HttpMethod::Get,
        Some(m) if m.eq_ignore_ascii_case("post") => HttpMethod::Post,
        Some(other) => {
            return Err(raw.invalid(format!(
                "function {name}: unsupported method `{other}`"
            )));
        }
    };

    let label = format!("function {name}");
    let params = convert_params(raw, &label, &raw_params)?;

    let mut referenced = template::placeholders(&path)
        .map_err(|e| raw.invalid(format!("{label}: {e}")))?;
    referenced.extend(template_placeholders(raw, &label, &params)?);
    if !has_credential && referenced.iter().any(|p| p == API_KEY_PLACEHOLDER) {
        return Err(ConfigError::UnknownPlaceholder {
            provider: raw.name.clone(),
            function: name.to_string(),
            placeholder: API_KEY_PLACEHOLDER.to_string(),
        });
    }

    Ok(Function {
        name: name.to_string(),
        path: path.trim().to_string(),
        params,
        method,
        description,
    })
}

fn select_strategy(
    raw: &RawProvider,
    headers: &IndexMap<String, String>,
    credential: Option<&CredentialSlot>,
    functions: &IndexMap<String, Function>,
) -> Result<RequestStrategy, ConfigError> {
    let path_embedded = template::placeholders(&raw.endpoint)
        .map(|names| names.iter().any(|n| n == API_KEY_PLACEHOLDER))
        .unwrap_or(false)
        || functions.values().any(|f| {
            template::placeholders(&f.path)
                .map(|names| names.iter().any(|n| n == API_KEY_PLACEHOLDER))
                .unwrap_or(false)
        });

    if path_embedded {
        if credential.is_none() {
            return Err(ConfigError::UnknownPlaceholder {
                provider: raw.name.clone(),
                function: "<endpoint>".to_string(),
                placeholder: API_KEY_PLACEHOLDER.to_string(),
            });
        }
        return Ok(RequestStrategy::PathEmbedded);
    }

    let header_auth = credential
        .and_then(|slot| slot.key_name.as_deref())
        .and_then(|key_name| {
            if key_name.eq_ignore_ascii_case("authorization") {
                Some(HeaderAuth {
                    key_name: key_name.to_string(),
                    scheme: HeaderScheme::Bearer,
                })
            } else if raw.in_header || headers.keys().any(|h| h.eq_ignore_ascii_case(key_name)) {
                Some(HeaderAuth {
                    key_name: key_name.to_string(),
                    scheme: HeaderScheme::Raw,
                })
            } else {
                None
            }
        });

    let json_body = headers.iter().any(|(k, v)| {
        k.eq_ignore_ascii_case("content-type") && v.trim().starts_with("application/json")
    });
    if json_body
        && let Some(query_param) = raw.query_param.as_deref().map(str::trim)
        && !query_param.is_empty()
    {
        if credential.is_some() && header_auth.is_none() {
            return Err(raw.invalid("GraphQL providers must send their key in a header"));
        }
        return Ok(RequestStrategy::GraphQlBody {
            query_param: query_param.to_string(),
            auth: header_auth,
        });
    }

    let Some(slot) = credential else {
        return Ok(RequestStrategy::Open);
    };

    if let Some(auth) = header_auth {
        return Ok(RequestStrategy::Header(auth));
    }

    match slot.key_name.as_deref() {
        Some(key_name) => Ok(RequestStrategy::QueryParam {
            key_name: key_name.to_string(),
        }),
        None => Err(raw.invalid(
            "key_value is set but key_name is missing and no `{api_key}` placeholder is used",
        )),
    }
}
