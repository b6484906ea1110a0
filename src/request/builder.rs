use std::borrow::Cow;

use indexmap::IndexMap;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use url::Url;

use super::{BuiltRequest, CallArgs};
use crate::error::{Result, TemplateError};
use crate::providers::{
    Function, HeaderAuth, HeaderScheme, HttpMethod, ProviderDescriptor, RequestStrategy,
    TemplateValue,
};
use crate::secrets::CredentialResolver;
use crate::template::{self, API_KEY_PLACEHOLDER, Unresolved};

/// Label used in errors for calls made against the bare endpoint.
const NO_FUNCTION: &str = "<endpoint>";

/// Builds requests, resolving credentials through the secret store.
#[derive(Clone)]
pub struct RequestBuilder {
    resolver: CredentialResolver,
}

impl RequestBuilder {
    pub fn new(resolver: CredentialResolver) -> Self {
        Self { resolver }
    }

    /// Build a request for `function` (or the bare endpoint when `None`).
    pub fn build(
        &self,
        descriptor: &ProviderDescriptor,
        function: Option<&str>,
        args: &CallArgs,
    ) -> Result<BuiltRequest> {
        let function = function.map(|name| descriptor.function(name)).transpose()?;
        let secret = self.resolver.resolve(descriptor)?;
        Ok(build_request(descriptor, function, args, secret)?)
    }
}

/// Build a request from an already resolved credential.
///
/// Parameters are layered `default_params`, then the function template, then
/// caller params; the credential goes in last. `secret` is `None` only for
/// providers without a credential.
pub fn build_request(
    descriptor: &ProviderDescriptor,
    function: Option<&Function>,
    args: &CallArgs,
    secret: Option<SecretString>,
) -> std::result::Result<BuiltRequest, TemplateError> {
    let function_name = function.map(|f| f.name.as_str()).unwrap_or(NO_FUNCTION);
    let binding = |name: &str| -> Option<String> {
        if name == API_KEY_PLACEHOLDER
            && let Some(secret) = &secret
        {
            return Some(secret.expose_secret().to_string());
        }
        args.bindings.get(name).cloned()
    };
    let unresolved =
        |template: &str, Unresolved(placeholder): Unresolved| TemplateError::Unresolved {
            provider: descriptor.name.clone(),
            template: template.to_string(),
            placeholder,
        };
    // Path segments are percent-encoded; query values are encoded by `Url`.
    let render_path = |template: &str| {
        template::render(template, |name| {
            binding(name).map(|v| Cow::Owned(urlencoding::encode(&v).into_owned()))
        })
        .map_err(|e| unresolved(template, e))
    };
    let render_value = |template: &str| {
        template::render(template, |name| binding(name).map(Cow::Owned))
            .map_err(|e| unresolved(template, e))
    };

    let mut params = IndexMap::new();
    // Keys whose current value is a typed YAML literal.
    let mut literals: IndexMap<String, Value> = IndexMap::new();
    let mut headers = descriptor.headers.clone();

    let mut url_text = render_path(&descriptor.endpoint)?;
    let mut method = HttpMethod::Get;

    if let Some(function) = function {
        method = function.method;
        let path = render_path(&function.path)?;
        if !path.is_empty() {
            url_text = format!(
                "{}/{}",
                url_text.trim_end_matches('/'),
                path.trim_start_matches('/')
            );
        }
    }

    let templates = descriptor
        .default_params
        .iter()
        .chain(function.into_iter().flat_map(|f| f.params.iter()));
    // A later layer overrides an earlier one, requirements included.
    let mut required: Vec<&str> = Vec::new();
    for (key, value) in templates {
        required.retain(|k| *k != key.as_str());
        match value {
            TemplateValue::Required => {
                params.shift_remove(key);
                literals.shift_remove(key);
                required.push(key);
            }
            TemplateValue::Optional => {}
            TemplateValue::Value(template) => {
                params.insert(key.clone(), render_value(template)?);
                literals.shift_remove(key);
            }
            TemplateValue::Literal(literal) => {
                params.insert(key.clone(), TemplateValue::literal_text(literal));
                literals.insert(key.clone(), literal.clone());
            }
        }
    }

    if let Some(missing) = required.iter().find(|k| !args.params.contains_key(**k)) {
        return Err(TemplateError::MissingParameter {
            provider: descriptor.name.clone(),
            function: function_name.to_string(),
            param: missing.to_string(),
        });
    }

    for (key, value) in &args.params {
        params.insert(key.clone(), value.clone());
        literals.shift_remove(key);
    }

    for (key, value) in &args.headers {
        if !headers.keys().any(|h| h.eq_ignore_ascii_case(key)) {
            headers.insert(key.clone(), value.clone());
        }
    }

    let secret_value = secret.as_ref().map(|s| s.expose_secret());
    let mut credential_query = None;
    let mut body = None;

    match &descriptor.strategy {
        RequestStrategy::Open | RequestStrategy::PathEmbedded => {}
        RequestStrategy::QueryParam { key_name } => {
            if let Some(secret) = secret_value {
                params.shift_remove(key_name);
                credential_query = Some((key_name.clone(), secret.to_string()));
            }
        }
        RequestStrategy::Header(auth) => {
            if let Some(secret) = secret_value {
                set_auth_header(&mut headers, auth, secret);
            }
        }
        RequestStrategy::GraphQlBody { query_param, auth } => {
            if let (Some(auth), Some(secret)) = (auth, secret_value) {
                set_auth_header(&mut headers, auth, secret);
            }
            let query = params.shift_remove(query_param).ok_or_else(|| {
                TemplateError::MissingParameter {
                    provider: descriptor.name.clone(),
                    function: function_name.to_string(),
                    param: query_param.clone(),
                }
            })?;
            let mut graphql = Map::new();
            graphql.insert("query".to_string(), Value::String(query));
            if !params.is_empty() {
                graphql.insert("variables".to_string(), json_object(&params, &literals));
            }
            body = Some(Value::Object(graphql));
            method = HttpMethod::Post;
            params.clear();
        }
    }

    // POST functions carry their parameters as a JSON body.
    if body.is_none() && method == HttpMethod::Post {
        body = Some(json_object(&params, &literals));
        params.clear();
    }

    let mut url = Url::parse(&url_text).map_err(|e| TemplateError::InvalidUrl {
        provider: descriptor.name.clone(),
        reason: e.to_string(),
    })?;
    if !params.is_empty() || credential_query.is_some() {
        let mut query = url.query_pairs_mut();
        query.extend_pairs(&params);
        if let Some((key, value)) = &credential_query {
            query.append_pair(key, value);
        }
    }

    tracing::debug!(
        provider = %descriptor.name,
        function = function_name,
        %method,
        "Built provider request"
    );

    Ok(BuiltRequest {
        provider: descriptor.name.clone(),
        method,
        url,
        headers,
        body,
        response_format: descriptor.response_format,
        secret,
    })
}

/// Set the credential header, replacing a declared placeholder header of
/// the same name.
fn set_auth_header(headers: &mut IndexMap<String, String>, auth: &HeaderAuth, secret: &str) {
    let value = match auth.scheme {
        HeaderScheme::Raw => secret.to_string(),
        HeaderScheme::Bearer => format!("Bearer {secret}"),
    };
    let existing = headers
        .keys()
        .find(|k| k.eq_ignore_ascii_case(&auth.key_name))
        .cloned();
    headers.insert(existing.unwrap_or_else(|| auth.key_name.clone()), value);
}

/// Parameters as a JSON object. Values stay strings unless they came from a
/// number or boolean in the YAML.
fn json_object(params: &IndexMap<String, String>, literals: &IndexMap<String, Value>) -> Value {
    params
        .iter()
        .map(|(k, v)| {
            let value = literals
                .get(k)
                .cloned()
                .unwrap_or_else(|| Value::String(v.clone()));
            (k.clone(), value)
        })
        .collect::<Map<_, _>>()
        .into()
}
