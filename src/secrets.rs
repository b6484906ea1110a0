//! Secret stores and the credential resolver.
//!
//! Providers name their keys indirectly (`load_from_secrets.<id>`); the
//! resolver turns that reference into a value through a [`SecretStore`].
//! The resolver keeps nothing between calls, so a rotated secret is picked
//! up on the next request.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock};

use secrecy::SecretString;

use crate::error::SecretError;
use crate::providers::{Credential, ProviderDescriptor};

/// Lookup of secret values by id.
pub trait SecretStore: Send + Sync {
    fn get(&self, id: &str) -> Option<SecretString>;
}

/// In-memory store. Values can be replaced at runtime.
#[derive(Default)]
pub struct MemorySecretStore {
    secrets: RwLock<HashMap<String, SecretString>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a secret.
    pub fn insert(&self, id: impl Into<String>, value: impl Into<String>) {
        self.secrets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.into(), SecretString::from(value.into()));
    }

    pub fn remove(&self, id: &str) -> bool {
        self.secrets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .is_some()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MemorySecretStore {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let store = Self::new();
        for (k, v) in iter {
            store.insert(k, v);
        }
        store
    }
}

impl SecretStore for MemorySecretStore {
    fn get(&self, id: &str) -> Option<SecretString> {
        self.secrets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}

/// Reads secrets from environment variables.
///
/// `serpapi.api_key` is looked up as `SERPAPI__API_KEY`, optionally behind a
/// prefix.
#[derive(Debug, Default, Clone)]
pub struct EnvSecretStore {
    prefix: String,
}

impl EnvSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Environment variable consulted for `id`.
    pub fn var_name(&self, id: &str) -> String {
        let mut name = self.prefix.clone();
        for ch in id.chars() {
            match ch {
                '.' => name.push_str("__"),
                '-' | ' ' => name.push('_'),
                c => name.push(c.to_ascii_uppercase()),
            }
        }
        name
    }
}

impl SecretStore for EnvSecretStore {
    fn get(&self, id: &str) -> Option<SecretString> {
        std::env::var(self.var_name(id))
            .ok()
            .filter(|v| !v.is_empty())
            .map(SecretString::from)
    }
}

/// Secrets loaded from a TOML file such as `.secrets/secrets.toml`.
///
/// Ids are matched against top-level keys first, then as dotted paths into
/// nested tables (`serpapi.api_key` → `[serpapi] api_key = "..."`).
pub struct TomlSecretStore {
    table: toml::Table,
}

impl TomlSecretStore {
    pub fn from_path(path: &Path) -> Result<Self, SecretError> {
        let content = std::fs::read_to_string(path).map_err(|e| SecretError::StoreUnreadable {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(&content).map_err(|reason| SecretError::StoreUnreadable {
            path: path.display().to_string(),
            reason,
        })
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        let table = content.parse::<toml::Table>().map_err(|e| e.to_string())?;
        Ok(Self { table })
    }

    fn lookup(&self, id: &str) -> Option<&toml::Value> {
        if let Some(value) = self.table.get(id) {
            return Some(value);
        }
        let mut parts = id.split('.');
        let mut current = self.table.get(parts.next()?)?;
        for part in parts {
            current = current.as_table()?.get(part)?;
        }
        Some(current)
    }
}

impl SecretStore for TomlSecretStore {
    fn get(&self, id: &str) -> Option<SecretString> {
        match self.lookup(id)? {
            toml::Value::String(s) if !s.is_empty() => Some(SecretString::from(s.clone())),
            toml::Value::Integer(i) => Some(SecretString::from(i.to_string())),
            _ => None,
        }
    }
}

/// Consults several stores in order; the first hit wins.
#[derive(Default)]
pub struct LayeredSecretStore {
    layers: Vec<Arc<dyn SecretStore>>,
}

impl LayeredSecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_layer(mut self, store: Arc<dyn SecretStore>) -> Self {
        self.layers.push(store);
        self
    }
}

impl SecretStore for LayeredSecretStore {
    fn get(&self, id: &str) -> Option<SecretString> {
        self.layers.iter().find_map(|layer| layer.get(id))
    }
}

/// Resolves a descriptor's credential slot to a secret value.
#[derive(Clone)]
pub struct CredentialResolver {
    store: Arc<dyn SecretStore>,
}

impl CredentialResolver {
    pub fn new(store: Arc<dyn SecretStore>) -> Self {
        Self { store }
    }

    /// `None` when the provider needs no key.
    pub fn resolve(
        &self,
        descriptor: &ProviderDescriptor,
    ) -> Result<Option<SecretString>, SecretError> {
        let Some(slot) = &descriptor.credential else {
            return Ok(None);
        };

        match &slot.value {
            Credential::Literal(value) => Ok(Some(value.clone())),
            Credential::SecretRef(id) => match self.store.get(id) {
                Some(value) => {
                    tracing::debug!(provider = %descriptor.name, secret = %id, "Resolved credential");
                    Ok(Some(value))
                }
                None => {
                    tracing::warn!(
                        provider = %descriptor.name,
                        secret = %id,
                        "Credential not found in secret store"
                    );
                    Err(SecretError::Missing {
                        provider: descriptor.name.clone(),
                        id: id.clone(),
                    })
                }
            },
        }
    }
}
