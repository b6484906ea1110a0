//! Provider registry: the immutable set of descriptors loaded at startup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, LookupError};
use crate::providers::{Category, Function, ProviderDescriptor, parse_document};

/// File in a config directory that carries app settings, not providers.
pub const APP_CONFIG_FILE: &str = "config.yml";

/// One YAML document to load providers from.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    /// Label used in error messages (usually the file name).
    pub name: String,
    pub content: String,
}

impl ConfigSource {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Read a source from disk.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        Ok(Self { name, content })
    }
}

/// Registry of provider descriptors.
///
/// Built once and never mutated; share it behind an `Arc`.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: Vec<ProviderDescriptor>,
    index: HashMap<String, usize>,
}

impl ProviderRegistry {
    /// Load and validate every source. Fails on the first bad descriptor or
    /// on a provider name seen twice across all sources.
    pub fn load(sources: &[ConfigSource]) -> Result<Self, ConfigError> {
        let mut registry = Self::default();
        let mut origins: HashMap<String, String> = HashMap::new();

        for source in sources {
            let descriptors = parse_document(&source.name, &source.content)?;
            tracing::debug!(
                source = %source.name,
                providers = descriptors.len(),
                "Parsed provider document"
            );

            for descriptor in descriptors {
                if let Some(first) = origins.get(&descriptor.name) {
                    return Err(ConfigError::DuplicateProvider {
                        name: descriptor.name,
                        first: first.clone(),
                        second: source.name.clone(),
                    });
                }
                origins.insert(descriptor.name.clone(), source.name.clone());
                registry
                    .index
                    .insert(descriptor.name.clone(), registry.providers.len());
                registry.providers.push(descriptor);
            }
        }

        tracing::info!(providers = registry.len(), "Provider registry loaded");
        Ok(registry)
    }

    /// Load every `*.yaml` / `*.yml` file in `dir` except the app config,
    /// in file-name order.
    pub fn load_dir(dir: &Path) -> Result<Self, ConfigError> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|e| ConfigError::read_file(dir, e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file())
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml")
                )
            })
            .filter(|path| path.file_name().and_then(|n| n.to_str()) != Some(APP_CONFIG_FILE))
            .collect();
        paths.sort();

        let sources = paths
            .iter()
            .map(|p| ConfigSource::from_path(p))
            .collect::<Result<Vec<_>, _>>()?;
        Self::load(&sources)
    }

    /// Get a provider by name.
    pub fn get(&self, name: &str) -> Result<&ProviderDescriptor, LookupError> {
        self.index
            .get(name)
            .map(|&i| &self.providers[i])
            .ok_or_else(|| LookupError::ProviderNotFound {
                name: name.to_string(),
            })
    }

    /// Get a provider and one of its functions.
    pub fn function(
        &self,
        provider: &str,
        function: &str,
    ) -> Result<(&ProviderDescriptor, &Function), LookupError> {
        let descriptor = self.get(provider)?;
        let function = descriptor.function(function)?;
        Ok((descriptor, function))
    }

    /// Providers in a category, in load order. May be empty.
    pub fn by_category(&self, category: Category) -> Vec<&ProviderDescriptor> {
        self.providers
            .iter()
            .filter(|p| p.category == category)
            .collect()
    }

    /// Check if a provider exists.
    pub fn has(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All providers in load order.
    pub fn iter(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.providers.iter()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::TemplateValue;

    const FINANCE: &str = r#"
apis:
  - name: Alpha Vantage
    type: finance
    endpoint: https://www.alphavantage.co/query
    key_name: apikey
    key_value: load_from_secrets.alpha_vantage_api_key
    default_params:
      datatype: json
    functions:
      TIME_SERIES_DAILY:
        params:
          function: TIME_SERIES_DAILY
          symbol: ""
  - name: CoinGecko
    type: crypto
    endpoint: https://api.coingecko.com/api/v3
    functions:
      COINS_MARKET_CHART:
        path: coins/{id}/market_chart
        params:
          vs_currency: ""
          days: ""
"#;

    const NEWS: &str = r#"
apis:
  - name: NewsAPI
    type: news
    endpoint: https://newsapi.org/v2/everything
    key_name: apiKey
    key_value: load_from_secrets.newsapi_api_key
  - name: GNews
    type: news
    endpoint: https://gnews.io/api/v4/search
    key_name: token
    key_value: load_from_secrets.gnews_api_key
"#;

    fn registry() -> ProviderRegistry {
        ProviderRegistry::load(&[
            ConfigSource::new("finance_apis.yaml", FINANCE),
            ConfigSource::new("news_apis.yaml", NEWS),
        ])
        .unwrap()
    }

    #[test]
    fn test_load_and_get() {
        let registry = registry();
        assert_eq!(registry.len(), 4);
        assert!(registry.has("CoinGecko"));
        assert!(!registry.has("coingecko"));

        let provider = registry.get("Alpha Vantage").unwrap();
        assert_eq!(provider.category, Category::Finance);
        assert_eq!(provider.endpoint, "https://www.alphavantage.co/query");
        assert_eq!(
            provider.default_params.get("datatype"),
            Some(&TemplateValue::Value("json".to_string()))
        );
    }

    #[test]
    fn test_get_round_trips_parsed_descriptor() {
        let registry = registry();
        let parsed = parse_document("finance_apis.yaml", FINANCE).unwrap();
        for descriptor in &parsed {
            assert_eq!(registry.get(&descriptor.name).unwrap(), descriptor);
        }
    }

    #[test]
    fn test_get_unknown_provider() {
        let err = registry().get("Bloomberg").unwrap_err();
        assert!(matches!(err, LookupError::ProviderNotFound { .. }));
    }

    #[test]
    fn test_function_lookup() {
        let registry = registry();
        let (provider, function) = registry.function("CoinGecko", "COINS_MARKET_CHART").unwrap();
        assert_eq!(provider.name, "CoinGecko");
        assert_eq!(function.path, "coins/{id}/market_chart");

        let err = registry.function("CoinGecko", "COINS_LIST").unwrap_err();
        assert!(matches!(err, LookupError::FunctionNotFound { .. }));
    }

    #[test]
    fn test_by_category_preserves_order() {
        let registry = registry();
        let news: Vec<_> = registry
            .by_category(Category::News)
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(news, vec!["NewsAPI", "GNews"]);
        assert!(registry.by_category(Category::Maps).is_empty());
    }

    #[test]
    fn test_duplicate_name_across_sources_rejected() {
        let dup = "- name: CoinGecko\n  type: crypto\n  endpoint: https://example.com\n";
        let err = ProviderRegistry::load(&[
            ConfigSource::new("finance_apis.yaml", FINANCE),
            ConfigSource::new("crypto_apis.yaml", dup),
        ])
        .unwrap_err();
        match err {
            ConfigError::DuplicateProvider {
                name,
                first,
                second,
            } => {
                assert_eq!(name, "CoinGecko");
                assert_eq!(first, "finance_apis.yaml");
                assert_eq!(second, "crypto_apis.yaml");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_dir_skips_app_config() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("news_apis.yaml"), NEWS).unwrap();
        std::fs::write(dir.path().join("finance_apis.yml"), FINANCE).unwrap();
        std::fs::write(dir.path().join(APP_CONFIG_FILE), "tiers: {}\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not yaml").unwrap();

        let registry = ProviderRegistry::load_dir(dir.path()).unwrap();
        assert_eq!(registry.len(), 4);
        // finance_apis.yml sorts before news_apis.yaml
        assert_eq!(registry.iter().next().unwrap().name, "Alpha Vantage");
    }

    #[test]
    fn test_unreadable_source_names_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("sports_apis.yaml");
        let err = ConfigSource::from_path(&missing).unwrap_err();
        assert!(matches!(err, ConfigError::ReadFile { .. }));
        assert!(err.to_string().contains("sports_apis.yaml"));
    }
}
