//! Caller-facing entry point: tier gate, then request builder, then
//! dispatcher.

use std::sync::Arc;

use futures::future::join_all;
use tracing::Instrument;

use crate::context::CallContext;
use crate::dispatch::{Dispatcher, ProviderResponse};
use crate::error::{DispatchError, Error, Result};
use crate::providers::{
    Category, ProviderDescriptor, ProviderRegistry, RequestStrategy, SEARCH_VARIABLE,
};
use crate::request::{CallArgs, RequestBuilder};
use crate::secrets::{CredentialResolver, SecretStore};
use crate::tiers::{Advisory, Caller, Capability, TierGate, TierTable};

/// Result of a successful call.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub response: ProviderResponse,
    /// Parameters lowered to the caller's tier ceiling.
    pub advisories: Vec<Advisory>,
}

/// One call in a [`ProviderHub::call_many`] batch.
#[derive(Debug, Clone)]
pub struct ProviderCall {
    pub provider: String,
    pub function: Option<String>,
    pub args: CallArgs,
}

impl ProviderCall {
    pub fn new(provider: impl Into<String>, function: Option<&str>, args: CallArgs) -> Self {
        Self {
            provider: provider.into(),
            function: function.map(str::to_string),
            args,
        }
    }
}

/// The provider hub. Cheap to clone; everything inside is shared.
#[derive(Clone)]
pub struct ProviderHub {
    registry: Arc<ProviderRegistry>,
    gate: TierGate,
    builder: RequestBuilder,
    dispatcher: Dispatcher,
}

impl ProviderHub {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        tiers: Arc<TierTable>,
        secrets: Arc<dyn SecretStore>,
        dispatcher: Dispatcher,
    ) -> Self {
        Self {
            registry,
            gate: TierGate::new(tiers),
            builder: RequestBuilder::new(CredentialResolver::new(secrets)),
            dispatcher,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn gate(&self) -> &TierGate {
        &self.gate
    }

    /// Call one provider function, or its bare endpoint when `function` is
    /// `None`.
    pub async fn call_provider(
        &self,
        provider: &str,
        function: Option<&str>,
        args: &CallArgs,
        caller: &Caller,
    ) -> Result<CallOutcome> {
        let ctx = CallContext::new(*caller);
        let descriptor = self.registry.get(provider)?;
        self.call_descriptor(&ctx, descriptor, function, args).await
    }

    /// Free-text search across a category.
    ///
    /// Providers are tried in registry order with the query in their search
    /// parameter; the first success wins. GraphQL providers take part only
    /// when they declare a `search_query` document. A tier denial stops the
    /// search.
    pub async fn search_category(
        &self,
        category: Category,
        query: &str,
        caller: &Caller,
    ) -> Result<CallOutcome> {
        let ctx = CallContext::new(*caller);
        let providers = self.registry.by_category(category);
        if providers.is_empty() {
            return Err(DispatchError::NoProvidersAvailable {
                category: category.to_string(),
            }
            .into());
        }

        let mut failures = Vec::new();
        let mut tried = 0;
        for descriptor in providers {
            let Some(args) = search_args(descriptor, query) else {
                tracing::debug!(
                    %category,
                    provider = %descriptor.name,
                    "GraphQL provider has no search_query, skipping"
                );
                continue;
            };
            tried += 1;
            match self.call_descriptor(&ctx, descriptor, None, &args).await {
                Ok(outcome) => {
                    if !failures.is_empty() {
                        tracing::info!(
                            %category,
                            provider = %descriptor.name,
                            skipped = failures.len(),
                            "Category search fell back to a later provider"
                        );
                    }
                    return Ok(outcome);
                }
                Err(Error::Denied(denied)) => return Err(denied.into()),
                Err(e) => {
                    tracing::warn!(
                        %category,
                        provider = %descriptor.name,
                        error = %e,
                        "Provider failed during category search, trying next"
                    );
                    failures.push((descriptor.name.clone(), e.reason()));
                }
            }
        }

        if tried == 0 {
            return Err(DispatchError::NoProvidersAvailable {
                category: category.to_string(),
            }
            .into());
        }

        Err(DispatchError::AllProvidersFailed { failures }.into())
    }

    /// Run independent calls concurrently. Results come back in input order.
    pub async fn call_many(
        &self,
        calls: &[ProviderCall],
        caller: &Caller,
    ) -> Vec<Result<CallOutcome>> {
        join_all(calls.iter().map(|call| {
            self.call_provider(&call.provider, call.function.as_deref(), &call.args, caller)
        }))
        .await
    }

    async fn call_descriptor(
        &self,
        ctx: &CallContext,
        descriptor: &ProviderDescriptor,
        function: Option<&str>,
        args: &CallArgs,
    ) -> Result<CallOutcome> {
        let span = tracing::info_span!(
            "provider_call",
            call_id = %ctx.call_id,
            provider = %descriptor.name,
            function = function.unwrap_or("<endpoint>"),
            tier = %ctx.caller.tier,
        );

        async {
            let authorization = self.gate.authorize_counted(
                &ctx.caller,
                capability_for(descriptor),
                &args.params,
                descriptor.count_param.as_deref(),
            )?;
            let args = CallArgs {
                params: authorization.params,
                ..args.clone()
            };

            let request = self.builder.build(descriptor, function, &args)?;
            let response = self.dispatcher.send(&request).await?;
            tracing::info!(
                status = response.status,
                call_ms = ctx.elapsed().num_milliseconds(),
                "Provider call completed"
            );

            Ok::<_, Error>(CallOutcome {
                response,
                advisories: authorization.advisories,
            })
        }
        .instrument(span)
        .await
    }
}

/// Search providers are gated as web search, everything else as a provider
/// call.
fn capability_for(descriptor: &ProviderDescriptor) -> Capability {
    match descriptor.category {
        Category::Search => Capability::WebSearch,
        _ => Capability::ProviderCall,
    }
}

/// Call args carrying `query` for a category search, or `None` when the
/// provider cannot take free text.
fn search_args(descriptor: &ProviderDescriptor, query: &str) -> Option<CallArgs> {
    match &descriptor.strategy {
        RequestStrategy::GraphQlBody { query_param, .. } => {
            let document = descriptor.search_query.as_deref()?;
            Some(
                CallArgs::new()
                    .param(query_param, document)
                    .param(SEARCH_VARIABLE, query),
            )
        }
        _ => Some(CallArgs::new().param(descriptor.search_param(), query)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;
    use crate::dispatch::tests::{ScriptedTransport, status};
    use crate::error::{LookupError, SecretError};
    use crate::providers::ConfigSource;
    use crate::secrets::MemorySecretStore;
    use crate::tiers::Tier;

    const MEDIA: &str = r#"
apis:
  - name: TMDb
    type: media
    endpoint: https://api.themoviedb.org/3/search/multi
    key_name: api_key
    key_value: load_from_secrets.tmdb_api_key
    query_param: query
  - name: Jikan
    type: media
    endpoint: https://api.jikan.moe/v4/anime
  - name: TVMaze
    type: media
    endpoint: https://api.tvmaze.com/search/shows
"#;

    const CRYPTO: &str = r#"
apis:
  - name: CoinGecko
    type: crypto
    endpoint: https://api.coingecko.com/api/v3
    functions:
      COINS_MARKETS:
        path: coins/markets
        params:
          vs_currency: usd
          per_page: ~
  - name: CoinCap
    type: crypto
    endpoint: https://api.coincap.io/v2/assets
"#;

    const SEARCH: &str = r#"
apis:
  - name: SerpAPI
    type: search
    endpoint: https://serpapi.com/search
    count_param: num
    default_params:
      engine: google
"#;

    const ANIME: &str = r#"
apis:
  - name: Kitsu
    type: media
    endpoint: https://graphql.kitsu.example/
    headers:
      Content-Type: application/json
    query_param: query
  - name: AniList
    type: media
    endpoint: https://graphql.anilist.co
    headers:
      Content-Type: application/json
    query_param: query
    search_query: "query ($search: String) { Media(search: $search) { id } }"
"#;

    fn hub(transport: Arc<ScriptedTransport>, secrets: &[(&str, &str)]) -> ProviderHub {
        hub_from(
            transport,
            &[
                ConfigSource::new("media_apis.yaml", MEDIA),
                ConfigSource::new("crypto_apis.yaml", CRYPTO),
            ],
            secrets,
        )
    }

    fn hub_from(
        transport: Arc<ScriptedTransport>,
        sources: &[ConfigSource],
        secrets: &[(&str, &str)],
    ) -> ProviderHub {
        let registry = ProviderRegistry::load(sources).unwrap();
        let config = DispatchConfig {
            max_attempts: 1,
            jitter: false,
            ..Default::default()
        };
        ProviderHub::new(
            Arc::new(registry),
            Arc::new(crate::tiers::tests::table()),
            Arc::new(MemorySecretStore::from_iter(secrets.iter().copied())),
            Dispatcher::new(transport, &config),
        )
    }

    #[tokio::test]
    async fn test_call_provider_clamps_and_reports_advisory() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(status(200, "[]"))]));
        let hub = hub(transport.clone(), &[]);
        let args = CallArgs::new().param("per_page", "250").param("limit", "100");

        let outcome = hub
            .call_provider("CoinGecko", Some("COINS_MARKETS"), &args, &Caller::user(Tier::Free))
            .await
            .unwrap();

        assert_eq!(outcome.response.provider, "CoinGecko");
        assert_eq!(outcome.advisories.len(), 1);
        assert_eq!(outcome.advisories[0].param, "limit");
        assert_eq!(outcome.advisories[0].ceiling, 5);

        let sent = transport.seen();
        assert_eq!(
            sent[0].url.as_str(),
            "https://api.coingecko.com/api/v3/coins/markets?vs_currency=usd&per_page=250&limit=5"
        );
    }

    #[tokio::test]
    async fn test_admin_is_not_clamped() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(status(200, "[]"))]));
        let hub = hub(transport.clone(), &[]);
        let args = CallArgs::new().param("limit", "100");
        let outcome = hub
            .call_provider("CoinCap", None, &args, &Caller::admin(Tier::Free))
            .await
            .unwrap();
        assert!(outcome.advisories.is_empty());
        assert!(transport.seen()[0].url.as_str().ends_with("limit=100"));
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let err = hub(transport.clone(), &[])
            .call_provider("Bloomberg", None, &CallArgs::new(), &Caller::user(Tier::Pro))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Lookup(LookupError::ProviderNotFound { .. })));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_non_numeric_limit_denied_before_dispatch() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let err = hub(transport.clone(), &[])
            .call_provider(
                "CoinCap",
                None,
                &CallArgs::new().param("limit", "all"),
                &Caller::user(Tier::Basic),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Denied(_)));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_secret_surfaces_from_call() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let err = hub(transport.clone(), &[])
            .call_provider("TMDb", None, &CallArgs::new(), &Caller::user(Tier::Pro))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Secret(SecretError::Missing { .. })));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_search_category_falls_back() {
        // TMDb has no secret and is skipped without a request; Jikan fails.
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(status(500, "down")),
            Ok(status(200, r#"[{"show": {"name": "Naruto"}}]"#)),
        ]));
        let hub = hub(transport.clone(), &[]);

        let outcome = hub
            .search_category(Category::Media, "naruto", &Caller::user(Tier::Free))
            .await
            .unwrap();

        assert_eq!(outcome.response.provider, "TVMaze");
        let sent = transport.seen();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].url.as_str(), "https://api.jikan.moe/v4/anime?q=naruto");
        assert_eq!(sent[1].url.as_str(), "https://api.tvmaze.com/search/shows?q=naruto");
    }

    #[tokio::test]
    async fn test_search_category_uses_declared_query_param() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(status(200, "{}"))]));
        let hub = hub(transport.clone(), &[("tmdb_api_key", "tmdb-1")]);

        let outcome = hub
            .search_category(Category::Media, "dune", &Caller::user(Tier::Free))
            .await
            .unwrap();
        assert_eq!(outcome.response.provider, "TMDb");
        assert_eq!(
            transport.seen()[0].url.as_str(),
            "https://api.themoviedb.org/3/search/multi?query=dune&api_key=tmdb-1"
        );
    }

    #[tokio::test]
    async fn test_search_category_all_fail() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(status(500, "down")),
            Ok(status(404, "missing")),
        ]));
        let err = hub(transport, &[])
            .search_category(Category::Media, "naruto", &Caller::user(Tier::Free))
            .await
            .unwrap_err();
        match err {
            Error::Dispatch(DispatchError::AllProvidersFailed { failures }) => {
                let names: Vec<_> = failures.iter().map(|(name, _)| name.as_str()).collect();
                assert_eq!(names, vec!["TMDb", "Jikan", "TVMaze"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_search_failures_carry_inner_reason() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(status(500, "down")),
            Ok(status(404, "missing")),
        ]));
        let err = hub(transport, &[])
            .search_category(Category::Media, "naruto", &Caller::user(Tier::Free))
            .await
            .unwrap_err();
        let Error::Dispatch(DispatchError::AllProvidersFailed { failures }) = &err else {
            panic!("unexpected error: {err}");
        };
        assert!(failures[0].1.starts_with("Secret `tmdb_api_key`"));
        assert!(failures.iter().all(|(_, reason)| !reason.contains("error:")));
        assert_eq!(err.to_string().matches("Dispatch error:").count(), 1);
    }

    #[tokio::test]
    async fn test_search_provider_clamped_by_web_search_ceiling() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(status(200, "{}"))]));
        let hub = hub_from(
            transport.clone(),
            &[ConfigSource::new("search_apis.yaml", SEARCH)],
            &[],
        );
        let args = CallArgs::new()
            .param("q", "rust")
            .param("max_results", "5")
            .param("num", "100");

        let outcome = hub
            .call_provider("SerpAPI", None, &args, &Caller::user(Tier::Free))
            .await
            .unwrap();

        let clamped: Vec<_> = outcome
            .advisories
            .iter()
            .map(|a| (a.param.as_str(), a.ceiling))
            .collect();
        assert_eq!(clamped, vec![("max_results", 3), ("num", 3)]);
        assert_eq!(
            transport.seen()[0].url.as_str(),
            "https://serpapi.com/search?engine=google&q=rust&max_results=3&num=3"
        );
    }

    #[tokio::test]
    async fn test_search_category_posts_graphql_search_document() {
        let transport = Arc::new(ScriptedTransport::new(vec![Ok(status(200, "{}"))]));
        let hub = hub_from(
            transport.clone(),
            &[ConfigSource::new("media_apis.yaml", ANIME)],
            &[],
        );

        let outcome = hub
            .search_category(Category::Media, "86", &Caller::user(Tier::Free))
            .await
            .unwrap();

        // Kitsu has no search document and is never called.
        assert_eq!(outcome.response.provider, "AniList");
        let sent = transport.seen();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].body,
            Some(serde_json::json!({
                "query": "query ($search: String) { Media(search: $search) { id } }",
                "variables": {"search": "86"}
            }))
        );
    }

    #[tokio::test]
    async fn test_search_category_without_searchable_provider() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let anime = ANIME.split("  - name: AniList").next().unwrap();
        let err = hub_from(
            transport.clone(),
            &[ConfigSource::new("media_apis.yaml", anime)],
            &[],
        )
        .search_category(Category::Media, "frieren", &Caller::user(Tier::Free))
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Dispatch(DispatchError::NoProvidersAvailable { .. })
        ));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_search_empty_category() {
        let transport = Arc::new(ScriptedTransport::new(vec![]));
        let err = hub(transport, &[])
            .search_category(Category::Maps, "berlin", &Caller::user(Tier::Free))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Dispatch(DispatchError::NoProvidersAvailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_call_many_preserves_input_order() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Ok(status(200, "{}")),
            Ok(status(200, "{}")),
            Ok(status(200, "{}")),
        ]));
        let hub = hub(transport.clone(), &[]);
        let calls = vec![
            ProviderCall::new("CoinCap", None, CallArgs::new()),
            ProviderCall::new("Bloomberg", None, CallArgs::new()),
            ProviderCall::new("Jikan", None, CallArgs::new().param("q", "bleach")),
            ProviderCall::new("TVMaze", None, CallArgs::new().param("q", "bleach")),
        ];

        let results = hub.call_many(&calls, &Caller::user(Tier::Pro)).await;

        assert_eq!(results.len(), 4);
        assert_eq!(results[0].as_ref().unwrap().response.provider, "CoinCap");
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap().response.provider, "Jikan");
        assert_eq!(results[3].as_ref().unwrap().response.provider, "TVMaze");
        assert_eq!(transport.calls(), 3);
    }
}
