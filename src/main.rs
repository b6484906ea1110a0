use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};

use provider_hub::config::{AppConfig, DispatchConfig};
use provider_hub::dispatch::{Dispatcher, ReqwestTransport};
use provider_hub::providers::registry::APP_CONFIG_FILE;
use provider_hub::providers::{Category, ProviderRegistry};
use provider_hub::request::CallArgs;
use provider_hub::secrets::{EnvSecretStore, LayeredSecretStore, SecretStore, TomlSecretStore};
use provider_hub::tiers::{Caller, Role, Tier};
use provider_hub::{CallOutcome, ProviderHub};

/// Provider Hub - call configured third-party APIs from the command line
#[derive(Parser, Debug)]
#[command(name = "provider-hub")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory holding `config.yml` and the `*_apis.yaml` documents
    #[arg(long, env = "PROVIDER_HUB_CONFIG_DIR", default_value = "./data")]
    config_dir: PathBuf,

    /// TOML secrets file
    #[arg(long, env = "PROVIDER_HUB_SECRETS", default_value = "./.secrets/secrets.toml")]
    secrets: PathBuf,

    /// Caller tier
    #[arg(long, env = "PROVIDER_HUB_TIER", default_value = "free")]
    tier: String,

    /// Call as admin (no tier limits)
    #[arg(long, env = "PROVIDER_HUB_ADMIN")]
    admin: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Commands {
    /// List configured providers
    List {
        /// Only this category (e.g. crypto, currency_exchange)
        category: Option<String>,
    },

    /// Call a provider function
    ///
    /// Examples:
    ///   provider-hub call CoinGecko COINS_MARKET_CHART :id=bitcoin vs_currency=usd days=7
    ///   provider-hub call ExchangeRate-API LATEST :base_currency=USD
    ///   provider-hub call Open-Meteo latitude=52.52 longitude=13.41
    Call {
        provider: String,
        /// Optional function name, then `key=value` params, `:name=value`
        /// path bindings and `@Header=value` headers
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        rest: Vec<String>,
    },

    /// Free-text search across a category, falling back provider by provider
    Search { category: String, query: String },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let tier: Tier = cli.tier.parse()?;
    let caller = Caller {
        tier,
        role: if cli.admin { Role::Admin } else { Role::User },
    };

    let app_config = AppConfig::load(&cli.config_dir.join(APP_CONFIG_FILE))?;
    let registry = Arc::new(ProviderRegistry::load_dir(&cli.config_dir)?);
    // PROVIDER_HUB_TIMEOUT_SECS overrides the app config timeout.
    let dispatch_config = DispatchConfig::from_env_with_defaults(
        DispatchConfig::default().with_timeout(app_config.request_timeout()),
    );

    eprintln!("🔌 {} / provider-hub v{}", app_config.app.name, env!("CARGO_PKG_VERSION"));
    eprintln!("   Config: {}", cli.config_dir.display());
    eprintln!("   Providers: {}", registry.len());
    eprintln!(
        "   Caller: {}{}",
        caller.tier,
        if caller.is_admin() { " (admin)" } else { "" }
    );
    eprintln!(
        "   Dispatch: {} attempts, {:?} timeout\n",
        dispatch_config.max_attempts, dispatch_config.timeout
    );

    let hub = ProviderHub::new(
        Arc::clone(&registry),
        Arc::new(app_config.tiers),
        secret_store(&cli.secrets),
        Dispatcher::new(Arc::new(ReqwestTransport::new()), &dispatch_config),
    );

    match cli.command {
        Commands::List { category } => {
            let category: Option<Category> = category.map(|c| c.parse()).transpose()?;
            for provider in hub.registry().iter() {
                if category.is_some_and(|c| c != provider.category) {
                    continue;
                }
                let functions: Vec<&str> = provider.functions.keys().map(String::as_str).collect();
                println!(
                    "{:<24} {:<18} {}",
                    provider.name,
                    provider.category,
                    if functions.is_empty() {
                        "-".to_string()
                    } else {
                        functions.join(", ")
                    }
                );
            }
        }
        Commands::Call { provider, rest } => {
            let (function, args) = parse_call_args(&rest)?;
            let outcome = hub
                .call_provider(&provider, function.as_deref(), &args, &caller)
                .await?;
            print_outcome(&outcome);
        }
        Commands::Search { category, query } => {
            let outcome = hub.search_category(category.parse()?, &query, &caller).await?;
            print_outcome(&outcome);
        }
    }

    Ok(())
}

/// TOML file first (when present), then environment variables.
fn secret_store(path: &Path) -> Arc<dyn SecretStore> {
    let mut store = LayeredSecretStore::new();
    if path.exists() {
        match TomlSecretStore::from_path(path) {
            Ok(toml) => {
                tracing::info!(path = %path.display(), "Loaded secrets file");
                store = store.with_layer(Arc::new(toml));
            }
            Err(e) => tracing::warn!(error = %e, "Ignoring unreadable secrets file"),
        }
    } else {
        tracing::debug!(path = %path.display(), "No secrets file; using environment only");
    }
    Arc::new(store.with_layer(Arc::new(EnvSecretStore::new())))
}

fn print_outcome(outcome: &CallOutcome) {
    for advisory in &outcome.advisories {
        eprintln!("   Note: {advisory}");
    }
    eprintln!(
        "   {} → HTTP {} in {:?} ({} attempt{})\n",
        outcome.response.provider,
        outcome.response.status,
        outcome.response.elapsed,
        outcome.response.attempts,
        if outcome.response.attempts == 1 { "" } else { "s" }
    );
    println!("{}", outcome.response.payload.to_pretty_string());
}

/// Split `call` arguments into an optional function name and call args.
///
/// The first argument without `=` is the function; after that every
/// argument must be `key=value`, `:binding=value` or `@Header=value`.
fn parse_call_args(rest: &[String]) -> Result<(Option<String>, CallArgs), String> {
    let mut function = None;
    let mut args = CallArgs::new();

    for (i, arg) in rest.iter().enumerate() {
        let Some((key, value)) = arg.split_once('=') else {
            if i == 0 {
                function = Some(arg.clone());
                continue;
            }
            return Err(format!("expected key=value, got `{arg}`"));
        };

        if let Some(name) = key.strip_prefix(':') {
            args = args.bind(name, value);
        } else if let Some(name) = key.strip_prefix('@') {
            args = args.header(name, value);
        } else if key.is_empty() {
            return Err(format!("missing key in `{arg}`"));
        } else {
            args = args.param(key, value);
        }
    }

    Ok((function, args))
}
