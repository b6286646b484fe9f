//! Subcommand implementations. Kept separate from argument parsing
//! (`cli/mod.rs`) the way the teacher splits `cli/mod.rs` from
//! `cli/commands.rs`.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::auth::{ApiKeyRecord, Authenticator, InMemoryApiKeyStore, JwtValidator};
use crate::cache::Cache;
use crate::config::{Config, ProviderKind as ConfigProviderKind};
use crate::credentials::CredentialManager;
use crate::db::{KVStore, RelationalStore, SqliteStore};
use crate::debate::{DebateOrchestrator, EnsembleSpec, FusionStrategy};
use crate::events::EventBus;
use crate::gateway::rate_limit::RateLimiter;
use crate::gateway::{self, AppState};
use crate::providers::factory;
use crate::registry::{CircuitConfig, ProviderKind as RegistryProviderKind, Registry};
use crate::selection::SelectionEngine;
use crate::tasks::{TaskEngine, TaskEngineConfig};
use crate::utils::retry::RetryConfig;
use crate::verifier::Verifier;

use super::DbCommands;

/// `helixagent serve`. Builds every component in dependency order,
/// starts the background loops (verifier, task workers), then blocks
/// on the HTTP server until a shutdown signal arrives.
pub async fn cmd_serve(config: Config) -> ExitCode {
    match run_server(config).await {
        Ok(true) => ExitCode::from(3),
        Ok(false) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "startup failed");
            ExitCode::from(2)
        }
    }
}

async fn run_server(config: Config) -> anyhow::Result<bool> {
    let store = Arc::new(SqliteStore::connect(&config.database.path).await?);
    let events = Arc::new(EventBus::new());

    let circuit_config = CircuitConfig {
        fail_threshold: config.registry.circuit_fail_threshold,
        open_cooldown: Duration::from_millis(config.registry.circuit_open_ms),
        half_open_probes: config.registry.circuit_half_open_probes,
        max_open_cooldown: Duration::from_millis(config.registry.circuit_max_open_ms),
    };
    let registry = Arc::new(Registry::new(circuit_config));

    for provider in factory::build_providers(&config.providers)? {
        let entry = config.providers.entries.get(provider.id());
        let kind = entry.map(|e| registry_kind(e.kind)).unwrap_or(RegistryProviderKind::ApiKey);
        let vendor_family = vendor_family_of(entry.map(|e| e.base_url.as_str()).unwrap_or_else(|| provider.id()));
        registry.register(provider.id().to_string(), vendor_family, kind, provider);
    }

    let selection = Arc::new(SelectionEngine::new(registry.clone()));

    let cache = Arc::new(Cache::new(
        config.cache.l1_entries,
        config.cache.l1_bytes,
        Duration::from_secs(config.cache.default_ttl_secs),
        events.clone(),
        Some(store.clone() as Arc<dyn KVStore>),
    ));

    let credentials = CredentialManager::new(
        Duration::from_secs(config.credentials.refresh_threshold_secs.max(0) as u64),
        Duration::from_secs(60),
        Some(store.clone() as Arc<dyn RelationalStore>),
    );
    credentials.load_from_paths(&config.credentials.credential_paths);
    credentials.load_from_store().await;
    let credentials = Arc::new(credentials);

    let task_engine_config = TaskEngineConfig {
        lease_duration: Duration::from_secs(config.tasks.lease_seconds),
        max_queue_depth: config.tasks.max_queue_depth,
        retry_backoff: RetryConfig::default(),
    };
    let tasks = Arc::new(TaskEngine::new(events.clone(), Some(store.clone() as Arc<dyn RelationalStore>), task_engine_config));
    tasks.restore_from_store().await;

    let debate = Arc::new(DebateOrchestrator::new(registry.clone(), selection.clone(), events.clone(), Some(store.clone() as Arc<dyn RelationalStore>)));

    let verifier = Arc::new(Verifier::new(registry.clone()));

    let jwt = config.auth.jwt_secret.as_ref().map(|s| JwtValidator::new(s.expose_secret()));
    let api_key_records: Vec<ApiKeyRecord> = config
        .auth
        .api_keys
        .iter()
        .map(|k| ApiKeyRecord {
            key_id: k.key_id.clone(),
            secret: k.secret.expose_secret().to_string(),
            subject: k.subject.clone(),
            role: k.role,
            scopes: k.scopes.iter().cloned().collect(),
        })
        .collect();
    let api_key_store: Arc<dyn crate::auth::ApiKeyStore> = Arc::new(InMemoryApiKeyStore::new(api_key_records));
    let authenticator = Arc::new(Authenticator::new(jwt, api_key_store, config.auth.anonymous_allowed, config.auth.anonymous_scopes.clone()));

    let rate_limiter = Arc::new(RateLimiter::new(config.auth.rate_limit_per_min));

    let debate_defaults = EnsembleSpec {
        enabled: true,
        min_participants: config.debate.participants.min(2),
        max_participants: config.debate.participants,
        rounds: config.debate.rounds,
        strategy: FusionStrategy::Majority,
        validation_passes: 0,
        timeout_per_round: Duration::from_millis(config.debate.timeout_per_round_ms),
        early_stop_confidence: config.debate.early_stop_confidence,
        allow_degraded: true,
        require_validation: false,
    };

    let state = AppState {
        registry: registry.clone(),
        selection,
        cache,
        events: events.clone(),
        tasks: tasks.clone(),
        debate,
        credentials,
        authenticator,
        rate_limiter,
        debate_defaults,
        max_per_vendor: config.registry.max_per_vendor,
        debate_cancels: Arc::new(DashMap::new()),
        cache_default_ttl: Duration::from_secs(config.cache.default_ttl_secs),
    };

    let shutdown = CancellationToken::new();

    let verifier_handle = tokio::spawn(verifier.run(shutdown.child_token()));
    let workers_handle = tokio::spawn(tasks.clone().run_workers(
        config.tasks.workers,
        Duration::from_secs(config.tasks.stuck_sweep_interval_secs),
        shutdown.child_token(),
    ));

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received");
        signal_shutdown.cancel();
    });

    let outcome = gateway::serve(&config, state, shutdown.clone()).await;

    shutdown.cancel();
    let _ = verifier_handle.await;
    let _ = workers_handle.await;

    outcome
}

fn registry_kind(kind: ConfigProviderKind) -> RegistryProviderKind {
    match kind {
        ConfigProviderKind::ApiKey => RegistryProviderKind::ApiKey,
        ConfigProviderKind::OAuth => RegistryProviderKind::OAuth,
        ConfigProviderKind::Free => RegistryProviderKind::Free,
    }
}

/// Groups providers sharing a host into one vendor family for §4.3's
/// per-vendor diversity cap, e.g. two API keys both pointed at
/// `api.openai.com` count as the same vendor.
fn vendor_family_of(base_url: &str) -> String {
    let without_scheme = base_url.split("://").nth(1).unwrap_or(base_url);
    without_scheme.split(['/', ':']).next().unwrap_or(without_scheme).to_string()
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install sigterm handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// `helixagent config`. Prints the effective, layered configuration as
/// TOML. `SecretString`'s `Serialize` impl always redacts, so secrets
/// never appear in the TOML body; with `--show-secrets` they are
/// listed separately afterward.
pub fn cmd_config(config: &Config, show_secrets: bool) -> ExitCode {
    match toml::to_string_pretty(config) {
        Ok(toml) => {
            println!("{toml}");
            if show_secrets {
                println!("# secrets (--show-secrets)");
                if let Some(jwt) = &config.auth.jwt_secret {
                    println!("auth.jwt_secret = {:?}", jwt.expose_secret());
                }
                for key in &config.auth.api_keys {
                    println!("auth.api_keys[{}].secret = {:?}", key.key_id, key.secret.expose_secret());
                }
                for (name, provider) in &config.providers.entries {
                    if let Some(api_key) = &provider.api_key {
                        println!("providers[{name}].api_key = {:?}", api_key.expose_secret());
                    }
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("failed to render configuration: {e}");
            ExitCode::from(1)
        }
    }
}

/// `helixagent db init|stats`.
pub async fn cmd_db(config: &Config, operation: DbCommands) -> ExitCode {
    match operation {
        DbCommands::Init => match SqliteStore::connect(&config.database.path).await {
            Ok(_) => {
                println!("database ready at {}", config.database.path);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("failed to initialize database: {e}");
                ExitCode::from(2)
            }
        },
        DbCommands::Stats => match SqliteStore::connect(&config.database.path).await {
            Ok(store) => {
                for table in ["background_tasks", "debate_sessions", "oauth_credentials", "kv_store"] {
                    let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
                        .fetch_one(store.pool())
                        .await
                        .unwrap_or(-1);
                    println!("{table}: {count}");
                }
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("failed to open database: {e}");
                ExitCode::from(2)
            }
        },
    }
}
