//! Configuration types, defaults, loading, and validation.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::secrets::SecretString;

/// Root configuration, loaded from a TOML file and overlaid with
/// environment variables (see §6 of the design spec for the recognized
/// names).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub debug: DebugConfig,
    #[serde(default)]
    pub providers: ProviderConfigs,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub tasks: TasksConfig,
    #[serde(default)]
    pub debate: DebateConfigDefaults,
    #[serde(default)]
    pub credentials: CredentialsConfig,
}

/// HTTP gateway configuration (C8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    #[serde(default = "default_drain_seconds")]
    pub drain_seconds: u64,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}
fn default_drain_seconds() -> u64 {
    30
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            max_body_bytes: default_max_body_bytes(),
            drain_seconds: default_drain_seconds(),
            allowed_origins: vec![],
        }
    }
}

/// Auth / rate-limit configuration (C8, C9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub jwt_secret: Option<SecretString>,
    #[serde(default = "default_rate_limit_per_min")]
    pub rate_limit_per_min: u32,
    #[serde(default)]
    pub anonymous_allowed: bool,
    #[serde(default = "default_anonymous_scopes")]
    pub anonymous_scopes: Vec<String>,
    #[serde(default)]
    pub api_keys: Vec<ApiKeyConfig>,
}

fn default_rate_limit_per_min() -> u32 {
    120
}

fn default_anonymous_scopes() -> Vec<String> {
    vec!["chat".to_string()]
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            rate_limit_per_min: default_rate_limit_per_min(),
            anonymous_allowed: true,
            anonymous_scopes: default_anonymous_scopes(),
            api_keys: Vec::new(),
        }
    }
}

/// One statically-configured API key (§6 `X-API-Key`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    pub key_id: String,
    pub secret: SecretString,
    pub subject: String,
    #[serde(default)]
    pub role: crate::auth::Role,
    #[serde(default)]
    pub scopes: Vec<String>,
}

/// Relational/KV store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "helixagent.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub file_path: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            file_path: None,
        }
    }
}

/// Debug-only switches, never used to gate core correctness.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DebugConfig {
    #[serde(default)]
    pub verbose_provider_payloads: bool,
}

/// One upstream provider's connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(default)]
    pub kind: ProviderKind,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<SecretString>,
    #[serde(default)]
    pub default_model: Option<String>,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// Provider credential kind, mirrors the [`crate::providers`] taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    #[default]
    ApiKey,
    OAuth,
    Free,
}

/// All configured providers, keyed by name. Loaded from `PROVIDER_CONFIGS_DIR`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfigs {
    #[serde(default)]
    pub entries: HashMap<String, ProviderConfig>,
}

impl ProviderConfigs {
    /// Load every `*.toml` file in `dir` as a [`ProviderConfig`], keyed by
    /// its declared `name`. Mirrors `PROVIDER_CONFIGS_DIR`.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut entries = HashMap::new();
        if !dir.exists() {
            return Ok(Self { entries });
        }
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("reading provider config dir {}", dir.display()))?
        {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let cfg: ProviderConfig = toml::from_str(&raw)
                .with_context(|| format!("parsing provider config {}", path.display()))?;
            entries.insert(cfg.name.clone(), cfg);
        }
        Ok(Self { entries })
    }
}

/// Provider registry / circuit breaker tuning (C1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_circuit_fail_threshold")]
    pub circuit_fail_threshold: u32,
    #[serde(default = "default_circuit_open_ms")]
    pub circuit_open_ms: u64,
    #[serde(default = "default_circuit_half_open_probes")]
    pub circuit_half_open_probes: u32,
    #[serde(default = "default_circuit_max_open_ms")]
    pub circuit_max_open_ms: u64,
    #[serde(default = "default_max_per_vendor")]
    pub max_per_vendor: usize,
}

fn default_circuit_fail_threshold() -> u32 {
    5
}
fn default_circuit_open_ms() -> u64 {
    30_000
}
fn default_circuit_half_open_probes() -> u32 {
    1
}
fn default_circuit_max_open_ms() -> u64 {
    10 * 60_000
}
fn default_max_per_vendor() -> usize {
    2
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            circuit_fail_threshold: default_circuit_fail_threshold(),
            circuit_open_ms: default_circuit_open_ms(),
            circuit_half_open_probes: default_circuit_half_open_probes(),
            circuit_max_open_ms: default_circuit_max_open_ms(),
            max_per_vendor: default_max_per_vendor(),
        }
    }
}

/// Tiered cache sizing (C5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_l1_bytes")]
    pub l1_bytes: usize,
    #[serde(default = "default_cache_l1_entries")]
    pub l1_entries: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: u64,
}

fn default_cache_l1_bytes() -> usize {
    64 * 1024 * 1024
}
fn default_cache_l1_entries() -> usize {
    10_000
}
fn default_cache_ttl_secs() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_bytes: default_cache_l1_bytes(),
            l1_entries: default_cache_l1_entries(),
            default_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

/// Background task engine tuning (C6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksConfig {
    #[serde(default = "default_task_workers")]
    pub workers: usize,
    #[serde(default = "default_task_lease_secs")]
    pub lease_seconds: u64,
    #[serde(default = "default_task_queue_depth")]
    pub max_queue_depth: usize,
    #[serde(default = "default_stuck_sweep_secs")]
    pub stuck_sweep_interval_secs: u64,
}

fn default_task_workers() -> usize {
    4
}
fn default_task_lease_secs() -> u64 {
    60
}
fn default_task_queue_depth() -> usize {
    10_000
}
fn default_stuck_sweep_secs() -> u64 {
    15
}

impl Default for TasksConfig {
    fn default() -> Self {
        Self {
            workers: default_task_workers(),
            lease_seconds: default_task_lease_secs(),
            max_queue_depth: default_task_queue_depth(),
            stuck_sweep_interval_secs: default_stuck_sweep_secs(),
        }
    }
}

/// Defaults applied to an [`crate::debate::types::EnsembleSpec`] when the
/// caller omits a field (C7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateConfigDefaults {
    #[serde(default = "default_debate_rounds")]
    pub rounds: u32,
    #[serde(default = "default_debate_participants")]
    pub participants: usize,
    #[serde(default = "default_debate_timeout_ms")]
    pub timeout_per_round_ms: u64,
    #[serde(default = "default_debate_early_stop")]
    pub early_stop_confidence: f64,
}

fn default_debate_rounds() -> u32 {
    2
}
fn default_debate_participants() -> usize {
    3
}
fn default_debate_timeout_ms() -> u64 {
    30_000
}
fn default_debate_early_stop() -> f64 {
    0.85
}

impl Default for DebateConfigDefaults {
    fn default() -> Self {
        Self {
            rounds: default_debate_rounds(),
            participants: default_debate_participants(),
            timeout_per_round_ms: default_debate_timeout_ms(),
            early_stop_confidence: default_debate_early_stop(),
        }
    }
}

/// OAuth credential manager configuration (C9).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CredentialsConfig {
    /// Maps provider name to the path of its credential file.
    #[serde(default)]
    pub credential_paths: HashMap<String, String>,
    #[serde(default = "default_refresh_threshold_secs")]
    pub refresh_threshold_secs: i64,
}

fn default_refresh_threshold_secs() -> i64 {
    300
}

impl Config {
    /// Load configuration from `path` (TOML), falling back to defaults for
    /// anything unset. Environment variables named per §6 override the
    /// loaded file; see [`Config::apply_env_overrides`].
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = if let Some(p) = path {
            if p.exists() {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("reading config file {}", p.display()))?;
                toml::from_str(&raw).with_context(|| format!("parsing config file {}", p.display()))?
            } else {
                Config::default()
            }
        } else {
            Config::default()
        };
        cfg.apply_env_overrides();
        if let Ok(dir) = std::env::var("PROVIDER_CONFIGS_DIR") {
            cfg.providers = ProviderConfigs::load_dir(&PathBuf::from(dir))?;
        }
        Ok(cfg)
    }

    /// Overlay recognized environment variables onto an already-loaded config.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LISTEN_ADDR") {
            self.gateway.listen_addr = v;
        }
        if let Ok(v) = std::env::var("AUTH_JWT_SECRET") {
            self.auth.jwt_secret = Some(SecretString::new(v));
        }
        if let Ok(v) = std::env::var("RATE_LIMIT_PER_MIN").ok().and_then(|s| s.parse().ok()) {
            self.auth.rate_limit_per_min = v;
        }
        if let Ok(v) = std::env::var("TASK_WORKERS").ok().and_then(|s| s.parse().ok()) {
            self.tasks.workers = v;
        }
        if let Ok(v) = std::env::var("TASK_LEASE_SECONDS").ok().and_then(|s| s.parse().ok()) {
            self.tasks.lease_seconds = v;
        }
        if let Ok(v) = std::env::var("CACHE_L1_BYTES").ok().and_then(|s| s.parse().ok()) {
            self.cache.l1_bytes = v;
        }
        if let Ok(v) = std::env::var("CACHE_L1_ENTRIES").ok().and_then(|s| s.parse().ok()) {
            self.cache.l1_entries = v;
        }
        if let Ok(v) = std::env::var("CACHE_DEFAULT_TTL").ok().and_then(|s| s.parse().ok()) {
            self.cache.default_ttl_secs = v;
        }
        if let Ok(v) = std::env::var("DEBATE_DEFAULT_ROUNDS").ok().and_then(|s| s.parse().ok()) {
            self.debate.rounds = v;
        }
        if let Ok(v) = std::env::var("DEBATE_DEFAULT_PARTICIPANTS").ok().and_then(|s| s.parse().ok()) {
            self.debate.participants = v;
        }
        if let Ok(v) = std::env::var("DEBATE_TIMEOUT_MS").ok().and_then(|s| s.parse().ok()) {
            self.debate.timeout_per_round_ms = v;
        }
        if let Ok(v) = std::env::var("DEBATE_EARLY_STOP").ok().and_then(|s| s.parse().ok()) {
            self.debate.early_stop_confidence = v;
        }
        if let Ok(v) = std::env::var("CIRCUIT_FAIL_THRESHOLD").ok().and_then(|s| s.parse().ok()) {
            self.registry.circuit_fail_threshold = v;
        }
        if let Ok(v) = std::env::var("CIRCUIT_OPEN_MS").ok().and_then(|s| s.parse().ok()) {
            self.registry.circuit_open_ms = v;
        }
        if let Ok(v) = std::env::var("CIRCUIT_HALF_OPEN_PROBES").ok().and_then(|s| s.parse().ok()) {
            self.registry.circuit_half_open_probes = v;
        }
    }

    /// Validate cross-field invariants; returns a human message on failure
    /// (mapped to exit code 1 by the CLI entrypoint).
    pub fn validate(&self) -> Result<()> {
        if self.tasks.workers == 0 {
            anyhow::bail!("tasks.workers must be >= 1");
        }
        if self.debate.participants == 0 {
            anyhow::bail!("debate.participants must be >= 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.gateway.listen_addr, "127.0.0.1:8080");
        assert_eq!(cfg.tasks.workers, 4);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn env_overrides_apply() {
        // SAFETY: test-only, no concurrent env mutation within this process's test binary.
        unsafe {
            std::env::set_var("HELIXAGENT_TEST_LISTEN_ADDR_UNUSED", "noop");
        }
        let mut cfg = Config::default();
        unsafe {
            std::env::set_var("RATE_LIMIT_PER_MIN", "777");
        }
        cfg.apply_env_overrides();
        assert_eq!(cfg.auth.rate_limit_per_min, 777);
        unsafe {
            std::env::remove_var("RATE_LIMIT_PER_MIN");
        }
    }

    #[test]
    fn rejects_zero_workers() {
        let mut cfg = Config::default();
        cfg.tasks.workers = 0;
        assert!(cfg.validate().is_err());
    }
}
