//! Provider Registry (C1): single source of truth for provider
//! descriptors, capabilities, live scores, health, and circuit-breaker
//! state.
//!
//! Concurrency follows §5: one mutex protects the descriptor map;
//! per-provider score/health cells live in their own lock so readers on
//! the hot path (selection) never block behind a registration/mutation.

mod circuit;

pub use circuit::{CircuitState, CircuitTransition};

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{HelixError, HelixResult};
use crate::providers::types::ModelDescriptor;
use crate::providers::{Provider, ProviderCapabilities};

/// `kind` field of a provider descriptor (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    ApiKey,
    OAuth,
    Free,
}

/// Health status bucket derived from score + circuit state (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// Registered provider descriptor plus its live client handle.
pub struct ProviderEntry {
    pub id: String,
    pub kind: ProviderKind,
    pub vendor_family: String,
    pub client: Arc<dyn Provider>,
    pub capabilities: ProviderCapabilities,
    /// Always-supported fallback, taken from `client.default_model()` at
    /// registration time.
    pub default_model: String,
    /// Discovered model catalog (§3 `ModelDescriptor`), populated after
    /// the fact via `Registry::set_models` once `discover_models()` has
    /// run. Empty until then — selection still falls back to
    /// `default_model` in that window.
    models: RwLock<Vec<ModelDescriptor>>,
    health: RwLock<HealthCell>,
}

#[derive(Debug, Clone)]
struct HealthCell {
    score: f64,
    last_verified_at: Option<Instant>,
    status: HealthStatus,
    circuit: circuit::Circuit,
}

impl Default for HealthCell {
    fn default() -> Self {
        Self {
            score: 5.0,
            last_verified_at: None,
            status: HealthStatus::Unknown,
            circuit: circuit::Circuit::new(),
        }
    }
}

/// A stable, immutable snapshot of one provider's registry-visible state
/// handed out to readers (§5: "immutable value snapshots").
#[derive(Debug, Clone)]
pub struct ProviderView {
    pub id: String,
    pub vendor_family: String,
    pub score: f64,
    pub status: HealthStatus,
    pub circuit: CircuitState,
    pub last_verified_at: Option<Instant>,
    /// Always-supported fallback model id (§4.3 model-support check).
    pub default_model: String,
    /// Discovered model catalog, if any (empty means "not yet
    /// discovered", not "supports nothing" — see `default_model`).
    pub model_ids: Vec<String>,
}

/// Tuning knobs for the per-provider circuit breaker, mirrors
/// [`crate::config::RegistryConfig`].
#[derive(Debug, Clone, Copy)]
pub struct CircuitConfig {
    pub fail_threshold: u32,
    pub open_cooldown: Duration,
    pub half_open_probes: u32,
    pub max_open_cooldown: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            fail_threshold: 5,
            open_cooldown: Duration::from_secs(30),
            half_open_probes: 1,
            max_open_cooldown: Duration::from_secs(600),
        }
    }
}

pub struct Registry {
    providers: RwLock<HashMap<String, Arc<ProviderEntry>>>,
    circuit_config: CircuitConfig,
}

impl Registry {
    pub fn new(circuit_config: CircuitConfig) -> Self {
        Self {
            providers: RwLock::new(HashMap::new()),
            circuit_config,
        }
    }

    /// `Register(p)`. Re-registering an id replaces the prior entry and
    /// resets its health cell.
    pub fn register(&self, id: impl Into<String>, vendor_family: impl Into<String>, kind: ProviderKind, client: Arc<dyn Provider>) {
        let id = id.into();
        let capabilities = client.capabilities();
        let default_model = client.default_model().to_string();
        let entry = Arc::new(ProviderEntry {
            id: id.clone(),
            kind,
            vendor_family: vendor_family.into(),
            client,
            capabilities,
            default_model,
            models: RwLock::new(Vec::new()),
            health: RwLock::new(HealthCell::default()),
        });
        self.providers.write().insert(id, entry);
    }

    /// Populates `id`'s discovered model catalog (§3 `ModelDescriptor`),
    /// typically fed from `Provider::discover_models()` once at startup.
    /// Unknown ids are logged and ignored, matching the other
    /// bookkeeping setters on this type.
    pub fn set_models(&self, id: &str, models: Vec<ModelDescriptor>) {
        let Some(entry) = self.try_get(id) else {
            tracing::warn!(provider = id, "set_models on unknown provider");
            return;
        };
        *entry.models.write() = models;
    }

    /// `Unregister(id)`. Idempotent: unregistering an unknown id is a no-op.
    pub fn unregister(&self, id: &str) {
        self.providers.write().remove(id);
    }

    /// `Get(id)`. Returns `HelixError::Internal` with a descriptive
    /// message when `id` is unknown — callers that expect "maybe missing"
    /// semantics should use [`Registry::try_get`] instead.
    pub fn get(&self, id: &str) -> HelixResult<Arc<ProviderEntry>> {
        self.try_get(id)
            .ok_or_else(|| HelixError::internal(format!("unknown provider id: {id}")))
    }

    pub fn try_get(&self, id: &str) -> Option<Arc<ProviderEntry>> {
        self.providers.read().get(id).cloned()
    }

    /// `ListByCapability(cap)`.
    pub fn list_by_capability(&self, predicate: impl Fn(&ProviderCapabilities) -> bool) -> Vec<Arc<ProviderEntry>> {
        self.providers
            .read()
            .values()
            .filter(|e| predicate(&e.capabilities))
            .cloned()
            .collect()
    }

    /// `UpdateScore(id, score, at)`. Clamped to `[0,10]` per the data
    /// model invariant; unknown ids are logged and ignored (bookkeeping
    /// never fails the caller).
    pub fn update_score(&self, id: &str, score: f64, at: Instant) {
        let Some(entry) = self.try_get(id) else {
            tracing::warn!(provider = id, "update_score on unknown provider");
            return;
        };
        let mut health = entry.health.write();
        health.score = score.clamp(0.0, 10.0);
        health.last_verified_at = Some(at);
        health.status = status_for(health.score, &health.circuit);
    }

    /// `ReportOutcome(id, ok, latency)`. Drives the circuit breaker state
    /// machine (§4.1). Never fails; a report against an unknown provider
    /// is logged and dropped.
    pub fn report_outcome(&self, id: &str, ok: bool, _latency: Duration) -> CircuitTransition {
        let Some(entry) = self.try_get(id) else {
            tracing::warn!(provider = id, "report_outcome on unknown provider");
            return CircuitTransition::Unchanged;
        };
        let mut health = entry.health.write();
        let transition = health.circuit.record(ok, &self.circuit_config);
        health.status = status_for(health.score, &health.circuit);
        transition
    }

    /// `ReportOutcome` variant for 429s: per §4.1, rate limiting never
    /// opens the circuit but does penalize score and should trigger a
    /// caller-side backoff.
    pub fn report_rate_limited(&self, id: &str) {
        let Some(entry) = self.try_get(id) else {
            return;
        };
        let mut health = entry.health.write();
        health.score = (health.score - 1.0).max(0.0);
    }

    /// `CircuitState(id)`.
    pub fn circuit_state(&self, id: &str) -> Option<CircuitState> {
        self.try_get(id).map(|e| e.health.read().circuit.state())
    }

    /// `Snapshot()`.
    pub fn snapshot(&self) -> Vec<ProviderView> {
        self.providers
            .read()
            .values()
            .map(|e| {
                let health = e.health.read();
                ProviderView {
                    id: e.id.clone(),
                    vendor_family: e.vendor_family.clone(),
                    score: health.score,
                    status: health.status,
                    circuit: health.circuit.state(),
                    last_verified_at: health.last_verified_at,
                    default_model: e.default_model.clone(),
                    model_ids: e.models.read().iter().map(|m| m.model_id.clone()).collect(),
                }
            })
            .collect()
    }

    /// Whether `id`'s circuit currently permits a call (closed or
    /// half-open with a probe slot available).
    pub fn may_call(&self, id: &str) -> bool {
        self.try_get(id)
            .map(|e| e.health.write().circuit.may_call(&self.circuit_config))
            .unwrap_or(false)
    }
}

fn status_for(score: f64, circuit: &circuit::Circuit) -> HealthStatus {
    if circuit.state() == CircuitState::Open {
        return HealthStatus::Unhealthy;
    }
    if score >= 7.0 {
        HealthStatus::Healthy
    } else if score >= 3.0 {
        HealthStatus::Degraded
    } else {
        HealthStatus::Unhealthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::error::ProviderError;
    use crate::providers::types::*;
    use async_trait::async_trait;

    struct StubProvider(&'static str);

    #[async_trait]
    impl Provider for StubProvider {
        fn id(&self) -> &str {
            self.0
        }
        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities { chat: true, ..Default::default() }
        }
        async fn chat(&self, _request: ChatRequest) -> crate::providers::ProviderResult<ChatResponse> {
            Err(ProviderError::Unavailable("stub".into()))
        }
        async fn chat_stream(&self, _request: ChatRequest) -> crate::providers::ProviderResult<crate::providers::ProviderStream> {
            Err(ProviderError::Unavailable("stub".into()))
        }
        async fn discover_models(&self) -> crate::providers::ProviderResult<Vec<ModelDescriptor>> {
            Ok(vec![])
        }
        fn default_model(&self) -> &str {
            "stub-model"
        }
        fn context_window(&self, _model: &str) -> Option<u32> {
            None
        }
        fn calculate_cost(&self, _model: &str, _input_tokens: u32, _output_tokens: u32) -> f64 {
            0.0
        }
    }

    fn registry() -> Registry {
        Registry::new(CircuitConfig {
            fail_threshold: 3,
            open_cooldown: Duration::from_millis(10),
            half_open_probes: 1,
            max_open_cooldown: Duration::from_secs(1),
        })
    }

    #[test]
    fn register_then_get_round_trips() {
        let reg = registry();
        reg.register("a", "vendor-a", ProviderKind::ApiKey, Arc::new(StubProvider("a")));
        assert!(reg.get("a").is_ok());
    }

    #[test]
    fn unregister_then_get_is_unknown_and_idempotent() {
        let reg = registry();
        reg.register("a", "vendor-a", ProviderKind::ApiKey, Arc::new(StubProvider("a")));
        reg.unregister("a");
        assert!(reg.get("a").is_err());
        reg.unregister("a"); // idempotent, must not panic
    }

    #[test]
    fn circuit_opens_after_fail_threshold_consecutive_failures() {
        let reg = registry();
        reg.register("a", "vendor-a", ProviderKind::ApiKey, Arc::new(StubProvider("a")));
        for _ in 0..3 {
            reg.report_outcome("a", false, Duration::from_millis(1));
        }
        assert_eq!(reg.circuit_state("a"), Some(CircuitState::Open));
        assert!(!reg.may_call("a"));
    }

    #[test]
    fn circuit_half_opens_after_cooldown_then_closes_on_success() {
        let reg = registry();
        reg.register("a", "vendor-a", ProviderKind::ApiKey, Arc::new(StubProvider("a")));
        for _ in 0..3 {
            reg.report_outcome("a", false, Duration::from_millis(1));
        }
        std::thread::sleep(Duration::from_millis(20));
        assert!(reg.may_call("a"));
        assert_eq!(reg.circuit_state("a"), Some(CircuitState::HalfOpen));
        reg.report_outcome("a", true, Duration::from_millis(1));
        assert_eq!(reg.circuit_state("a"), Some(CircuitState::Closed));
    }

    #[test]
    fn update_score_is_clamped_to_0_10() {
        let reg = registry();
        reg.register("a", "vendor-a", ProviderKind::ApiKey, Arc::new(StubProvider("a")));
        reg.update_score("a", 99.0, Instant::now());
        assert_eq!(reg.snapshot()[0].score, 10.0);
        reg.update_score("a", -5.0, Instant::now());
        assert_eq!(reg.snapshot()[0].score, 0.0);
    }

    #[test]
    fn rate_limited_outcome_never_opens_circuit() {
        let reg = registry();
        reg.register("a", "vendor-a", ProviderKind::ApiKey, Arc::new(StubProvider("a")));
        for _ in 0..10 {
            reg.report_rate_limited("a");
        }
        assert_eq!(reg.circuit_state("a"), Some(CircuitState::Closed));
    }
}
