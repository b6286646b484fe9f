//! Verifier/Scorer (C2): periodically probes providers and produces a
//! 0–10 score, fed to the registry (C1).
//!
//! Scoring combines (§4.2): success rate over the last K attempts
//! (weight 0.5), median latency vs. target (0.2), cost-per-token
//! normalized (0.1), feature coverage vs. requested capability (0.2). A
//! decayed moving average smooths jitter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::providers::types::{ChatMessage, ChatRequest, Role};
use crate::registry::Registry;

const HISTORY_WINDOW: usize = 20;
const DECAY: f64 = 0.3;
const TARGET_LATENCY_MS: f64 = 800.0;

#[derive(Debug, Clone)]
struct ProbeOutcome {
    ok: bool,
    latency_ms: u64,
}

struct ProviderStats {
    history: Vec<ProbeOutcome>,
    smoothed_score: f64,
    interval: Duration,
    last_probe_at: Option<Instant>,
}

impl Default for ProviderStats {
    fn default() -> Self {
        Self {
            history: Vec::new(),
            smoothed_score: 5.0,
            interval: Duration::from_secs(60),
            last_probe_at: None,
        }
    }
}

/// Background verifier. One instance per process; drives [`Registry`]
/// score updates. `VerifyNow`/`SetInterval`/`Scores` operate on an
/// internal stats table independent of any running probe loop, so tests
/// can exercise scoring without spawning a task.
pub struct Verifier {
    registry: Arc<Registry>,
    stats: Mutex<HashMap<String, ProviderStats>>,
    enabled: Mutex<bool>,
    wake: Notify,
}

impl Verifier {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            stats: Mutex::new(HashMap::new()),
            enabled: Mutex::new(true),
            wake: Notify::new(),
        }
    }

    pub fn enable_scoring(&self, on: bool) {
        *self.enabled.lock() = on;
    }

    pub fn set_interval(&self, provider_id: &str, dur: Duration) {
        self.stats.lock().entry(provider_id.to_string()).or_default().interval = dur;
        self.wake.notify_waiters();
    }

    pub fn scores(&self) -> HashMap<String, f64> {
        self.stats.lock().iter().map(|(id, s)| (id.clone(), s.smoothed_score)).collect()
    }

    /// Run one probe against `provider_id` immediately, update its score,
    /// and push it into the registry. Probe failures count as a failed
    /// attempt but never panic the caller.
    pub async fn verify_now(&self, provider_id: &str) {
        if !*self.enabled.lock() {
            return;
        }
        let Some(entry) = self.registry.try_get(provider_id) else {
            return;
        };

        let probe_request = ChatRequest {
            model: entry.client.default_model().to_string(),
            system: None,
            messages: vec![ChatMessage::text(Role::User, "ping")],
            tools: None,
            temperature: Some(0.0),
            max_tokens: Some(8),
            stream: false,
        };

        let start = Instant::now();
        let result = entry.client.chat(probe_request).await;
        let latency_ms = start.elapsed().as_millis() as u64;
        let ok = result.is_ok();

        self.record_outcome(provider_id, ok, latency_ms);
        let feature_coverage = coverage_score(&entry.capabilities);
        let score = self.compute_score(provider_id, feature_coverage);
        self.registry.update_score(provider_id, score, Instant::now());
        self.registry.report_outcome(provider_id, ok, Duration::from_millis(latency_ms));
    }

    fn record_outcome(&self, provider_id: &str, ok: bool, latency_ms: u64) {
        let mut stats = self.stats.lock();
        let entry = stats.entry(provider_id.to_string()).or_default();
        entry.history.push(ProbeOutcome { ok, latency_ms });
        if entry.history.len() > HISTORY_WINDOW {
            entry.history.remove(0);
        }
        entry.last_probe_at = Some(Instant::now());
    }

    fn compute_score(&self, provider_id: &str, feature_coverage: f64) -> f64 {
        let mut stats = self.stats.lock();
        let entry = stats.entry(provider_id.to_string()).or_default();
        if entry.history.is_empty() {
            return entry.smoothed_score;
        }

        let success_rate = entry.history.iter().filter(|o| o.ok).count() as f64 / entry.history.len() as f64;

        let mut latencies: Vec<u64> = entry.history.iter().filter(|o| o.ok).map(|o| o.latency_ms).collect();
        latencies.sort_unstable();
        let median_latency = if latencies.is_empty() {
            TARGET_LATENCY_MS
        } else {
            latencies[latencies.len() / 2] as f64
        };
        let latency_score = (TARGET_LATENCY_MS / median_latency.max(1.0)).min(1.0);

        // Cost normalization is a placeholder weight until real per-call
        // cost figures flow from C4; treat as neutral (full credit) so a
        // missing cost signal never tanks an otherwise-healthy provider.
        let cost_score = 1.0;

        let raw = 10.0 * (0.5 * success_rate + 0.2 * latency_score + 0.1 * cost_score + 0.2 * feature_coverage);
        entry.smoothed_score = entry.smoothed_score * (1.0 - DECAY) + raw * DECAY;
        entry.smoothed_score.clamp(0.0, 10.0)
    }

    /// Spawn the continuous probe loop; stops when `token` is cancelled.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        loop {
            if token.is_cancelled() {
                return;
            }
            let ids: Vec<String> = self.registry.snapshot().into_iter().map(|v| v.id).collect();
            for id in ids {
                if token.is_cancelled() {
                    return;
                }
                let due = {
                    let stats = self.stats.lock();
                    stats
                        .get(&id)
                        .map(|s| s.last_probe_at.is_none_or(|t| t.elapsed() >= s.interval))
                        .unwrap_or(true)
                };
                if due {
                    self.verify_now(&id).await;
                }
            }
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                _ = self.wake.notified() => {}
            }
        }
    }
}

fn coverage_score(caps: &crate::providers::ProviderCapabilities) -> f64 {
    let flags = [caps.chat, caps.chat_stream, caps.tools, caps.vision, caps.embed, caps.rerank];
    let supported = flags.iter().filter(|f| **f).count();
    supported as f64 / flags.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::error::ProviderError;
    use crate::providers::types::*;
    use crate::providers::{Provider, ProviderCapabilities};
    use crate::registry::{CircuitConfig, ProviderKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlakyProvider {
        calls: AtomicUsize,
        fail_first_n: usize,
    }

    #[async_trait]
    impl Provider for FlakyProvider {
        fn id(&self) -> &str {
            "flaky"
        }
        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities { chat: true, ..Default::default() }
        }
        async fn chat(&self, _request: ChatRequest) -> crate::providers::ProviderResult<ChatResponse> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                Err(ProviderError::Transient("probe failed".into()))
            } else {
                Ok(ChatResponse {
                    id: "x".into(),
                    model: "m".into(),
                    content: vec![ContentBlock::Text { text: "pong".into() }],
                    stop_reason: Some(StopReason::EndTurn),
                    usage: TokenUsage::default(),
                    latency_ms: 10,
                })
            }
        }
        async fn chat_stream(&self, _request: ChatRequest) -> crate::providers::ProviderResult<crate::providers::ProviderStream> {
            Err(ProviderError::Unavailable("n/a".into()))
        }
        async fn discover_models(&self) -> crate::providers::ProviderResult<Vec<ModelDescriptor>> {
            Ok(vec![])
        }
        fn default_model(&self) -> &str {
            "m"
        }
        fn context_window(&self, _model: &str) -> Option<u32> {
            None
        }
        fn calculate_cost(&self, _model: &str, _i: u32, _o: u32) -> f64 {
            0.0
        }
    }

    #[tokio::test]
    async fn verify_now_raises_score_on_sustained_success() {
        let registry = Arc::new(Registry::new(CircuitConfig::default()));
        registry.register(
            "flaky",
            "vendor",
            ProviderKind::ApiKey,
            Arc::new(FlakyProvider { calls: AtomicUsize::new(0), fail_first_n: 0 }),
        );
        let verifier = Verifier::new(registry.clone());
        for _ in 0..5 {
            verifier.verify_now("flaky").await;
        }
        let score = registry.snapshot()[0].score;
        assert!(score > 5.0, "expected improved score, got {score}");
    }

    #[tokio::test]
    async fn verify_now_lowers_score_on_sustained_failure() {
        let registry = Arc::new(Registry::new(CircuitConfig::default()));
        registry.register(
            "flaky",
            "vendor",
            ProviderKind::ApiKey,
            Arc::new(FlakyProvider { calls: AtomicUsize::new(0), fail_first_n: 100 }),
        );
        let verifier = Verifier::new(registry.clone());
        for _ in 0..5 {
            verifier.verify_now("flaky").await;
        }
        let score = registry.snapshot()[0].score;
        assert!(score < 5.0, "expected degraded score, got {score}");
    }

    #[tokio::test]
    async fn disabled_scoring_skips_probes() {
        let registry = Arc::new(Registry::new(CircuitConfig::default()));
        registry.register(
            "flaky",
            "vendor",
            ProviderKind::ApiKey,
            Arc::new(FlakyProvider { calls: AtomicUsize::new(0), fail_first_n: 0 }),
        );
        let verifier = Verifier::new(registry.clone());
        verifier.enable_scoring(false);
        verifier.verify_now("flaky").await;
        assert!(verifier.scores().is_empty());
    }
}
