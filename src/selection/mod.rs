//! Selection Engine (C3): picks N providers per request honoring model
//! support, circuit state, allow/deny lists, score, and vendor
//! diversity (§4.3).

use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{HelixError, HelixResult};
use crate::registry::{CircuitState, ProviderView, Registry};

/// Per-request selection constraints. `model` is matched against each
/// candidate's declared support via `supports_model`; callers that want
/// alias resolution pre-resolve the alias before constructing this.
#[derive(Debug, Clone)]
pub struct SelectionRequest {
    pub model: String,
    pub min_participants: usize,
    pub max_participants: usize,
    pub max_per_vendor: usize,
    pub allow: Option<HashSet<String>>,
    pub deny: HashSet<String>,
}

impl SelectionRequest {
    pub fn single(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            min_participants: 1,
            max_participants: 1,
            max_per_vendor: 1,
            allow: None,
            deny: HashSet::new(),
        }
    }
}

/// §4.3 "support the requested model": a candidate matches if `model`
/// is its default model or appears in its discovered catalog. A
/// provider whose catalog hasn't been discovered yet (`model_ids`
/// empty) is still eligible via its default model rather than excluded
/// outright.
fn supports_model(view: &ProviderView, model: &str) -> bool {
    view.default_model == model || view.model_ids.iter().any(|m| m == model)
}

pub struct SelectionEngine {
    registry: Arc<Registry>,
}

impl SelectionEngine {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Returns an ordered list of eligible providers of length within
    /// `[min, max]`. Deterministic for a given registry snapshot: ties
    /// break on (lower latency proxy score already folded into `score`,
    /// lexicographic id).
    pub fn select(&self, request: &SelectionRequest) -> HelixResult<Vec<String>> {
        let snapshot = self.registry.snapshot();
        let eligible = Self::filter(&snapshot, request);
        let mut ranked = eligible;
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.id.cmp(&b.id)));

        let mut chosen = Self::greedy_pick(&ranked, request.max_per_vendor, request.max_participants);
        if chosen.len() < request.min_participants {
            // Relax diversity in steps: try increasing max_per_vendor.
            for relax in (request.max_per_vendor + 1)..=ranked.len().max(1) {
                chosen = Self::greedy_pick(&ranked, relax, request.max_participants);
                if chosen.len() >= request.min_participants {
                    break;
                }
            }
        }
        if chosen.len() < request.min_participants {
            // Fall back to any closed-circuit provider regardless of score rank.
            for view in &snapshot {
                if chosen.len() >= request.min_participants {
                    break;
                }
                if view.circuit == CircuitState::Closed && !chosen.contains(&view.id) {
                    chosen.push(view.id.clone());
                }
            }
        }
        if chosen.len() < request.min_participants {
            return Err(HelixError::no_providers(format!(
                "found {} eligible providers for model {}, need at least {}",
                chosen.len(),
                request.model,
                request.min_participants
            )));
        }
        Ok(chosen)
    }

    fn filter(snapshot: &[ProviderView], request: &SelectionRequest) -> Vec<ProviderView> {
        snapshot
            .iter()
            .filter(|v| v.circuit != CircuitState::Open)
            .filter(|v| !request.deny.contains(&v.id))
            .filter(|v| request.allow.as_ref().is_none_or(|allow| allow.contains(&v.id)))
            .filter(|v| supports_model(v, &request.model))
            .cloned()
            .collect()
    }

    fn greedy_pick(ranked: &[ProviderView], max_per_vendor: usize, max_participants: usize) -> Vec<String> {
        let mut per_vendor: std::collections::HashMap<String, usize> = std::collections::HashMap::new();
        let mut chosen = Vec::new();
        for view in ranked {
            if chosen.len() >= max_participants {
                break;
            }
            let count = per_vendor.entry(view.vendor_family.clone()).or_insert(0);
            if *count >= max_per_vendor {
                continue;
            }
            *count += 1;
            chosen.push(view.id.clone());
        }
        chosen
    }

    /// Fallback chain for the single-call path (§4.3): an ordered list
    /// to try sequentially, short-circuiting on first success. Identical
    /// to `select` with `min=1`.
    pub fn fallback_chain(&self, request: &SelectionRequest) -> HelixResult<Vec<String>> {
        let mut chain_request = request.clone();
        chain_request.min_participants = 1;
        self.select(&chain_request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::error::ProviderError;
    use crate::providers::types::*;
    use crate::providers::{Provider, ProviderCapabilities, ProviderResult};
    use crate::registry::{CircuitConfig, ProviderKind};
    use async_trait::async_trait;
    use std::time::Duration;

    struct StubProvider(&'static str);

    #[async_trait]
    impl Provider for StubProvider {
        fn id(&self) -> &str {
            self.0
        }
        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities { chat: true, ..Default::default() }
        }
        async fn chat(&self, _request: ChatRequest) -> ProviderResult<ChatResponse> {
            Err(ProviderError::Unavailable("stub".into()))
        }
        async fn chat_stream(&self, _request: ChatRequest) -> ProviderResult<crate::providers::ProviderStream> {
            Err(ProviderError::Unavailable("stub".into()))
        }
        async fn discover_models(&self) -> ProviderResult<Vec<ModelDescriptor>> {
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

    fn setup(vendors: &[(&str, &str, f64)]) -> Arc<Registry> {
        let registry = Arc::new(Registry::new(CircuitConfig::default()));
        for (id, vendor, score) in vendors {
            registry.register(*id, *vendor, ProviderKind::ApiKey, Arc::new(StubProvider(id)));
            registry.update_score(id, *score, std::time::Instant::now());
        }
        registry
    }

    #[test]
    fn picks_highest_scoring_providers_first() {
        let registry = setup(&[("a", "v1", 9.0), ("b", "v2", 5.0), ("c", "v3", 7.0)]);
        let engine = SelectionEngine::new(registry);
        let request = SelectionRequest {
            model: "m".into(),
            min_participants: 1,
            max_participants: 2,
            max_per_vendor: 1,
            allow: None,
            deny: Default::default(),
        };
        let chosen = engine.select(&request).unwrap();
        assert_eq!(chosen, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn respects_max_per_vendor_diversity_constraint() {
        let registry = setup(&[("a", "v1", 9.0), ("b", "v1", 8.0), ("c", "v2", 5.0)]);
        let engine = SelectionEngine::new(registry);
        let request = SelectionRequest {
            model: "m".into(),
            min_participants: 1,
            max_participants: 3,
            max_per_vendor: 1,
            allow: None,
            deny: Default::default(),
        };
        let chosen = engine.select(&request).unwrap();
        assert_eq!(chosen, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn excludes_open_circuit_providers() {
        let registry = setup(&[("a", "v1", 9.0)]);
        for _ in 0..5 {
            registry.report_outcome("a", false, Duration::from_millis(1));
        }
        let engine = SelectionEngine::new(registry);
        let request = SelectionRequest::single("m");
        assert!(matches!(engine.select(&request), Err(HelixError::NoProviders { .. })));
    }

    #[test]
    fn deny_list_excludes_provider_even_if_best_scoring() {
        let registry = setup(&[("a", "v1", 9.0), ("b", "v2", 5.0)]);
        let engine = SelectionEngine::new(registry);
        let mut request = SelectionRequest::single("m");
        request.deny.insert("a".to_string());
        let chosen = engine.select(&request).unwrap();
        assert_eq!(chosen, vec!["b".to_string()]);
    }

    #[test]
    fn excludes_providers_that_do_not_support_the_requested_model() {
        let registry = setup(&[("a", "v1", 9.0), ("b", "v2", 5.0)]);
        let engine = SelectionEngine::new(registry);
        let request = SelectionRequest::single("some-other-model");
        assert!(matches!(engine.select(&request), Err(HelixError::NoProviders { .. })));
    }

    #[test]
    fn includes_a_provider_whose_discovered_catalog_contains_the_model() {
        let registry = setup(&[("a", "v1", 9.0)]);
        registry.set_models(
            "a",
            vec![ModelDescriptor {
                model_id: "catalog-model".to_string(),
                provider_id: "a".to_string(),
                context_window: 8192,
                max_output_tokens: 4096,
                cost_per_1k_in: 0.0,
                cost_per_1k_out: 0.0,
                supports_streaming: true,
                supports_tools: false,
                supports_vision: false,
                supports_embeddings: false,
            }],
        );
        let engine = SelectionEngine::new(registry);
        let request = SelectionRequest::single("catalog-model");
        let chosen = engine.select(&request).unwrap();
        assert_eq!(chosen, vec!["a".to_string()]);
    }

    #[test]
    fn relaxes_diversity_when_insufficient_providers_otherwise() {
        let registry = setup(&[("a", "v1", 9.0), ("b", "v1", 8.0)]);
        let engine = SelectionEngine::new(registry);
        let request = SelectionRequest {
            model: "m".into(),
            min_participants: 2,
            max_participants: 2,
            max_per_vendor: 1,
            allow: None,
            deny: Default::default(),
        };
        let chosen = engine.select(&request).unwrap();
        assert_eq!(chosen.len(), 2);
    }
}
