//! Data model for the debate orchestrator (§3 `EnsembleSpec`,
//! `DebateSession`, `DebateRound`, `Argument`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionStrategy {
    Majority,
    Weighted,
    Judge,
    Deliberative,
}

/// §3 `EnsembleSpec`. `enabled = false` means the gateway should take
/// the single-provider fallback-chain path instead of invoking the
/// orchestrator at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleSpec {
    pub enabled: bool,
    pub min_participants: usize,
    pub max_participants: usize,
    pub rounds: u32,
    pub strategy: FusionStrategy,
    pub validation_passes: u32,
    #[serde(with = "duration_millis")]
    pub timeout_per_round: Duration,
    pub early_stop_confidence: f64,
    pub allow_degraded: bool,
    pub require_validation: bool,
}

impl Default for EnsembleSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            min_participants: 2,
            max_participants: 3,
            rounds: 2,
            strategy: FusionStrategy::Majority,
            validation_passes: 0,
            timeout_per_round: Duration::from_secs(30),
            early_stop_confidence: 0.85,
            allow_degraded: true,
            require_validation: false,
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateStatus {
    Pending,
    Running,
    Validating,
    Completed,
    Failed,
    Cancelled,
}

/// One participant's output in one round (§3 `Argument`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Argument {
    pub provider_id: String,
    pub model_id: String,
    pub position: String,
    pub text: String,
    pub score: f64,
    pub confidence: f64,
    pub tokens_in: u32,
    pub tokens_out: u32,
    pub latency_ms: u64,
    pub truncated: bool,
}

/// §3 `DebateRound`. `index` is monotonically increasing from 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateRound {
    pub index: u32,
    pub started_at_ms: i64,
    pub ended_at_ms: Option<i64>,
    pub arguments: Vec<Argument>,
    pub consensus_confidence: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationVerdict {
    pub pass: bool,
    pub critique: String,
    pub suggested_patch: Option<String>,
}

/// §3 `DebateSession`. Once `status` reaches a terminal value, every
/// other field is treated as immutable by convention — nothing in this
/// module mutates a session past that point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateSession {
    pub id: String,
    pub topic: String,
    pub model: String,
    pub status: DebateStatus,
    pub participants: Vec<String>,
    pub rounds: Vec<DebateRound>,
    pub consensus: Option<String>,
    pub confidence: Option<f64>,
    pub validation: Option<ValidationVerdict>,
    pub started_at_ms: i64,
    pub ended_at_ms: Option<i64>,
    pub error: Option<String>,
    pub spec: EnsembleSpec,
}

impl DebateSession {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, DebateStatus::Completed | DebateStatus::Failed | DebateStatus::Cancelled)
    }
}
