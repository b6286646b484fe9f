//! OpenAI-compatible wire types for the gateway's public surface.
//!
//! Mirrors the shapes [`crate::providers::openai_compatible`] already
//! speaks to upstreams, but for the *downstream*, caller-facing side:
//! `/v1/chat/completions`, `/v1/completions`, `/v1/embeddings`, and
//! `/v1/models`. The vendor extension `ensemble` field is this crate's
//! own addition, read by the chat handler to opt a request into the
//! debate orchestrator instead of the single-provider fallback chain.

use serde::{Deserialize, Serialize};

use crate::debate::{EnsembleSpec, FusionStrategy};
use crate::providers::types::{ChatMessage, ChatRequest, ChatResponse, ContentBlock, Role, StopReason, StreamEvent};

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireChatMessage {
    pub role: String,
    pub content: String,
}

fn parse_role(role: &str) -> Role {
    match role {
        "system" => Role::System,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        _ => Role::User,
    }
}

/// Caller-supplied ensemble request; every field optional so a client
/// can opt in with just `{"enabled": true}` and take the server's
/// configured defaults for everything else.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireEnsembleSpec {
    #[serde(default)]
    pub enabled: bool,
    pub min_participants: Option<usize>,
    pub max_participants: Option<usize>,
    pub rounds: Option<u32>,
    pub strategy: Option<String>,
    pub validation_passes: Option<u32>,
    pub early_stop_confidence: Option<f64>,
    pub allow_degraded: Option<bool>,
    pub require_validation: Option<bool>,
}

impl WireEnsembleSpec {
    /// Overlays the caller's overrides onto the server's configured
    /// defaults (§4.6 `DebateConfigDefaults`).
    pub fn resolve(&self, defaults: &EnsembleSpec) -> EnsembleSpec {
        EnsembleSpec {
            enabled: self.enabled,
            min_participants: self.min_participants.unwrap_or(defaults.min_participants),
            max_participants: self.max_participants.unwrap_or(defaults.max_participants),
            rounds: self.rounds.unwrap_or(defaults.rounds),
            strategy: self.strategy.as_deref().map(parse_strategy).unwrap_or(defaults.strategy),
            validation_passes: self.validation_passes.unwrap_or(defaults.validation_passes),
            timeout_per_round: defaults.timeout_per_round,
            early_stop_confidence: self.early_stop_confidence.unwrap_or(defaults.early_stop_confidence),
            allow_degraded: self.allow_degraded.unwrap_or(defaults.allow_degraded),
            require_validation: self.require_validation.unwrap_or(defaults.require_validation),
        }
    }
}

fn parse_strategy(s: &str) -> FusionStrategy {
    match s {
        "weighted" => FusionStrategy::Weighted,
        "judge" => FusionStrategy::Judge,
        "deliberative" => FusionStrategy::Deliberative,
        _ => FusionStrategy::Majority,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<WireChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub ensemble: WireEnsembleSpec,
}

impl ChatCompletionRequest {
    /// Splits off the first `system` message (if any) and converts the
    /// rest into the internal wire-agnostic [`ChatMessage`] shape.
    pub fn into_internal(self) -> ChatRequest {
        let mut system = None;
        let mut messages = Vec::with_capacity(self.messages.len());
        for m in self.messages {
            let role = parse_role(&m.role);
            if role == Role::System && system.is_none() {
                system = Some(m.content);
                continue;
            }
            messages.push(ChatMessage::text(role, m.content));
        }
        ChatRequest {
            model: self.model,
            system,
            messages,
            tools: None,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: self.stream,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WireUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl From<crate::providers::types::TokenUsage> for WireUsage {
    fn from(u: crate::providers::types::TokenUsage) -> Self {
        Self { prompt_tokens: u.input_tokens, completion_tokens: u.output_tokens, total_tokens: u.input_tokens + u.output_tokens }
    }
}

#[derive(Debug, Serialize)]
pub struct ResponseMessage {
    pub role: &'static str,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ResponseMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: WireUsage,
}

fn finish_reason(r: Option<StopReason>) -> &'static str {
    match r {
        Some(StopReason::MaxTokens) => "length",
        Some(StopReason::ToolUse) => "tool_calls",
        Some(StopReason::EndTurn) | None => "stop",
    }
}

pub fn chat_response_to_wire(resp: ChatResponse) -> ChatCompletionResponse {
    ChatCompletionResponse {
        id: resp.id,
        object: "chat.completion",
        created: now_unix(),
        model: resp.model,
        usage: resp.usage.into(),
        choices: vec![ChatChoice {
            index: 0,
            finish_reason: finish_reason(resp.stop_reason),
            message: ResponseMessage { role: "assistant", content: resp.text() },
        }],
    }
}

/// Builds a single-choice chat completion from a consensus string,
/// used to hand an ensemble's synthesized answer back through the same
/// wire shape as a single-provider call.
pub fn chat_response_from_text(model: &str, text: String) -> ChatCompletionResponse {
    ChatCompletionResponse {
        id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        object: "chat.completion",
        created: now_unix(),
        model: model.to_string(),
        usage: WireUsage { prompt_tokens: 0, completion_tokens: 0, total_tokens: 0 },
        choices: vec![ChatChoice { index: 0, finish_reason: "stop", message: ResponseMessage { role: "assistant", content: text } }],
    }
}

#[derive(Debug, Serialize, Default)]
pub struct DeltaContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: DeltaContent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

/// Translates one provider [`StreamEvent`] into an OpenAI delta chunk.
/// Returns `None` for events with no caller-visible wire representation
/// (e.g. `Ping`).
pub fn stream_event_to_chunk(id: &str, model: &str, event: &StreamEvent) -> Option<ChatCompletionChunk> {
    let choice = match event {
        StreamEvent::MessageStart { .. } => ChunkChoice { index: 0, delta: DeltaContent { role: Some("assistant"), content: None }, finish_reason: None },
        StreamEvent::ContentBlockDelta { delta: crate::providers::types::ContentDelta::TextDelta { text }, .. } => {
            ChunkChoice { index: 0, delta: DeltaContent { role: None, content: Some(text.clone()) }, finish_reason: None }
        }
        StreamEvent::MessageDelta { stop_reason, .. } => {
            ChunkChoice { index: 0, delta: DeltaContent::default(), finish_reason: Some(finish_reason(*stop_reason)) }
        }
        StreamEvent::ContentBlockStart { .. } | StreamEvent::MessageStop | StreamEvent::Ping => return None,
    };
    Some(ChatCompletionChunk { id: id.to_string(), object: "chat.completion.chunk", created: now_unix(), model: model.to_string(), choices: vec![choice] })
}

/// A single synthetic chunk carrying a whole completed message, used to
/// stream an ensemble's synthesis result "after the fact" (§4.7
/// "streaming is only meaningful after synthesis completes").
pub fn whole_message_chunk(id: &str, model: &str, text: String) -> ChatCompletionChunk {
    ChatCompletionChunk {
        id: id.to_string(),
        object: "chat.completion.chunk",
        created: now_unix(),
        model: model.to_string(),
        choices: vec![ChunkChoice { index: 0, delta: DeltaContent { role: Some("assistant"), content: Some(text) }, finish_reason: Some("stop") }],
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CompletionsRequest {
    pub model: String,
    pub prompt: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Serialize)]
pub struct CompletionChoice {
    pub text: String,
    pub index: u32,
    pub finish_reason: &'static str,
}

#[derive(Debug, Serialize)]
pub struct CompletionsResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
    pub usage: WireUsage,
}

pub fn completions_response_to_wire(resp: ChatResponse) -> CompletionsResponse {
    CompletionsResponse {
        id: resp.id,
        object: "text_completion",
        created: now_unix(),
        model: resp.model,
        usage: resp.usage.into(),
        choices: vec![CompletionChoice { text: resp.text(), index: 0, finish_reason: finish_reason(resp.stop_reason) }],
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    One(String),
    Many(Vec<String>),
}

impl EmbeddingInput {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            EmbeddingInput::One(s) => vec![s],
            EmbeddingInput::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsRequest {
    pub model: String,
    pub input: EmbeddingInput,
}

#[derive(Debug, Serialize)]
pub struct EmbeddingObject {
    pub object: &'static str,
    pub embedding: Vec<f32>,
    pub index: usize,
}

#[derive(Debug, Serialize)]
pub struct EmbeddingsResponse {
    pub object: &'static str,
    pub data: Vec<EmbeddingObject>,
    pub model: String,
    pub usage: WireUsage,
}

pub fn embeddings_response_to_wire(model: &str, vectors: Vec<Vec<f32>>) -> EmbeddingsResponse {
    let data = vectors
        .into_iter()
        .enumerate()
        .map(|(index, embedding)| EmbeddingObject { object: "embedding", embedding, index })
        .collect();
    EmbeddingsResponse { object: "list", data, model: model.to_string(), usage: WireUsage { prompt_tokens: 0, completion_tokens: 0, total_tokens: 0 } }
}

#[derive(Debug, Serialize)]
pub struct ModelObject {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub owned_by: String,
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub object: &'static str,
    pub data: Vec<ModelObject>,
}

pub fn text_content_block(text: impl Into<String>) -> ContentBlock {
    ContentBlock::Text { text: text.into() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_message_is_split_out() {
        let req = ChatCompletionRequest {
            model: "gpt-x".to_string(),
            messages: vec![
                WireChatMessage { role: "system".to_string(), content: "be terse".to_string() },
                WireChatMessage { role: "user".to_string(), content: "hi".to_string() },
            ],
            temperature: None,
            max_tokens: None,
            stream: false,
            ensemble: WireEnsembleSpec::default(),
        };
        let internal = req.into_internal();
        assert_eq!(internal.system.as_deref(), Some("be terse"));
        assert_eq!(internal.messages.len(), 1);
    }

    #[test]
    fn embedding_input_untagged_accepts_single_string() {
        let parsed: EmbeddingsRequest = serde_json::from_value(serde_json::json!({"model": "m", "input": "hello"})).unwrap();
        assert_eq!(parsed.input.into_vec(), vec!["hello".to_string()]);
    }
}
