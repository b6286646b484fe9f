//! Provider implementation for any OpenAI-compatible chat completions
//! API: official OpenAI, OpenRouter, local LLMs via LM Studio/Ollama, or
//! any endpoint speaking the same wire protocol.

use async_trait::async_trait;
use futures::stream::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::error::ProviderError;
use super::types::*;
use super::{Provider, ProviderCapabilities, ProviderResult, ProviderStream};
use crate::utils::retry::{RetryConfig, retry_with_check};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

#[derive(Clone)]
pub struct OpenAIProvider {
    id: String,
    api_key: Option<String>,
    base_url: String,
    client: Client,
    default_model: String,
}

impl OpenAIProvider {
    pub fn new(id: impl Into<String>, api_key: String, base_url: String, default_model: String) -> Self {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .pool_idle_timeout(DEFAULT_POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(4)
            .build()
            .expect("failed to build HTTP client");
        Self {
            id: id.into(),
            api_key: Some(api_key),
            base_url,
            client,
            default_model,
        }
    }

    /// Construct a provider for a local, key-less endpoint (LM Studio,
    /// Ollama, LocalAI).
    pub fn local(id: impl Into<String>, base_url: String, default_model: String) -> Self {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .pool_idle_timeout(DEFAULT_POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(4)
            .build()
            .expect("failed to build HTTP client");
        Self {
            id: id.into(),
            api_key: None,
            base_url,
            client,
            default_model,
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn models_url(&self) -> String {
        format!("{}/models", self.base_url.trim_end_matches('/'))
    }

    fn headers(&self) -> ProviderResult<reqwest::header::HeaderMap> {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(key) = &self.api_key {
            let clean = key.trim();
            let value: reqwest::header::HeaderValue = format!("Bearer {clean}")
                .parse()
                .map_err(|_| ProviderError::AuthFailed("API key contains invalid characters".into()))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            "application/json".parse().expect("valid content-type"),
        );
        Ok(headers)
    }

    fn to_wire_request(&self, request: &ChatRequest, stream: bool) -> WireRequest {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(WireMessage {
                role: "system".into(),
                content: Some(system.clone()),
                tool_calls: None,
                tool_call_id: None,
            });
        }

        for msg in &request.messages {
            let role = match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::Tool => "tool",
            };

            let mut text_parts = Vec::new();
            let mut tool_uses = Vec::new();
            let mut tool_results = Vec::new();
            for block in &msg.content {
                match block {
                    ContentBlock::Text { text } => text_parts.push(text.clone()),
                    ContentBlock::ToolUse { id, name, input } => {
                        tool_uses.push((id.clone(), name.clone(), input.clone()))
                    }
                    ContentBlock::ToolResult { tool_use_id, content } => {
                        tool_results.push((tool_use_id.clone(), content.clone()))
                    }
                    ContentBlock::Image { .. } => {
                        tracing::warn!("image content blocks not supported by {}", self.id);
                    }
                }
            }

            if !tool_uses.is_empty() {
                let wire_tool_calls = tool_uses
                    .into_iter()
                    .map(|(id, name, input)| WireToolCall {
                        id,
                        r#type: "function".into(),
                        function: WireFunctionCall {
                            name,
                            arguments: serde_json::to_string(&input).unwrap_or_default(),
                        },
                    })
                    .collect();
                messages.push(WireMessage {
                    role: role.into(),
                    content: if text_parts.is_empty() { None } else { Some(text_parts.join("\n")) },
                    tool_calls: Some(wire_tool_calls),
                    tool_call_id: None,
                });
            } else if !tool_results.is_empty() {
                for (tool_use_id, content) in tool_results {
                    messages.push(WireMessage {
                        role: "tool".into(),
                        content: Some(content),
                        tool_calls: None,
                        tool_call_id: Some(tool_use_id),
                    });
                }
            } else {
                messages.push(WireMessage {
                    role: role.into(),
                    content: Some(text_parts.join("\n")),
                    tool_calls: None,
                    tool_call_id: None,
                });
            }
        }

        let tools = request.tools.as_ref().map(|tools| {
            tools
                .iter()
                .map(|t| WireTool {
                    r#type: "function".into(),
                    function: WireFunction {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.input_schema.clone(),
                    },
                })
                .collect()
        });

        WireRequest {
            model: request.model.clone(),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: if stream { Some(true) } else { None },
            stream_options: if stream { Some(StreamOptions { include_usage: true }) } else { None },
            tools,
        }
    }

    fn from_wire_response(&self, response: WireResponse, latency_ms: u64) -> ChatResponse {
        let choice = response.choices.into_iter().next();
        let mut content = Vec::new();
        let mut stop_reason = None;

        if let Some(choice) = choice {
            if let Some(text) = choice.message.content.filter(|c| !c.is_empty()) {
                content.push(ContentBlock::Text { text });
            }
            if let Some(tool_calls) = choice.message.tool_calls {
                for tc in tool_calls {
                    let input = serde_json::from_str(&tc.function.arguments).unwrap_or_else(|_| serde_json::json!({}));
                    content.push(ContentBlock::ToolUse {
                        id: tc.id,
                        name: tc.function.name,
                        input,
                    });
                }
            }
            stop_reason = choice.finish_reason.and_then(|r| match r.as_str() {
                "stop" => Some(StopReason::EndTurn),
                "length" => Some(StopReason::MaxTokens),
                "tool_calls" | "function_call" => Some(StopReason::ToolUse),
                _ => None,
            });
        }

        ChatResponse {
            id: response.id,
            model: response.model,
            content,
            stop_reason,
            usage: TokenUsage {
                input_tokens: response.usage.prompt_tokens.unwrap_or(0),
                output_tokens: response.usage.completion_tokens.unwrap_or(0),
            },
            latency_ms,
        }
    }

    async fn handle_error(&self, response: reqwest::Response) -> ProviderError {
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok());

        if status == 401 || status == 403 {
            return ProviderError::AuthFailed(format!("HTTP {status}"));
        }
        if status == 400 {
            return ProviderError::InvalidRequest(format!("HTTP {status}"));
        }

        if let Ok(body) = response.json::<WireErrorResponse>().await {
            if status == 429 {
                return ProviderError::RateLimited {
                    message: body.error.message,
                    retry_after_secs: retry_after,
                };
            }
            return ProviderError::Transient(format!("HTTP {status}: {}", body.error.message));
        }

        if status == 429 {
            ProviderError::RateLimited {
                message: "rate limited".into(),
                retry_after_secs: retry_after,
            }
        } else if (500..600).contains(&status) {
            ProviderError::Transient(format!("HTTP {status}"))
        } else {
            ProviderError::Unavailable(format!("HTTP {status}"))
        }
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            chat: true,
            chat_stream: true,
            embed: false,
            rerank: false,
            vision: false,
            tools: true,
        }
    }

    async fn chat(&self, request: ChatRequest) -> ProviderResult<ChatResponse> {
        let wire_request = self.to_wire_request(&request, false);
        let retry_config = RetryConfig::default();
        let start = Instant::now();

        tracing::info!(provider = %self.id, model = %wire_request.model, "dispatching chat request");

        let result = retry_with_check(
            || async {
                let response = self
                    .client
                    .post(self.chat_url())
                    .headers(self.headers()?)
                    .json(&wire_request)
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Err(self.handle_error(response).await);
                }
                let wire_response: WireResponse = response.json().await?;
                Ok(wire_response)
            },
            &retry_config,
        )
        .await;

        result.map(|r| self.from_wire_response(r, start.elapsed().as_millis() as u64))
    }

    async fn chat_stream(&self, request: ChatRequest) -> ProviderResult<ProviderStream> {
        let mut wire_request = self.to_wire_request(&request, true);
        wire_request.stream = Some(true);
        let retry_config = RetryConfig::default();

        tracing::info!(provider = %self.id, model = %wire_request.model, "dispatching streaming chat request");

        let response = retry_with_check(
            || async {
                let response = self
                    .client
                    .post(self.chat_url())
                    .headers(self.headers()?)
                    .json(&wire_request)
                    .send()
                    .await?;
                if !response.status().is_success() {
                    return Err(self.handle_error(response).await);
                }
                Ok(response)
            },
            &retry_config,
        )
        .await?;

        let byte_stream = response.bytes_stream();
        let buffer = Arc::new(Mutex::new(String::new()));
        let state = Arc::new(Mutex::new(StreamState {
            emitted_message_start: false,
            tool_calls: HashMap::new(),
        }));

        let event_stream = byte_stream
            .map(move |chunk_result| -> Vec<ProviderResult<StreamEvent>> {
                match chunk_result {
                    Err(e) => vec![Err(ProviderError::Transient(e.to_string()))],
                    Ok(chunk) => {
                        let raw = String::from_utf8_lossy(&chunk);
                        let mut buf = buffer.lock().expect("sse buffer lock poisoned");
                        buf.push_str(&raw);
                        let mut events = Vec::new();
                        let mut st = state.lock().expect("sse state lock poisoned");

                        while let Some(pos) = buf.find('\n') {
                            let line = buf[..pos].trim().to_string();
                            buf.drain(..=pos);
                            let Some(json_str) = line.strip_prefix("data: ") else {
                                continue;
                            };
                            if json_str == "[DONE]" {
                                for (idx, accum) in st.tool_calls.drain() {
                                    let input = serde_json::from_str(&accum.arguments).unwrap_or_else(|_| serde_json::json!({}));
                                    events.push(Ok(StreamEvent::ContentBlockStart {
                                        index: idx,
                                        content_block: ContentBlock::ToolUse { id: accum.id, name: accum.name, input },
                                    }));
                                }
                                events.push(Ok(StreamEvent::MessageStop));
                                continue;
                            }
                            match serde_json::from_str::<WireStreamChunk>(json_str) {
                                Ok(chunk) => {
                                    if !st.emitted_message_start && !chunk.id.is_empty() {
                                        st.emitted_message_start = true;
                                        events.push(Ok(StreamEvent::MessageStart {
                                            message: StreamMessageStart {
                                                id: chunk.id.clone(),
                                                model: chunk.model.clone().unwrap_or_default(),
                                            },
                                        }));
                                    }

                                    let first = chunk.choices.first();
                                    let delta_content = first.and_then(|c| c.delta.as_ref()).and_then(|d| d.content.clone());
                                    if let Some(text) = delta_content.filter(|t| !t.is_empty()) {
                                        events.push(Ok(StreamEvent::ContentBlockDelta {
                                            index: 0,
                                            delta: ContentDelta::TextDelta { text },
                                        }));
                                    }

                                    if let Some(tc_list) = first.and_then(|c| c.delta.as_ref()).and_then(|d| d.tool_calls.as_ref()) {
                                        for tc in tc_list {
                                            let accum = st.tool_calls.entry(tc.index).or_default();
                                            if let Some(id) = tc.id.as_ref().filter(|s| !s.is_empty()) {
                                                accum.id = id.clone();
                                            }
                                            if let Some(func) = &tc.function {
                                                if let Some(name) = func.name.as_ref().filter(|s| !s.is_empty()) {
                                                    accum.name = name.clone();
                                                }
                                                if let Some(args) = &func.arguments {
                                                    accum.arguments.push_str(args);
                                                }
                                            }
                                        }
                                    }

                                    let finish_reason = first.and_then(|c| c.finish_reason.clone());
                                    if let Some(usage) = &chunk.usage {
                                        if finish_reason.is_some() {
                                            let stop_reason = finish_reason.as_deref().map(|r| match r {
                                                "stop" => StopReason::EndTurn,
                                                "length" => StopReason::MaxTokens,
                                                "tool_calls" | "function_call" => StopReason::ToolUse,
                                                _ => StopReason::EndTurn,
                                            });
                                            events.push(Ok(StreamEvent::MessageDelta {
                                                stop_reason,
                                                usage: TokenUsage {
                                                    input_tokens: usage.prompt_tokens.unwrap_or(0),
                                                    output_tokens: usage.completion_tokens.unwrap_or(0),
                                                },
                                            }));
                                        }
                                    }
                                }
                                Err(e) => {
                                    tracing::warn!("failed to parse SSE chunk: {e}");
                                }
                            }
                        }

                        if events.is_empty() { vec![Ok(StreamEvent::Ping)] } else { events }
                    }
                }
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }

    async fn discover_models(&self) -> ProviderResult<Vec<ModelDescriptor>> {
        let headers = self.headers()?;
        let response = self.client.get(self.models_url()).headers(headers).send().await?;
        if !response.status().is_success() {
            return Err(self.handle_error(response).await);
        }
        #[derive(Deserialize)]
        struct Entry {
            id: String,
        }
        #[derive(Deserialize)]
        struct ModelsResponse {
            data: Vec<Entry>,
        }
        let body: ModelsResponse = response.json().await?;
        Ok(body
            .data
            .into_iter()
            .map(|e| ModelDescriptor {
                model_id: e.id.clone(),
                provider_id: self.id.clone(),
                context_window: self.context_window(&e.id).unwrap_or(8_192),
                max_output_tokens: 4_096,
                cost_per_1k_in: 0.0,
                cost_per_1k_out: 0.0,
                supports_streaming: true,
                supports_tools: true,
                supports_vision: false,
                supports_embeddings: false,
            })
            .collect())
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn context_window(&self, model: &str) -> Option<u32> {
        match model {
            "gpt-4-turbo-preview" | "gpt-4-turbo" => Some(128_000),
            "gpt-4" => Some(8_192),
            "gpt-4-32k" => Some(32_768),
            "gpt-3.5-turbo" => Some(4_096),
            "gpt-3.5-turbo-16k" => Some(16_384),
            _ => None,
        }
    }

    fn calculate_cost(&self, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        let (input_cost, output_cost) = match model {
            "gpt-4-turbo-preview" | "gpt-4-turbo" => (10.0, 30.0),
            "gpt-4" => (30.0, 60.0),
            "gpt-4-32k" => (60.0, 120.0),
            "gpt-3.5-turbo" => (0.5, 1.5),
            "gpt-3.5-turbo-16k" => (3.0, 4.0),
            _ => return 0.0,
        };
        (input_tokens as f64 / 1_000_000.0) * input_cost + (output_tokens as f64 / 1_000_000.0) * output_cost
    }
}

#[derive(Debug, Clone, Default)]
struct ToolCallAccum {
    id: String,
    name: String,
    arguments: String,
}

struct StreamState {
    emitted_message_start: bool,
    tool_calls: HashMap<usize, ToolCallAccum>,
}

#[derive(Debug, Clone, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
}

#[derive(Debug, Clone, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    r#type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Clone, Serialize)]
struct WireTool {
    r#type: String,
    function: WireFunction,
}

#[derive(Debug, Clone, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct WireResponse {
    id: String,
    model: String,
    choices: Vec<WireChoice>,
    usage: WireUsage,
}

#[derive(Debug, Clone, Deserialize)]
struct WireChoice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct WireUsage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct WireStreamChunk {
    id: String,
    model: Option<String>,
    choices: Vec<WireStreamChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct WireStreamChoice {
    delta: Option<WireMessageDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct WireMessageDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamingToolCall>>,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamingToolCall {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<StreamingFunctionCall>,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamingFunctionCall {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct WireErrorResponse {
    error: WireError,
}

#[derive(Debug, Clone, Deserialize)]
struct WireError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAIProvider {
        OpenAIProvider::new("openai", "test-key".into(), "https://api.openai.com/v1".into(), "gpt-4".into())
    }

    #[test]
    fn chat_url_is_derived_from_base_url() {
        assert_eq!(provider().chat_url(), "https://api.openai.com/v1/chat/completions");
    }

    #[test]
    fn local_provider_has_no_api_key() {
        let p = OpenAIProvider::local("local", "http://localhost:1234/v1".into(), "llama3".into());
        assert!(p.api_key.is_none());
        assert!(p.headers().unwrap().get(reqwest::header::AUTHORIZATION).is_none());
    }

    #[test]
    fn context_window_known_models() {
        let p = provider();
        assert_eq!(p.context_window("gpt-4"), Some(8_192));
        assert_eq!(p.context_window("unknown-model"), None);
    }

    #[test]
    fn calculate_cost_matches_expected() {
        let p = provider();
        let cost = p.calculate_cost("gpt-3.5-turbo", 1000, 1000);
        assert!((cost - 0.002).abs() < 0.0001);
    }

    #[test]
    fn capabilities_advertise_chat_and_tools() {
        let caps = provider().capabilities();
        assert!(caps.chat);
        assert!(caps.chat_stream);
        assert!(caps.tools);
        assert!(!caps.embed);
    }
}
