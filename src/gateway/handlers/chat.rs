//! `POST /v1/chat/completions`, `/v1/completions`, `/v1/embeddings`
//! (§6). Implements the full pipeline: authorize → validate →
//! fingerprint+cache → single-flight → dispatch → stream-or-marshal.

use std::time::Duration;

use axum::extract::State;
use axum::response::sse::Sse;
use axum::response::{IntoResponse, Json, Response};
use axum::{Extension, http::StatusCode};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthPrincipal;
use crate::cache::fingerprint::{FingerprintInput, fingerprint};
use crate::debate::DebateRequest;
use crate::error::HelixError;
use crate::selection::SelectionRequest;

use super::super::errors::GatewayError;
use super::super::middleware::check_scopes;
use super::super::openai::{
    ChatCompletionRequest, CompletionsRequest, EmbeddingsRequest, chat_response_from_text, chat_response_to_wire, completions_response_to_wire, embeddings_response_to_wire,
    stream_event_to_chunk, whole_message_chunk,
};
use super::super::sse::{done_frame, error_frame, frame, keep_alive};
use super::super::AppState;
use super::dispatch::{dispatch_chat, dispatch_chat_stream};

fn validate(model: &str, has_messages: bool) -> Result<(), HelixError> {
    if model.trim().is_empty() {
        return Err(HelixError::validation("model must not be empty"));
    }
    if !has_messages {
        return Err(HelixError::validation("messages must not be empty"));
    }
    Ok(())
}

fn selection_request(state: &AppState, model: &str, min: usize, max: usize) -> SelectionRequest {
    SelectionRequest {
        model: model.to_string(),
        min_participants: min,
        max_participants: max,
        max_per_vendor: state.max_per_vendor,
        allow: None,
        deny: Default::default(),
    }
}

pub async fn completions(State(state): State<AppState>, Extension(principal): Extension<AuthPrincipal>, Json(req): Json<ChatCompletionRequest>) -> Result<Response, GatewayError> {
    check_scopes(&principal, &["chat"])?;
    validate(&req.model, !req.messages.is_empty())?;

    let ensemble = req.ensemble.resolve(&state.debate_defaults);
    let model = req.model.clone();
    let stream = req.stream;

    if ensemble.enabled {
        return run_ensemble(&state, model, req, ensemble, stream).await;
    }

    let internal = req.into_internal();
    let sel_request = selection_request(&state, &model, 1, 1);

    if stream {
        return stream_single(state, sel_request, internal).await;
    }

    let messages_json = serde_json::to_string(&internal.messages).unwrap_or_default();
    let key = fingerprint(&FingerprintInput {
        model: &model,
        messages_json: &messages_json,
        tools_json: None,
        temperature: internal.temperature,
        max_tokens: internal.max_tokens,
        response_format: None,
        policy_flags: &[],
    });

    let value = state
        .cache
        .do_or_get(&key, Some(state.cache_default_ttl), vec![format!("model:{model}")], None, {
            let state = state.clone();
            move || async move {
                let (resp, provider_id) = dispatch_chat(&state, &sel_request, internal).await?;
                state.events.publish(crate::events::Event {
                    topic: crate::events::topics::PROVIDER.to_string(),
                    kind: "provider.dispatched".to_string(),
                    data: serde_json::json!({"provider_id": provider_id, "model": resp.model}),
                });
                serde_json::to_value(chat_response_to_wire(resp)).map_err(|e| HelixError::internal(e.to_string()))
            }
        })
        .await?;

    Ok((StatusCode::OK, Json(value)).into_response())
}

async fn run_ensemble(state: &AppState, model: String, req: ChatCompletionRequest, ensemble: crate::debate::EnsembleSpec, stream: bool) -> Result<Response, GatewayError> {
    let internal = req.into_internal();
    let session_id = uuid::Uuid::new_v4().to_string();
    let cancel = CancellationToken::new();
    state.debate_cancels.insert(session_id.clone(), cancel.clone());

    let request = DebateRequest {
        id: Some(session_id.clone()),
        model: model.clone(),
        messages: internal.messages,
        spec: ensemble,
        allow: None,
        deny: Default::default(),
        max_per_vendor: state.max_per_vendor,
    };
    let session = state.debate.run(request, cancel).await;
    state.debate_cancels.remove(&session_id);

    let session = session?;
    let consensus = session.consensus.unwrap_or_default();

    if stream {
        let id = format!("chatcmpl-{session_id}");
        let model = model.clone();
        let chunk = whole_message_chunk(&id, &model, consensus);
        let events = vec![
            frame("message", 0, &serde_json::to_value(&chunk).unwrap_or_default()),
            done_frame(),
        ];
        let stream = futures::stream::iter(events);
        return Ok(Sse::new(stream).keep_alive(keep_alive()).into_response());
    }

    Ok((StatusCode::OK, Json(chat_response_from_text(&model, consensus))).into_response())
}

async fn stream_single(state: AppState, sel_request: SelectionRequest, internal: crate::providers::types::ChatRequest) -> Result<Response, GatewayError> {
    let model = internal.model.clone();
    let (provider_stream, provider_id) = dispatch_chat_stream(&state, &sel_request, internal).await?;
    let id = format!("chatcmpl-{}", uuid::Uuid::new_v4());

    let events = provider_stream.enumerate().map(move |(i, item)| match item {
        Ok(event) => match stream_event_to_chunk(&id, &model, &event) {
            Some(chunk) => frame("message", i as u64, &serde_json::to_value(&chunk).unwrap_or_default()),
            None => frame("ping", i as u64, &serde_json::json!({})),
        },
        Err(e) => {
            let helix: HelixError = e.into();
            error_frame(&helix.to_string(), helix.code().as_str())
        }
    });

    let registry = state.registry.clone();
    let final_event = futures::stream::once(async move {
        registry.report_outcome(&provider_id, true, Duration::from_secs(0));
        done_frame()
    });

    let combined = events.chain(final_event);
    Ok(Sse::new(combined).keep_alive(keep_alive()).into_response())
}

pub async fn legacy_completions(State(state): State<AppState>, Extension(principal): Extension<AuthPrincipal>, Json(req): Json<CompletionsRequest>) -> Result<Response, GatewayError> {
    check_scopes(&principal, &["chat"])?;
    validate(&req.model, !req.prompt.trim().is_empty())?;

    let internal = crate::providers::types::ChatRequest {
        model: req.model.clone(),
        system: None,
        messages: vec![crate::providers::types::ChatMessage::text(crate::providers::types::Role::User, req.prompt.clone())],
        tools: None,
        temperature: req.temperature,
        max_tokens: req.max_tokens,
        stream: req.stream,
    };
    let sel_request = selection_request(&state, &req.model, 1, 1);

    if req.stream {
        return stream_single(state, sel_request, internal).await;
    }

    let (resp, provider_id) = dispatch_chat(&state, &sel_request, internal).await?;
    state.registry.report_outcome(&provider_id, true, Duration::from_secs(0));
    Ok((StatusCode::OK, Json(completions_response_to_wire(resp))).into_response())
}

pub async fn embeddings(State(state): State<AppState>, Extension(principal): Extension<AuthPrincipal>, Json(req): Json<EmbeddingsRequest>) -> Result<Response, GatewayError> {
    check_scopes(&principal, &["embeddings"])?;
    if req.model.trim().is_empty() {
        return Err(HelixError::validation("model must not be empty").into());
    }

    let candidates = state.registry.list_by_capability(|c| c.embed);
    let mut last_err: Option<HelixError> = None;
    let texts = req.input.into_vec();

    for entry in &candidates {
        if !state.registry.may_call(&entry.id) {
            continue;
        }
        match entry.client.embed(texts.clone()).await {
            Ok(vectors) => {
                state.registry.report_outcome(&entry.id, true, Duration::from_secs(0));
                return Ok((StatusCode::OK, Json(embeddings_response_to_wire(&req.model, vectors))).into_response());
            }
            Err(e) => {
                state.registry.report_outcome(&entry.id, false, Duration::from_secs(0));
                last_err = Some(e.into());
            }
        }
    }

    Err(last_err.unwrap_or_else(|| HelixError::no_providers("no provider supports embeddings")).into())
}
