//! `POST /v1/debates`, `GET /v1/debates/{id}`, `GET /v1/debates/{id}/events`
//! (§6). Submission is asynchronous: the session id is generated and
//! handed back before the orchestrator has necessarily finished (or
//! even started), mirroring the teacher's `message/stream` task
//! creation in `a2a/handler/stream.rs`.

use axum::extract::{Path, State};
use axum::response::sse::Sse;
use axum::response::{IntoResponse, Json, Response};
use axum::{Extension, http::StatusCode};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::auth::AuthPrincipal;
use crate::debate::DebateRequest;
use crate::error::HelixError;
use crate::providers::types::{ChatMessage, Role};

use super::super::errors::GatewayError;
use super::super::middleware::check_scopes;
use super::super::sse::{frame, keep_alive};
use super::super::AppState;

#[derive(Debug, serde::Deserialize)]
pub struct CreateDebateRequest {
    pub model: String,
    pub messages: Vec<super::super::openai::WireChatMessage>,
    #[serde(default)]
    pub ensemble: super::super::openai::WireEnsembleSpec,
}

#[derive(Debug, serde::Serialize)]
struct CreateDebateResponse {
    #[serde(rename = "sessionId")]
    session_id: String,
}

fn parse_role(role: &str) -> Role {
    match role {
        "system" => Role::System,
        "assistant" => Role::Assistant,
        "tool" => Role::Tool,
        _ => Role::User,
    }
}

pub async fn create(State(state): State<AppState>, Extension(principal): Extension<AuthPrincipal>, Json(req): Json<CreateDebateRequest>) -> Result<Response, GatewayError> {
    check_scopes(&principal, &["debates"])?;
    if req.model.trim().is_empty() {
        return Err(HelixError::validation("model must not be empty").into());
    }
    if req.messages.is_empty() {
        return Err(HelixError::validation("messages must not be empty").into());
    }

    let ensemble = req.ensemble.resolve(&state.debate_defaults);
    let messages: Vec<ChatMessage> = req.messages.into_iter().map(|m| ChatMessage::text(parse_role(&m.role), m.content)).collect();

    let session_id = uuid::Uuid::new_v4().to_string();
    let cancel = CancellationToken::new();
    state.debate_cancels.insert(session_id.clone(), cancel.clone());

    let request = DebateRequest {
        id: Some(session_id.clone()),
        model: req.model,
        messages,
        spec: ensemble,
        allow: None,
        deny: Default::default(),
        max_per_vendor: state.max_per_vendor,
    };

    let spawned_state = state.clone();
    let spawned_id = session_id.clone();
    tokio::spawn(async move {
        let result = spawned_state.debate.run(request, cancel).await;
        spawned_state.debate_cancels.remove(&spawned_id);
        if let Err(e) = result {
            tracing::warn!(session_id = %spawned_id, error = %e, "debate run failed");
        }
    });

    Ok((StatusCode::ACCEPTED, Json(CreateDebateResponse { session_id })).into_response())
}

pub async fn get(State(state): State<AppState>, Extension(principal): Extension<AuthPrincipal>, Path(id): Path<String>) -> Result<Response, GatewayError> {
    check_scopes(&principal, &["debates"])?;
    match state.debate.get_session(&id).await {
        Some(session) => Ok((StatusCode::OK, Json(session)).into_response()),
        None => Err(HelixError::not_found(format!("unknown debate session: {id}")).into()),
    }
}

pub async fn events(State(state): State<AppState>, Extension(principal): Extension<AuthPrincipal>, Path(id): Path<String>) -> Result<Response, GatewayError> {
    check_scopes(&principal, &["debates"])?;
    if state.debate.get_session(&id).await.is_none() && !state.debate_cancels.contains_key(&id) {
        return Err(HelixError::not_found(format!("unknown debate session: {id}")).into());
    }

    let rx = state.events.subscribe(crate::events::topics::DEBATE);
    let stream = tokio_stream::wrappers::BroadcastStream::new(rx).enumerate().filter_map(move |(i, item)| {
        let id = id.clone();
        async move {
            let event = item.ok()?;
            if event.data.get("session_id").and_then(|v| v.as_str()) != Some(id.as_str()) {
                return None;
            }
            Some(frame(&event.kind, i as u64, &event.data))
        }
    });

    Ok(Sse::new(stream).keep_alive(keep_alive()).into_response())
}
