//! `POST /v1/tasks`, `GET /v1/tasks/{id}`, `GET /v1/tasks/{id}/events`
//! (§6). Mirrors the debate handlers' async-submission and
//! event-stream-by-id shape, but delegates to the task engine (C6)
//! instead of the orchestrator.

use axum::extract::{Path, State};
use axum::response::sse::Sse;
use axum::response::{IntoResponse, Json, Response};
use axum::{Extension, http::StatusCode};
use futures::StreamExt;

use crate::auth::AuthPrincipal;
use crate::error::HelixError;
use crate::tasks::NewTask;

use super::super::errors::GatewayError;
use super::super::middleware::check_scopes;
use super::super::sse::{frame, keep_alive};
use super::super::AppState;

#[derive(Debug, serde::Deserialize)]
pub struct CreateTaskRequest {
    pub task_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: Option<u8>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

#[derive(Debug, serde::Serialize)]
struct CreateTaskResponse {
    #[serde(rename = "taskId")]
    task_id: String,
}

pub async fn create(State(state): State<AppState>, Extension(principal): Extension<AuthPrincipal>, Json(req): Json<CreateTaskRequest>) -> Result<Response, GatewayError> {
    check_scopes(&principal, &["tasks"])?;
    if req.task_type.trim().is_empty() {
        return Err(HelixError::validation("task_type must not be empty").into());
    }

    let mut spec = NewTask::new(req.task_type, req.payload);
    if let Some(priority) = req.priority {
        spec.priority = priority;
    }
    if let Some(max_retries) = req.max_retries {
        spec.max_retries = max_retries;
    }

    let task_id = state.tasks.submit(spec).map_err(HelixError::from)?;
    Ok((StatusCode::ACCEPTED, Json(CreateTaskResponse { task_id })).into_response())
}

pub async fn get(State(state): State<AppState>, Extension(principal): Extension<AuthPrincipal>, Path(id): Path<String>) -> Result<Response, GatewayError> {
    check_scopes(&principal, &["tasks"])?;
    match state.tasks.get(&id) {
        Some(task) => Ok((StatusCode::OK, Json(task)).into_response()),
        None => Err(HelixError::not_found(format!("unknown task: {id}")).into()),
    }
}

pub async fn events(State(state): State<AppState>, Extension(principal): Extension<AuthPrincipal>, Path(id): Path<String>) -> Result<Response, GatewayError> {
    check_scopes(&principal, &["tasks"])?;
    if state.tasks.get(&id).is_none() {
        return Err(HelixError::not_found(format!("unknown task: {id}")).into());
    }

    let rx = state.events.subscribe(crate::events::topics::TASK);
    let stream = tokio_stream::wrappers::BroadcastStream::new(rx).enumerate().filter_map(move |(i, item)| {
        let id = id.clone();
        async move {
            let event = item.ok()?;
            if event.data.get("task_id").and_then(|v| v.as_str()) != Some(id.as_str()) {
                return None;
            }
            Some(frame(&event.kind, i as u64, &event.data))
        }
    });

    Ok(Sse::new(stream).keep_alive(keep_alive()).into_response())
}
