//! `GET /v1/models` (§6). Aggregates the model list every registered,
//! currently-callable provider advertises into the OpenAI-compatible
//! `ModelsResponse` envelope.

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use axum::{Extension, http::StatusCode};

use crate::auth::AuthPrincipal;

use super::super::errors::GatewayError;
use super::super::middleware::check_scopes;
use super::super::openai::{ModelObject, ModelsResponse};
use super::super::AppState;

pub async fn list(State(state): State<AppState>, Extension(principal): Extension<AuthPrincipal>) -> Result<Response, GatewayError> {
    check_scopes(&principal, &["models"])?;

    let mut data = Vec::new();
    for entry in state.registry.snapshot() {
        if !state.registry.may_call(&entry.id) {
            continue;
        }
        let Some(provider) = state.registry.try_get(&entry.id) else {
            continue;
        };
        match provider.client.discover_models().await {
            Ok(models) => {
                data.extend(models.into_iter().map(|m| ModelObject {
                    id: m.model_id,
                    object: "model",
                    created: 0,
                    owned_by: entry.id.clone(),
                }));
            }
            Err(e) => {
                tracing::warn!(provider = %entry.id, error = %e, "failed to discover models, falling back to default model");
                data.push(ModelObject {
                    id: provider.client.default_model().to_string(),
                    object: "model",
                    created: 0,
                    owned_by: entry.id.clone(),
                });
            }
        }
    }

    Ok((StatusCode::OK, Json(ModelsResponse { object: "list", data })).into_response())
}
