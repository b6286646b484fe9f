//! `GET /v1/providers` (§6). Renders the registry's live snapshot —
//! score, health bucket, and circuit state per provider — for operator
//! and debugging use.

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use axum::{Extension, http::StatusCode};
use serde::Serialize;

use crate::auth::AuthPrincipal;
use crate::registry::{CircuitState, HealthStatus};

use super::super::errors::GatewayError;
use super::super::middleware::check_scopes;
use super::super::AppState;

#[derive(Serialize)]
struct ProviderSummary {
    id: String,
    vendor_family: String,
    score: f64,
    status: &'static str,
    circuit: &'static str,
}

fn status_str(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Healthy => "healthy",
        HealthStatus::Degraded => "degraded",
        HealthStatus::Unhealthy => "unhealthy",
        HealthStatus::Unknown => "unknown",
    }
}

fn circuit_str(state: CircuitState) -> &'static str {
    match state {
        CircuitState::Closed => "closed",
        CircuitState::Open => "open",
        CircuitState::HalfOpen => "half_open",
    }
}

pub async fn list(State(state): State<AppState>, Extension(principal): Extension<AuthPrincipal>) -> Result<Response, GatewayError> {
    check_scopes(&principal, &["admin"])?;

    let summaries: Vec<ProviderSummary> = state
        .registry
        .snapshot()
        .into_iter()
        .map(|view| ProviderSummary {
            id: view.id,
            vendor_family: view.vendor_family,
            score: view.score,
            status: status_str(view.status),
            circuit: circuit_str(view.circuit),
        })
        .collect();

    Ok((StatusCode::OK, Json(summaries)).into_response())
}
