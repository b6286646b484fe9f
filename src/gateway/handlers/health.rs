//! `GET /health` (§6). Public, unauthenticated liveness probe: reports
//! the process is up and gives a cheap summary of registered provider
//! health so a load balancer or operator can see degraded state without
//! hitting an authenticated endpoint.

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use axum::http::StatusCode;
use serde::Serialize;

use super::super::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    providers_total: usize,
    providers_healthy: usize,
}

pub async fn check(State(state): State<AppState>) -> Response {
    let snapshot = state.registry.snapshot();
    let healthy = snapshot
        .iter()
        .filter(|p| matches!(p.status, crate::registry::HealthStatus::Healthy))
        .count();

    let body = HealthResponse {
        status: "ok",
        providers_total: snapshot.len(),
        providers_healthy: healthy,
    };
    (StatusCode::OK, Json(body)).into_response()
}
