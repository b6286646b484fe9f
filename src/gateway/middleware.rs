//! Admit → authenticate → authorize → rate-limit, as one axum
//! middleware layer (§4.8 pipeline steps 1-4).
//!
//! Generalizes the teacher's single shared-secret `require_bearer`
//! (`a2a/server.rs`) into the dual JWT/API-key scheme [`crate::auth`]
//! implements, plus a per-principal rate-limit check this crate adds on
//! top.

use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::auth::{AuthHeaders, AuthPrincipal};
use crate::error::HelixError;

use super::errors::GatewayError;
use super::AppState;

fn extract_headers<B>(req: &Request<B>) -> AuthHeaders {
    let bearer_token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    let api_key = req.headers().get("x-api-key").and_then(|v| v.to_str().ok()).map(str::to_string);
    AuthHeaders { bearer_token, api_key }
}

/// Authenticates the request, checks its rate-limit bucket, and attaches
/// the resolved [`AuthPrincipal`] to request extensions for downstream
/// handlers and the scope-gate middleware to read.
pub async fn authenticate(State(state): State<AppState>, mut req: Request<axum::body::Body>, next: Next) -> Result<Response, GatewayError> {
    let headers = extract_headers(&req);
    let principal = state.authenticator.authenticate(&headers)?;

    if let Some(wait) = state.rate_limiter.check(&principal.subject) {
        return Err(HelixError::RateLimited { message: "rate limit exceeded".to_string(), retry_after_secs: Some(wait.as_secs().max(1)) }.into());
    }

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

/// Route-level scope gate; wrap a router with
/// `.layer(middleware::from_fn_with_state(state, require_scopes(&["chat"])))`
/// is not directly expressible with a closure capturing `&[&str]`
/// across axum's `Copy` bound, so handlers call [`check_scopes`]
/// directly instead — mirroring how `RequireScopes` was designed to be
/// framework-agnostic in the first place.
pub fn check_scopes(principal: &AuthPrincipal, required: &[&str]) -> Result<(), HelixError> {
    crate::auth::RequireScopes::new(required.iter().copied()).check(principal)
}
