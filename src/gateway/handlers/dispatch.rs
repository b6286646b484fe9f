//! Shared single-provider dispatch: select a fallback chain, try each
//! candidate in order, and record the outcome against the registry
//! (§4.8 pipeline step 8, §4.1 circuit/score feedback).

use std::time::Instant;

use crate::error::{HelixError, HelixResult};
use crate::providers::types::ChatRequest;
use crate::providers::{Provider, ProviderError};
use crate::selection::SelectionRequest;

use super::super::AppState;

/// Runs `request` against the fallback chain for `selection_request`,
/// short-circuiting on the first provider that succeeds. A transient or
/// rate-limited failure moves to the next candidate; anything else is
/// returned immediately (§7 "Transient ... retry-next-provider",
/// everything else "not retried").
pub async fn dispatch_chat(state: &AppState, selection_request: &SelectionRequest, request: ChatRequest) -> HelixResult<(crate::providers::types::ChatResponse, String)> {
    let chain = state.selection.fallback_chain(selection_request)?;
    let mut last_err: Option<HelixError> = None;

    for provider_id in &chain {
        if !state.registry.may_call(provider_id) {
            continue;
        }
        let Some(entry) = state.registry.try_get(provider_id) else { continue };
        let started = Instant::now();
        match entry.client.chat(request.clone()).await {
            Ok(resp) => {
                state.registry.report_outcome(provider_id, true, started.elapsed());
                return Ok((resp, provider_id.clone()));
            }
            Err(ProviderError::RateLimited { message, retry_after_secs }) => {
                state.registry.report_rate_limited(provider_id);
                last_err = Some(HelixError::RateLimited { message, retry_after_secs });
            }
            Err(e @ (ProviderError::Transient(_) | ProviderError::Unavailable(_))) => {
                state.registry.report_outcome(provider_id, false, started.elapsed());
                last_err = Some(e.into());
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| HelixError::all_failed("every candidate provider failed or was skipped")))
}

/// Same fallback-chain walk for streaming chat; returns the provider's
/// stream handle plus its id (for the SSE handler to record the
/// outcome once the stream completes or errors).
pub async fn dispatch_chat_stream(state: &AppState, selection_request: &SelectionRequest, request: ChatRequest) -> HelixResult<(crate::providers::ProviderStream, String)> {
    let chain = state.selection.fallback_chain(selection_request)?;
    let mut last_err: Option<HelixError> = None;

    for provider_id in &chain {
        if !state.registry.may_call(provider_id) {
            continue;
        }
        let Some(entry) = state.registry.try_get(provider_id) else { continue };
        match entry.client.chat_stream(request.clone()).await {
            Ok(stream) => return Ok((stream, provider_id.clone())),
            Err(ProviderError::RateLimited { message, retry_after_secs }) => {
                state.registry.report_rate_limited(provider_id);
                last_err = Some(HelixError::RateLimited { message, retry_after_secs });
            }
            Err(e @ (ProviderError::Transient(_) | ProviderError::Unavailable(_))) => {
                state.registry.report_outcome(provider_id, false, Instant::now().elapsed());
                last_err = Some(e.into());
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(last_err.unwrap_or_else(|| HelixError::all_failed("every candidate provider failed or was skipped")))
}
