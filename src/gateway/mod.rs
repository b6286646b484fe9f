//! HTTP Gateway (C8): the OpenAI-compatible public surface in front of
//! every other component (§4.8).
//!
//! Generalizes the teacher's `a2a/server.rs` — one `AppState` struct, a
//! `build_router` free function, a `serve` entrypoint that binds and
//! runs `axum::serve` — from a single JSON-RPC endpoint guarded by one
//! shared secret into the full `/v1/*` surface guarded by
//! [`crate::auth::Authenticator`] and a rate limiter.

pub mod errors;
mod handlers;
pub mod middleware;
pub mod openai;
pub mod rate_limit;
pub mod sse;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::{Router, middleware as axum_middleware};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::Authenticator;
use crate::cache::Cache;
use crate::config::Config;
use crate::credentials::CredentialManager;
use crate::debate::{DebateOrchestrator, EnsembleSpec};
use crate::events::EventBus;
use crate::registry::Registry;
use crate::selection::SelectionEngine;
use crate::tasks::TaskEngine;

use rate_limit::RateLimiter;

/// Everything a handler needs, shared behind `Arc` so cloning `AppState`
/// for axum's `State` extractor is cheap.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub selection: Arc<SelectionEngine>,
    pub cache: Arc<Cache>,
    pub events: Arc<EventBus>,
    pub tasks: Arc<TaskEngine>,
    pub debate: Arc<DebateOrchestrator>,
    pub credentials: Arc<CredentialManager>,
    pub authenticator: Arc<Authenticator>,
    pub rate_limiter: Arc<RateLimiter>,
    pub debate_defaults: EnsembleSpec,
    pub max_per_vendor: usize,
    /// Cancellation tokens for in-flight async debates, keyed by session
    /// id, so a future cancel path (or process shutdown) can stop a
    /// debate that's mid-run rather than letting it run to completion
    /// after the caller has gone away.
    pub debate_cancels: Arc<DashMap<String, CancellationToken>>,
    pub cache_default_ttl: Duration,
}

/// Builds the full router: public health check, everything else behind
/// the authenticate-and-rate-limit middleware.
pub fn build_router(state: AppState, allowed_origins: &[String]) -> Router {
    let cors = if allowed_origins.is_empty() {
        CorsLayer::permissive()
    } else {
        let origins: Vec<_> = allowed_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new().allow_origin(AllowOrigin::list(origins))
    };

    let protected = Router::new()
        .route("/v1/chat/completions", post(handlers::chat::completions))
        .route("/v1/completions", post(handlers::chat::legacy_completions))
        .route("/v1/embeddings", post(handlers::chat::embeddings))
        .route("/v1/models", get(handlers::models::list))
        .route("/v1/debates", post(handlers::debates::create))
        .route("/v1/debates/{id}", get(handlers::debates::get))
        .route("/v1/debates/{id}/events", get(handlers::debates::events))
        .route("/v1/providers", get(handlers::providers::list))
        .route("/v1/tasks", post(handlers::tasks::create))
        .route("/v1/tasks/{id}", get(handlers::tasks::get))
        .route("/v1/tasks/{id}/events", get(handlers::tasks::events))
        .route_layer(axum_middleware::from_fn_with_state(state.clone(), middleware::authenticate));

    Router::new()
        .route("/health", get(handlers::health::check))
        .merge(protected)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Runs the gateway to completion, stopping and draining in-flight
/// requests when `shutdown` is cancelled (§4.8 "graceful shutdown").
///
/// Returns `Ok(true)` if the drain deadline (`gateway.drain_seconds`)
/// elapsed before every in-flight request finished, so the caller can
/// map that to the "terminated by signal after drain timeout exceeded"
/// exit code rather than a clean shutdown.
pub async fn serve(config: &Config, state: AppState, shutdown: CancellationToken) -> anyhow::Result<bool> {
    let app = build_router(state, &config.gateway.allowed_origins).layer(DefaultBodyLimit::max(config.gateway.max_body_bytes));

    let addr: std::net::SocketAddr = config
        .gateway
        .listen_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen address {}: {}", config.gateway.listen_addr, e))?;

    tracing::info!(%addr, "gateway listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let drain_seconds = config.gateway.drain_seconds;
    let graceful_shutdown = shutdown.clone();
    let server = axum::serve(listener, app.into_make_service()).with_graceful_shutdown(async move {
        graceful_shutdown.cancelled().await;
        tracing::info!(drain_seconds, "shutdown signalled, draining in-flight requests");
    });

    let handle = tokio::spawn(server);
    shutdown.cancelled().await;

    match tokio::time::timeout(Duration::from_secs(drain_seconds), handle).await {
        Ok(Ok(Ok(()))) => Ok(false),
        Ok(Ok(Err(e))) => Err(e.into()),
        Ok(Err(join_err)) => Err(join_err.into()),
        Err(_) => {
            tracing::warn!(drain_seconds, "drain timeout exceeded, forcing shutdown");
            Ok(true)
        }
    }
}
