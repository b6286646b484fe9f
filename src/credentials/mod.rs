//! Credential Manager (C9): proactive OAuth token refresh, serialized
//! per provider, with a last-known-good fallback on refresh failure.
//!
//! Refresh coalescing mirrors [`crate::cache`]'s single-flight guard —
//! concurrent `get_access_token` calls for the same provider attach to
//! one in-flight refresh rather than racing the upstream token
//! endpoint.

mod persistence;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{FutureExt, Shared};
use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;

use crate::db::RelationalStore;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// §3 `OAuthCredentials`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthCredentials {
    pub provider_name: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at_ms: i64,
    pub scopes: Vec<String>,
    pub metadata: serde_json::Value,
}

impl OAuthCredentials {
    fn needs_refresh(&self, threshold: Duration) -> bool {
        now_ms() + threshold.as_millis() as i64 >= self.expires_at_ms
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CredentialError {
    #[error("no credentials on file for provider {0}")]
    NotConfigured(String),
    #[error("refresh failed for {provider}: {message}")]
    RefreshFailed { provider: String, message: String },
}

/// Provider-specific token-refresh implementation. The HTTP exchange
/// against each vendor's token endpoint lives outside this crate's
/// scope; callers register a concrete `OAuthRefresher` per provider at
/// startup.
#[async_trait]
pub trait OAuthRefresher: Send + Sync {
    async fn refresh(&self, current: &OAuthCredentials) -> Result<OAuthCredentials, String>;
}

struct StaleState {
    backoff_until_ms: i64,
}

type PendingRefresh = Shared<futures::future::BoxFuture<'static, Result<OAuthCredentials, String>>>;

pub struct CredentialManager {
    credentials: SyncMutex<HashMap<String, OAuthCredentials>>,
    refreshers: HashMap<String, Arc<dyn OAuthRefresher>>,
    stale: SyncMutex<HashMap<String, StaleState>>,
    inflight: AsyncMutex<HashMap<String, PendingRefresh>>,
    store: Option<Arc<dyn RelationalStore>>,
    refresh_threshold: Duration,
    stale_backoff: Duration,
}

impl CredentialManager {
    pub fn new(refresh_threshold: Duration, stale_backoff: Duration, store: Option<Arc<dyn RelationalStore>>) -> Self {
        Self {
            credentials: SyncMutex::new(HashMap::new()),
            refreshers: HashMap::new(),
            stale: SyncMutex::new(HashMap::new()),
            inflight: AsyncMutex::new(HashMap::new()),
            store,
            refresh_threshold,
            stale_backoff,
        }
    }

    pub fn register_refresher(&mut self, provider_name: impl Into<String>, refresher: Arc<dyn OAuthRefresher>) {
        self.refreshers.insert(provider_name.into(), refresher);
    }

    pub fn seed(&self, credentials: OAuthCredentials) {
        self.credentials.lock().insert(credentials.provider_name.clone(), credentials);
    }

    /// Loads every credential file named in `credential_paths` (§6
    /// `OAUTH_CREDENTIAL_PATHS`) at startup. A missing or malformed file
    /// is logged and skipped — a provider with no loadable credentials
    /// simply has none until an operator supplies them.
    pub fn load_from_paths(&self, credential_paths: &HashMap<String, String>) {
        for (provider_name, path) in credential_paths {
            match std::fs::read_to_string(path) {
                Ok(raw) => match serde_json::from_str::<OAuthCredentials>(&raw) {
                    Ok(creds) => self.seed(creds),
                    Err(e) => tracing::warn!(provider = provider_name, error = %e, "malformed oauth credential file"),
                },
                Err(e) => tracing::warn!(provider = provider_name, path, error = %e, "could not read oauth credential file"),
            }
        }
    }

    /// Restores any credentials persisted from a prior run, letting the
    /// warm database override a stale on-disk seed file for the same
    /// provider.
    pub async fn load_from_store(&self) {
        let Some(store) = &self.store else { return };
        for creds in persistence::load_all_credentials(store.pool()).await {
            self.seed(creds);
        }
    }

    /// `GetAccessToken(provider)`. Refreshes proactively when within
    /// `refreshThreshold` of expiry; concurrent callers for the same
    /// provider share one refresh. A refresh failure marks the
    /// credential stale for `stale_backoff` and returns the last known
    /// token rather than failing the caller, provided one exists.
    pub async fn get_access_token(&self, provider_name: &str) -> Result<String, CredentialError> {
        let current = self
            .credentials
            .lock()
            .get(provider_name)
            .cloned()
            .ok_or_else(|| CredentialError::NotConfigured(provider_name.to_string()))?;

        if !current.needs_refresh(self.refresh_threshold) {
            return Ok(current.access_token);
        }

        if self.in_backoff(provider_name) {
            return Ok(current.access_token);
        }

        match self.refresh(provider_name, &current).await {
            Ok(refreshed) => Ok(refreshed.access_token),
            Err(e) => {
                tracing::warn!(provider = provider_name, error = %e, "oauth refresh failed, serving last known token");
                self.mark_stale(provider_name);
                Ok(current.access_token)
            }
        }
    }

    fn in_backoff(&self, provider_name: &str) -> bool {
        self.stale.lock().get(provider_name).is_some_and(|s| s.backoff_until_ms > now_ms())
    }

    fn mark_stale(&self, provider_name: &str) {
        self.stale.lock().insert(provider_name.to_string(), StaleState { backoff_until_ms: now_ms() + self.stale_backoff.as_millis() as i64 });
    }

    async fn refresh(&self, provider_name: &str, current: &OAuthCredentials) -> Result<OAuthCredentials, CredentialError> {
        let Some(refresher) = self.refreshers.get(provider_name).cloned() else {
            return Err(CredentialError::RefreshFailed { provider: provider_name.to_string(), message: "no refresher registered".to_string() });
        };

        let pending = {
            let mut inflight = self.inflight.lock().await;
            if let Some(existing) = inflight.get(provider_name) {
                existing.clone()
            } else {
                let current = current.clone();
                let fut = async move { refresher.refresh(&current).await }.boxed().shared();
                inflight.insert(provider_name.to_string(), fut.clone());
                fut
            }
        };

        let result = pending.await;
        self.inflight.lock().await.remove(provider_name);

        match result {
            Ok(refreshed) => {
                self.credentials.lock().insert(provider_name.to_string(), refreshed.clone());
                self.stale.lock().remove(provider_name);
                self.persist(&refreshed);
                Ok(refreshed)
            }
            Err(message) => Err(CredentialError::RefreshFailed { provider: provider_name.to_string(), message }),
        }
    }

    fn persist(&self, credentials: &OAuthCredentials) {
        let Some(store) = &self.store else { return };
        let pool = store.pool().clone();
        let credentials = credentials.clone();
        tokio::spawn(async move {
            persistence::upsert_credentials(&pool, &credentials).await;
        });
    }
}

/// Wraps a closure as an `OAuthRefresher`; useful for provider-specific
/// token endpoints that are otherwise a single async function.
pub struct FnRefresher<F>(pub F);

#[async_trait]
impl<F> OAuthRefresher for FnRefresher<F>
where
    F: Fn(&OAuthCredentials) -> futures::future::BoxFuture<'static, Result<OAuthCredentials, String>> + Send + Sync,
{
    async fn refresh(&self, current: &OAuthCredentials) -> Result<OAuthCredentials, String> {
        (self.0)(current).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fresh_creds(provider: &str, expires_in_ms: i64) -> OAuthCredentials {
        OAuthCredentials {
            provider_name: provider.to_string(),
            access_token: "tok-v1".to_string(),
            refresh_token: Some("refresh-v1".to_string()),
            expires_at_ms: now_ms() + expires_in_ms,
            scopes: vec![],
            metadata: serde_json::json!({}),
        }
    }

    struct CountingRefresher {
        calls: Arc<AtomicUsize>,
        succeed: bool,
    }

    #[async_trait]
    impl OAuthRefresher for CountingRefresher {
        async fn refresh(&self, current: &OAuthCredentials) -> Result<OAuthCredentials, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            if self.succeed {
                Ok(OAuthCredentials { access_token: "tok-v2".to_string(), expires_at_ms: now_ms() + 60_000, ..current.clone() })
            } else {
                Err("upstream rejected refresh token".to_string())
            }
        }
    }

    #[tokio::test]
    async fn token_within_threshold_is_returned_without_refreshing() {
        let manager = CredentialManager::new(Duration::from_secs(60), Duration::from_secs(30), None);
        manager.seed(fresh_creds("vendor-a", 300_000));
        let token = manager.get_access_token("vendor-a").await.unwrap();
        assert_eq!(token, "tok-v1");
    }

    #[tokio::test]
    async fn token_past_threshold_triggers_refresh() {
        let mut manager = CredentialManager::new(Duration::from_secs(60), Duration::from_secs(30), None);
        let calls = Arc::new(AtomicUsize::new(0));
        manager.register_refresher("vendor-a", Arc::new(CountingRefresher { calls: calls.clone(), succeed: true }));
        manager.seed(fresh_creds("vendor-a", 5_000));
        let token = manager.get_access_token("vendor-a").await.unwrap();
        assert_eq!(token, "tok-v2");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_refreshes_for_same_provider_are_serialized() {
        let mut manager = CredentialManager::new(Duration::from_secs(60), Duration::from_secs(30), None);
        let calls = Arc::new(AtomicUsize::new(0));
        manager.register_refresher("vendor-a", Arc::new(CountingRefresher { calls: calls.clone(), succeed: true }));
        manager.seed(fresh_creds("vendor-a", 5_000));
        let manager = Arc::new(manager);

        let mut handles = Vec::new();
        for _ in 0..6 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move { manager.get_access_token("vendor-a").await }));
        }
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), "tok-v2");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_refresh_serves_last_known_token_and_marks_stale() {
        let mut manager = CredentialManager::new(Duration::from_secs(60), Duration::from_secs(30), None);
        let calls = Arc::new(AtomicUsize::new(0));
        manager.register_refresher("vendor-a", Arc::new(CountingRefresher { calls: calls.clone(), succeed: false }));
        manager.seed(fresh_creds("vendor-a", 5_000));

        let token = manager.get_access_token("vendor-a").await.unwrap();
        assert_eq!(token, "tok-v1");
        // Second call within the backoff window must not re-attempt refresh.
        let token2 = manager.get_access_token("vendor-a").await.unwrap();
        assert_eq!(token2, "tok-v1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unconfigured_provider_is_an_error() {
        let manager = CredentialManager::new(Duration::from_secs(60), Duration::from_secs(30), None);
        assert!(manager.get_access_token("ghost").await.is_err());
    }
}
