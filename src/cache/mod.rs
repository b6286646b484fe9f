//! Tiered Cache (C5): a fingerprint-keyed response cache with an
//! in-process LRU (L1) and an optional distributed tier (L2), fronted
//! by a single-flight guard so concurrent identical requests share one
//! in-flight computation (§4.5).

mod fingerprint;
mod lru;

pub use fingerprint::{Fingerprint, FingerprintInput, fingerprint};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{FutureExt, Shared};
use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;

use crate::db::KVStore;
use crate::error::{HelixError, HelixResult};
use crate::events::{Event, EventBus, topics};
use lru::LruStore;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One cached response (§3 `CacheEntry`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub created_at_ms: i64,
    pub expires_at_ms: i64,
    pub source_provider_id: Option<String>,
    pub tags: Vec<String>,
    pub size_bytes: usize,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        now_ms() >= self.expires_at_ms
    }
}

type PendingFuture = Shared<futures::future::BoxFuture<'static, Result<serde_json::Value, String>>>;

/// Tiered cache in front of an optional [`KVStore`]-backed L2.
///
/// L1 is bounded by both entry count and a byte budget; entries beyond
/// either watermark are evicted LRU-first. Writes go to L1 eagerly and
/// to L2 best-effort — an L2 write failure is logged and otherwise
/// ignored, since a cache is never the system of record.
pub struct Cache {
    l1: SyncMutex<LruStore>,
    l2: Option<Arc<dyn KVStore>>,
    events: Arc<EventBus>,
    default_ttl: Duration,
    single_flight: AsyncMutex<HashMap<String, PendingFuture>>,
}

impl Cache {
    pub fn new(max_entries: usize, max_bytes: usize, default_ttl: Duration, events: Arc<EventBus>, l2: Option<Arc<dyn KVStore>>) -> Self {
        Self {
            l1: SyncMutex::new(LruStore::new(max_entries, max_bytes)),
            l2,
            events,
            default_ttl,
            single_flight: AsyncMutex::new(HashMap::new()),
        }
    }

    /// `Get(k)`. Per invariant (a)/(b): a hit yields a value whose key
    /// matches `k` and whose `expiresAt` is still in the future.
    pub async fn get(&self, key: &Fingerprint) -> Option<CacheEntry> {
        if let Some(entry) = self.l1.lock().get(key.as_str()) {
            if entry.is_expired() {
                self.l1.lock().remove(key.as_str());
            } else {
                return Some(entry);
            }
        }
        let Some(l2) = &self.l2 else { return None };
        let raw = l2.get(key.as_str()).await.ok().flatten()?;
        let entry: CacheEntry = serde_json::from_slice(&raw).ok()?;
        if entry.is_expired() {
            return None;
        }
        self.l1.lock().insert(key.as_str().to_string(), entry.clone());
        Some(entry)
    }

    /// `Set(k,v,ttl,tags)`.
    pub async fn set(&self, key: &Fingerprint, value: serde_json::Value, ttl: Option<Duration>, tags: Vec<String>, source_provider_id: Option<String>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let size_bytes = serde_json::to_vec(&value).map(|v| v.len()).unwrap_or(0);
        let entry = CacheEntry {
            key: key.as_str().to_string(),
            value,
            created_at_ms: now_ms(),
            expires_at_ms: now_ms() + ttl.as_millis() as i64,
            source_provider_id,
            tags,
            size_bytes,
        };

        let evicted = self.l1.lock().insert(key.as_str().to_string(), entry.clone());
        for evicted_key in evicted {
            self.events.publish(Event {
                topic: topics::CACHE.to_string(),
                kind: "cache.evicted".to_string(),
                data: serde_json::json!({"key": evicted_key}),
            });
        }

        if let Some(l2) = &self.l2
            && let Ok(raw) = serde_json::to_vec(&entry)
        {
            let l2 = l2.clone();
            let k = key.as_str().to_string();
            if let Err(e) = l2.set(&k, raw, Some(ttl)).await {
                tracing::warn!(key = %k, error = %e, "cache L2 write failed, best-effort only");
            }
        }
    }

    /// `Delete(k)`.
    pub async fn delete(&self, key: &Fingerprint) {
        self.l1.lock().remove(key.as_str());
        if let Some(l2) = &self.l2 {
            let _ = l2.delete(key.as_str()).await;
        }
    }

    /// `InvalidateByTag(tag)`. L1 invalidation is immediate and
    /// exhaustive; L2 has no tag index in the `KVStore` contract so its
    /// entries simply expire by TTL (documented bound: at most
    /// `default_ttl`, matching §9's open question about the L2
    /// invalidation delay).
    pub fn invalidate_by_tag(&self, tag: &str) {
        let removed = self.l1.lock().remove_by_tag(tag);
        for key in removed {
            self.events.publish(Event {
                topic: topics::CACHE.to_string(),
                kind: "cache.invalidated".to_string(),
                data: serde_json::json!({"key": key, "tag": tag}),
            });
        }
    }

    /// `DoOrGet(k, factory)`: the single-flight entry point. Concurrent
    /// callers for the same fingerprint attach to the one in-flight
    /// computation rather than issuing duplicate upstream calls. On a
    /// successful compute, the result is written back through `set` so
    /// the next call for the same fingerprint is a plain cache hit.
    pub async fn do_or_get<F, Fut>(&self, key: &Fingerprint, ttl: Option<Duration>, tags: Vec<String>, source_provider_id: Option<String>, factory: F) -> HelixResult<serde_json::Value>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = HelixResult<serde_json::Value>> + Send + 'static,
    {
        if let Some(entry) = self.get(key).await {
            return Ok(entry.value);
        }

        let pending = {
            let mut inflight = self.single_flight.lock().await;
            if let Some(existing) = inflight.get(key.as_str()) {
                existing.clone()
            } else {
                let fut = factory().map(|r| r.map_err(|e| e.to_string())).boxed().shared();
                inflight.insert(key.as_str().to_string(), fut.clone());
                fut
            }
        };

        let result = pending.await;
        self.single_flight.lock().await.remove(key.as_str());
        let value = result.map_err(HelixError::internal)?;
        self.set(key, value.clone(), ttl, tags, source_provider_id).await;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache() -> Cache {
        Cache::new(10, 1_000_000, Duration::from_secs(60), Arc::new(EventBus::new()), None)
    }

    fn key(s: &str) -> Fingerprint {
        Fingerprint::from_raw(s.to_string())
    }

    #[tokio::test]
    async fn set_then_get_round_trips_while_unexpired() {
        let cache = cache();
        let k = key("k1");
        cache.set(&k, serde_json::json!({"v": 1}), None, vec![], None).await;
        let got = cache.get(&k).await.unwrap();
        assert_eq!(got.value, serde_json::json!({"v": 1}));
    }

    #[tokio::test]
    async fn expired_entries_are_never_returned() {
        let cache = cache();
        let k = key("k2");
        cache.set(&k, serde_json::json!(1), Some(Duration::from_millis(1)), vec![], None).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get(&k).await.is_none());
    }

    #[tokio::test]
    async fn invalidate_by_tag_removes_tagged_entries_only() {
        let cache = cache();
        let a = key("a");
        let b = key("b");
        cache.set(&a, serde_json::json!(1), None, vec!["user:1".into()], None).await;
        cache.set(&b, serde_json::json!(2), None, vec!["user:2".into()], None).await;
        cache.invalidate_by_tag("user:1");
        assert!(cache.get(&a).await.is_none());
        assert!(cache.get(&b).await.is_some());
    }

    #[tokio::test]
    async fn single_flight_runs_factory_once_for_concurrent_identical_keys() {
        let cache = Arc::new(cache());
        let k = key("dup");
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let k = k.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .do_or_get(&k, None, vec![], None, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(serde_json::json!({"computed": true}))
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn do_or_get_writes_result_back_so_later_calls_are_plain_hits() {
        let cache = cache();
        let k = key("persisted");
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache
            .do_or_get(&k, None, vec![], None, {
                let calls = calls.clone();
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(serde_json::json!({"v": 1}))
                }
            })
            .await
            .unwrap();
        assert_eq!(first, serde_json::json!({"v": 1}));
        assert!(cache.get(&k).await.is_some());

        let second = cache
            .do_or_get(&k, None, vec![], None, {
                let calls = calls.clone();
                move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(serde_json::json!({"v": 2}))
                }
            })
            .await
            .unwrap();
        assert_eq!(second, serde_json::json!({"v": 1}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn evicting_beyond_entry_budget_emits_cache_evicted_event() {
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe(topics::CACHE);
        let cache = Cache::new(1, 1_000_000, Duration::from_secs(60), bus, None);
        cache.set(&key("a"), serde_json::json!(1), None, vec![], None).await;
        cache.set(&key("b"), serde_json::json!(2), None, vec![], None).await;
        let evt = rx.recv().await.unwrap();
        assert_eq!(evt.kind, "cache.evicted");
    }
}
