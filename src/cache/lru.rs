//! L1 in-process LRU store, bounded by both entry count and a byte
//! budget (§4.5 eviction). Recency is tracked with a simple access
//! queue rather than an intrusive linked list — adequate at the
//! gateway's per-replica cache scale and easy to reason about.

use std::collections::{HashMap, VecDeque};

use super::CacheEntry;

pub struct LruStore {
    entries: HashMap<String, CacheEntry>,
    recency: VecDeque<String>,
    max_entries: usize,
    max_bytes: usize,
    current_bytes: usize,
}

impl LruStore {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            entries: HashMap::new(),
            recency: VecDeque::new(),
            max_entries: max_entries.max(1),
            max_bytes: max_bytes.max(1),
            current_bytes: 0,
        }
    }

    pub fn get(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.get(key).cloned()?;
        self.touch(key);
        Some(entry)
    }

    /// Insert or replace `key`. Returns the keys evicted to stay within
    /// budget (may include `key` itself if the budgets are smaller than
    /// one entry, though `new` floors both at 1).
    pub fn insert(&mut self, key: String, entry: CacheEntry) -> Vec<String> {
        if let Some(old) = self.entries.remove(&key) {
            self.current_bytes = self.current_bytes.saturating_sub(old.size_bytes);
        }
        self.current_bytes += entry.size_bytes;
        self.entries.insert(key.clone(), entry);
        self.touch(&key);
        self.evict_to_budget()
    }

    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.current_bytes = self.current_bytes.saturating_sub(entry.size_bytes);
        self.recency.retain(|k| k != key);
        Some(entry)
    }

    pub fn remove_by_tag(&mut self, tag: &str) -> Vec<String> {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.tags.iter().any(|t| t == tag))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &keys {
            self.remove(k);
        }
        keys
    }

    fn touch(&mut self, key: &str) {
        self.recency.retain(|k| k != key);
        self.recency.push_back(key.to_string());
    }

    fn evict_to_budget(&mut self) -> Vec<String> {
        let mut evicted = Vec::new();
        while self.entries.len() > self.max_entries || self.current_bytes > self.max_bytes {
            let Some(oldest) = self.recency.pop_front() else { break };
            if let Some(entry) = self.entries.remove(&oldest) {
                self.current_bytes = self.current_bytes.saturating_sub(entry.size_bytes);
                evicted.push(oldest);
            }
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, bytes: usize) -> CacheEntry {
        CacheEntry {
            key: key.to_string(),
            value: serde_json::json!(null),
            created_at_ms: 0,
            expires_at_ms: i64::MAX,
            source_provider_id: None,
            tags: vec![],
            size_bytes: bytes,
        }
    }

    #[test]
    fn evicts_least_recently_used_when_entry_budget_exceeded() {
        let mut lru = LruStore::new(2, 1_000_000);
        lru.insert("a".into(), entry("a", 1));
        lru.insert("b".into(), entry("b", 1));
        lru.get("a"); // a is now most recently used
        let evicted = lru.insert("c".into(), entry("c", 1));
        assert_eq!(evicted, vec!["b".to_string()]);
        assert!(lru.get("a").is_some());
        assert!(lru.get("c").is_some());
    }

    #[test]
    fn evicts_when_byte_budget_exceeded_even_under_entry_cap() {
        let mut lru = LruStore::new(10, 10);
        lru.insert("a".into(), entry("a", 6));
        let evicted = lru.insert("b".into(), entry("b", 6));
        assert_eq!(evicted, vec!["a".to_string()]);
    }
}
