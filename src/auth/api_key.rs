//! API-key principal lookup. Keys are opaque bearer strings checked
//! against a small in-memory table; a production deployment swaps this
//! for a [`crate::db::RelationalStore`]-backed implementation without
//! touching [`super::Authenticator`].

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use super::Role;

#[derive(Debug, Clone)]
pub struct ApiKeyRecord {
    pub key_id: String,
    pub secret: String,
    pub subject: String,
    pub role: Role,
    pub scopes: HashSet<String>,
}

pub trait ApiKeyStore: Send + Sync {
    fn lookup(&self, presented_key: &str) -> Option<ApiKeyRecord>;
}

pub struct InMemoryApiKeyStore {
    records: RwLock<Vec<ApiKeyRecord>>,
}

impl InMemoryApiKeyStore {
    pub fn new(records: Vec<ApiKeyRecord>) -> Self {
        Self { records: RwLock::new(records) }
    }

    pub fn insert(&self, record: ApiKeyRecord) {
        self.records.write().push(record);
    }

    pub fn revoke(&self, key_id: &str) {
        self.records.write().retain(|r| r.key_id != key_id);
    }
}

impl ApiKeyStore for InMemoryApiKeyStore {
    fn lookup(&self, presented_key: &str) -> Option<ApiKeyRecord> {
        self.records.read().iter().find(|r| r.secret == presented_key).cloned()
    }
}

/// Convenience no-op store for deployments with no API keys configured
/// (JWT-only or anonymous-only).
impl ApiKeyStore for Arc<InMemoryApiKeyStore> {
    fn lookup(&self, presented_key: &str) -> Option<ApiKeyRecord> {
        self.as_ref().lookup(presented_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, secret: &str) -> ApiKeyRecord {
        ApiKeyRecord { key_id: id.into(), secret: secret.into(), subject: format!("subject-{id}"), role: Role::User, scopes: HashSet::new() }
    }

    #[test]
    fn matching_key_resolves_to_its_record() {
        let store = InMemoryApiKeyStore::new(vec![record("a", "secret-a"), record("b", "secret-b")]);
        let found = store.lookup("secret-b").unwrap();
        assert_eq!(found.key_id, "b");
    }

    #[test]
    fn unknown_key_resolves_to_none() {
        let store = InMemoryApiKeyStore::new(vec![record("a", "secret-a")]);
        assert!(store.lookup("nope").is_none());
    }

    #[test]
    fn revoked_key_no_longer_resolves() {
        let store = InMemoryApiKeyStore::new(vec![record("a", "secret-a")]);
        store.revoke("a");
        assert!(store.lookup("secret-a").is_none());
    }
}
