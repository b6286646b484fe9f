//! Persistence contracts.
//!
//! The core only assumes two interfaces, per the design spec §6: a
//! key/value store with TTL (`KVStore`, backing the cache's L2 tier) and
//! a relational store (`RelationalStore`, backing tasks, debate
//! sessions, and OAuth credentials). Any implementation satisfying the
//! contracts is acceptable; this crate ships a SQLite-backed default.

mod sqlite;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::HelixResult;

pub use sqlite::SqliteStore;

/// Key/value store with TTL, used by the cache's distributed tier.
#[async_trait]
pub trait KVStore: Send + Sync {
    async fn get(&self, key: &str) -> HelixResult<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> HelixResult<()>;
    async fn delete(&self, key: &str) -> HelixResult<()>;
}

/// Relational store handle. Domain modules (tasks, debate, credentials)
/// layer their own typed operations on top of the pool this exposes;
/// `RelationalStore` itself only guarantees "a connected SQL backend
/// with the tables this core expects" is available.
pub trait RelationalStore: Send + Sync {
    fn pool(&self) -> &sqlx::SqlitePool;
}
