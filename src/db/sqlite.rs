//! SQLite implementation of [`super::KVStore`] and [`super::RelationalStore`].
//!
//! Mirrors the teacher's `a2a/persistence.rs` pattern of storing
//! domain objects as JSON blobs alongside indexed scalar columns, raw
//! `sqlx::query` + `ON CONFLICT DO UPDATE` for upserts.

use async_trait::async_trait;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::time::Duration;

use super::{KVStore, RelationalStore};
use crate::error::{HelixError, HelixResult};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to (and create if missing) the SQLite database at `path`,
    /// running schema migrations for every table this core needs.
    pub async fn connect(path: &str) -> anyhow::Result<Self> {
        let url = format!("sqlite://{path}?mode=rwc");
        let pool = SqlitePoolOptions::new()
            .max_connections(16)
            .connect(&url)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub async fn connect_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL,
                expires_at INTEGER
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS background_tasks (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                priority INTEGER NOT NULL,
                data TEXT NOT NULL,
                scheduled_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_tasks_status ON background_tasks(status, priority, scheduled_at)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS task_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                data TEXT NOT NULL,
                at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS debate_sessions (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                data TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS oauth_credentials (
                provider_name TEXT PRIMARY KEY,
                data TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl RelationalStore for SqliteStore {
    fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl KVStore for SqliteStore {
    async fn get(&self, key: &str) -> HelixResult<Option<Vec<u8>>> {
        let now = chrono::Utc::now().timestamp();
        let row: Option<(Vec<u8>, Option<i64>)> =
            sqlx::query_as("SELECT value, expires_at FROM kv_store WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| HelixError::internal(format!("kv get failed: {e}")))?;

        match row {
            Some((_value, Some(expires_at))) if expires_at <= now => {
                // Lazily sweep the expired row; absence is not an error.
                let _ = self.delete(key).await;
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> HelixResult<()> {
        let now = chrono::Utc::now().timestamp();
        let expires_at = ttl.map(|d| now + d.as_secs() as i64);
        sqlx::query(
            "INSERT INTO kv_store (key, value, expires_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, expires_at = ?3",
        )
        .bind(key)
        .bind(&value)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| HelixError::internal(format!("kv set failed: {e}")))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> HelixResult<()> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| HelixError::internal(format!("kv delete failed: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let store = SqliteStore::connect_memory().await.unwrap();
        store.set("k1", b"v1".to_vec(), None).await.unwrap();
        let got = store.get("k1").await.unwrap();
        assert_eq!(got, Some(b"v1".to_vec()));
    }

    #[tokio::test]
    async fn expired_entries_are_not_returned() {
        let store = SqliteStore::connect_memory().await.unwrap();
        store
            .set("k2", b"v2".to_vec(), Some(Duration::from_secs(0)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let got = store.get("k2").await.unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let store = SqliteStore::connect_memory().await.unwrap();
        store.set("k3", b"v3".to_vec(), None).await.unwrap();
        store.delete("k3").await.unwrap();
        assert_eq!(store.get("k3").await.unwrap(), None);
    }
}
