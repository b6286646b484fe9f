//! Best-effort OAuth credential persistence, same JSON-blob upsert
//! pattern as [`crate::tasks::persistence`] and [`crate::debate::persistence`].

use sqlx::SqlitePool;

use super::OAuthCredentials;

pub async fn upsert_credentials(pool: &SqlitePool, credentials: &OAuthCredentials) {
    let Ok(data) = serde_json::to_string(credentials) else {
        tracing::error!(provider = %credentials.provider_name, "failed to serialize oauth credentials for persistence");
        return;
    };
    let result = sqlx::query(
        "INSERT INTO oauth_credentials (provider_name, data, updated_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(provider_name) DO UPDATE SET data = ?2, updated_at = ?3",
    )
    .bind(&credentials.provider_name)
    .bind(&data)
    .bind(chrono::Utc::now().timestamp_millis())
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::warn!(provider = %credentials.provider_name, error = %e, "oauth credential persistence upsert failed");
    }
}

pub async fn load_credentials(pool: &SqlitePool, provider_name: &str) -> Option<OAuthCredentials> {
    let row: Option<(String,)> = sqlx::query_as("SELECT data FROM oauth_credentials WHERE provider_name = ?1")
        .bind(provider_name)
        .fetch_optional(pool)
        .await
        .ok()
        .flatten();

    row.and_then(|(data,)| match serde_json::from_str(&data) {
        Ok(credentials) => Some(credentials),
        Err(e) => {
            tracing::error!(provider = provider_name, error = %e, "failed to deserialize persisted oauth credentials");
            None
        }
    })
}

pub async fn load_all_credentials(pool: &SqlitePool) -> Vec<OAuthCredentials> {
    let rows: Vec<(String,)> = match sqlx::query_as("SELECT data FROM oauth_credentials").fetch_all(pool).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!(error = %e, "failed to load persisted oauth credentials");
            return Vec::new();
        }
    };

    rows.into_iter()
        .filter_map(|(data,)| match serde_json::from_str::<OAuthCredentials>(&data) {
            Ok(creds) => Some(creds),
            Err(e) => {
                tracing::error!(error = %e, "failed to deserialize persisted oauth credentials, skipping");
                None
            }
        })
        .collect()
}
