//! Best-effort `DebateSession` persistence, same JSON-blob upsert
//! pattern as [`crate::tasks::persistence`] and grounded in the same
//! teacher source. A write failure is logged and never propagated —
//! per §4.7, "the orchestrator must tolerate best-effort writes: a
//! write failure never fails the user response."

use sqlx::SqlitePool;

use super::types::{DebateSession, DebateStatus};

fn status_str(status: DebateStatus) -> &'static str {
    match status {
        DebateStatus::Pending => "pending",
        DebateStatus::Running => "running",
        DebateStatus::Validating => "validating",
        DebateStatus::Completed => "completed",
        DebateStatus::Failed => "failed",
        DebateStatus::Cancelled => "cancelled",
    }
}

pub async fn upsert_session(pool: &SqlitePool, session: &DebateSession) {
    let Ok(data) = serde_json::to_string(session) else {
        tracing::error!(session_id = %session.id, "failed to serialize debate session for persistence");
        return;
    };
    let result = sqlx::query(
        "INSERT INTO debate_sessions (id, status, data, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET status = ?2, data = ?3, updated_at = ?4",
    )
    .bind(&session.id)
    .bind(status_str(session.status))
    .bind(&data)
    .bind(chrono::Utc::now().timestamp_millis())
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::warn!(session_id = %session.id, error = %e, "debate session persistence upsert failed");
    }
}

pub async fn load_session(pool: &SqlitePool, id: &str) -> Option<DebateSession> {
    let row: Option<(String,)> = sqlx::query_as("SELECT data FROM debate_sessions WHERE id = ?1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .ok()
        .flatten();
    let (data,) = row?;
    serde_json::from_str(&data).ok()
}
