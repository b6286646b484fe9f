//! Best-effort task persistence: JSON blob plus indexed scalar columns,
//! `ON CONFLICT DO UPDATE` upserts. Failures are logged, never
//! propagated — the in-memory engine is authoritative at runtime; the
//! database only needs to be good enough to restore state across a
//! restart.

use sqlx::SqlitePool;

use super::{BackgroundTask, TaskStatus};

fn status_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::Queued => "queued",
        TaskStatus::Running => "running",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
        TaskStatus::Stuck => "stuck",
        TaskStatus::Cancelled => "cancelled",
        TaskStatus::Dead => "dead",
    }
}

pub async fn upsert_task(pool: &SqlitePool, task: &BackgroundTask) {
    let Ok(data) = serde_json::to_string(task) else {
        tracing::error!(task_id = %task.id, "failed to serialize task for persistence");
        return;
    };
    let result = sqlx::query(
        "INSERT INTO background_tasks (id, status, priority, data, scheduled_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET status = ?2, priority = ?3, data = ?4, scheduled_at = ?5, updated_at = ?6",
    )
    .bind(&task.id)
    .bind(status_str(task.status))
    .bind(task.priority as i64)
    .bind(&data)
    .bind(task.scheduled_at_ms)
    .bind(chrono::Utc::now().timestamp_millis())
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::warn!(task_id = %task.id, error = %e, "task persistence upsert failed");
    }
}

/// Restores every non-terminal task on startup (§4.6 warm restart).
/// Tasks found `running` are restored as `pending` so a fresh claim
/// reissues them rather than leaving them permanently leased to a
/// worker that no longer exists.
pub async fn load_resumable_tasks(pool: &SqlitePool) -> Vec<BackgroundTask> {
    let rows: Vec<(String,)> = match sqlx::query_as(
        "SELECT data FROM background_tasks WHERE status NOT IN ('completed', 'failed', 'cancelled', 'dead')",
    )
    .fetch_all(pool)
    .await
    {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!(error = %e, "failed to load resumable tasks");
            return Vec::new();
        }
    };

    rows.into_iter()
        .filter_map(|(data,)| match serde_json::from_str::<BackgroundTask>(&data) {
            Ok(mut task) => {
                if task.status == TaskStatus::Running || task.status == TaskStatus::Stuck {
                    task.status = TaskStatus::Pending;
                    task.worker_id = None;
                    task.lease_until_ms = None;
                }
                Some(task)
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to deserialize persisted task, skipping");
                None
            }
        })
        .collect()
}
