//! Background Task Engine (C6): a durable, prioritized, lease-based
//! task queue driving asynchronous debates, verifications, OAuth
//! refreshes, and compactions (§4.6).
//!
//! The task table is a single `parking_lot::Mutex<HashMap<...>>`: claim
//! transitions (`pending -> queued -> running`) are serialized by the
//! lock itself rather than a separate atomic compare-and-set, which is
//! sufficient at the scale this engine runs at and keeps the state
//! machine in one place to reason about.

mod persistence;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::RelationalStore;
use crate::events::{Event, EventBus, topics};
use crate::utils::retry::RetryConfig;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Stuck,
    Cancelled,
    Dead,
}

impl TaskStatus {
    fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Dead)
    }
}

/// §3 `BackgroundTask`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundTask {
    pub id: String,
    pub task_type: String,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub priority: u8,
    pub scheduled_at_ms: i64,
    pub lease_until_ms: Option<i64>,
    pub attempts: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub created_at_ms: i64,
    pub started_at_ms: Option<i64>,
    pub completed_at_ms: Option<i64>,
    pub worker_id: Option<String>,
    pub result_ref: Option<serde_json::Value>,
}

/// Caller-supplied spec for [`TaskEngine::submit`].
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_type: String,
    pub payload: serde_json::Value,
    pub priority: u8,
    pub max_retries: u32,
    pub scheduled_at_ms: Option<i64>,
}

impl NewTask {
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
            priority: 5,
            max_retries: 2,
            scheduled_at_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventType {
    Created,
    Queued,
    Started,
    Progress,
    Completed,
    Failed,
    Cancelled,
}

/// §3 `TaskEvent`. Append-only; never mutated once emitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub task_id: String,
    pub event_type: TaskEventType,
    pub at_ms: i64,
    pub data: serde_json::Value,
}

/// What a handler decides after running. `Retry` re-enqueues the task
/// with exponential backoff (or dead-letters it if retries are
/// exhausted); `Failed` is a permanent, non-retried failure.
pub enum HandlerOutcome {
    Completed(serde_json::Value),
    Retry { error: String, delay: Option<Duration> },
    Failed(String),
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &BackgroundTask) -> HandlerOutcome;
}

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("queue is full")]
    QueueFull,
    #[error("unknown task: {0}")]
    NotFound(String),
    #[error("no handler registered for task type: {0}")]
    NoHandler(String),
}

impl From<TaskError> for crate::error::HelixError {
    fn from(e: TaskError) -> Self {
        match e {
            TaskError::QueueFull => crate::error::HelixError::Transient { message: e.to_string() },
            TaskError::NotFound(_) => crate::error::HelixError::validation(e.to_string()),
            TaskError::NoHandler(_) => crate::error::HelixError::internal(e.to_string()),
        }
    }
}

pub struct TaskEngineConfig {
    pub lease_duration: Duration,
    pub max_queue_depth: usize,
    pub retry_backoff: RetryConfig,
}

impl Default for TaskEngineConfig {
    fn default() -> Self {
        Self {
            lease_duration: Duration::from_secs(60),
            max_queue_depth: 10_000,
            retry_backoff: RetryConfig::default(),
        }
    }
}

pub struct TaskEngine {
    tasks: Mutex<HashMap<String, BackgroundTask>>,
    handlers: Mutex<HashMap<String, Arc<dyn TaskHandler>>>,
    events: Arc<EventBus>,
    store: Option<Arc<dyn RelationalStore>>,
    config: TaskEngineConfig,
}

impl TaskEngine {
    pub fn new(events: Arc<EventBus>, store: Option<Arc<dyn RelationalStore>>, config: TaskEngineConfig) -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            handlers: Mutex::new(HashMap::new()),
            events,
            store,
            config,
        }
    }

    pub fn register_handler(&self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        self.handlers.lock().insert(task_type.into(), handler);
    }

    /// Loads every non-terminal task from the relational store into
    /// memory. Intended to run once at startup, before `run_workers`.
    pub async fn restore_from_store(&self) {
        let Some(store) = &self.store else { return };
        let restored = persistence::load_resumable_tasks(store.pool()).await;
        let mut tasks = self.tasks.lock();
        for task in restored {
            tasks.insert(task.id.clone(), task);
        }
    }

    /// `Submit(task)`.
    pub fn submit(&self, spec: NewTask) -> Result<String, TaskError> {
        let mut tasks = self.tasks.lock();
        let pending_count = tasks.values().filter(|t| !t.status.is_terminal()).count();
        if pending_count >= self.config.max_queue_depth {
            return Err(TaskError::QueueFull);
        }

        let id = Uuid::new_v4().to_string();
        let now = now_ms();
        let task = BackgroundTask {
            id: id.clone(),
            task_type: spec.task_type,
            payload: spec.payload,
            status: TaskStatus::Pending,
            priority: spec.priority.min(9),
            scheduled_at_ms: spec.scheduled_at_ms.unwrap_or(now),
            lease_until_ms: None,
            attempts: 0,
            max_retries: spec.max_retries,
            last_error: None,
            created_at_ms: now,
            started_at_ms: None,
            completed_at_ms: None,
            worker_id: None,
            result_ref: None,
        };
        tasks.insert(id.clone(), task.clone());
        drop(tasks);

        self.emit(&id, TaskEventType::Created, serde_json::json!({"task_type": task.task_type}));
        self.persist(&task);
        Ok(id)
    }

    pub fn get(&self, id: &str) -> Option<BackgroundTask> {
        self.tasks.lock().get(id).cloned()
    }

    /// `Cancel(id)`. Any non-terminal task may be cancelled; terminal
    /// states and unknown ids are a no-op.
    pub fn cancel(&self, id: &str) {
        let mut tasks = self.tasks.lock();
        let Some(task) = tasks.get_mut(id) else { return };
        if task.status.is_terminal() {
            return;
        }
        task.status = TaskStatus::Cancelled;
        task.completed_at_ms = Some(now_ms());
        let snapshot = task.clone();
        drop(tasks);
        self.emit(id, TaskEventType::Cancelled, serde_json::json!({}));
        self.persist(&snapshot);
    }

    /// `Retry(id)`: the admin-only `failed -> pending` transition.
    pub fn retry(&self, id: &str) -> Result<(), TaskError> {
        let mut tasks = self.tasks.lock();
        let task = tasks.get_mut(id).ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        if task.status != TaskStatus::Failed {
            return Ok(());
        }
        task.status = TaskStatus::Pending;
        task.scheduled_at_ms = now_ms();
        task.last_error = None;
        let snapshot = task.clone();
        drop(tasks);
        self.persist(&snapshot);
        Ok(())
    }

    pub fn list_by_status(&self, status: TaskStatus, page: usize, page_size: usize) -> Vec<BackgroundTask> {
        let mut matching: Vec<BackgroundTask> = self.tasks.lock().values().filter(|t| t.status == status).cloned().collect();
        matching.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms));
        matching.into_iter().skip(page * page_size).take(page_size).collect()
    }

    pub fn dead_letter_list(&self) -> Vec<BackgroundTask> {
        self.tasks.lock().values().filter(|t| t.status == TaskStatus::Dead).cloned().collect()
    }

    pub fn stats(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for task in self.tasks.lock().values() {
            *counts.entry(format!("{:?}", task.status).to_lowercase()).or_insert(0) += 1;
        }
        counts
    }

    /// Atomically claim the highest-priority due `pending` task,
    /// transitioning `pending -> queued -> running` and stamping a
    /// fresh lease. The lock held across both sub-transitions is what
    /// makes this claim exclusive.
    fn claim_next(&self, worker_id: &str) -> Option<BackgroundTask> {
        let mut tasks = self.tasks.lock();
        let now = now_ms();
        let candidate_id = tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending && t.scheduled_at_ms <= now)
            .min_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.scheduled_at_ms.cmp(&b.scheduled_at_ms)).then_with(|| a.id.cmp(&b.id)))
            .map(|t| t.id.clone())?;

        let task = tasks.get_mut(&candidate_id)?;
        task.status = TaskStatus::Queued;
        let queued_snapshot = task.clone();

        task.status = TaskStatus::Running;
        task.attempts += 1;
        task.lease_until_ms = Some(now + self.config.lease_duration.as_millis() as i64);
        task.started_at_ms = Some(now);
        task.worker_id = Some(worker_id.to_string());
        let running_snapshot = task.clone();
        drop(tasks);

        self.emit(&queued_snapshot.id, TaskEventType::Queued, serde_json::json!({}));
        self.emit(&running_snapshot.id, TaskEventType::Started, serde_json::json!({"attempt": running_snapshot.attempts, "worker_id": worker_id}));
        self.persist(&running_snapshot);
        Some(running_snapshot)
    }

    /// Extend a running task's lease. Called by a handler roughly every
    /// `lease_duration / 3` while it does long-running work (§4.6
    /// heartbeats).
    pub fn heartbeat(&self, id: &str) {
        let mut tasks = self.tasks.lock();
        if let Some(task) = tasks.get_mut(id)
            && task.status == TaskStatus::Running
        {
            task.lease_until_ms = Some(now_ms() + self.config.lease_duration.as_millis() as i64);
        }
    }

    fn complete(&self, id: &str, result: serde_json::Value) {
        let mut tasks = self.tasks.lock();
        let Some(task) = tasks.get_mut(id) else { return };
        task.status = TaskStatus::Completed;
        task.completed_at_ms = Some(now_ms());
        task.result_ref = Some(result);
        let snapshot = task.clone();
        drop(tasks);
        self.emit(id, TaskEventType::Completed, serde_json::json!({}));
        self.persist(&snapshot);
    }

    fn fail_permanently(&self, id: &str, error: String) {
        let mut tasks = self.tasks.lock();
        let Some(task) = tasks.get_mut(id) else { return };
        task.status = TaskStatus::Failed;
        task.completed_at_ms = Some(now_ms());
        task.last_error = Some(error.clone());
        let snapshot = task.clone();
        drop(tasks);
        self.emit(id, TaskEventType::Failed, serde_json::json!({"error": error, "retryable": false}));
        self.persist(&snapshot);
    }

    fn retry_or_dead_letter(&self, id: &str, error: String, delay: Option<Duration>) {
        let mut tasks = self.tasks.lock();
        let Some(task) = tasks.get_mut(id) else { return };
        task.last_error = Some(error.clone());

        if task.attempts > task.max_retries {
            task.status = TaskStatus::Dead;
            task.completed_at_ms = Some(now_ms());
            let snapshot = task.clone();
            drop(tasks);
            self.emit(id, TaskEventType::Failed, serde_json::json!({"error": error, "dead_lettered": true}));
            self.persist(&snapshot);
            return;
        }

        let delay = delay.unwrap_or_else(|| self.config.retry_backoff.delay_for(task.attempts));
        task.status = TaskStatus::Pending;
        task.scheduled_at_ms = now_ms() + delay.as_millis() as i64;
        let snapshot = task.clone();
        drop(tasks);
        self.emit(id, TaskEventType::Failed, serde_json::json!({"error": error, "retryable": true, "attempt": snapshot.attempts}));
        self.persist(&snapshot);
    }

    /// Stuck-task sweep (§4.6): running tasks whose lease expired
    /// without a heartbeat are swept to `stuck`, then immediately
    /// re-evaluated via the same retry/dead-letter path as a handler
    /// failure.
    pub fn sweep_stuck(&self) {
        let now = now_ms();
        let stuck_ids: Vec<String> = {
            let tasks = self.tasks.lock();
            tasks
                .values()
                .filter(|t| t.status == TaskStatus::Running && t.lease_until_ms.is_some_and(|l| l < now))
                .map(|t| t.id.clone())
                .collect()
        };
        for id in stuck_ids {
            {
                let mut tasks = self.tasks.lock();
                if let Some(task) = tasks.get_mut(&id) {
                    task.status = TaskStatus::Stuck;
                }
            }
            self.retry_or_dead_letter(&id, "lease expired without heartbeat".to_string(), None);
        }
    }

    async fn run_one(&self, worker_id: &str) -> bool {
        let Some(task) = self.claim_next(worker_id) else { return false };
        let handler = self.handlers.lock().get(&task.task_type).cloned();
        let Some(handler) = handler else {
            self.fail_permanently(&task.id, format!("no handler registered for type {}", task.task_type));
            return true;
        };

        match handler.handle(&task).await {
            HandlerOutcome::Completed(result) => self.complete(&task.id, result),
            HandlerOutcome::Failed(error) => self.fail_permanently(&task.id, error),
            HandlerOutcome::Retry { error, delay } => self.retry_or_dead_letter(&task.id, error, delay),
        }
        true
    }

    /// Spawn `n` workers plus a stuck-sweeper, all stopping on `token`
    /// cancellation.
    pub async fn run_workers(self: Arc<Self>, n: usize, sweep_interval: Duration, token: CancellationToken) {
        let mut handles = Vec::new();
        for i in 0..n {
            let engine = self.clone();
            let token = token.clone();
            let worker_id = format!("worker-{i}");
            handles.push(tokio::spawn(async move {
                loop {
                    if token.is_cancelled() {
                        return;
                    }
                    let did_work = engine.run_one(&worker_id).await;
                    if !did_work {
                        tokio::select! {
                            _ = token.cancelled() => return,
                            _ = tokio::time::sleep(Duration::from_millis(200)) => {}
                        }
                    }
                }
            }));
        }

        let sweeper = {
            let engine = self.clone();
            let token = token.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = tokio::time::sleep(sweep_interval) => engine.sweep_stuck(),
                    }
                }
            })
        };
        handles.push(sweeper);

        for h in handles {
            let _ = h.await;
        }
    }

    fn emit(&self, task_id: &str, event_type: TaskEventType, data: serde_json::Value) {
        let event = TaskEvent {
            task_id: task_id.to_string(),
            event_type,
            at_ms: now_ms(),
            data,
        };
        self.events.publish(Event {
            topic: topics::TASK.to_string(),
            kind: format!("task.{:?}", event.event_type).to_lowercase(),
            data: serde_json::to_value(&event).unwrap_or_default(),
        });
    }

    fn persist(&self, task: &BackgroundTask) {
        let Some(store) = &self.store else { return };
        let pool = store.pool().clone();
        let task = task.clone();
        tokio::spawn(async move {
            persistence::upsert_task(&pool, &task).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn engine() -> Arc<TaskEngine> {
        Arc::new(TaskEngine::new(
            Arc::new(EventBus::new()),
            None,
            TaskEngineConfig {
                lease_duration: Duration::from_millis(50),
                max_queue_depth: 100,
                retry_backoff: RetryConfig {
                    max_attempts: 10,
                    base_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(5),
                    jitter_fraction: 0.0,
                },
            },
        ))
    }

    struct AlwaysOk;
    #[async_trait]
    impl TaskHandler for AlwaysOk {
        async fn handle(&self, _task: &BackgroundTask) -> HandlerOutcome {
            HandlerOutcome::Completed(serde_json::json!({"ok": true}))
        }
    }

    struct FailNTimesThenSucceed {
        calls: AtomicUsize,
        fail_first_n: usize,
    }

    #[async_trait]
    impl TaskHandler for FailNTimesThenSucceed {
        async fn handle(&self, _task: &BackgroundTask) -> HandlerOutcome {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                HandlerOutcome::Retry { error: "transient".into(), delay: Some(Duration::from_millis(1)) }
            } else {
                HandlerOutcome::Completed(serde_json::json!({"attempt": n}))
            }
        }
    }

    #[tokio::test]
    async fn submit_then_complete_transitions_to_completed() {
        let engine = engine();
        engine.register_handler("t", Arc::new(AlwaysOk));
        let id = engine.submit(NewTask::new("t", serde_json::json!({}))).unwrap();
        assert!(engine.run_one("w0").await);
        assert_eq!(engine.get(&id).unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn task_retries_twice_then_completes_with_three_attempts() {
        let engine = engine();
        engine.register_handler(
            "flaky",
            Arc::new(FailNTimesThenSucceed { calls: AtomicUsize::new(0), fail_first_n: 2 }),
        );
        let mut task = NewTask::new("flaky", serde_json::json!({}));
        task.max_retries = 5;
        let id = engine.submit(task).unwrap();

        for _ in 0..3 {
            loop {
                if engine.run_one("w0").await {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }

        let final_task = engine.get(&id).unwrap();
        assert_eq!(final_task.status, TaskStatus::Completed);
        assert_eq!(final_task.attempts, 3);
    }

    #[tokio::test]
    async fn exhausting_retries_dead_letters_the_task() {
        let engine = engine();
        engine.register_handler(
            "always-fails",
            Arc::new(FailNTimesThenSucceed { calls: AtomicUsize::new(0), fail_first_n: 100 }),
        );
        let mut task = NewTask::new("always-fails", serde_json::json!({}));
        task.max_retries = 1;
        let id = engine.submit(task).unwrap();

        for _ in 0..2 {
            loop {
                if engine.run_one("w0").await {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }

        let final_task = engine.get(&id).unwrap();
        assert_eq!(final_task.status, TaskStatus::Dead);
        assert_eq!(final_task.attempts, final_task.max_retries + 1);
        assert_eq!(engine.dead_letter_list().len(), 1);
    }

    #[tokio::test]
    async fn cancel_is_a_no_op_on_terminal_tasks() {
        let engine = engine();
        engine.register_handler("t", Arc::new(AlwaysOk));
        let id = engine.submit(NewTask::new("t", serde_json::json!({}))).unwrap();
        engine.run_one("w0").await;
        engine.cancel(&id);
        assert_eq!(engine.get(&id).unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn stuck_sweep_requeues_an_expired_lease() {
        let engine = engine();
        engine.register_handler("t", Arc::new(AlwaysOk));
        let mut task = NewTask::new("t", serde_json::json!({}));
        task.max_retries = 3;
        let id = engine.submit(task).unwrap();

        // Manually move the task into Running with an already-expired lease,
        // simulating a handler that hung without heartbeating.
        {
            let mut tasks = engine.tasks.lock();
            let t = tasks.get_mut(&id).unwrap();
            t.status = TaskStatus::Running;
            t.attempts = 1;
            t.lease_until_ms = Some(now_ms() - 1000);
        }

        engine.sweep_stuck();
        let swept = engine.get(&id).unwrap();
        assert_eq!(swept.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn submit_rejects_when_queue_is_full() {
        let mut engine_inner = TaskEngine::new(Arc::new(EventBus::new()), None, TaskEngineConfig::default());
        engine_inner.config.max_queue_depth = 1;
        engine_inner.submit(NewTask::new("t", serde_json::json!({}))).unwrap();
        let result = engine_inner.submit(NewTask::new("t", serde_json::json!({})));
        assert!(matches!(result, Err(TaskError::QueueFull)));
    }
}
