//! The task engine: in-memory task/session tracking, a FIFO queue, and a
//! single background worker that relays work to the assistant process.
//!
//! The engine is an explicitly constructed object with a `start`/`stop`
//! lifecycle, owned by the process entry point. All task-state mutation
//! happens either on the worker (state transitions) or inside a single caller
//! path (submission, chat), behind `RwLock`s.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, mpsc};
use tokio::task::JoinHandle;

use crate::error::EngineError;
use crate::runner::{AssistantBackend, extract_reply};
use crate::task::{ChatMessage, ChatSession, Task, TaskReceipt, TaskResult, session_id};

type TaskMap = Arc<RwLock<HashMap<String, Task>>>;

/// Queue-backed task engine with per-user chat sessions.
pub struct TaskEngine {
    backend: Arc<dyn AssistantBackend>,
    tasks: TaskMap,
    sessions: Arc<RwLock<HashMap<String, ChatSession>>>,
    queue_tx: mpsc::UnboundedSender<String>,
    queue_rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    max_task_records: usize,
}

impl TaskEngine {
    /// Create an engine. The queue exists from construction, so submissions
    /// made before `start()` are held until the worker comes up.
    pub fn new(backend: Arc<dyn AssistantBackend>, max_task_records: usize) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            tasks: Arc::new(RwLock::new(HashMap::new())),
            sessions: Arc::new(RwLock::new(HashMap::new())),
            queue_tx,
            queue_rx: Mutex::new(Some(queue_rx)),
            worker: Mutex::new(None),
            max_task_records,
        }
    }

    /// Spawn the background worker. One lifecycle per engine: a second call,
    /// or a call after `stop()`, fails with `AlreadyStarted`.
    pub async fn start(&self) -> Result<(), EngineError> {
        let rx = self
            .queue_rx
            .lock()
            .await
            .take()
            .ok_or(EngineError::AlreadyStarted)?;

        let tasks = Arc::clone(&self.tasks);
        let backend = Arc::clone(&self.backend);
        let handle = tokio::spawn(worker_loop(rx, tasks, backend));
        *self.worker.lock().await = Some(handle);

        tracing::info!("Task engine started");
        Ok(())
    }

    /// Cancel the worker. A task mid-execution is abandoned; its record stays
    /// `running` and its subprocess is not reaped here (only the per-call
    /// timeout path kills the child).
    pub async fn stop(&self) {
        if let Some(handle) = self.worker.lock().await.take() {
            handle.abort();
            let _ = handle.await;
            tracing::info!("Task engine stopped");
        }
    }

    /// Create a task and enqueue it. Returns before execution begins.
    pub async fn submit_task(
        &self,
        user_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<TaskReceipt, EngineError> {
        let task = Task::new(user_id, description);
        let receipt = TaskReceipt {
            task_id: task.id.clone(),
            status: task.status,
        };

        {
            let mut tasks = self.tasks.write().await;
            if tasks.len() >= self.max_task_records {
                evict_oldest_terminal(&mut tasks);
            }
            tasks.insert(task.id.clone(), task);
        }

        self.queue_tx
            .send(receipt.task_id.clone())
            .map_err(|_| EngineError::Stopped)?;

        tracing::info!(task = %receipt.task_id, "Task submitted");
        Ok(receipt)
    }

    /// Snapshot of a task, including its result once terminal.
    pub async fn get_status(&self, task_id: &str) -> Result<Task, EngineError> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .cloned()
            .ok_or_else(|| EngineError::TaskNotFound {
                id: task_id.to_string(),
            })
    }

    /// All tasks for one user, newest first.
    pub async fn list_tasks(&self, user_id: &str) -> Vec<Task> {
        let mut tasks: Vec<Task> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    /// One conversational turn. Creates the session on first use, forwards
    /// only the latest message to the assistant, and returns the extracted
    /// reply. Fails closed: errors and timeouts come back as an `Error: ...`
    /// string, never as `Err`.
    pub async fn chat(&self, user_id: &str, message: &str) -> String {
        let key = session_id(user_id);
        {
            let mut sessions = self.sessions.write().await;
            let session = sessions
                .entry(key.clone())
                .or_insert_with(|| ChatSession::new(user_id));
            session.history.push(ChatMessage::user(message));
        }

        let outcome = self.backend.run(user_id, message).await;
        let reply = if outcome.success {
            extract_reply(&outcome.output)
        } else {
            format!(
                "Error: {}",
                outcome.error.unwrap_or_else(|| "assistant failed".into())
            )
        };

        {
            let mut sessions = self.sessions.write().await;
            if let Some(session) = sessions.get_mut(&key) {
                session.history.push(ChatMessage::assistant(reply.clone()));
            }
        }

        reply
    }

    /// Snapshot of a user's chat session, if one exists.
    pub async fn get_session(&self, user_id: &str) -> Option<ChatSession> {
        self.sessions.read().await.get(&session_id(user_id)).cloned()
    }
}

/// Evict the oldest terminal record. Pending and running records are never
/// evicted, so a freshly issued id stays resolvable.
fn evict_oldest_terminal(tasks: &mut HashMap<String, Task>) {
    let oldest = tasks
        .values()
        .filter(|t| t.status.is_terminal())
        .min_by_key(|t| t.created_at)
        .map(|t| t.id.clone());
    if let Some(id) = oldest {
        tasks.remove(&id);
        tracing::debug!(task = %id, "Evicted terminal task record at capacity");
    }
}

/// Single worker: pull one task at a time, run it to a terminal state. A
/// failed task never terminates the loop; only engine cancellation does.
async fn worker_loop(
    mut rx: mpsc::UnboundedReceiver<String>,
    tasks: TaskMap,
    backend: Arc<dyn AssistantBackend>,
) {
    while let Some(task_id) = rx.recv().await {
        let Some((user_id, description)) = mark_running(&tasks, &task_id).await else {
            continue;
        };

        tracing::info!(task = %task_id, user = %user_id, "Task started");
        let outcome = backend.run(&user_id, &description).await;

        let mut tasks = tasks.write().await;
        if let Some(task) = tasks.get_mut(&task_id) {
            if outcome.success {
                tracing::info!(task = %task_id, "Task completed");
            } else {
                tracing::warn!(
                    task = %task_id,
                    error = outcome.error.as_deref().unwrap_or(""),
                    "Task failed"
                );
            }
            task.finish(TaskResult {
                success: outcome.success,
                output: outcome.output,
                error: outcome.error,
            });
        }
    }
    tracing::debug!("Worker loop exited");
}

async fn mark_running(tasks: &TaskMap, task_id: &str) -> Option<(String, String)> {
    let mut tasks = tasks.write().await;
    let task = tasks.get_mut(task_id)?;
    task.status = crate::task::TaskStatus::Running;
    Some((task.user_id.clone(), task.description.clone()))
}
