//! Task and chat-session data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Whether the status is terminal (no further transitions).
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

/// Outcome of a finished task execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One asynchronous unit of work submitted by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique ID, `task_` followed by 8 hex chars.
    pub id: String,
    /// Owner of this task (opaque, not validated).
    pub user_id: String,
    /// Free-text instruction, passed verbatim to the assistant process.
    pub description: String,
    /// Lifecycle status.
    pub status: TaskStatus,
    /// Populated only once the task reaches a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    /// When the task was submitted.
    pub created_at: DateTime<Utc>,
    /// When the task reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a new pending task with a fresh id.
    pub fn new(user_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: generate_task_id(),
            user_id: user_id.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            result: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Record a terminal outcome.
    pub fn finish(&mut self, result: TaskResult) {
        self.status = if result.success {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
    }
}

/// Immediate response to a task submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskReceipt {
    pub task_id: String,
    pub status: TaskStatus,
}

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// A single turn in a chat session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Per-user running conversation. One session per user, append-only history,
/// no terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    /// Derived from the user id: `chat_{user_id}`.
    pub id: String,
    pub user_id: String,
    pub history: Vec<ChatMessage>,
    pub created_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            id: session_id(&user_id),
            user_id,
            history: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// Generate a short, prefixed task id.
pub fn generate_task_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("task_{}", &hex[..8])
}

/// Deterministic session id for a user.
pub fn session_id(user_id: &str) -> String {
    format!("chat_{user_id}")
}
