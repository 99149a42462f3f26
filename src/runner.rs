//! External assistant process invocation.
//!
//! Each call spawns the assistant CLI as a fresh subprocess with the task or
//! chat text as an argument, bounded by a wall-clock timeout. The runner
//! absorbs every failure mode (launch error, non-zero exit, timeout) into a
//! [`RunOutcome`] so callers never handle an `Err` for execution failures.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::config::RelayConfig;

/// Maximum captured output size before truncation (64KB).
const MAX_OUTPUT_SIZE: usize = 64 * 1024;

/// Outcome of one assistant invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub success: bool,
    /// Captured standard output (may be present even on failure).
    pub output: String,
    /// Failure detail: stderr, the launch error, or a timeout message.
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            error: Some(error.into()),
        }
    }
}

/// Seam between the engine and the assistant process, so engine logic can be
/// exercised against a scripted backend in tests.
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    /// Run the assistant for one task or chat turn. Infallible by contract;
    /// failures are reported inside the outcome.
    async fn run(&self, user_id: &str, text: &str) -> RunOutcome;
}

/// Subprocess-backed assistant invocation.
pub struct AssistantRunner {
    assistant_path: String,
    workspace_root: PathBuf,
    api_key: SecretString,
    model: String,
    sandbox_image: String,
    timeout: Duration,
}

impl AssistantRunner {
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            assistant_path: config.assistant_path.clone(),
            workspace_root: config.workspace_root.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            sandbox_image: config.sandbox_image.clone(),
            timeout: config.task_timeout,
        }
    }

    /// Per-user workspace directory, created on demand and never cleaned up.
    /// The chat and task paths for one user deliberately share it.
    async fn ensure_workspace(&self, user_id: &str) -> std::io::Result<PathBuf> {
        let dir = self.workspace_root.join(user_id);
        tokio::fs::create_dir_all(&dir).await?;
        Ok(dir)
    }

    async fn execute(&self, workspace: &PathBuf, text: &str) -> RunOutcome {
        let mut command = Command::new(&self.assistant_path);
        command
            .arg("--workspace")
            .arg(workspace)
            .arg("--task")
            .arg(text)
            .env("LLM_API_KEY", self.api_key.expose_secret())
            .env("LLM_MODEL", &self.model)
            .env("SANDBOX_RUNTIME_CONTAINER_IMAGE", &self.sandbox_image)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return RunOutcome::failed(
                    format!("Failed to launch assistant: {e}"),
                    String::new(),
                );
            }
        };

        // Drain both pipes concurrently with the wait. A child that writes
        // more than the OS pipe buffer would otherwise block on write and
        // never exit, turning a successful run into a timeout.
        let stdout_reader = spawn_pipe_reader(child.stdout.take());
        let stderr_reader = spawn_pipe_reader(child.stderr.take());

        let waited = tokio::time::timeout(self.timeout, child.wait()).await;

        match waited {
            Ok(Ok(status)) => {
                let stdout = truncate_output(&collect_pipe(stdout_reader).await);
                let stderr = truncate_output(&collect_pipe(stderr_reader).await);
                if status.success() {
                    RunOutcome::ok(stdout)
                } else {
                    RunOutcome::failed(stderr, stdout)
                }
            }
            Ok(Err(e)) => {
                RunOutcome::failed(format!("Assistant execution failed: {e}"), String::new())
            }
            Err(_) => {
                // Timeout: kill before reporting so no orphan survives. The
                // kill closes the pipes, which lets the readers finish.
                let _ = child.kill().await;
                RunOutcome::failed(
                    format!("Task timed out after {} seconds", self.timeout.as_secs()),
                    String::new(),
                )
            }
        }
    }
}

#[async_trait]
impl AssistantBackend for AssistantRunner {
    async fn run(&self, user_id: &str, text: &str) -> RunOutcome {
        let workspace = match self.ensure_workspace(user_id).await {
            Ok(dir) => dir,
            Err(e) => {
                return RunOutcome::failed(
                    format!("Failed to create workspace: {e}"),
                    String::new(),
                );
            }
        };

        tracing::debug!(user = %user_id, workspace = %workspace.display(), "Invoking assistant");
        let outcome = self.execute(&workspace, text).await;
        if !outcome.success {
            tracing::debug!(
                user = %user_id,
                error = outcome.error.as_deref().unwrap_or(""),
                "Assistant invocation failed"
            );
        }
        outcome
    }
}

/// A structured reply line from the assistant's stdout.
#[derive(Debug, Deserialize)]
struct ReplyLine {
    role: String,
    content: String,
}

/// Extract the assistant's chat reply from raw stdout.
///
/// Contract: the assistant emits line-delimited JSON; lines of the form
/// `{"role": "assistant", "content": "..."}` are reply lines, joined in
/// order. Output with no reply lines is returned verbatim (trimmed) so a
/// plain-text assistant still produces a usable response.
pub fn extract_reply(stdout: &str) -> String {
    let replies: Vec<String> = stdout
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if !line.starts_with('{') {
                return None;
            }
            serde_json::from_str::<ReplyLine>(line)
                .ok()
                .filter(|r| r.role == "assistant")
                .map(|r| r.content)
        })
        .collect();

    if replies.is_empty() {
        stdout.trim().to_string()
    } else {
        replies.join("\n")
    }
}

/// Drain a child pipe to the end on its own task.
fn spawn_pipe_reader<R>(pipe: Option<R>) -> tokio::task::JoinHandle<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    })
}

async fn collect_pipe(reader: tokio::task::JoinHandle<Vec<u8>>) -> String {
    String::from_utf8_lossy(&reader.await.unwrap_or_default()).into_owned()
}

/// Cap captured output at `MAX_OUTPUT_SIZE`, keeping the head and a marker
/// noting how much was dropped. The cut lands on a char boundary.
fn truncate_output(s: &str) -> String {
    if s.len() <= MAX_OUTPUT_SIZE {
        return s.to_string();
    }
    let mut cut = MAX_OUTPUT_SIZE;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "{}\n... [output truncated, {} bytes dropped]",
        &s[..cut],
        s.len() - cut
    )
}
