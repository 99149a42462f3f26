//! End-to-end tests: the engine driving a real assistant subprocess.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use agent_relay::config::RelayConfig;
use agent_relay::engine::TaskEngine;
use agent_relay::runner::AssistantRunner;
use agent_relay::task::{Task, TaskStatus};
use secrecy::SecretString;

fn write_script(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join("assistant.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

fn engine_with_script(dir: &Path, body: &str) -> TaskEngine {
    let script = write_script(dir, body);
    let config = RelayConfig {
        command_prefix: "!oh ".into(),
        assistant_path: script.to_string_lossy().into_owned(),
        workspace_root: dir.join("ws"),
        api_key: SecretString::from("sk-test"),
        model: "test-model".into(),
        sandbox_image: "test-image".into(),
        task_timeout: Duration::from_secs(10),
        max_task_records: 1024,
    };
    TaskEngine::new(Arc::new(AssistantRunner::new(&config)), config.max_task_records)
}

async fn wait_terminal(engine: &TaskEngine, task_id: &str) -> Task {
    for _ in 0..500 {
        let task = engine.get_status(task_id).await.unwrap();
        if task.status.is_terminal() {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never reached a terminal state");
}

#[tokio::test]
async fn submitted_task_runs_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with_script(dir.path(), "echo done");
    engine.start().await.unwrap();

    let receipt = engine.submit_task("u1", "write fib").await.unwrap();
    assert_eq!(receipt.status, TaskStatus::Pending);

    let task = wait_terminal(&engine, &receipt.task_id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    let result = task.result.unwrap();
    assert!(result.success);
    assert_eq!(result.output.trim(), "done");

    // The per-user workspace was created under the configured root.
    assert!(dir.path().join("ws").join("u1").is_dir());
    engine.stop().await;
}

#[tokio::test]
async fn large_output_task_still_completes() {
    // Exceeds the OS pipe buffer: the run must complete, not hit the timeout.
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with_script(dir.path(), "head -c 200000 /dev/zero | tr '\\0' 'x'");
    engine.start().await.unwrap();

    let receipt = engine.submit_task("u1", "big").await.unwrap();
    let task = wait_terminal(&engine, &receipt.task_id).await;

    assert_eq!(task.status, TaskStatus::Completed);
    let result = task.result.unwrap();
    assert!(result.success);
    assert!(result.output.starts_with("xxx"));
    assert!(result.output.contains("[output truncated"));
    engine.stop().await;
}

#[tokio::test]
async fn failing_assistant_marks_task_failed() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with_script(dir.path(), "echo no good >&2; exit 2");
    engine.start().await.unwrap();

    let receipt = engine.submit_task("u1", "break").await.unwrap();
    let task = wait_terminal(&engine, &receipt.task_id).await;

    assert_eq!(task.status, TaskStatus::Failed);
    let result = task.result.unwrap();
    assert!(!result.success);
    assert!(result.error.unwrap().contains("no good"));
    engine.stop().await;
}

#[tokio::test]
async fn chat_extracts_structured_reply_from_subprocess() {
    let dir = tempfile::tempdir().unwrap();
    let engine = engine_with_script(
        dir.path(),
        r#"echo '{"role": "assistant", "content": "hi there"}'"#,
    );

    let reply = engine.chat("u1", "hello").await;
    assert_eq!(reply, "hi there");

    let session = engine.get_session("u1").await.unwrap();
    assert_eq!(session.history.len(), 2);
}

#[tokio::test]
async fn tasks_from_interleaved_users_execute_in_order() {
    let dir = tempfile::tempdir().unwrap();
    // The script appends its task argument to a shared log file.
    let log = dir.path().join("order.log");
    let engine = engine_with_script(
        dir.path(),
        &format!("echo \"$4\" >> '{}'", log.to_string_lossy()),
    );
    engine.start().await.unwrap();

    let a = engine.submit_task("u1", "alpha").await.unwrap();
    let b = engine.submit_task("u2", "beta").await.unwrap();
    let c = engine.submit_task("u1", "gamma").await.unwrap();

    wait_terminal(&engine, &a.task_id).await;
    wait_terminal(&engine, &b.task_id).await;
    wait_terminal(&engine, &c.task_id).await;

    let recorded = std::fs::read_to_string(&log).unwrap();
    let order: Vec<&str> = recorded.lines().collect();
    assert_eq!(order, vec!["alpha", "beta", "gamma"]);
    engine.stop().await;
}
