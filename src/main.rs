use std::sync::Arc;

use agent_relay::config::RelayConfig;
use agent_relay::engine::TaskEngine;
use agent_relay::runner::AssistantRunner;
use agent_relay::task::Task;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // Missing credentials are fatal here, before the engine exists.
    let config = RelayConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    eprintln!("agent-relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Assistant: {}", config.assistant_path);
    eprintln!("   Model: {}", config.model);
    eprintln!("   Workspace: {}", config.workspace_root.display());
    eprintln!(
        "   Type a message to chat, or `{}task <description>`. /quit to exit.\n",
        config.command_prefix
    );

    let backend = Arc::new(AssistantRunner::new(&config));
    let engine = TaskEngine::new(backend, config.max_task_records);
    engine.start().await?;

    let user_id = std::env::var("USER").unwrap_or_else(|_| "local".to_string());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if let Some(rest) = line.strip_prefix(&config.command_prefix) {
            handle_command(&engine, &user_id, rest.trim()).await;
        } else {
            let reply = engine.chat(&user_id, line).await;
            println!("{reply}");
        }
    }

    engine.stop().await;
    Ok(())
}

/// Dispatch a prefixed command: `task <description>`, `status [id]`, `tasks`.
async fn handle_command(engine: &TaskEngine, user_id: &str, input: &str) {
    let (command, rest) = match input.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (input, ""),
    };

    match command {
        "task" if !rest.is_empty() => match engine.submit_task(user_id, rest).await {
            Ok(receipt) => println!("Task created with ID: {}", receipt.task_id),
            Err(e) => println!("Error creating task: {e}"),
        },
        "task" => println!("Usage: task <description>"),
        "status" if !rest.is_empty() => match engine.get_status(rest).await {
            Ok(task) => print_task(&task),
            Err(e) => println!("{e}"),
        },
        "status" | "tasks" => {
            let tasks = engine.list_tasks(user_id).await;
            if tasks.is_empty() {
                println!("No tasks yet.");
            }
            for task in &tasks {
                print_task(task);
            }
        }
        other => println!("Unknown command: {other}"),
    }
}

fn print_task(task: &Task) {
    println!("{} [{}] {}", task.id, task.status, task.description);
    if let Some(result) = &task.result {
        if result.success {
            if !result.output.is_empty() {
                println!("  output: {}", result.output.trim());
            }
        } else if let Some(error) = &result.error {
            println!("  error: {error}");
        }
    }
}
