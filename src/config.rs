//! Configuration for the relay, read once at process start.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default image for the assistant's sandboxed runtime.
const DEFAULT_SANDBOX_IMAGE: &str = "docker.all-hands.dev/all-hands-ai/runtime:0.28-nikolaik";

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Prefix that marks a line as a command rather than a chat turn.
    pub command_prefix: String,
    /// Path (or PATH name) of the external assistant executable.
    pub assistant_path: String,
    /// Root directory under which per-user workspaces are created.
    pub workspace_root: PathBuf,
    /// API key forwarded to the assistant via `LLM_API_KEY`.
    pub api_key: SecretString,
    /// Model identifier forwarded via `LLM_MODEL`.
    pub model: String,
    /// Sandbox image forwarded via `SANDBOX_RUNTIME_CONTAINER_IMAGE`.
    pub sandbox_image: String,
    /// Wall-clock bound for a single assistant invocation.
    pub task_timeout: Duration,
    /// Capacity of the in-memory task map; terminal records beyond this are
    /// evicted oldest-first.
    pub max_task_records: usize,
}

impl RelayConfig {
    /// Load configuration from the process environment.
    ///
    /// Fails fast on a missing API key or unparsable numeric value so
    /// misconfiguration surfaces at startup, not at first submission.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = lookup("LLM_API_KEY").ok_or_else(|| ConfigError::MissingRequired {
            key: "LLM_API_KEY".into(),
            hint: "Set LLM_API_KEY to the API key the assistant should use.".into(),
        })?;

        Ok(Self {
            command_prefix: lookup("RELAY_COMMAND_PREFIX").unwrap_or_else(|| "!oh ".into()),
            assistant_path: lookup("ASSISTANT_CLI_PATH").unwrap_or_else(|| "openhands".into()),
            workspace_root: lookup("ASSISTANT_WORKDIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./assistant_workspace")),
            api_key: SecretString::from(api_key),
            model: lookup("LLM_MODEL").unwrap_or_else(|| "claude-3-sonnet-20240229".into()),
            sandbox_image: lookup("SANDBOX_RUNTIME_CONTAINER_IMAGE")
                .unwrap_or_else(|| DEFAULT_SANDBOX_IMAGE.into()),
            task_timeout: Duration::from_secs(parse_or(
                "TASK_TIMEOUT_SECONDS",
                lookup("TASK_TIMEOUT_SECONDS"),
                300,
            )?),
            max_task_records: parse_or(
                "RELAY_MAX_TASK_RECORDS",
                lookup("RELAY_MAX_TASK_RECORDS"),
                1024,
            )?,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &str,
    value: Option<String>,
    default: T,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match value {
        Some(raw) => raw.parse().map_err(|e| ConfigError::InvalidValue {
            key: key.into(),
            message: format!("{e}"),
        }),
        None => Ok(default),
    }
}
