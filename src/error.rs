//! Error types for the relay.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Engine-level errors surfaced to callers.
///
/// Per-task execution failures never appear here; they are absorbed into the
/// task's terminal result. The chat path likewise folds failures into its
/// returned string.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Task not found: {id}")]
    TaskNotFound { id: String },

    #[error("Engine is already started")]
    AlreadyStarted,

    #[error("Engine is stopped")]
    Stopped,
}

/// Result type alias for the relay.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_names_the_id() {
        let err = EngineError::TaskNotFound {
            id: "task_ab12cd34".into(),
        };
        assert_eq!(err.to_string(), "Task not found: task_ab12cd34");
    }

    #[test]
    fn config_error_converts_to_top_level() {
        let err: Error = ConfigError::MissingRequired {
            key: "LLM_API_KEY".into(),
            hint: "export LLM_API_KEY=...".into(),
        }
        .into();
        assert!(err.to_string().contains("LLM_API_KEY"));
    }
}
