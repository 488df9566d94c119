//! Error types for the trading agent

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {

    // =============================
    // Tool Registry Errors
    // =============================

    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Tool error: {0}")]
    ToolError(String),

    // =============================
    // Run Errors
    // =============================

    #[error("Model gateway error: {0}")]
    Gateway(String),

    #[error("Invalid state for thread {thread_id}: {reason}")]
    InvalidState { thread_id: String, reason: String },

    #[error("A run is already in progress for thread {0}")]
    ConcurrentRun(String),

    #[error("Exceeded {0} model turns in a single run")]
    MaxTurnsExceeded(u32),

    // =============================
    // Storage & Configuration
    // =============================

    #[error("Checkpoint error: {0}")]
    CheckpointError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AgentError {
    /// Errors caused by a malformed tool call or a failing tool.
    ///
    /// These are fed back to the model as tool results instead of aborting
    /// the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AgentError::UnknownTool(_)
                | AgentError::InvalidArguments { .. }
                | AgentError::ToolError(_)
        )
    }

    pub(crate) fn invalid_state(thread_id: &str, reason: impl Into<String>) -> Self {
        AgentError::InvalidState {
            thread_id: thread_id.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(AgentError::UnknownTool("sell_stocks".into()).is_recoverable());
        assert!(AgentError::InvalidArguments {
            tool: "buy_stocks".into(),
            reason: "missing required parameter 'quantity'".into(),
        }
        .is_recoverable());
        assert!(AgentError::ToolError("timeout".into()).is_recoverable());

        assert!(!AgentError::Gateway("503".into()).is_recoverable());
        assert!(!AgentError::ConcurrentRun("t1".into()).is_recoverable());
        assert!(!AgentError::invalid_state("t1", "not suspended").is_recoverable());
    }

    #[test]
    fn test_error_messages() {
        let err = AgentError::invalid_state("buy_thread", "no pending approval");
        assert_eq!(
            err.to_string(),
            "Invalid state for thread buy_thread: no pending approval"
        );
    }
}
