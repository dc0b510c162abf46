//! Agent Core error types.

use thiserror::Error;

use crate::config::ConfigError;
use crate::inference::InferenceError;
use crate::tools::ToolError;

/// Errors that can fail a whole user turn.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The agent produced no usable answer.
    #[error("agent '{agent}' failed: {reason}")]
    Execution { agent: String, reason: String },

    /// The tool-calling loop hit its step ceiling.
    #[error("agent '{agent}' exceeded {max_steps} tool iterations")]
    TooManySteps { agent: String, max_steps: usize },

    /// No agent is configured for the intent and no default exists.
    #[error("no agent configured for intent '{intent}'")]
    UnknownIntent { intent: String },

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    /// Memory store operation failed.
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("serialization error: {reason}")]
    Serialization { reason: String },

    #[error(transparent)]
    ConfigError(#[from] ConfigError),
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::Database {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Serialization {
            reason: e.to_string(),
        }
    }
}
