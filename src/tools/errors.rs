//! Tool execution error types.

use thiserror::Error;

use crate::mcp_client::McpError;

#[derive(Debug, Error)]
pub enum ToolError {
    /// The key names neither a local tool nor a catalogued remote tool.
    #[error("tool '{name}' does not exist")]
    UnknownTool { name: String },

    /// Arguments were not valid JSON or missed a required field.
    #[error("invalid arguments for tool '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// A local tool failed.
    #[error("tool '{tool}' failed: {reason}")]
    Execution { tool: String, reason: String },

    /// SQL execution against a configured database failed.
    #[error("database '{database}': {reason}")]
    Database { database: String, reason: String },

    /// Reading the user's reply failed (EOF or I/O).
    #[error("interaction failed: {reason}")]
    Interaction { reason: String },

    /// The remote provider call failed.
    #[error(transparent)]
    Provider(#[from] McpError),
}
