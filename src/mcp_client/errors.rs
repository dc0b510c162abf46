//! MCP Client error types.

use thiserror::Error;

/// Errors that can occur while talking to a remote tool provider.
#[derive(Debug, Error)]
pub enum McpError {
    /// A provider subprocess failed to start.
    #[error("failed to spawn provider '{name}': {reason}")]
    SpawnFailed { name: String, reason: String },

    /// The initialization handshake failed.
    #[error("provider '{name}' initialization failed: {reason}")]
    InitFailed { name: String, reason: String },

    /// JSON-RPC communication error (malformed message, I/O error, HTTP error).
    #[error("transport error for provider '{server}': {reason}")]
    TransportError { server: String, reason: String },

    /// Provider returned a JSON-RPC error response.
    #[error("server error [{code}]: {message}")]
    ServerError {
        code: i32,
        message: String,
        data: Option<serde_json::Value>,
    },

    /// The tool ran but reported failure (`isError: true`).
    #[error("tool '{tool}' on '{server}' failed: {message}")]
    ToolError {
        server: String,
        tool: String,
        message: String,
    },

    /// The tool result had no text content.
    #[error("tool '{tool}' on '{server}' returned no text content")]
    EmptyResult { server: String, tool: String },

    /// The session did not finish within its deadline.
    #[error("{operation} on provider '{server}' timed out after {timeout_ms}ms")]
    Timeout {
        server: String,
        operation: String,
        timeout_ms: u64,
    },

    /// Provider configuration is unusable (missing command or URI).
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}

impl McpError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, McpError::Timeout { .. })
    }
}
