//! MCP Client: JSON-RPC sessions against remote tool providers.
//!
//! This module handles:
//! - Line-delimited JSON-RPC over a provider subprocess's stdio
//! - Legacy HTTP+SSE sessions against network providers
//! - The `initialize` handshake, `tools/list` and `tools/call`
//!
//! Sessions are never reused. The tool registry polls providers through the
//! `ToolProvider` trait.

pub mod client;
pub mod errors;
pub mod transport;
pub mod types;

pub use client::{McpClient, ToolProvider};
pub use errors::McpError;
pub use types::{McpInfo, McpToolDefinition, Transport};
