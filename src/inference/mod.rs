//! Inference: OpenAI-compatible chat completion client.
//!
//! This module handles all communication with the model endpoint:
//! - The message model shared by agents (`Message`, `ToolCall`)
//! - Plain and function-calling completions, streaming or not
//! - SSE parsing and reassembly of fragmented tool calls
//! - Bounded exponential-backoff retry

pub mod client;
pub mod errors;
pub mod streaming;
pub mod types;

// Re-exports for convenience
pub use client::{ChatModel, InferenceClient, RetryPolicy};
pub use errors::InferenceError;
pub use types::{Message, Role, ToolCall, ToolChoice, ToolDefinition};
