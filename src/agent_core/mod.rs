//! Agent Core: the agents that answer user queries.
//!
//! Submodules:
//! - `agent`: the `Agent` contract, shared services and the mode-keyed factory
//! - `router`: intent classification and delegation
//! - `using_tool`: the tool-calling loop
//! - `reflection`: act/critique/revise loop
//! - `chat`: single-shot completion
//! - `memory`: persisted conversation rows and their replay
//! - `context`: per-turn request context
//! - `prompts`: built-in templates and placeholder rendering
//! - `errors`: agent-level error types

pub mod agent;
pub mod chat;
pub mod context;
pub mod errors;
pub mod memory;
pub mod prompts;
pub mod reflection;
pub mod router;
pub mod using_tool;

// Re-exports for convenience
pub use agent::{create_agent, Agent, AgentDeps};
pub use context::RequestContext;
pub use errors::AgentError;
pub use memory::{format_memory, MemoryInfo, MemoryStore, ToolContent};
