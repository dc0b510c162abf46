//! Command-line front-end.
//!
//! - `repl`: the interactive assistant loop (default command)
//! - `init`: create the configuration tables and seed the default agents
//! - `add`: register a database instance or a remote tool provider

pub mod add;
pub mod init;
pub mod repl;

use std::sync::Arc;
use std::time::Duration;

use crate::agent_core::{AgentDeps, MemoryStore};
use crate::config::{ConfigStore, Settings};
use crate::inference::InferenceClient;
use crate::mcp_client::McpClient;
use crate::tools::{Console, DatabaseCache, Interaction, MysqlExecution, ToolRegistry};

/// Wire every runtime service from settings and the configuration store.
pub fn build_runtime(settings: &Settings, console: Arc<Console>) -> anyhow::Result<AgentDeps> {
    let store = ConfigStore::open(&settings.common.config_database)?;
    let loaded = store.load()?;
    tracing::info!(
        agents = loaded.agents.len(),
        providers = loaded.providers.len(),
        databases = loaded.databases.len(),
        config_database = %store.path().display(),
        "configuration loaded"
    );

    let databases = Arc::new(loaded.databases);
    let tools = ToolRegistry::new(loaded.providers, Arc::new(McpClient::new()))
        .with_refresh_interval(Duration::from_secs(settings.app.refresh_interval))
        .with_local_tool(Arc::new(Interaction::new(Arc::clone(&console))))
        .with_local_tool(Arc::new(MysqlExecution::new(
            databases,
            Arc::new(DatabaseCache::new()),
        )));

    Ok(AgentDeps {
        model: Arc::new(InferenceClient::from_settings(&settings.model)?),
        tools: Arc::new(tools),
        memory: Arc::new(MemoryStore::open(&settings.common.config_database)?),
        agents: Arc::new(loaded.agents),
        console,
        max_steps: settings.app.max_steps,
        stream: true,
    })
}
