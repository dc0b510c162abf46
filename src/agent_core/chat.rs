//! Plain chat agent: one completion, no tools.

use async_trait::async_trait;

use super::agent::{Agent, AgentDeps};
use super::context::RequestContext;
use super::errors::AgentError;
use super::memory::{format_memory, MemoryInfo};
use super::prompts;
use crate::config::AgentInfo;
use crate::inference::Message;

pub struct ChatAgent {
    info: AgentInfo,
    deps: AgentDeps,
    system: String,
}

impl ChatAgent {
    pub fn new(info: AgentInfo, deps: AgentDeps) -> Self {
        let system = info.prompt("system").unwrap_or(prompts::CHAT_SYSTEM).to_string();
        Self { info, deps, system }
    }
}

#[async_trait]
impl Agent for ChatAgent {
    fn info(&self) -> &AgentInfo {
        &self.info
    }

    async fn run(
        &self,
        ctx: &RequestContext,
        query: &str,
        history: &[MemoryInfo],
    ) -> Result<String, AgentError> {
        tracing::info!(agent = %self.info.name, request_id = %ctx.request_id, "chat started");

        let mut messages = vec![Message::system(&self.system)];
        messages.extend(format_memory(history));
        messages.push(Message::user(query));

        let content = self.deps.model.ask(&messages, self.deps.stream).await?;
        self.deps.remember(
            &MemoryInfo::new(ctx, &self.info.name)
                .with_system(&self.system)
                .with_user(query)
                .with_assistant(Some(content.as_str()), &[]),
        );
        Ok(content)
    }
}
