//! Tool-using agent: let the model call tools until it answers in text.
//!
//! Loop per step:
//! 1. Ask the model, offering the agent's filtered tool list. The first step
//!    forces a tool call when tools exist.
//! 2. No tool calls: the text is the answer.
//! 3. Otherwise run every call and feed the results back, failing once the
//!    step ceiling is reached.

use async_trait::async_trait;

use super::agent::{Agent, AgentDeps};
use super::context::RequestContext;
use super::errors::AgentError;
use super::memory::{format_memory, MemoryInfo, ToolContent};
use super::prompts;
use crate::config::AgentInfo;
use crate::inference::{Message, ToolChoice, ToolDefinition};

pub struct UsingToolAgent {
    info: AgentInfo,
    deps: AgentDeps,
    system: String,
}

impl UsingToolAgent {
    pub fn new(info: AgentInfo, deps: AgentDeps) -> Self {
        let system = info
            .prompt("system")
            .unwrap_or(prompts::USING_TOOL_SYSTEM)
            .to_string();
        Self { info, deps, system }
    }
}

#[async_trait]
impl Agent for UsingToolAgent {
    fn info(&self) -> &AgentInfo {
        &self.info
    }

    async fn run(
        &self,
        ctx: &RequestContext,
        query: &str,
        history: &[MemoryInfo],
    ) -> Result<String, AgentError> {
        let name = self.info.name.as_str();
        let tools = self.deps.tools.tools(&self.info.tool_filter).await;
        let definitions: Vec<ToolDefinition> = tools.iter().map(|t| t.definition()).collect();
        tracing::info!(
            agent = %name,
            request_id = %ctx.request_id,
            tools = definitions.len(),
            "tool loop started"
        );

        let mut transcript = vec![Message::system(&self.system)];
        transcript.extend(format_memory(history));
        transcript.push(Message::user(query));

        let max_steps = self.deps.max_steps;
        let mut pending: Vec<ToolContent> = Vec::new();
        let mut step = 0;
        loop {
            let tool_choice = if step == 0 && !definitions.is_empty() {
                ToolChoice::Required
            } else {
                ToolChoice::Auto
            };
            let reply = self
                .deps
                .model
                .ask_tool(&transcript, &definitions, tool_choice, self.deps.stream)
                .await?;

            let row = if step == 0 {
                MemoryInfo::new(ctx, name)
                    .with_system(&self.system)
                    .with_user(query)
            } else {
                MemoryInfo::new(ctx, name).with_tool_contents(std::mem::take(&mut pending))
            };
            self.deps
                .remember(&row.with_assistant(reply.content.as_deref(), &reply.tool_calls));

            if !reply.has_tool_calls() {
                tracing::info!(agent = %name, request_id = %ctx.request_id, step, "tool loop finished");
                return Ok(reply.text().to_string());
            }
            if step >= max_steps {
                tracing::error!(agent = %name, request_id = %ctx.request_id, step, "too many tool iterations");
                return Err(AgentError::TooManySteps {
                    agent: name.to_string(),
                    max_steps,
                });
            }

            let calls = reply.tool_calls.clone();
            transcript.push(reply);
            for call in &calls {
                let result = self.deps.call_tool(ctx, call).await;
                transcript.push(Message::tool(&result, &call.id));
                pending.push(ToolContent {
                    tool_call_id: call.id.clone(),
                    content: result,
                });
            }
            step += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::agent::testing::{deps, standard_agents, Reply, ScriptedModel};
    use crate::inference::{Role, ToolCall};

    fn agent(deps: &AgentDeps) -> UsingToolAgent {
        let info = deps.agents.by_name("sql_agent").unwrap().clone();
        UsingToolAgent::new(info, deps.clone())
    }

    #[tokio::test]
    async fn test_text_on_first_round_returns_without_tools() {
        let model = ScriptedModel::new(vec![Reply::Text("All instances are healthy.")]);
        let (deps, out) = deps(model.clone(), standard_agents(), "", 10);
        let ctx = RequestContext::new("alice", "ops");

        let answer = agent(&deps).run(&ctx, "status?", &[]).await.unwrap();
        assert_eq!(answer, "All instances are healthy.");

        let requests = model.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].tool_choice, Some(ToolChoice::Required));
        assert_eq!(requests[0].tools, vec!["interaction", "echo"]);
        assert_eq!(out.contents(), "");
    }

    #[tokio::test]
    async fn test_tool_results_are_fed_back_and_persisted() {
        let model = ScriptedModel::new(vec![
            Reply::Calls(vec![
                ToolCall::new("c1", "echo", r#"{"text":"42 rows"}"#),
                ToolCall::new("c2", "echo", r#"{"fail":true}"#),
            ]),
            Reply::Text("There are 42 rows."),
        ]);
        let (deps, out) = deps(model.clone(), standard_agents(), "", 10);
        let ctx = RequestContext::new("alice", "ops");

        let answer = agent(&deps).run(&ctx, "count rows", &[]).await.unwrap();
        assert_eq!(answer, "There are 42 rows.");

        let requests = model.requests();
        assert_eq!(requests[1].tool_choice, Some(ToolChoice::Auto));
        let second = &requests[1].messages;
        let roles: Vec<Role> = second.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Tool]
        );
        assert_eq!(second[3].text(), "42 rows");
        assert!(second[4].text().starts_with("call tool failed, exception:"));
        assert!(second[4].text().contains("disk full"));
        assert_eq!(out.contents(), "[tool] local-tool.echo\n[tool] local-tool.echo\n");

        let saved = deps.memory.history(&ctx, "sql_agent").unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[1].tool_contents.len(), 2);
        let replay: Vec<Role> = format_memory(&saved).iter().map(|m| m.role).collect();
        assert_eq!(
            replay,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Tool, Role::Assistant]
        );
    }

    #[tokio::test]
    async fn test_endless_tool_calls_fail_at_max_steps() {
        let model = ScriptedModel::new(vec![Reply::Loop]);
        let (deps, _) = deps(model.clone(), standard_agents(), "", 3);
        let ctx = RequestContext::new("alice", "ops").with_detail(false);

        let err = agent(&deps).run(&ctx, "loop", &[]).await.unwrap_err();
        assert!(matches!(err, AgentError::TooManySteps { max_steps: 3, .. }));
        assert_eq!(model.requests().len(), 4);
    }

    #[tokio::test]
    async fn test_history_is_replayed_before_query() {
        let model = ScriptedModel::new(vec![Reply::Text("done")]);
        let (deps, _) = deps(model.clone(), standard_agents(), "", 10);
        let ctx = RequestContext::new("alice", "ops");
        let earlier = MemoryInfo::new(&ctx, "main")
            .with_user("which database is slow?")
            .with_assistant(Some("orders"), &[]);

        agent(&deps).run(&ctx, "fix it", &[earlier]).await.unwrap();
        let requests = model.requests();
        let messages = &requests[0].messages;
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].text(), "which database is slow?");
        assert_eq!(messages[2].text(), "orders");
        assert_eq!(messages[3].text(), "fix it");
    }
}
