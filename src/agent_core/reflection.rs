//! Reflective agent: answer, critique the answer, revise, until the critique
//! comes back clean.
//!
//! The act phase may ask the user clarifying questions through the
//! `interaction` tool. Past the step ceiling the latest answer is returned
//! as-is instead of failing.

use async_trait::async_trait;

use super::agent::{Agent, AgentDeps};
use super::context::RequestContext;
use super::errors::AgentError;
use super::memory::{format_memory, MemoryInfo};
use super::prompts;
use crate::config::{AgentInfo, ToolFilter};
use crate::inference::{Message, ToolChoice, ToolDefinition};
use crate::tools::interaction::INTERACTION;
use crate::tools::LOCAL_PROVIDER;

/// Reply meaning the critique found nothing to fix.
pub const NO_ISSUES: &str = "None";

/// Hard bound on act/reflect rounds.
const MAX_ROUNDS: usize = 100;

pub struct ReflectionAgent {
    info: AgentInfo,
    deps: AgentDeps,
    system: String,
    act: String,
    reflection: String,
}

impl ReflectionAgent {
    pub fn new(info: AgentInfo, deps: AgentDeps) -> Self {
        let template = |key: &str, fallback: &str| info.prompt(key).unwrap_or(fallback).to_string();
        let system = template("system", prompts::REFLECTION_SYSTEM);
        let act = template("act", prompts::REFLECTION_ACT);
        let reflection = template("reflection", prompts::REFLECTION_REFLECT);
        Self {
            info,
            deps,
            system,
            act,
            reflection,
        }
    }

    /// Produce an answer, or revise `previous` against `critique`.
    async fn act(
        &self,
        ctx: &RequestContext,
        query: &str,
        history: &[MemoryInfo],
        revision: Option<(&str, &str)>,
    ) -> Result<String, AgentError> {
        let name = self.info.name.as_str();
        self.deps.say(&format!("[A] {name} working...")).await;

        let prompt = match revision {
            Some((previous, critique)) => prompts::render(
                &self.act,
                &[("query", query), ("content", previous), ("reflection", critique)],
            ),
            None => query.to_string(),
        };

        let tools: Vec<ToolDefinition> = self
            .deps
            .tools
            .tools(&ToolFilter::allow(&[LOCAL_PROVIDER]))
            .await
            .iter()
            .filter(|t| t.tool_key == INTERACTION)
            .map(|t| t.definition())
            .collect();

        let mut transcript = vec![Message::system(&self.system)];
        transcript.extend(format_memory(history));
        transcript.push(Message::user(&prompt));

        let mut step = 0;
        let answer = loop {
            let reply = self
                .deps
                .model
                .ask_tool(&transcript, &tools, ToolChoice::Auto, self.deps.stream)
                .await?;
            if !reply.has_tool_calls() {
                break reply.text().to_string();
            }
            if step >= self.deps.max_steps {
                return Err(AgentError::TooManySteps {
                    agent: name.to_string(),
                    max_steps: self.deps.max_steps,
                });
            }
            let calls = reply.tool_calls.clone();
            transcript.push(reply);
            for call in &calls {
                let result = self.deps.call_tool(ctx, call).await;
                transcript.push(Message::tool(result, &call.id));
            }
            step += 1;
        };

        tracing::info!(agent = %name, request_id = %ctx.request_id, "act finished");
        self.deps.remember(
            &MemoryInfo::new(ctx, name)
                .with_system(&self.system)
                .with_user(&prompt)
                .with_assistant(Some(answer.as_str()), &[]),
        );
        Ok(answer)
    }

    /// Critique `answer`. `None` when there is nothing to fix.
    async fn reflect(
        &self,
        ctx: &RequestContext,
        query: &str,
        answer: &str,
    ) -> Result<Option<String>, AgentError> {
        let name = self.info.name.as_str();
        self.deps.say(&format!("[A] {name} reflecting...")).await;

        let prompt = prompts::render(&self.reflection, &[("query", query), ("content", answer)]);
        let messages = [Message::system(&self.system), Message::user(&prompt)];
        let critique = self.deps.model.ask(&messages, self.deps.stream).await?;

        tracing::info!(agent = %name, request_id = %ctx.request_id, critique = %critique, "reflect finished");
        self.deps.remember(
            &MemoryInfo::new(ctx, name)
                .with_system(&self.system)
                .with_user(&prompt)
                .with_assistant(Some(critique.as_str()), &[]),
        );
        if critique.trim() == NO_ISSUES {
            Ok(None)
        } else {
            Ok(Some(critique))
        }
    }
}

#[async_trait]
impl Agent for ReflectionAgent {
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
        tracing::info!(agent = %name, request_id = %ctx.request_id, "reflection started");

        let mut last: Option<(String, String)> = None;
        for step in 0..MAX_ROUNDS {
            let revision = last.as_ref().map(|(a, c)| (a.as_str(), c.as_str()));
            let answer = self.act(ctx, query, history, revision).await?;

            if step >= self.deps.max_steps {
                tracing::warn!(agent = %name, request_id = %ctx.request_id, step, "too many reflections, returning latest answer");
                return Ok(answer);
            }
            match self.reflect(ctx, query, &answer).await? {
                None => return Ok(answer),
                Some(critique) => last = Some((answer, critique)),
            }
        }

        Err(AgentError::Execution {
            agent: name.to_string(),
            reason: format!("no accepted answer after {MAX_ROUNDS} rounds"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::agent::testing::{deps, standard_agents, Reply, ScriptedModel};
    use crate::config::AgentMode;
    use crate::inference::ToolCall;

    fn agent(deps: &AgentDeps) -> ReflectionAgent {
        let info = AgentInfo::new("reviewer", AgentMode::Reflection).with_intent("review", "review");
        ReflectionAgent::new(info, deps.clone())
    }

    #[tokio::test]
    async fn test_clean_critique_returns_first_answer() {
        let model = ScriptedModel::new(vec![Reply::Text("Add an index on user_id."), Reply::Text(" None \n")]);
        let (deps, out) = deps(model.clone(), standard_agents(), "", 10);
        let ctx = RequestContext::new("alice", "ops");

        let answer = agent(&deps).run(&ctx, "speed up the query", &[]).await.unwrap();
        assert_eq!(answer, "Add an index on user_id.");

        let requests = model.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].tools, vec![INTERACTION]);
        assert_eq!(requests[0].tool_choice, Some(ToolChoice::Auto));
        assert_eq!(out.contents(), "[A] reviewer working...\n[A] reviewer reflecting...\n");
        assert_eq!(deps.memory.history(&ctx, "reviewer").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_critique_triggers_revision_prompt() {
        let model = ScriptedModel::new(vec![
            Reply::Text("draft"),
            Reply::Text("mention the lock impact"),
            Reply::Text("final"),
            Reply::Text("None"),
        ]);
        let (deps, _) = deps(model.clone(), standard_agents(), "", 10);
        let ctx = RequestContext::new("alice", "ops");

        let answer = agent(&deps).run(&ctx, "add a column", &[]).await.unwrap();
        assert_eq!(answer, "final");

        let requests = model.requests();
        let revise = requests[2].messages.last().unwrap().text().to_string();
        assert!(revise.contains("add a column"));
        assert!(revise.contains("draft"));
        assert!(revise.contains("mention the lock impact"));
    }

    #[tokio::test]
    async fn test_sentinel_is_case_sensitive() {
        let model = ScriptedModel::new(vec![
            Reply::Text("draft"),
            Reply::Text("none"),
            Reply::Text("second"),
            Reply::Text("None"),
        ]);
        let (deps, _) = deps(model, standard_agents(), "", 10);
        let ctx = RequestContext::new("alice", "ops");
        let answer = agent(&deps).run(&ctx, "q", &[]).await.unwrap();
        assert_eq!(answer, "second");
    }

    #[tokio::test]
    async fn test_past_max_steps_returns_latest_answer() {
        let model = ScriptedModel::new(vec![
            Reply::Text("v1"),
            Reply::Text("still wrong"),
            Reply::Text("v2"),
            Reply::Text("never asked"),
        ]);
        let (deps, _) = deps(model.clone(), standard_agents(), "", 1);
        let ctx = RequestContext::new("alice", "ops");

        let answer = agent(&deps).run(&ctx, "q", &[]).await.unwrap();
        assert_eq!(answer, "v2");
        assert_eq!(model.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_act_can_ask_the_user() {
        let model = ScriptedModel::new(vec![
            Reply::Calls(vec![ToolCall::new(
                "c1",
                "interaction",
                r#"{"message":"Which instance?"}"#,
            )]),
            Reply::Text("rm-1 is fine"),
            Reply::Text("None"),
        ]);
        let (deps, out) = deps(model.clone(), standard_agents(), "rm-1\n", 10);
        let ctx = RequestContext::new("alice", "ops");

        let answer = agent(&deps).run(&ctx, "is my instance ok?", &[]).await.unwrap();
        assert_eq!(answer, "rm-1 is fine");
        assert_eq!(model.requests()[1].messages.last().unwrap().text(), "rm-1");
        assert!(out.contents().contains("[A] Which instance?\n>> "));
        assert!(!out.contents().contains("[tool]"));
    }
}
