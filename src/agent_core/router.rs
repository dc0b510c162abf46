//! Router agent: classify the query into an intent and delegate to the agent
//! that owns it.
//!
//! The system prompt is assembled once from the configured sub-agents, so a
//! new agent only needs an intent, a description and optional shots.

use async_trait::async_trait;

use super::agent::{create_agent, Agent, AgentDeps};
use super::context::RequestContext;
use super::errors::AgentError;
use super::memory::MemoryInfo;
use super::prompts;
use crate::config::{AgentInfo, AgentRegistry};
use crate::inference::Message;

pub struct RouterAgent {
    info: AgentInfo,
    deps: AgentDeps,
    system: String,
    act: String,
}

impl RouterAgent {
    pub fn new(info: AgentInfo, deps: AgentDeps) -> Self {
        let template = info.prompt("system").unwrap_or(prompts::ROUTER_SYSTEM);
        let system = system_prompt(template, &deps.agents);
        let act = info.prompt("act").unwrap_or(prompts::ROUTER_ACT).to_string();
        tracing::debug!(agent = %info.name, prompt = %system, "router prompt built");
        Self {
            info,
            deps,
            system,
            act,
        }
    }

    /// Predict a known intent; anything unrecognised maps to the default
    /// agent's intent.
    async fn predict(&self, query: &str, history: &[MemoryInfo]) -> Result<String, AgentError> {
        let mut messages = vec![Message::system(&self.system)];
        for memory in history {
            if let Some(user) = memory.user_content.as_deref().filter(|c| !c.is_empty()) {
                messages.push(Message::user(user));
            }
            if let Some(Ok(assistant)) = memory
                .assistant_content
                .as_ref()
                .map(|c| Message::assistant(Some(c.clone()), Vec::new()))
            {
                messages.push(assistant);
            }
        }
        messages.push(Message::user(prompts::render(&self.act, &[("query", query)])));

        let raw = self.deps.model.ask(&messages, self.deps.stream).await?;
        let label = normalize_label(&raw);
        if self.deps.agents.by_intent(label).is_some() {
            return Ok(label.to_string());
        }

        let fallback = self.deps.agents.default_agent();
        tracing::warn!(
            agent = %self.info.name,
            predicted = %raw,
            fallback = %fallback.name,
            "unknown intent, using default agent"
        );
        fallback
            .intent
            .clone()
            .ok_or_else(|| AgentError::UnknownIntent {
                intent: label.to_string(),
            })
    }
}

#[async_trait]
impl Agent for RouterAgent {
    fn info(&self) -> &AgentInfo {
        &self.info
    }

    async fn run(
        &self,
        ctx: &RequestContext,
        query: &str,
        history: &[MemoryInfo],
    ) -> Result<String, AgentError> {
        let intent = self.predict(query, history).await?;
        self.deps.say(&format!("[A] intent: {intent}")).await;

        let target = self
            .deps
            .agents
            .by_intent(&intent)
            .ok_or_else(|| AgentError::UnknownIntent {
                intent: intent.clone(),
            })?;
        tracing::info!(
            agent = %self.info.name,
            request_id = %ctx.request_id,
            intent = %intent,
            target = %target.name,
            "routing query"
        );

        let content = create_agent(target, &self.deps)
            .run(ctx, query, history)
            .await?;
        self.deps.remember(
            &MemoryInfo::new(ctx, &self.info.name)
                .with_system(&self.system)
                .with_user(query)
                .with_assistant(Some(content.as_str()), &[]),
        );
        Ok(content)
    }
}

// ─── Prompt assembly ────────────────────────────────────────────────────────

fn system_prompt(template: &str, agents: &AgentRegistry) -> String {
    let subs: Vec<&AgentInfo> = agents.sub_agents().collect();
    let intent = |a: &AgentInfo| a.intent.clone().unwrap_or_default();

    let intent_infos = subs
        .iter()
        .copied()
        .enumerate()
        .map(|(i, a)| {
            let id = (i + 1).to_string();
            let name = intent(a);
            let description = a.intent_description.clone().unwrap_or_default();
            prompts::render(
                prompts::INTENT_INFO,
                &[
                    ("id", id.as_str()),
                    ("name", name.as_str()),
                    ("description", description.as_str()),
                ],
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let intent_names = subs.iter().map(|a| intent(*a)).collect::<Vec<_>>().join(", ");
    let default_intent = intent(agents.default_agent());

    let conditions = subs
        .iter()
        .copied()
        .flat_map(|a| a.prompt_list("condition"))
        .map(|c| prompts::render(prompts::CONDITION_INFO, &[("condition", c.as_str())]))
        .collect::<Vec<_>>()
        .join("\n");

    let shots: Vec<String> = subs
        .iter()
        .copied()
        .flat_map(|a| a.prompt_list("shot").into_iter().map(move |s| (s, intent(a))))
        .enumerate()
        .map(|(i, (shot, intent))| {
            let id = (i + 1).to_string();
            prompts::render(
                prompts::SHOT_INFO,
                &[
                    ("id", id.as_str()),
                    ("shot", shot.as_str()),
                    ("intent", intent.as_str()),
                ],
            )
        })
        .collect();
    let shots = if shots.is_empty() {
        prompts::NO_SHOTS.to_string()
    } else {
        shots.join("\n")
    };

    prompts::render(
        template,
        &[
            ("intent_infos", intent_infos.as_str()),
            ("default_intent", default_intent.as_str()),
            ("intent_names", intent_names.as_str()),
            ("conditions", conditions.as_str()),
            ("shots", shots.as_str()),
        ],
    )
}

/// Trim the model's answer and strip one pair of surrounding quotes or
/// backticks.
fn normalize_label(raw: &str) -> &str {
    let label = raw.trim();
    for quote in ['"', '\'', '`'] {
        if let Some(inner) = label
            .strip_prefix(quote)
            .and_then(|l| l.strip_suffix(quote))
        {
            return inner.trim();
        }
    }
    label
}
