//! Agent configuration records and the validated agent registry.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::ConfigError;

// ─── AgentMode ───────────────────────────────────────────────────────────────

/// Behavioral variant of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentMode {
    Chat,
    Router,
    Reflection,
    UsingTool,
}

impl AgentMode {
    pub fn parse(agent: &str, mode: &str) -> Result<Self, ConfigError> {
        match mode.trim() {
            "chat" => Ok(AgentMode::Chat),
            "router" => Ok(AgentMode::Router),
            "reflection" => Ok(AgentMode::Reflection),
            "using_tool" => Ok(AgentMode::UsingTool),
            other => Err(ConfigError::UnknownMode {
                agent: agent.to_string(),
                mode: other.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentMode::Chat => "chat",
            AgentMode::Router => "router",
            AgentMode::Reflection => "reflection",
            AgentMode::UsingTool => "using_tool",
        }
    }
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Prompts & Tool Filter ───────────────────────────────────────────────────

/// A prompt entry: a single template or a list (conditions, shots).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PromptValue {
    Text(String),
    List(Vec<String>),
}

/// Provider allow/deny policy for a tool-using agent.
///
/// A non-empty `allow` wins; otherwise `deny` excludes; otherwise everything
/// passes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny: Option<Vec<String>>,
}

impl ToolFilter {
    pub fn allow(providers: &[&str]) -> Self {
        Self {
            allow: Some(providers.iter().map(|p| p.to_string()).collect()),
            deny: None,
        }
    }

    pub fn permits(&self, provider: &str) -> bool {
        if let Some(allow) = self.allow.as_ref().filter(|a| !a.is_empty()) {
            return allow.iter().any(|p| p == provider);
        }
        if let Some(deny) = &self.deny {
            return !deny.iter().any(|p| p == provider);
        }
        true
    }
}

// ─── AgentInfo ───────────────────────────────────────────────────────────────

/// Static configuration of one agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentInfo {
    pub name: String,
    pub mode: AgentMode,
    pub intent: Option<String>,
    pub intent_description: Option<String>,
    pub prompts: HashMap<String, PromptValue>,
    pub tool_filter: ToolFilter,
    pub is_main: bool,
    pub is_default: bool,
}

impl AgentInfo {
    pub fn new(name: &str, mode: AgentMode) -> Self {
        Self {
            name: name.to_string(),
            mode,
            intent: None,
            intent_description: None,
            prompts: HashMap::new(),
            tool_filter: ToolFilter::default(),
            is_main: false,
            is_default: false,
        }
    }

    pub fn with_intent(mut self, intent: &str, description: &str) -> Self {
        self.intent = Some(intent.to_string());
        self.intent_description = Some(description.to_string());
        self
    }

    /// Template text for `key`, if configured as a string.
    pub fn prompt(&self, key: &str) -> Option<&str> {
        match self.prompts.get(key) {
            Some(PromptValue::Text(s)) if !s.trim().is_empty() => Some(s.as_str()),
            _ => None,
        }
    }

    /// List entries for `key`. A single string counts as a one-item list.
    pub fn prompt_list(&self, key: &str) -> Vec<String> {
        match self.prompts.get(key) {
            Some(PromptValue::List(items)) => items.clone(),
            Some(PromptValue::Text(s)) if !s.trim().is_empty() => vec![s.clone()],
            _ => Vec::new(),
        }
    }
}

// ─── AgentRegistry ───────────────────────────────────────────────────────────

/// The validated, immutable set of configured agents.
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    agents: Vec<AgentInfo>,
    by_intent: HashMap<String, usize>,
    main: usize,
    default: usize,
}

impl AgentRegistry {
    /// Validate and index `agents`.
    ///
    /// Names are unique, exactly one agent is main, exactly one is default,
    /// intents of non-router agents are present and unique, and the default
    /// agent is not a router.
    pub fn new(agents: Vec<AgentInfo>) -> Result<Self, ConfigError> {
        let integrity = |reason: String| ConfigError::Integrity { reason };

        let mut names = HashSet::new();
        for agent in &agents {
            if !names.insert(agent.name.as_str()) {
                return Err(integrity(format!("duplicate agent name '{}'", agent.name)));
            }
        }

        let mains: Vec<usize> = positions(&agents, |a| a.is_main);
        if mains.len() != 1 {
            return Err(integrity(format!(
                "exactly one main agent required, found {}",
                mains.len()
            )));
        }
        let defaults: Vec<usize> = positions(&agents, |a| a.is_default);
        if defaults.len() != 1 {
            return Err(integrity(format!(
                "exactly one default agent required, found {}",
                defaults.len()
            )));
        }
        if agents[defaults[0]].mode == AgentMode::Router {
            return Err(integrity(format!(
                "default agent '{}' cannot be a router",
                agents[defaults[0]].name
            )));
        }

        let mut by_intent = HashMap::new();
        for (idx, agent) in agents.iter().enumerate() {
            if agent.mode == AgentMode::Router {
                continue;
            }
            let intent = agent
                .intent
                .as_deref()
                .map(str::trim)
                .filter(|i| !i.is_empty())
                .ok_or_else(|| integrity(format!("agent '{}' has no intent", agent.name)))?;
            if by_intent.insert(intent.to_string(), idx).is_some() {
                return Err(integrity(format!("duplicate intent '{intent}'")));
            }
        }

        Ok(Self {
            agents,
            by_intent,
            main: mains[0],
            default: defaults[0],
        })
    }

    pub fn by_intent(&self, intent: &str) -> Option<&AgentInfo> {
        self.by_intent.get(intent).map(|&idx| &self.agents[idx])
    }

    pub fn by_name(&self, name: &str) -> Option<&AgentInfo> {
        self.agents.iter().find(|a| a.name == name)
    }

    pub fn main_agent(&self) -> &AgentInfo {
        &self.agents[self.main]
    }

    pub fn default_agent(&self) -> &AgentInfo {
        &self.agents[self.default]
    }

    /// All non-main agents in load order.
    pub fn sub_agents(&self) -> impl Iterator<Item = &AgentInfo> {
        self.agents.iter().filter(|a| !a.is_main)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

fn positions(agents: &[AgentInfo], pred: impl Fn(&AgentInfo) -> bool) -> Vec<usize> {
    agents
        .iter()
        .enumerate()
        .filter(|(_, a)| pred(a))
        .map(|(i, _)| i)
        .collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
