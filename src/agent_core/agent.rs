//! The `Agent` contract, the services agents share, and the mode-keyed factory.

use std::sync::Arc;

use async_trait::async_trait;

use super::chat::ChatAgent;
use super::context::RequestContext;
use super::errors::AgentError;
use super::memory::{MemoryInfo, MemoryStore};
use super::reflection::ReflectionAgent;
use super::router::RouterAgent;
use super::using_tool::UsingToolAgent;
use crate::config::{AgentInfo, AgentMode, AgentRegistry};
use crate::inference::{ChatModel, ToolCall};
use crate::tools::interaction::INTERACTION;
use crate::tools::{Console, ToolRegistry, LOCAL_PROVIDER};

// ─── Agent ──────────────────────────────────────────────────────────────────

/// A configured unit that turns a query plus history into an answer.
#[async_trait]
pub trait Agent: Send + Sync {
    fn info(&self) -> &AgentInfo;

    /// Answer one query. Every model exchange is persisted as a memory row
    /// under this agent's name.
    async fn run(
        &self,
        ctx: &RequestContext,
        query: &str,
        history: &[MemoryInfo],
    ) -> Result<String, AgentError>;
}

// ─── Shared services ────────────────────────────────────────────────────────

/// Process-wide services handed to every agent at construction.
#[derive(Clone)]
pub struct AgentDeps {
    pub model: Arc<dyn ChatModel>,
    pub tools: Arc<ToolRegistry>,
    pub memory: Arc<MemoryStore>,
    pub agents: Arc<AgentRegistry>,
    pub console: Arc<Console>,
    /// Step ceiling of tool-calling loops; reflection returns early past it.
    pub max_steps: usize,
    /// Request streamed completions.
    pub stream: bool,
}

impl AgentDeps {
    /// Print a status line. Console failures are logged, never fatal.
    pub(crate) async fn say(&self, line: &str) {
        if let Err(e) = self.console.println(line).await {
            tracing::warn!(error = %e, "failed to write to console");
        }
    }

    /// Persist a memory row. A failed write is logged and the turn goes on.
    pub(crate) fn remember(&self, memory: &MemoryInfo) {
        if let Err(e) = self.memory.save(memory) {
            tracing::warn!(
                agent = %memory.agent_name,
                request_id = %memory.request_id,
                error = %e,
                "failed to save memory"
            );
        }
    }

    /// Run one tool call through the registry.
    ///
    /// Failures come back as text for the model to react to.
    pub(crate) async fn call_tool(&self, ctx: &RequestContext, call: &ToolCall) -> String {
        let key = call.function.name.as_str();
        let tool_name = match self.tools.convert_name(key).as_slice() {
            [server, tool] => format!("{server}.{tool}"),
            _ => format!("{LOCAL_PROVIDER}.{key}"),
        };
        if ctx.detail && key != INTERACTION {
            self.say(&format!("[tool] {tool_name}")).await;
        }

        match self
            .tools
            .execute_with_retry(key, &call.function.arguments)
            .await
        {
            Ok(result) => {
                tracing::info!(
                    request_id = %ctx.request_id,
                    tool = %tool_name,
                    result_len = result.len(),
                    "tool call finished"
                );
                result
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    tool = %tool_name,
                    error = %e,
                    "tool call failed"
                );
                format!("call tool failed, exception: {e}")
            }
        }
    }
}

// ─── Factory ────────────────────────────────────────────────────────────────

/// Build the agent variant for `info.mode`.
///
/// Modes are parsed when configuration loads, so an unknown mode never
/// reaches this point.
pub fn create_agent(info: &AgentInfo, deps: &AgentDeps) -> Box<dyn Agent> {
    tracing::debug!(agent = %info.name, mode = %info.mode, "creating agent");
    match info.mode {
        AgentMode::Chat => Box::new(ChatAgent::new(info.clone(), deps.clone())),
        AgentMode::Router => Box::new(RouterAgent::new(info.clone(), deps.clone())),
        AgentMode::Reflection => Box::new(ReflectionAgent::new(info.clone(), deps.clone())),
        AgentMode::UsingTool => Box::new(UsingToolAgent::new(info.clone(), deps.clone())),
    }
}

// ─── Test support ───────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use super::*;
    use crate::config::ProviderRegistry;
    use crate::inference::{InferenceError, Message, ToolChoice, ToolDefinition};
    use crate::mcp_client::{McpError, McpInfo, McpToolDefinition, ToolProvider};
    use crate::tools::console::testing::{console, SharedBuf};
    use crate::tools::{LocalTool, ToolError};

    /// One scripted model reply.
    pub enum Reply {
        Text(&'static str),
        Calls(Vec<ToolCall>),
        /// Tool calls forever.
        Loop,
    }

    /// What the model was asked.
    #[derive(Debug, Clone)]
    pub struct Request {
        pub messages: Vec<Message>,
        pub tools: Vec<String>,
        pub tool_choice: Option<ToolChoice>,
    }

    /// Chat model replaying a fixed script and recording each request.
    #[derive(Default)]
    pub struct ScriptedModel {
        replies: StdMutex<VecDeque<Reply>>,
        pub requests: StdMutex<Vec<Request>>,
    }

    impl ScriptedModel {
        pub fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(Self {
                replies: StdMutex::new(replies.into()),
                requests: StdMutex::new(Vec::new()),
            })
        }

        pub fn requests(&self) -> Vec<Request> {
            self.requests.lock().unwrap().clone()
        }

        fn next(&self, request: Request) -> Reply {
            let n = self.requests.lock().unwrap().len();
            self.requests.lock().unwrap().push(request);
            let mut replies = self.replies.lock().unwrap();
            if matches!(replies.front(), Some(Reply::Loop)) {
                return Reply::Calls(vec![ToolCall::new(
                    format!("call_{n}"),
                    "echo",
                    r#"{"text":"again"}"#,
                )]);
            }
            replies.pop_front().unwrap_or(Reply::Text("script exhausted"))
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        async fn ask(&self, messages: &[Message], _stream: bool) -> Result<String, InferenceError> {
            let request = Request {
                messages: messages.to_vec(),
                tools: Vec::new(),
                tool_choice: None,
            };
            match self.next(request) {
                Reply::Text(text) => Ok(text.to_string()),
                _ => Err(InferenceError::InvalidResponse {
                    reason: "tool calls from plain ask".into(),
                }),
            }
        }

        async fn ask_tool(
            &self,
            messages: &[Message],
            tools: &[ToolDefinition],
            tool_choice: ToolChoice,
            _stream: bool,
        ) -> Result<Message, InferenceError> {
            let request = Request {
                messages: messages.to_vec(),
                tools: tools.iter().map(|t| t.function.name.clone()).collect(),
                tool_choice: Some(tool_choice),
            };
            match self.next(request) {
                Reply::Text(text) => Message::assistant(Some(text.to_string()), Vec::new()),
                Reply::Calls(calls) => Message::assistant(None, calls),
                Reply::Loop => unreachable!("loop replies are expanded in next()"),
            }
        }
    }

    /// Local tool echoing its `text` argument; `fail` makes it error.
    pub struct EchoTool;

    #[async_trait]
    impl LocalTool for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn description(&self) -> &'static str {
            "Echo the text back."
        }

        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }

        async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
            if arguments.get("fail").is_some() {
                return Err(ToolError::Execution {
                    tool: "echo".into(),
                    reason: "disk full".into(),
                });
            }
            Ok(arguments["text"].as_str().unwrap_or_default().to_string())
        }
    }

    struct NoProviders;

    #[async_trait]
    impl ToolProvider for NoProviders {
        async fn list_tools(&self, info: &McpInfo) -> Result<Vec<McpToolDefinition>, McpError> {
            Err(McpError::ConfigError {
                reason: format!("unexpected provider {}", info.name),
            })
        }

        async fn call_tool(
            &self,
            info: &McpInfo,
            _tool: &str,
            _arguments: serde_json::Value,
        ) -> Result<String, McpError> {
            Err(McpError::ConfigError {
                reason: format!("unexpected provider {}", info.name),
            })
        }
    }

    /// Deps over a scripted model, local `echo` and `interaction` tools, an
    /// in-memory store, and a console reading `input`.
    pub fn deps(
        model: Arc<ScriptedModel>,
        agents: Vec<AgentInfo>,
        input: &str,
        max_steps: usize,
    ) -> (AgentDeps, SharedBuf) {
        let (console, out) = console(input);
        let console = Arc::new(console);
        let tools = ToolRegistry::new(
            ProviderRegistry::new(Vec::new()).unwrap(),
            Arc::new(NoProviders),
        )
        .with_poll_interval(Duration::from_millis(5))
        .with_local_tool(Arc::new(crate::tools::Interaction::new(Arc::clone(&console))))
        .with_local_tool(Arc::new(EchoTool));

        let deps = AgentDeps {
            model,
            tools: Arc::new(tools),
            memory: Arc::new(MemoryStore::open(":memory:").unwrap()),
            agents: Arc::new(AgentRegistry::new(agents).unwrap()),
            console,
            max_steps,
            stream: false,
        };
        (deps, out)
    }

    /// Router `main`, tool agent `sql_agent` (intent `diagnose`), default
    /// chat agent `fallback` (intent `default`).
    pub fn standard_agents() -> Vec<AgentInfo> {
        let mut router = AgentInfo::new("main", AgentMode::Router);
        router.is_main = true;
        let sql = AgentInfo::new("sql_agent", AgentMode::UsingTool)
            .with_intent("diagnose", "diagnose database problems");
        let mut fallback =
            AgentInfo::new("fallback", AgentMode::Chat).with_intent("default", "anything else");
        fallback.is_default = true;
        vec![router, sql, fallback]
    }
}
