//! Interactive assistant loop.

use crate::agent_core::{create_agent, AgentDeps, RequestContext};

const PROMPT: &str = ">> ";

const SHORTCUTS: &[&str] = &[
    "Shortcuts:",
    "  /e or /q        quit",
    "  /s <session>    switch session (default `default`)",
    "  /h or /?        show this help",
];

/// One line of user input, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// End of input.
    Eof,
    /// Blank line; asks whether to quit.
    Empty,
    Quit,
    /// `/s NAME`; `None` when the name is missing.
    Session(Option<String>),
    Help,
    /// Any other `/` command.
    Unknown,
    Query(String),
}

pub fn parse_input(line: Option<&str>) -> Input {
    let Some(line) = line else {
        return Input::Eof;
    };
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Input::Empty;
    }
    let lower = trimmed.to_lowercase();
    if matches!(lower.as_str(), "/exit" | "/quit" | "/e" | "/q") {
        return Input::Quit;
    }
    if lower == "/s" || lower.starts_with("/s ") {
        let name = trimmed
            .split_whitespace()
            .nth(1)
            .map(str::to_string);
        return Input::Session(name);
    }
    if matches!(lower.as_str(), "/help" | "/h" | "/?") {
        return Input::Help;
    }
    if trimmed.starts_with('/') {
        return Input::Unknown;
    }
    Input::Query(trimmed.to_string())
}

/// The REPL state: who is asking and in which session.
pub struct Repl {
    deps: AgentDeps,
    user_name: String,
    session: String,
}

impl Repl {
    pub fn new(deps: AgentDeps, user_name: &str, session: &str) -> Self {
        Self {
            deps,
            user_name: user_name.to_string(),
            session: session.to_string(),
        }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    /// Read and answer queries until the user quits or input ends, then shut
    /// the tool registry down.
    pub async fn run(&mut self) -> std::io::Result<()> {
        let result = self.run_loop().await;
        self.deps.tools.shutdown().await;
        tracing::info!(user = %self.user_name, "assistant stopped");
        result
    }

    async fn run_loop(&mut self) -> std::io::Result<()> {
        self.welcome().await?;
        let console = std::sync::Arc::clone(&self.deps.console);
        loop {
            let line = console.prompt(PROMPT).await?;
            match parse_input(line.as_deref()) {
                Input::Eof | Input::Quit => {
                    console.println("[A] bye").await?;
                    return Ok(());
                }
                Input::Empty => {
                    console.println("exit? (Y/N)").await?;
                    let confirm = console.prompt(PROMPT).await?;
                    if confirm.as_deref().map(str::trim).map_or(true, |c| c.eq_ignore_ascii_case("y")) {
                        console.println("[A] bye").await?;
                        return Ok(());
                    }
                }
                Input::Session(Some(name)) => {
                    console.println(&format!("switched session: {name}")).await?;
                    tracing::info!(from = %self.session, to = %name, "session switched");
                    self.session = name;
                }
                Input::Session(None) => {
                    console
                        .println(&format!(
                            "current session: {}\nusage: /s <session_name>",
                            self.session
                        ))
                        .await?;
                }
                Input::Help => self.welcome().await?,
                Input::Unknown => {
                    console.println("unknown shortcut").await?;
                    for line in SHORTCUTS {
                        console.println(line).await?;
                    }
                }
                Input::Query(query) => {
                    let answer = self.turn(&query).await;
                    console.println(&answer).await?;
                }
            }
        }
    }

    /// Answer one query through the main agent. Failures become an error
    /// line; the loop always continues.
    pub async fn turn(&self, query: &str) -> String {
        let ctx = RequestContext::new(&self.user_name, &self.session);
        let main = self.deps.agents.main_agent();
        tracing::info!(
            request_id = %ctx.request_id,
            user = %ctx.user_name,
            session = %ctx.session,
            "user query received"
        );

        let history = self.deps.memory.history(&ctx, &main.name).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load history, continuing without it");
            Vec::new()
        });

        match create_agent(main, &self.deps).run(&ctx, query, &history).await {
            Ok(content) => format!("[A] answer:\n{content}"),
            Err(e) => {
                tracing::error!(request_id = %ctx.request_id, error = %e, "turn failed");
                format!("error: {e}")
            }
        }
    }

    async fn welcome(&self) -> std::io::Result<()> {
        let console = &self.deps.console;
        let skills: Vec<&str> = self
            .deps
            .agents
            .sub_agents()
            .filter(|a| !a.is_default)
            .filter_map(|a| a.intent.as_deref())
            .collect();
        console.println("Welcome to mydba, your database operations assistant").await?;
        if !skills.is_empty() {
            console.println(&format!("I can help with: {}", skills.join(", "))).await?;
        }
        for line in SHORTCUTS {
            console.println(line).await?;
        }
        Ok(())
    }
}
