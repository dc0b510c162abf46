//! Persisted conversation memory: one row per model exchange, replayed into
//! later turns as context.
//!
//! Uses `rusqlite` synchronously behind a mutex; every access is a single
//! short statement, never held across an await point.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Duration, Local};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use super::context::RequestContext;
use super::errors::AgentError;
use crate::config::store::create_tables;
use crate::inference::{Message, ToolCall};

// ─── Constants ──────────────────────────────────────────────────────────────

/// How far back replayed history reaches.
pub const LOOKBACK_MINUTES: i64 = 30;

/// Maximum rows replayed per turn.
pub const HISTORY_LIMIT: usize = 10;

pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ─── Types ──────────────────────────────────────────────────────────────────

/// Result of one tool call, as stored in `tool_contents`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolContent {
    pub tool_call_id: String,
    pub content: String,
}

/// One persisted exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryInfo {
    pub time: String,
    pub request_id: String,
    pub user_name: String,
    pub session: String,
    pub agent_name: String,
    pub system_content: Option<String>,
    pub user_content: Option<String>,
    pub assistant_content: Option<String>,
    pub assistant_tool_calls: Vec<ToolCall>,
    pub tool_contents: Vec<ToolContent>,
}

impl MemoryInfo {
    /// Empty row stamped with the request's identity and the current time.
    pub fn new(ctx: &RequestContext, agent_name: &str) -> Self {
        Self {
            time: Local::now().format(TIME_FORMAT).to_string(),
            request_id: ctx.request_id.clone(),
            user_name: ctx.user_name.clone(),
            session: ctx.session.clone(),
            agent_name: agent_name.to_string(),
            system_content: None,
            user_content: None,
            assistant_content: None,
            assistant_tool_calls: Vec::new(),
            tool_contents: Vec::new(),
        }
    }

    pub fn with_system(mut self, content: &str) -> Self {
        self.system_content = Some(content.to_string());
        self
    }

    pub fn with_user(mut self, content: &str) -> Self {
        self.user_content = Some(content.to_string());
        self
    }

    pub fn with_assistant(mut self, content: Option<&str>, tool_calls: &[ToolCall]) -> Self {
        self.assistant_content = content.filter(|c| !c.is_empty()).map(str::to_string);
        self.assistant_tool_calls = tool_calls.to_vec();
        self
    }

    pub fn with_tool_contents(mut self, contents: Vec<ToolContent>) -> Self {
        self.tool_contents = contents;
        self
    }
}

// ─── MemoryStore ────────────────────────────────────────────────────────────

/// Append-only store over the `memory` table.
pub struct MemoryStore {
    conn: Mutex<Connection>,
}

impl MemoryStore {
    /// Open (or create) the store at `path`. Pass `":memory:"` in tests.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        create_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, AgentError> {
        self.conn.lock().map_err(|_| AgentError::Database {
            reason: "memory store lock poisoned".into(),
        })
    }

    /// Append one row.
    pub fn save(&self, memory: &MemoryInfo) -> Result<(), AgentError> {
        let tool_calls = if memory.assistant_tool_calls.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&memory.assistant_tool_calls)?)
        };
        let tool_contents = if memory.tool_contents.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&memory.tool_contents)?)
        };

        self.lock()?.execute(
            "INSERT INTO memory (time, request_id, user_name, session, agent_name,
                 system_content, user_content, assistant_content,
                 assistant_tool_calls, tool_contents)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                memory.time,
                memory.request_id,
                memory.user_name,
                memory.session,
                memory.agent_name,
                memory.system_content,
                memory.user_content,
                memory.assistant_content,
                tool_calls,
                tool_contents,
            ],
        )?;
        Ok(())
    }

    /// The newest `limit` rows at or after `since`, returned oldest first.
    pub fn recent(
        &self,
        user_name: &str,
        session: &str,
        agent_name: &str,
        since: DateTime<Local>,
        limit: usize,
    ) -> Result<Vec<MemoryInfo>, AgentError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT time, request_id, user_name, session, agent_name, system_content,
                    user_content, assistant_content, assistant_tool_calls, tool_contents
             FROM memory
             WHERE user_name = ?1 AND session = ?2 AND agent_name = ?3 AND time >= ?4
             ORDER BY id DESC
             LIMIT ?5",
        )?;

        let rows = stmt.query_map(
            params![
                user_name,
                session,
                agent_name,
                since.format(TIME_FORMAT).to_string(),
                limit as i64
            ],
            |row| {
                Ok((
                    MemoryInfo {
                        time: row.get(0)?,
                        request_id: row.get(1)?,
                        user_name: row.get(2)?,
                        session: row.get(3)?,
                        agent_name: row.get(4)?,
                        system_content: row.get(5)?,
                        user_content: row.get(6)?,
                        assistant_content: row.get(7)?,
                        assistant_tool_calls: Vec::new(),
                        tool_contents: Vec::new(),
                    },
                    row.get::<_, Option<String>>(8)?,
                    row.get::<_, Option<String>>(9)?,
                ))
            },
        )?;

        let mut memories = Vec::new();
        for row in rows {
            let (mut memory, tool_calls, tool_contents) = row?;
            if let Some(json) = tool_calls.filter(|s| !s.is_empty()) {
                memory.assistant_tool_calls = serde_json::from_str(&json)?;
            }
            if let Some(json) = tool_contents.filter(|s| !s.is_empty()) {
                memory.tool_contents = serde_json::from_str(&json)?;
            }
            memories.push(memory);
        }
        memories.reverse();
        Ok(memories)
    }

    /// History of `agent_name` for this request's user and session, bounded
    /// by the default lookback window and row limit.
    pub fn history(
        &self,
        ctx: &RequestContext,
        agent_name: &str,
    ) -> Result<Vec<MemoryInfo>, AgentError> {
        let since = Local::now() - Duration::minutes(LOOKBACK_MINUTES);
        self.recent(&ctx.user_name, &ctx.session, agent_name, since, HISTORY_LIMIT)
    }
}

// ─── Replay ─────────────────────────────────────────────────────────────────

/// Replay rows as messages: per row, user, then tool results, then the
/// assistant turn.
///
/// A row limit can cut a tool exchange in half, so tool results whose call
/// is not in the replayed window are dropped, as are tool calls whose result
/// is missing.
pub fn format_memory(history: &[MemoryInfo]) -> Vec<Message> {
    let answered: HashSet<&str> = history
        .iter()
        .flat_map(|m| m.tool_contents.iter().map(|t| t.tool_call_id.as_str()))
        .collect();

    let mut announced: HashSet<String> = HashSet::new();
    let mut messages = Vec::new();
    for memory in history {
        if let Some(user) = memory.user_content.as_deref().filter(|c| !c.is_empty()) {
            messages.push(Message::user(user));
        }
        for tool in &memory.tool_contents {
            if announced.contains(&tool.tool_call_id) {
                messages.push(Message::tool(&tool.content, &tool.tool_call_id));
            }
        }
        let calls: Vec<ToolCall> = memory
            .assistant_tool_calls
            .iter()
            .filter(|c| answered.contains(c.id.as_str()))
            .cloned()
            .collect();
        announced.extend(calls.iter().map(|c| c.id.clone()));
        if let Ok(assistant) = Message::assistant(memory.assistant_content.clone(), calls) {
            messages.push(assistant);
        }
    }
    messages
}

// ─── Tests ──────────────────────────────────────────────────────────────────
