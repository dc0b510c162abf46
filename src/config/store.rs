//! SQLite configuration store: agents, providers, database instances and
//! the conversation memory table.
//!
//! Uses `rusqlite` synchronously. Reads happen once at startup and writes
//! only from the `init`/`add-*` subcommands.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rusqlite::{params, Connection};

use super::agents::{AgentInfo, AgentMode, AgentRegistry, PromptValue, ToolFilter};
use super::databases::{DatabaseInfo, DatabaseRegistry, DatabaseType};
use super::errors::ConfigError;
use super::providers::ProviderRegistry;
use crate::mcp_client::types::{McpInfo, Transport};

// ─── Schema ──────────────────────────────────────────────────────────────────

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS agent (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        mode TEXT NOT NULL,
        intent TEXT,
        intent_description TEXT,
        prompts TEXT,
        mcps TEXT,
        is_main INTEGER DEFAULT 0,
        is_default INTEGER DEFAULT 0
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_unique_agent_name ON agent(name);

    CREATE TABLE IF NOT EXISTS mcp (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        transport TEXT NOT NULL DEFAULT 'sse',
        description TEXT,
        server_uri TEXT,
        command TEXT,
        args TEXT,
        envs TEXT
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_unique_mcp_name ON mcp(name);

    CREATE TABLE IF NOT EXISTS db_instance (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        type TEXT DEFAULT NULL,
        uri TEXT DEFAULT NULL,
        host TEXT DEFAULT NULL,
        port INTEGER DEFAULT NULL,
        user TEXT DEFAULT NULL,
        password TEXT DEFAULT NULL,
        charset TEXT DEFAULT NULL,
        `database` TEXT DEFAULT NULL
    );
    CREATE UNIQUE INDEX IF NOT EXISTS idx_unique_db_name ON db_instance(`database`);

    CREATE TABLE IF NOT EXISTS memory (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        time TEXT NOT NULL,
        request_id TEXT NOT NULL,
        user_name TEXT NOT NULL,
        session TEXT NOT NULL,
        agent_name TEXT NOT NULL,
        system_content TEXT,
        user_content TEXT,
        assistant_content TEXT,
        assistant_tool_calls TEXT,
        tool_contents TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_memory_username_agenname_time
        ON memory(user_name, session, agent_name, time);
";

/// Create every table if missing.
pub fn create_tables(conn: &Connection) -> Result<(), ConfigError> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

// ─── ConfigStore ─────────────────────────────────────────────────────────────

/// Everything the runtime needs from the store, validated.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub agents: AgentRegistry,
    pub providers: ProviderRegistry,
    pub databases: DatabaseRegistry,
}

pub struct ConfigStore {
    conn: Connection,
    path: PathBuf,
}

impl ConfigStore {
    /// Open (or create) the store. Pass `":memory:"` in tests.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.display().to_string(),
                reason: e.to_string(),
            })?;
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        create_tables(&conn)?;
        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load and validate agents, providers and databases.
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let agents = self.load_agents()?;
        if agents.is_empty() {
            return Err(ConfigError::Integrity {
                reason: "no agents configured, run `mydba init` first".into(),
            });
        }
        Ok(LoadedConfig {
            agents: AgentRegistry::new(agents)?,
            providers: ProviderRegistry::new(self.load_providers()?)?,
            databases: DatabaseRegistry::new(self.load_databases()?)?,
        })
    }

    // ─── Agents ──────────────────────────────────────────────────────────

    pub fn load_agents(&self) -> Result<Vec<AgentInfo>, ConfigError> {
        let mut stmt = self.conn.prepare(
            "SELECT name, mode, intent, intent_description, prompts, mcps, is_main, is_default
             FROM agent ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<i64>>(6)?.unwrap_or(0) == 1,
                row.get::<_, Option<i64>>(7)?.unwrap_or(0) == 1,
            ))
        })?;

        let mut agents = Vec::new();
        for row in rows {
            let (name, mode, intent, intent_description, prompts, mcps, is_main, is_default) = row?;
            let mode = AgentMode::parse(&name, &mode)?;
            let prompts: HashMap<String, PromptValue> = parse_json_column(prompts)?;
            let tool_filter: ToolFilter = parse_json_column(mcps)?;
            agents.push(AgentInfo {
                name,
                mode,
                intent: intent.filter(|s| !s.is_empty()),
                intent_description: intent_description.filter(|s| !s.is_empty()),
                prompts,
                tool_filter,
                is_main,
                is_default,
            });
        }
        Ok(agents)
    }

    pub fn upsert_agent(&self, agent: &AgentInfo) -> Result<(), ConfigError> {
        let prompts = if agent.prompts.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&agent.prompts)?)
        };
        let mcps = if agent.tool_filter == ToolFilter::default() {
            None
        } else {
            Some(serde_json::to_string(&agent.tool_filter)?)
        };
        self.conn.execute(
            "INSERT INTO agent (name, mode, intent, intent_description, prompts, mcps, is_main, is_default)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(name) DO UPDATE SET
                mode = excluded.mode,
                intent = excluded.intent,
                intent_description = excluded.intent_description,
                prompts = excluded.prompts,
                mcps = excluded.mcps,
                is_main = excluded.is_main,
                is_default = excluded.is_default",
            params![
                agent.name,
                agent.mode.as_str(),
                agent.intent,
                agent.intent_description,
                prompts,
                mcps,
                agent.is_main as i64,
                agent.is_default as i64,
            ],
        )?;
        Ok(())
    }

    /// Remove all agent rows.
    pub fn clear_agents(&self) -> Result<usize, ConfigError> {
        Ok(self.conn.execute("DELETE FROM agent", [])?)
    }

    // ─── Providers ───────────────────────────────────────────────────────

    pub fn load_providers(&self) -> Result<Vec<McpInfo>, ConfigError> {
        let mut stmt = self.conn.prepare(
            "SELECT name, transport, description, server_uri, command, args, envs
             FROM mcp ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut providers = Vec::new();
        for row in rows {
            let (name, transport, description, server_uri, command, args, envs) = row?;
            let transport = match transport.as_deref().filter(|t| !t.is_empty()) {
                None => Transport::Sse,
                Some(t) => Transport::parse(t).ok_or_else(|| ConfigError::Parse {
                    reason: format!("provider '{name}' has unknown transport '{t}'"),
                })?,
            };
            providers.push(McpInfo {
                name,
                transport,
                description: description.filter(|s| !s.is_empty()),
                server_uri: server_uri.filter(|s| !s.is_empty()),
                command: command.filter(|s| !s.is_empty()),
                args: parse_json_column(args)?,
                envs: parse_json_column(envs)?,
            });
        }
        Ok(providers)
    }

    pub fn upsert_provider(&self, info: &McpInfo) -> Result<(), ConfigError> {
        let args = (!info.args.is_empty())
            .then(|| serde_json::to_string(&info.args))
            .transpose()?;
        let envs = (!info.envs.is_empty())
            .then(|| serde_json::to_string(&info.envs))
            .transpose()?;
        self.conn.execute(
            "INSERT INTO mcp (name, transport, description, server_uri, command, args, envs)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(name) DO UPDATE SET
                transport = excluded.transport,
                description = excluded.description,
                server_uri = excluded.server_uri,
                command = excluded.command,
                args = excluded.args,
                envs = excluded.envs",
            params![
                info.name,
                info.transport.as_str(),
                info.description,
                info.server_uri,
                info.command,
                args,
                envs,
            ],
        )?;
        Ok(())
    }

    // ─── Database Instances ──────────────────────────────────────────────

    pub fn load_databases(&self) -> Result<Vec<DatabaseInfo>, ConfigError> {
        let mut stmt = self.conn.prepare(
            "SELECT type, uri, host, port, user, password, charset, `database`
             FROM db_instance WHERE `database` IS NOT NULL ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<i64>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;

        let mut databases = Vec::new();
        for row in rows {
            let (db_type, uri, host, port, user, password, charset, database) = row?;
            let db_type = db_type
                .as_deref()
                .filter(|t| !t.is_empty())
                .map(DatabaseType::parse)
                .transpose()?;
            let port = port
                .map(|p| {
                    u16::try_from(p).map_err(|_| ConfigError::Parse {
                        reason: format!("database '{database}' has invalid port {p}"),
                    })
                })
                .transpose()?;
            databases.push(DatabaseInfo {
                db_type,
                uri,
                host,
                port,
                user,
                password,
                charset,
                database,
            });
        }
        Ok(databases)
    }

    pub fn upsert_database(&self, db: &DatabaseInfo) -> Result<(), ConfigError> {
        self.conn.execute(
            "INSERT INTO db_instance (type, uri, host, port, user, password, charset, `database`)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(`database`) DO UPDATE SET
                type = excluded.type,
                uri = excluded.uri,
                host = excluded.host,
                port = excluded.port,
                user = excluded.user,
                password = excluded.password,
                charset = excluded.charset",
            params![
                db.db_type.map(|t| t.as_str()),
                db.uri,
                db.host,
                db.port.map(i64::from),
                db.user,
                db.password,
                db.charset,
                db.database,
            ],
        )?;
        Ok(())
    }
}

/// Decode an optional JSON column, treating NULL and `""` as the default.
fn parse_json_column<T>(value: Option<String>) -> Result<T, ConfigError>
where
    T: serde::de::DeserializeOwned + Default,
{
    match value.filter(|v| !v.trim().is_empty()) {
        Some(json) => Ok(serde_json::from_str(&json)?),
        None => Ok(T::default()),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
