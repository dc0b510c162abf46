//! `mydba add-db` and `mydba add-mcp`: register a database instance or a
//! remote tool provider in the configuration store.

use std::collections::HashMap;

use crate::config::providers::validate;
use crate::config::{ConfigError, ConfigStore, DatabaseInfo, DatabaseType};
use crate::mcp_client::{McpInfo, Transport};

/// Field separator of the `add-db` argument.
pub const DB_SPEC_SEPARATOR: &str = "##";

const DB_SPEC_FIELDS: &[&str] = &[
    "type", "uri", "host", "port", "user", "password", "charset", "database",
];

// ─── Databases ──────────────────────────────────────────────────────────────

/// Parse `type##uri##host##port##user##password##charset##database`.
///
/// Exactly eight fields are required; empty ones are stored as NULL. The
/// database name is mandatory.
pub fn parse_db_spec(spec: &str) -> Result<DatabaseInfo, ConfigError> {
    let fields: Vec<&str> = spec.split(DB_SPEC_SEPARATOR).map(str::trim).collect();
    if fields.len() != DB_SPEC_FIELDS.len() {
        return Err(ConfigError::Parse {
            reason: format!(
                "expected {} fields ({}), got {}",
                DB_SPEC_FIELDS.len(),
                DB_SPEC_FIELDS.join(DB_SPEC_SEPARATOR),
                fields.len()
            ),
        });
    }
    let opt = |i: usize| Some(fields[i]).filter(|f| !f.is_empty()).map(str::to_string);

    let db_type = opt(0).map(|t| DatabaseType::parse(&t)).transpose()?;
    let port = opt(3)
        .map(|p| {
            p.parse::<u16>().map_err(|e| ConfigError::Parse {
                reason: format!("invalid port '{p}': {e}"),
            })
        })
        .transpose()?;
    let database = opt(7).ok_or_else(|| ConfigError::Parse {
        reason: "database name is required".into(),
    })?;

    Ok(DatabaseInfo {
        db_type,
        uri: opt(1),
        host: opt(2),
        port,
        user: opt(4),
        password: opt(5),
        charset: opt(6),
        database,
    })
}

pub fn add_db(store: &ConfigStore, spec: &str) -> Result<DatabaseInfo, ConfigError> {
    let info = parse_db_spec(spec)?;
    store.upsert_database(&info)?;
    tracing::info!(database = %info.database, "database instance saved");
    Ok(info)
}

// ─── Providers ──────────────────────────────────────────────────────────────

/// Arguments of `add-mcp`, as given on the command line.
#[derive(Debug, Clone, Default)]
pub struct ProviderSpec {
    pub name: String,
    pub transport: String,
    pub description: Option<String>,
    pub uri: Option<String>,
    pub command: Option<String>,
    pub args: Vec<String>,
    /// `KEY=VALUE` pairs.
    pub envs: Vec<String>,
}

pub fn parse_provider(spec: ProviderSpec) -> Result<McpInfo, ConfigError> {
    let transport = Transport::parse(&spec.transport).ok_or_else(|| ConfigError::Parse {
        reason: format!("unknown transport '{}', expected stdio or sse", spec.transport),
    })?;
    let mut envs = HashMap::new();
    for pair in &spec.envs {
        let (key, value) = pair.split_once('=').ok_or_else(|| ConfigError::Parse {
            reason: format!("invalid env '{pair}', expected KEY=VALUE"),
        })?;
        envs.insert(key.trim().to_string(), value.to_string());
    }

    let info = McpInfo {
        name: spec.name.trim().to_string(),
        transport,
        description: spec.description.filter(|d| !d.is_empty()),
        server_uri: spec.uri.filter(|u| !u.is_empty()),
        command: spec.command.filter(|c| !c.is_empty()),
        args: spec.args,
        envs,
    };
    if info.name.is_empty() {
        return Err(ConfigError::Parse {
            reason: "provider name is required".into(),
        });
    }
    validate(&info)?;
    Ok(info)
}

pub fn add_mcp(store: &ConfigStore, spec: ProviderSpec) -> Result<McpInfo, ConfigError> {
    let info = parse_provider(spec)?;
    store.upsert_provider(&info)?;
    tracing::info!(provider = %info, "tool provider saved");
    Ok(info)
}
