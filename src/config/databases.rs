//! Database instance records reachable by the SQL execution tool.

use std::collections::HashMap;
use std::fmt;

use super::errors::ConfigError;

pub const DEFAULT_MYSQL_PORT: u16 = 3306;
pub const DEFAULT_CHARSET: &str = "utf8mb4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseType {
    Mysql,
    Sqlite,
}

impl DatabaseType {
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(DatabaseType::Mysql),
            "sqlite" => Ok(DatabaseType::Sqlite),
            other => Err(ConfigError::Parse {
                reason: format!("unknown database type '{other}'"),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseType::Mysql => "mysql",
            DatabaseType::Sqlite => "sqlite",
        }
    }
}

/// Connection details for one logical database.
#[derive(Clone, PartialEq)]
pub struct DatabaseInfo {
    pub db_type: Option<DatabaseType>,
    pub uri: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub charset: Option<String>,
    pub database: String,
}

impl DatabaseInfo {
    /// Identity used to share connection pools between databases on the
    /// same server.
    pub fn connection_key(&self) -> String {
        if let Some(uri) = self.uri.as_deref().filter(|u| !u.is_empty()) {
            return uri.to_string();
        }
        format!(
            "{}_{}_{}_{}",
            self.host.as_deref().unwrap_or_default(),
            self.port.unwrap_or(DEFAULT_MYSQL_PORT),
            self.user.as_deref().unwrap_or_default(),
            self.database
        )
    }

    pub fn charset(&self) -> &str {
        self.charset
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(DEFAULT_CHARSET)
    }
}

impl fmt::Debug for DatabaseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseInfo")
            .field("db_type", &self.db_type)
            .field("uri", &self.uri.as_ref().map(|_| "******"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "******"))
            .field("charset", &self.charset)
            .field("database", &self.database)
            .finish()
    }
}

/// Databases keyed by lowercased name.
#[derive(Debug, Clone, Default)]
pub struct DatabaseRegistry {
    databases: HashMap<String, DatabaseInfo>,
}

impl DatabaseRegistry {
    pub fn new(databases: Vec<DatabaseInfo>) -> Result<Self, ConfigError> {
        let mut map = HashMap::new();
        for db in databases {
            let key = db.database.to_lowercase();
            if map.insert(key, db.clone()).is_some() {
                return Err(ConfigError::Integrity {
                    reason: format!("duplicate database '{}'", db.database),
                });
            }
        }
        Ok(Self { databases: map })
    }

    /// Case-insensitive lookup.
    pub fn get(&self, database: &str) -> Option<&DatabaseInfo> {
        self.databases.get(&database.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.databases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.databases.is_empty()
    }
}
