//! `mysql_execution`: run SQL against a configured MySQL database and return
//! the rows as JSON.
//!
//! Pools are cached per connection identity and torn down exactly once at
//! shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::{Map, Value};
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Either, Executor, Row, TypeInfo, ValueRef};
use tokio::sync::Mutex;

use super::{required_str, LocalTool, ToolError};
use crate::config::{DatabaseInfo, DatabaseRegistry, DatabaseType};

pub const MYSQL_EXECUTION: &str = "mysql_execution";

const POOL_MIN_CONNECTIONS: u32 = 1;
const POOL_MAX_CONNECTIONS: u32 = 3;
const POOL_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(3);

/// Statements that produce a result set even when it is empty.
const ROW_RETURNING_KEYWORDS: &[&str] = &["SELECT", "SHOW", "DESCRIBE", "DESC", "EXPLAIN", "WITH"];

// ─── DatabaseCache ───────────────────────────────────────────────────────────

#[derive(Default)]
struct CacheState {
    pools: HashMap<String, MySqlPool>,
    closed: bool,
}

/// Connection pools keyed by `DatabaseInfo::connection_key`.
#[derive(Default)]
pub struct DatabaseCache {
    state: Mutex<CacheState>,
}

impl DatabaseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached pool for `info`, creating it on first use.
    pub async fn pool(&self, info: &DatabaseInfo) -> Result<MySqlPool, ToolError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(ToolError::Database {
                database: info.database.clone(),
                reason: "connection cache is shut down".into(),
            });
        }

        let key = info.connection_key();
        if let Some(pool) = state.pools.get(&key) {
            return Ok(pool.clone());
        }

        let pool = MySqlPoolOptions::new()
            .min_connections(POOL_MIN_CONNECTIONS)
            .max_connections(POOL_MAX_CONNECTIONS)
            .acquire_timeout(POOL_ACQUIRE_TIMEOUT)
            .connect_lazy_with(connect_options(info)?);
        tracing::debug!(database = %info.database, "created mysql pool");
        state.pools.insert(key, pool.clone());
        Ok(pool)
    }

    /// Close every pool. Later calls do nothing.
    pub async fn close_all(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.closed = true;
        let pools: Vec<MySqlPool> = state.pools.drain().map(|(_, p)| p).collect();
        for pool in &pools {
            pool.close().await;
        }
        tracing::info!(pools = pools.len(), "closed mysql connection cache");
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.pools.len()
    }
}

fn connect_options(info: &DatabaseInfo) -> Result<MySqlConnectOptions, ToolError> {
    let options = match info.uri.as_deref().filter(|u| !u.is_empty()) {
        Some(uri) => uri
            .parse::<MySqlConnectOptions>()
            .map_err(|e| ToolError::Database {
                database: info.database.clone(),
                reason: format!("invalid connection uri: {e}"),
            })?,
        None => {
            let mut options = MySqlConnectOptions::new()
                .host(info.host.as_deref().unwrap_or("localhost"))
                .port(info.port.unwrap_or(crate::config::databases::DEFAULT_MYSQL_PORT))
                .database(&info.database);
            if let Some(user) = &info.user {
                options = options.username(user);
            }
            if let Some(password) = &info.password {
                options = options.password(password);
            }
            options
        }
    };
    Ok(options.charset(info.charset()))
}

// ─── MysqlExecution ──────────────────────────────────────────────────────────

pub struct MysqlExecution {
    databases: Arc<DatabaseRegistry>,
    cache: Arc<DatabaseCache>,
}

impl MysqlExecution {
    pub fn new(databases: Arc<DatabaseRegistry>, cache: Arc<DatabaseCache>) -> Self {
        Self { databases, cache }
    }

    async fn run(&self, info: &DatabaseInfo, sql: &str) -> Result<Value, sqlx::Error> {
        let pool = match self.cache.pool(info).await {
            Ok(pool) => pool,
            Err(e) => return Err(sqlx::Error::Configuration(e.to_string().into())),
        };

        let mut rows = Vec::new();
        let mut rows_affected = 0u64;
        let mut results = pool.fetch_many(sql);
        while let Some(step) = results.try_next().await? {
            match step {
                Either::Left(done) => rows_affected += done.rows_affected(),
                Either::Right(row) => rows.push(row_to_json(&row)?),
            }
        }

        if !rows.is_empty() || returns_rows(sql) {
            Ok(Value::Array(rows))
        } else {
            Ok(serde_json::json!({ "rows_affected": rows_affected }))
        }
    }
}

#[async_trait]
impl LocalTool for MysqlExecution {
    fn name(&self) -> &'static str {
        MYSQL_EXECUTION
    }

    fn description(&self) -> &'static str {
        "MySQL executor. Runs a SQL statement against a configured MySQL database and returns the result rows as JSON."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "database": { "type": "string", "description": "Database name." },
                "sql": { "type": "string", "description": "SQL query." }
            },
            "required": ["database", "sql"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<String, ToolError> {
        let database = required_str(MYSQL_EXECUTION, &arguments, "database")?;
        let sql = required_str(MYSQL_EXECUTION, &arguments, "sql")?;

        let info = self
            .databases
            .get(database)
            .ok_or_else(|| ToolError::Database {
                database: database.to_string(),
                reason: "database not found".into(),
            })?;
        if info.db_type.is_some_and(|t| t != DatabaseType::Mysql) {
            return Err(ToolError::Database {
                database: database.to_string(),
                reason: "only mysql databases can be queried".into(),
            });
        }

        tracing::info!(database, sql, "executing sql");
        let result = self.run(info, sql).await.map_err(|e| ToolError::Database {
            database: database.to_string(),
            reason: e.to_string(),
        })?;

        serde_json::to_string(&result).map_err(|e| ToolError::Execution {
            tool: MYSQL_EXECUTION.into(),
            reason: e.to_string(),
        })
    }

    async fn shutdown(&self) {
        self.cache.close_all().await;
    }
}

// ─── Value Encoding ──────────────────────────────────────────────────────────

fn returns_rows(sql: &str) -> bool {
    let first = sql
        .trim_start_matches(|c: char| c.is_whitespace() || c == '(')
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    ROW_RETURNING_KEYWORDS.contains(&first.as_str())
}

fn row_to_json(row: &MySqlRow) -> Result<Value, sqlx::Error> {
    let mut object = Map::new();
    for (idx, column) in row.columns().iter().enumerate() {
        object.insert(column.name().to_string(), column_value(row, idx)?);
    }
    Ok(Value::Object(object))
}

/// How a column is turned into JSON, keyed by its MySQL type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    DateTime,
    Date,
    Time,
    Decimal,
    Json,
    Set,
    Float,
    Double,
    Signed,
    Unsigned,
    Binary,
    Text,
}

/// `BOOLEAN` is how `TINYINT(1)` is reported; it stays a number.
fn column_kind(type_name: &str) -> ColumnKind {
    match type_name {
        "DATETIME" | "TIMESTAMP" => ColumnKind::DateTime,
        "DATE" => ColumnKind::Date,
        "TIME" => ColumnKind::Time,
        "DECIMAL" => ColumnKind::Decimal,
        "JSON" => ColumnKind::Json,
        "SET" => ColumnKind::Set,
        "FLOAT" => ColumnKind::Float,
        "DOUBLE" => ColumnKind::Double,
        "BOOLEAN" | "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            ColumnKind::Signed
        }
        name if name.ends_with("UNSIGNED") => ColumnKind::Unsigned,
        name if name.contains("BLOB") || name.contains("BINARY") || name == "BIT" => {
            ColumnKind::Binary
        }
        _ => ColumnKind::Text,
    }
}

/// Encode one column by its MySQL type name.
fn column_value(row: &MySqlRow, idx: usize) -> Result<Value, sqlx::Error> {
    let kind = {
        let raw = row.try_get_raw(idx)?;
        if raw.is_null() {
            return Ok(Value::Null);
        }
        column_kind(&raw.type_info().name().to_ascii_uppercase())
    };

    let value = match kind {
        ColumnKind::DateTime => {
            let v: chrono::NaiveDateTime = row.try_get_unchecked(idx)?;
            Value::String(v.format("%Y-%m-%d %H:%M:%S").to_string())
        }
        ColumnKind::Date => {
            let v: chrono::NaiveDate = row.try_get_unchecked(idx)?;
            Value::String(v.format("%Y-%m-%d").to_string())
        }
        ColumnKind::Time => match row.try_get_unchecked::<chrono::NaiveTime, _>(idx) {
            Ok(v) => Value::String(v.format("%H:%M:%S").to_string()),
            // Durations outside 00:00..24:00
            Err(_) => Value::String(row.try_get_unchecked::<String, _>(idx)?),
        },
        ColumnKind::Decimal => Value::String(row.try_get_unchecked::<String, _>(idx)?),
        ColumnKind::Json => row.try_get_unchecked::<Value, _>(idx)?,
        ColumnKind::Set => set_members(&row.try_get_unchecked::<String, _>(idx)?),
        ColumnKind::Float => float(row.try_get_unchecked::<f32, _>(idx)? as f64),
        ColumnKind::Double => float(row.try_get_unchecked::<f64, _>(idx)?),
        ColumnKind::Signed => Value::from(row.try_get_unchecked::<i64, _>(idx)?),
        ColumnKind::Unsigned => Value::from(row.try_get_unchecked::<u64, _>(idx)?),
        ColumnKind::Binary => Value::String(hex(&row.try_get_unchecked::<Vec<u8>, _>(idx)?)),
        ColumnKind::Text => match row.try_get_unchecked::<String, _>(idx) {
            Ok(s) => Value::String(s),
            Err(_) => {
                let bytes: Vec<u8> = row.try_get_unchecked(idx)?;
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            }
        },
    };
    Ok(value)
}

fn float(v: f64) -> Value {
    serde_json::Number::from_f64(v).map_or(Value::Null, Value::Number)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn set_members(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Array(Vec::new());
    }
    Value::Array(raw.split(',').map(|m| Value::String(m.to_string())).collect())
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn info(database: &str, db_type: DatabaseType) -> DatabaseInfo {
        DatabaseInfo {
            db_type: Some(db_type),
            uri: None,
            host: Some("127.0.0.1".into()),
            port: Some(3306),
            user: Some("root".into()),
            password: None,
            charset: None,
            database: database.into(),
        }
    }

    fn tool(dbs: Vec<DatabaseInfo>) -> MysqlExecution {
        MysqlExecution::new(
            Arc::new(DatabaseRegistry::new(dbs).unwrap()),
            Arc::new(DatabaseCache::new()),
        )
    }

    #[test]
    fn test_returns_rows_keywords() {
        assert!(returns_rows("  select 1"));
        assert!(returns_rows("(SELECT 1) UNION (SELECT 2)"));
        assert!(returns_rows("show processlist"));
        assert!(returns_rows("WITH t AS (SELECT 1) SELECT * FROM t"));
        assert!(!returns_rows("UPDATE t SET a = 1"));
        assert!(!returns_rows(""));
    }

    #[test]
    fn test_encoding_helpers() {
        assert_eq!(hex(&[0x00, 0xab, 0x10]), "00ab10");
        assert_eq!(set_members("a,b"), serde_json::json!(["a", "b"]));
        assert_eq!(set_members(""), serde_json::json!([]));
        assert_eq!(float(f64::NAN), Value::Null);
    }

    #[test]
    fn test_column_kinds() {
        assert_eq!(column_kind("BOOLEAN"), ColumnKind::Signed);
        assert_eq!(column_kind("TINYINT"), ColumnKind::Signed);
        assert_eq!(column_kind("BIGINT UNSIGNED"), ColumnKind::Unsigned);
        assert_eq!(column_kind("TIMESTAMP"), ColumnKind::DateTime);
        assert_eq!(column_kind("VARBINARY"), ColumnKind::Binary);
        assert_eq!(column_kind("MEDIUMBLOB"), ColumnKind::Binary);
        assert_eq!(column_kind("SET"), ColumnKind::Set);
        assert_eq!(column_kind("VARCHAR"), ColumnKind::Text);
        assert_eq!(column_kind("ENUM"), ColumnKind::Text);
    }

    #[tokio::test]
    async fn test_missing_arguments() {
        let err = tool(vec![])
            .execute(serde_json::json!({"database": "orders"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[tokio::test]
    async fn test_unknown_database() {
        let err = tool(vec![])
            .execute(serde_json::json!({"database": "orders", "sql": "select 1"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Database { .. }));
    }

    #[tokio::test]
    async fn test_sqlite_database_rejected() {
        let err = tool(vec![info("local", DatabaseType::Sqlite)])
            .execute(serde_json::json!({"database": "LOCAL", "sql": "select 1"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("only mysql"));
    }

    #[tokio::test]
    async fn test_cache_shares_pools_and_closes_once() {
        let cache = DatabaseCache::new();
        let mut a = info("a", DatabaseType::Mysql);
        let mut b = info("b", DatabaseType::Mysql);
        a.uri = Some("mysql://root@127.0.0.1:3306/a".into());
        b.uri = a.uri.clone();
        cache.pool(&a).await.unwrap();
        cache.pool(&b).await.unwrap();
        cache.pool(&info("c", DatabaseType::Mysql)).await.unwrap();
        assert_eq!(cache.len().await, 2);

        cache.close_all().await;
        cache.close_all().await;
        assert_eq!(cache.len().await, 0);
        assert!(cache.pool(&a).await.is_err());
    }
}
