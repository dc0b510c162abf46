//! Configuration error types.

use thiserror::Error;

/// Errors raised while loading settings or the configuration store.
///
/// All of these are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The settings file or data directory could not be read or created.
    #[error("io error on '{path}': {reason}")]
    Io { path: String, reason: String },

    /// A value had the wrong shape (bad INI, bad JSON column, bad number).
    #[error("parse error: {reason}")]
    Parse { reason: String },

    /// A required option is missing.
    #[error("missing option [{section}] {key} (or env {env})")]
    MissingOption {
        section: String,
        key: String,
        env: String,
    },

    /// The loaded configuration violates a cross-record rule.
    #[error("integrity error: {reason}")]
    Integrity { reason: String },

    /// An agent row names a mode that doesn't exist.
    #[error("unknown agent mode '{mode}' for agent '{agent}'")]
    UnknownMode { agent: String, mode: String },

    /// The SQLite configuration store failed.
    #[error("config store error: {reason}")]
    Store { reason: String },
}

impl From<rusqlite::Error> for ConfigError {
    fn from(e: rusqlite::Error) -> Self {
        ConfigError::Store {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(e: serde_json::Error) -> Self {
        ConfigError::Parse {
            reason: e.to_string(),
        }
    }
}

impl From<::config::ConfigError> for ConfigError {
    fn from(e: ::config::ConfigError) -> Self {
        ConfigError::Parse {
            reason: e.to_string(),
        }
    }
}
