//! Typed settings loaded from an INI file with `MYDBA_*` environment overrides.
//!
//! Resolution order (last wins): built-in defaults, the INI file, the
//! environment. The environment uses flat names (`MYDBA_API_KEY`) rather than
//! the nested `section.key` layout of the file.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use ::config::{Config, File, FileFormat};
use serde::Deserialize;

use super::errors::ConfigError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Env var naming the settings file when `--config` isn't given.
pub const CONFIG_FILE_ENV: &str = "MYDBA_CONFIG_FILE";

pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_MAX_STEPS: usize = 100;

/// Flat environment variable → nested settings key.
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("MYDBA_LOG_DIR", "log.dir"),
    ("MYDBA_LOG_NAME", "log.name"),
    ("MYDBA_LOG_FILE_LEVEL", "log.file_level"),
    ("MYDBA_LOG_CONSOLE_LEVEL", "log.console_level"),
    ("MYDBA_API_KEY", "model.api_key"),
    ("MYDBA_API_BASE_URL", "model.base_url"),
    ("MYDBA_LLM_MODEL", "model.model"),
    ("MYDBA_MAX_TOKENS", "model.max_tokens"),
    ("MYDBA_TEMPERATURE", "model.temperature"),
    ("MYDBA_REFRESH_INTERVAL", "app.refresh_interval"),
    ("MYDBA_MAX_STEPS", "app.max_steps"),
    ("MYDBA_DEBUG", "common.debug"),
    ("MYDBA_CONFIG_DATABASE", "common.config_database"),
];

// ─── Settings ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub log: LogSettings,
    pub model: ModelSettings,
    pub app: AppSettings,
    pub common: CommonSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    pub dir: PathBuf,
    pub name: String,
    pub file_level: String,
    pub console_level: String,
}

impl LogSettings {
    pub fn file_path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }
}

/// LLM backend settings.
#[derive(Clone, Deserialize)]
pub struct ModelSettings {
    #[serde(default)]
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl fmt::Debug for ModelSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSettings")
            .field("api_key", &"******")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppSettings {
    /// Seconds between tool catalog refreshes.
    pub refresh_interval: u64,
    /// Step ceiling for tool-calling and reflection loops.
    pub max_steps: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommonSettings {
    pub debug: bool,
    pub config_database: PathBuf,
}

impl Settings {
    /// Load from `path` (optional, may not exist) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_from(path, std::env::vars(), &crate::data_dir())
    }

    /// Load with an explicit environment and data directory.
    pub fn load_from<I>(path: Option<&Path>, env: I, data_dir: &Path) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let env: HashMap<String, String> = env.into_iter().collect();

        let mut builder = Config::builder()
            .set_default("log.dir", data_dir.display().to_string())?
            .set_default("log.name", "mydba.log")?
            .set_default("log.file_level", "info")?
            .set_default("log.console_level", "warn")?
            .set_default("model.api_key", "")?
            .set_default("model.base_url", "https://api.openai.com/v1")?
            .set_default("model.model", "gpt-4o-mini")?
            .set_default("model.max_tokens", 1000_i64)?
            .set_default("model.temperature", 1.0_f64)?
            .set_default("app.refresh_interval", DEFAULT_REFRESH_INTERVAL_SECS as i64)?
            .set_default("app.max_steps", DEFAULT_MAX_STEPS as i64)?
            .set_default("common.debug", false)?
            .set_default(
                "common.config_database",
                data_dir.join("mydba.db").display().to_string(),
            )?;

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Ini).required(false));
        }

        for (var, key) in ENV_OVERRIDES {
            if let Some(value) = env.get(*var).filter(|v| !v.is_empty()) {
                builder = builder.set_override(*key, value.as_str())?;
            }
        }

        let mut settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&mut self) -> Result<(), ConfigError> {
        if self.model.api_key.trim().is_empty() {
            return Err(ConfigError::MissingOption {
                section: "model".into(),
                key: "api_key".into(),
                env: "MYDBA_API_KEY".into(),
            });
        }
        if self.app.max_steps == 0 {
            return Err(ConfigError::Parse {
                reason: "app.max_steps must be at least 1".into(),
            });
        }
        if self.app.refresh_interval == 0 {
            self.app.refresh_interval = DEFAULT_REFRESH_INTERVAL_SECS;
        }
        Ok(())
    }
}

/// Resolve the settings file from the CLI flag or `MYDBA_CONFIG_FILE`.
pub fn resolve_config_path(cli: Option<PathBuf>) -> Option<PathBuf> {
    cli.or_else(|| std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from))
}

// ─── Tests ───────────────────────────────────────────────────────────────────
