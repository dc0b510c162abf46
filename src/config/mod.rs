//! Configuration: INI settings plus the SQLite-backed agent, provider and
//! database registries.

pub mod agents;
pub mod databases;
pub mod errors;
pub mod providers;
pub mod settings;
pub mod store;

pub use agents::{AgentInfo, AgentMode, AgentRegistry, PromptValue, ToolFilter};
pub use databases::{DatabaseInfo, DatabaseRegistry, DatabaseType};
pub use errors::ConfigError;
pub use providers::ProviderRegistry;
pub use settings::Settings;
pub use store::{ConfigStore, LoadedConfig};
