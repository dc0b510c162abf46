use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use mydba::agent_core::context::DEFAULT_SESSION;
use mydba::commands::add::{self, ProviderSpec};
use mydba::commands::repl::Repl;
use mydba::commands::{build_runtime, init};
use mydba::config::settings::resolve_config_path;
use mydba::config::{ConfigStore, Settings};
use mydba::tools::Console;

/// Conversational database operations assistant.
#[derive(Debug, Parser)]
#[command(name = "mydba", version, about)]
struct Cli {
    /// INI settings file (falls back to MYDBA_CONFIG_FILE).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Conversation session name.
    #[arg(short = 's', long, default_value = DEFAULT_SESSION)]
    session: String,

    /// User name recorded with each turn.
    #[arg(short = 'u', long, env = "USER", default_value = "unknown")]
    user: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create the configuration tables and seed the default agents.
    Init {
        /// Remove existing agents first.
        #[arg(long)]
        reset: bool,
    },
    /// Register a database: "type##uri##host##port##user##password##charset##database".
    AddDb { spec: String },
    /// Register a remote tool provider.
    AddMcp {
        #[arg(long)]
        name: String,
        /// stdio or sse.
        #[arg(long, default_value = "sse")]
        transport: String,
        #[arg(long)]
        description: Option<String>,
        /// Server URI (sse).
        #[arg(long)]
        uri: Option<String>,
        /// Command to spawn (stdio).
        #[arg(long)]
        command: Option<String>,
        /// Command argument, repeatable.
        #[arg(long = "arg", allow_hyphen_values = true)]
        args: Vec<String>,
        /// KEY=VALUE environment entry, repeatable.
        #[arg(long = "env")]
        envs: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = resolve_config_path(cli.config.clone());
    let settings = Settings::load(config_path.as_deref()).context("failed to load settings")?;
    mydba::init_tracing(&settings).context("failed to initialize logging")?;
    tracing::debug!(?settings, "settings loaded");

    match cli.command {
        None => {
            let console = Arc::new(Console::stdio());
            let deps = build_runtime(&settings, console)?;
            Repl::new(deps, &cli.user, &cli.session).run().await?;
        }
        Some(Command::Init { reset }) => {
            let store = ConfigStore::open(&settings.common.config_database)?;
            let count = init::run(&store, reset)?;
            println!("{count} agents configured in {}", store.path().display());
        }
        Some(Command::AddDb { spec }) => {
            let store = ConfigStore::open(&settings.common.config_database)?;
            let info = add::add_db(&store, &spec)?;
            println!("database '{}' saved", info.database);
        }
        Some(Command::AddMcp {
            name,
            transport,
            description,
            uri,
            command,
            args,
            envs,
        }) => {
            let store = ConfigStore::open(&settings.common.config_database)?;
            let info = add::add_mcp(
                &store,
                ProviderSpec {
                    name,
                    transport,
                    description,
                    uri,
                    command,
                    args,
                    envs,
                },
            )?;
            println!("provider '{}' saved", info.name);
        }
    }
    Ok(())
}
