pub mod agent_core;
pub mod commands;
pub mod config;
pub mod inference;
pub mod mcp_client;
pub mod tools;

use std::path::{Path, PathBuf};

use config::settings::Settings;

/// Return the platform-standard data directory for mydba.
///
/// - macOS: `~/Library/Application Support/mydba/`
/// - Windows: `{FOLDERID_RoamingAppData}\mydba\`
/// - Linux: `$XDG_DATA_HOME/mydba/` (fallback `~/.local/share/mydba/`)
///
/// Falls back to `~/.mydba/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("mydba");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mydba")
}

/// Initialize tracing: structured logs to the configured log file, plus a
/// stderr layer for warnings (or everything at debug level when
/// `common.debug` is set).
///
/// On each start:
/// 1. Rotates existing logs (mydba.log → mydba.log.1 → .2 → .3, keeps last 3).
/// 2. Opens a fresh log with a line-flushing writer for crash resilience.
/// 3. Logs a startup banner with the log and config database paths.
pub fn init_tracing(settings: &Settings) -> std::io::Result<PathBuf> {
    use tracing_subscriber::filter::LevelFilter;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let log_path = settings.log.file_path();
    if let Some(dir) = log_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    rotate_log_file(&log_path, 3);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("mydba={},warn", settings.log.file_level))
    });
    let console_level = if settings.common.debug {
        LevelFilter::DEBUG
    } else {
        settings
            .log
            .console_level
            .parse()
            .unwrap_or(LevelFilter::WARN)
    };

    let file_layer = fmt::layer()
        .with_writer(FlushingWriter::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_filter(file_filter);
    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .with_filter(console_level);

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .try_init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        log_file = %log_path.display(),
        config_database = %settings.common.config_database.display(),
        "=== mydba starting ==="
    );
    Ok(log_path)
}

/// Rotate log files: `mydba.log` → `mydba.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write, so
/// each log line is on disk even if the process dies mid-turn.
#[derive(Clone)]
struct FlushingWriter {
    file: std::sync::Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: std::sync::Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
