//! TurnRelay — context-aware message routing and streaming transcript assembly.
//!
//! A user turn plus a routing context (workflow, agent, tool set or nothing)
//! is resolved to a dispatch target through an ordered fallback chain, sent
//! over a streaming exchange, and the streamed frames are assembled into a
//! structured session transcript.
//!
//! Entry points:
//! - [`Engine`] wires configuration, routing, transport and sessions together
//! - [`session::SessionManager`] / [`session::SessionHandle`] drive turns
//! - [`init_tracing`] sets up file logging

pub mod config;
pub mod engine;
pub mod routing;
pub mod session;
pub mod transport;

use std::path::{Path, PathBuf};

pub use engine::{Engine, EngineError};

/// Number of rotated log files kept next to the active one.
const LOG_FILES_KEPT: u32 = 3;

/// Name of the active log file inside the log directory.
const LOG_FILE_NAME: &str = "turnrelay.log";

/// Output format for [`init_tracing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Platform data directory for TurnRelay logs.
///
/// Falls back to `~/.turnrelay/` when no data directory can be resolved.
pub fn default_log_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("turnrelay");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".turnrelay")
}

/// Initialize the global tracing subscriber, writing to `log_dir`.
///
/// 1. Rotates existing logs (turnrelay.log → .1 → .2 → .3).
/// 2. Opens a fresh log file behind a line-flushing writer.
/// 3. Logs a startup banner with the log file path.
///
/// The filter comes from `RUST_LOG`, defaulting to `turnrelay=info,warn`.
/// Returns the path of the active log file.
pub fn init_tracing(log_dir: &Path, format: LogFormat) -> std::io::Result<PathBuf> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    std::fs::create_dir_all(log_dir)?;
    let log_path = log_dir.join(LOG_FILE_NAME);
    rotate_log_file(&log_path, LOG_FILES_KEPT);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;
    let writer = FlushingWriter::new(log_file);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("turnrelay=info,warn"));

    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false);
    let installed = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| std::io::Error::other(format!("tracing already initialized: {e}")))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== TurnRelay starting ==="
    );
    Ok(log_path)
}

/// Rotate log files: `turnrelay.log` → `turnrelay.log.1` → … → `.{keep}`.
///
/// The oldest file beyond `keep` is deleted. Gaps in the chain are skipped.
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

/// A writer around `std::fs::File` that flushes after every write, so each
/// log line reaches disk even if the process dies right after.
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

// ─── Tests ───────────────────────────────────────────────────────────────────
