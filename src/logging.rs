//! Tracing subscriber setup.
//!
//! Logs go to stderr by default. When a log file is configured, previous
//! logs are rotated and each line is flushed to disk.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::mcp_client::McpError;

/// Rotated log files kept alongside the current one.
const KEEP_ROTATED_LOGS: u32 = 3;

/// Platform data directory for this crate's files.
///
/// Falls back to `~/.mcp-bridge/` when no data directory can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("mcp-bridge");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mcp-bridge")
}

/// Relative log file names live under [`data_dir`].
fn resolve_log_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        data_dir().join(path)
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the configured level. Fails if the log file cannot
/// be opened or a global subscriber is already set.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), McpError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.level)));

    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false);

    let log_file = config.file.as_deref().map(resolve_log_path);
    let installed = match &log_file {
        Some(path) => {
            let writer = FlushingWriter::new(open_rotated(path)?);
            builder.with_writer(writer).try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    installed.map_err(|e| McpError::ConfigError {
        reason: format!("failed to install tracing subscriber: {e}"),
    })?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = ?log_file,
        pid = std::process::id(),
        "logging initialised"
    );
    Ok(())
}

fn default_directive(level: &str) -> String {
    format!("mcp_bridge={},warn", level.trim().to_ascii_lowercase())
}

/// Rotate any existing log at `path`, then open a fresh one for appending.
fn open_rotated(path: &Path) -> Result<File, McpError> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(|e| McpError::ConfigError {
            reason: format!("failed to create log directory {}: {e}", dir.display()),
        })?;
    }
    rotate_log_file(path, KEEP_ROTATED_LOGS);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| McpError::ConfigError {
            reason: format!("failed to open log file {}: {e}", path.display()),
        })
}

/// Rotate `x.log` → `x.log.1` → `.2` → … → `.{keep}`. The oldest is deleted.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let _ = std::fs::remove_file(format!("{}.{keep}", base_path.display()));

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let _ = std::fs::rename(base_path, format!("{}.1", base_path.display()));
    }
}

/// File writer that flushes after every write so lines survive a crash.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<Mutex<File>>,
}

impl FlushingWriter {
    fn new(file: File) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
        }
    }
}

impl Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut file = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = file.write(buf)?;
        file.flush()?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?
            .flush()
    }
}

impl<'a> fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive("DEBUG "), "mcp_bridge=debug,warn");
    }

    #[test]
    fn test_rotate_keeps_last_three() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("bridge.log");

        for generation in 0..5 {
            std::fs::write(&log, format!("generation {generation}")).unwrap();
            rotate_log_file(&log, KEEP_ROTATED_LOGS);
        }

        assert!(!log.exists());
        let read = |suffix: u32| std::fs::read_to_string(format!("{}.{suffix}", log.display())).unwrap();
        assert_eq!(read(1), "generation 4");
        assert_eq!(read(2), "generation 3");
        assert_eq!(read(3), "generation 2");
        assert!(!Path::new(&format!("{}.4", log.display())).exists());
    }

    #[test]
    fn test_flushing_writer_writes_through() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/bridge.log");
        let mut writer = FlushingWriter::new(open_rotated(&path).unwrap());

        writer.write_all(b"server started\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "server started\n");
    }

    #[test]
    fn test_relative_log_file_lands_in_data_dir() {
        assert!(data_dir().ends_with("mcp-bridge") || data_dir().ends_with(".mcp-bridge"));
        assert_eq!(
            resolve_log_path(Path::new("bridge.log")),
            data_dir().join("bridge.log")
        );

        let dir = tempfile::tempdir().unwrap();
        let absolute = dir.path().join("bridge.log");
        assert_eq!(resolve_log_path(&absolute), absolute);
    }
}
