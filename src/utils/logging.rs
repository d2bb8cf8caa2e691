//! Logging Module
//!
//! Console logging goes through `tracing`; the subscriber is installed once by
//! the binary. Training runs can additionally mirror their progress lines into
//! a plain-text log file through [`LogFile`].

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::training::TrainLog;
use crate::utils::error::{MrClassError, Result};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: Level,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            include_target: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Create a verbose logging config for debugging
    pub fn verbose() -> Self {
        Self {
            level: Level::DEBUG,
            include_target: true,
            ansi_colors: true,
        }
    }
}

/// Filter directives: `RUST_LOG` when set and non-empty, else the configured level.
fn filter_directives(config: &LogConfig, rust_log: Option<&str>) -> String {
    match rust_log.map(str::trim) {
        Some(directives) if !directives.is_empty() => directives.to_string(),
        _ => config.level.as_str().to_lowercase(),
    }
}

/// Initialize the global tracing subscriber
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = EnvFilter::try_new(filter_directives(config, rust_log.as_deref()))
        .map_err(|e| MrClassError::Log(format!("Invalid log filter: {}", e)))?;

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_ansi(config.ansi_colors)
                .with_target(config.include_target)
                .compact(),
        )
        .with(filter)
        .try_init()
        .map_err(|e| MrClassError::Log(format!("Failed to initialize logging: {}", e)))
}

/// Append-only text log for training runs.
///
/// The file is reopened in append mode for every call.
#[derive(Debug, Clone)]
pub struct LogFile {
    path: PathBuf,
}

impl LogFile {
    /// Create the parent directory if needed and point the sink at `path`.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TrainLog for LogFile {
    fn append(&mut self, lines: &[String]) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                MrClassError::Log(format!("Failed to open {}: {}", self.path.display(), e))
            })?;

        for line in lines {
            writeln!(file, "{}", line)?;
        }
        Ok(())
    }
}
