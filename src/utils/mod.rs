//! Utilities module for logging, error handling and formatting helpers
//!
//! This module provides:
//! - Structured logging with tracing, plus the append-only training log file
//! - The crate error type
//! - Small formatting helpers shared by training and inference

pub mod error;
pub mod logging;

// Re-export main types for convenience
pub use error::{MrClassError, Result};
pub use logging::{init_logging, LogConfig, LogFile};

/// Format a wall-clock duration as whole minutes and seconds, e.g. `"2m 5s"`.
pub fn format_duration(seconds: f64) -> String {
    format!("{:.0}m {:.0}s", (seconds / 60.0).floor(), seconds % 60.0)
}
