//! Error Handling Module
//!
//! Defines the error taxonomy for the mrclass library.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

use crate::training::Phase;

/// Main error type for mrclass operations
#[derive(Error, Debug)]
pub enum MrClassError {
    /// Missing or malformed configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A data partition has no samples, so per-sample metrics are undefined
    #[error("Invalid partition size: the '{phase}' partition is empty")]
    InvalidPartitionSize { phase: Phase },

    /// Failure raised by the numeric backend
    #[error("Backend error: {0}")]
    Backend(String),

    /// Error saving, loading or restoring model state
    #[error("Model error: {0}")]
    Model(String),

    /// Error with dataset discovery or batching
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error loading or decoding an image
    #[error("Failed to load image at '{}': {}", .0.display(), .1)]
    ImageLoad(PathBuf, String),

    /// Error writing or reading the training log
    #[error("Log error: {0}")]
    Log(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for MrClassError {
    fn from(err: serde_json::Error) -> Self {
        MrClassError::Serialization(err.to_string())
    }
}

/// Convenience Result type for mrclass operations
pub type Result<T> = std::result::Result<T, MrClassError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MrClassError::Dataset("no class directories".to_string());
        assert_eq!(format!("{}", err), "Dataset error: no class directories");
    }

    #[test]
    fn test_invalid_partition_names_phase() {
        let err = MrClassError::InvalidPartitionSize { phase: Phase::Val };
        assert_eq!(
            err.to_string(),
            "Invalid partition size: the 'val' partition is empty"
        );
    }

    #[test]
    fn test_image_load_error() {
        let path = PathBuf::from("/scans/t1/slice_004.png");
        let err = MrClassError::ImageLoad(path, "unsupported format".to_string());
        assert!(format!("{}", err).contains("slice_004.png"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: MrClassError = io_err.into();
        assert!(matches!(err, MrClassError::Io(_)));
    }
}
