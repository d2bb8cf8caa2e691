//! # mrclass
//!
//! Supervised classification of MR image slices with the Burn framework.
//!
//! ## Modules
//!
//! - `training`: the epoch loop driver (best-snapshot tracking, scheduler
//!   stepping, early stopping), its collaborator traits and the `train` command
//! - `dataset`: image-folder discovery, preloading and batching
//! - `model`: residual CNN built with Burn
//! - `inference`: checkpoint loading and batch prediction
//! - `config`: TOML configuration
//! - `utils`: error type, logging, formatting helpers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use mrclass::backend::{default_device, TrainingBackend};
//! use mrclass::config::AppConfig;
//!
//! let config = AppConfig::load("mrclass.toml")?;
//! let summary = mrclass::training::train::<TrainingBackend>(&config, &default_device())?;
//! println!("best val acc {:.4}", summary.outcome.best_acc);
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::AppConfig;
pub use inference::{infer, PredictionResult, Predictor};
pub use model::{MrClassifier, MrClassifierConfig};
pub use training::{train, train_model, TrainOutcome, TrainingSummary};
pub use utils::error::{MrClassError, Result};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
