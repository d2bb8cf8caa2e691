//! Training module
//!
//! This module provides:
//! - The epoch loop driver with best-snapshot tracking and early stopping
//! - The collaborator traits it is written against, and their Burn
//!   implementations
//! - Learning rate scheduling
//! - The `train` command wiring data, model and optimizer together

pub mod burn_adapter;
pub mod driver;
pub mod interfaces;
pub mod pipeline;
pub mod scheduler;

// Re-export main types for convenience
pub use burn_adapter::{BurnClassifier, BurnOptimizer, CrossEntropyCriterion, LogitsModel};
pub use driver::{
    train_model, EpochRecord, PhaseMetrics, TrainOutcome, EARLY_STOP_MIN_EPOCH,
    EARLY_STOP_PATIENCE,
};
pub use interfaces::{
    Batch, BatchSource, Classifier, Criterion, Loss, Mode, Optimizer, Phase, PhaseMap, Scheduler,
    TrainLog,
};
pub use pipeline::{train, TrainingSummary};
pub use scheduler::{ConstantLr, LrScheduler, PlateauMode, ReduceLrOnPlateau};
