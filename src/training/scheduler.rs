//! Learning Rate Scheduler Module
//!
//! Metric-driven learning rate policies. The training loop feeds them the
//! validation accuracy (as a percentage) once per epoch and hands the returned
//! rate to the optimizer.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::interfaces::Scheduler;

/// Mode for plateau detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlateauMode {
    /// Metric should decrease (e.g., loss)
    Min,
    /// Metric should increase (e.g., accuracy)
    Max,
}

/// Scale the learning rate down once the metric stops improving.
///
/// An observation counts as an improvement when it beats the best value by
/// more than the relative `threshold`. After more than `patience` observations
/// without improvement the rate is multiplied by `factor`, floored at `min_lr`,
/// and the counter starts over.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    mode: PlateauMode,
    factor: f64,
    patience: usize,
    threshold: f64,
    min_lr: f64,
    best_metric: f64,
    num_bad_epochs: usize,
    current_lr: f64,
}

impl ReduceLrOnPlateau {
    pub fn new(
        initial_lr: f64,
        mode: PlateauMode,
        factor: f64,
        patience: usize,
        min_lr: f64,
    ) -> Self {
        let best_metric = match mode {
            PlateauMode::Min => f64::INFINITY,
            PlateauMode::Max => f64::NEG_INFINITY,
        };

        Self {
            mode,
            factor,
            patience,
            threshold: 1e-4,
            min_lr,
            best_metric,
            num_bad_epochs: 0,
            current_lr: initial_lr,
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    fn is_better(&self, metric: f64) -> bool {
        match self.mode {
            PlateauMode::Min => metric < self.best_metric * (1.0 - self.threshold),
            PlateauMode::Max => metric > self.best_metric * (1.0 + self.threshold),
        }
    }
}

impl Scheduler for ReduceLrOnPlateau {
    fn step(&mut self, metric: f64) -> f64 {
        if self.is_better(metric) {
            self.best_metric = metric;
            self.num_bad_epochs = 0;
        } else {
            self.num_bad_epochs += 1;
        }

        if self.num_bad_epochs > self.patience {
            let new_lr = (self.current_lr * self.factor).max(self.min_lr);
            if new_lr < self.current_lr {
                info!(
                    "Reducing learning rate: {:.6e} -> {:.6e}",
                    self.current_lr, new_lr
                );
                self.current_lr = new_lr;
            }
            self.num_bad_epochs = 0;
        }

        self.current_lr
    }
}

/// Keeps the learning rate fixed.
#[derive(Debug, Clone, Copy)]
pub struct ConstantLr {
    lr: f64,
}

impl ConstantLr {
    pub fn new(lr: f64) -> Self {
        Self { lr }
    }
}

impl Scheduler for ConstantLr {
    fn step(&mut self, _metric: f64) -> f64 {
        self.lr
    }
}

/// Scheduler selected from configuration
#[derive(Debug, Clone)]
pub enum LrScheduler {
    Constant(ConstantLr),
    ReduceOnPlateau(ReduceLrOnPlateau),
}

impl Scheduler for LrScheduler {
    fn step(&mut self, metric: f64) -> f64 {
        match self {
            LrScheduler::Constant(s) => s.step(metric),
            LrScheduler::ReduceOnPlateau(s) => s.step(metric),
        }
    }
}
