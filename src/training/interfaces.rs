//! Collaborator interfaces consumed by the training loop.
//!
//! The driver in [`super::driver`] only talks to these traits. The Burn-backed
//! implementations live in [`super::burn_adapter`]; tests use scripted fakes.

use std::fmt;
use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::utils::error::Result;

/// One sub-pass of an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Train,
    Val,
}

impl Phase {
    /// Phases in the order they run within every epoch
    pub const ALL: [Phase; 2] = [Phase::Train, Phase::Val];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Train => "train",
            Phase::Val => "val",
        }
    }

    /// Model mode used while running this phase
    pub fn mode(&self) -> Mode {
        match self {
            Phase::Train => Mode::Train,
            Phase::Val => Mode::Eval,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Model mode.
///
/// `Train` tracks gradients and enables training-only layers (dropout, batch
/// statistics updates). `Eval` runs a plain forward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Train,
    Eval,
}

/// A value per phase, indexable by [`Phase`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseMap<T> {
    pub train: T,
    pub val: T,
}

impl<T> PhaseMap<T> {
    pub fn new(train: T, val: T) -> Self {
        Self { train, val }
    }
}

impl<T> Index<Phase> for PhaseMap<T> {
    type Output = T;

    fn index(&self, phase: Phase) -> &T {
        match phase {
            Phase::Train => &self.train,
            Phase::Val => &self.val,
        }
    }
}

impl<T> IndexMut<Phase> for PhaseMap<T> {
    fn index_mut(&mut self, phase: Phase) -> &mut T {
        match phase {
            Phase::Train => &mut self.train,
            Phase::Val => &mut self.val,
        }
    }
}

/// A labeled batch as produced by a [`BatchSource`].
pub trait Batch {
    /// Compute target the batch can be moved to
    type Device;
    type Input;
    type Labels;

    /// Number of samples in the batch
    fn size(&self) -> usize;

    /// Move inputs and labels to `device`, splitting the batch.
    fn to_device(self, device: &Self::Device) -> (Self::Input, Self::Labels);
}

/// A finite, restartable sequence of batches. Every call to `batches` starts
/// a fresh pass over the partition.
pub trait BatchSource {
    type Batch: Batch;

    fn batches(&self) -> Box<dyn Iterator<Item = Self::Batch> + '_>;
}

/// Pre-built batches replayed in order on every pass.
impl<T: Batch + Clone> BatchSource for Vec<T> {
    type Batch = T;

    fn batches(&self) -> Box<dyn Iterator<Item = T> + '_> {
        Box::new(self.iter().cloned())
    }
}

/// A trainable classifier producing per-class scores.
pub trait Classifier {
    type Input;
    type Labels;
    /// Per-class scores, shape `[batch, classes]`
    type Scores;
    /// Owned deep copy of the trainable weights
    type Weights;

    fn set_mode(&mut self, mode: Mode);

    fn forward(&self, input: Self::Input) -> Result<Self::Scores>;

    /// Count samples whose arg-max class equals the label.
    fn correct_predictions(&self, scores: &Self::Scores, labels: &Self::Labels) -> Result<usize>;

    /// Snapshot the current weights.
    fn state_dict(&self) -> Self::Weights;

    /// Replace the current weights with a snapshot.
    fn load_state_dict(&mut self, weights: Self::Weights) -> Result<()>;
}

/// Scalar loss for one batch.
pub trait Loss {
    type Gradients;

    fn item(&self) -> Result<f64>;

    /// Back-propagate, consuming the loss.
    fn backward(self) -> Self::Gradients;
}

/// Loss function.
pub trait Criterion<M: Classifier> {
    type Loss: Loss;

    fn loss(&self, scores: &M::Scores, labels: &M::Labels) -> Result<Self::Loss>;
}

/// Weight-update rule for a classifier.
pub trait Optimizer<M: Classifier> {
    type Gradients;

    /// Discard gradients left over from a previous step.
    fn zero_grad(&mut self);

    /// Apply one update to `model` from `grads`.
    fn step(&mut self, model: &mut M, grads: Self::Gradients) -> Result<()>;

    fn learning_rate(&self) -> f64;

    fn set_learning_rate(&mut self, lr: f64);
}

/// Learning-rate policy driven by a tracked metric.
pub trait Scheduler {
    /// Feed one metric observation and return the learning rate to use from
    /// now on.
    fn step(&mut self, metric: f64) -> f64;
}

/// Optional sink mirroring the driver's console lines.
pub trait TrainLog {
    fn append(&mut self, lines: &[String]) -> Result<()>;
}
