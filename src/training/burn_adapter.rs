//! Burn implementations of the training-loop collaborators.
//!
//! - [`BurnClassifier`] wraps an autodiff module; evaluation runs on the
//!   module's inner (non-autodiff) counterpart so no graph is recorded and
//!   dropout / batch-norm statistics behave as in inference.
//! - [`CrossEntropyCriterion`] is Burn's cross-entropy loss.
//! - [`BurnOptimizer`] drives any `burn::optim::Optimizer` with the learning
//!   rate chosen by the scheduler.

use std::marker::PhantomData;

use burn::{
    module::AutodiffModule,
    nn::loss::{CrossEntropyLoss, CrossEntropyLossConfig},
    optim::GradientsParams,
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
};

use super::interfaces::{Classifier, Criterion, Loss, Mode, Optimizer};
use crate::utils::error::Result;

/// A network mapping an image batch `[batch, channels, height, width]` to
/// class logits `[batch, classes]`.
pub trait LogitsModel<B: Backend> {
    fn logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;
}

/// Classifier over an autodiff Burn module.
pub struct BurnClassifier<B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    module: M,
    mode: Mode,
    // Inference copy of the weights, built when entering eval mode
    frozen: Option<M::InnerModule>,
    _backend: PhantomData<B>,
}

impl<B, M> BurnClassifier<B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + LogitsModel<B>,
    M::InnerModule: LogitsModel<B::InnerBackend>,
{
    pub fn new(module: M) -> Self {
        Self {
            module,
            mode: Mode::Train,
            frozen: None,
            _backend: PhantomData,
        }
    }

    pub fn into_module(self) -> M {
        self.module
    }

    fn refresh_frozen(&mut self) {
        self.frozen = match self.mode {
            Mode::Eval => Some(self.module.valid()),
            Mode::Train => None,
        };
    }
}

impl<B, M> Classifier for BurnClassifier<B, M>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + LogitsModel<B>,
    M::InnerModule: LogitsModel<B::InnerBackend>,
{
    type Input = Tensor<B, 4>;
    type Labels = Tensor<B, 1, Int>;
    type Scores = Tensor<B, 2>;
    type Weights = M::Record;

    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
        self.refresh_frozen();
    }

    fn forward(&self, input: Tensor<B, 4>) -> Result<Tensor<B, 2>> {
        let logits = match (self.mode, &self.frozen) {
            (Mode::Train, _) => self.module.logits(input),
            (Mode::Eval, Some(frozen)) => Tensor::from_inner(frozen.logits(input.inner())),
            (Mode::Eval, None) => Tensor::from_inner(self.module.valid().logits(input.inner())),
        };
        Ok(logits)
    }

    fn correct_predictions(
        &self,
        scores: &Tensor<B, 2>,
        labels: &Tensor<B, 1, Int>,
    ) -> Result<usize> {
        let predictions = scores.clone().argmax(1).squeeze::<1>(1);
        let correct: i64 = predictions
            .equal(labels.clone())
            .int()
            .sum()
            .into_scalar()
            .elem();
        Ok(correct as usize)
    }

    fn state_dict(&self) -> M::Record {
        self.module.clone().into_record()
    }

    fn load_state_dict(&mut self, weights: M::Record) -> Result<()> {
        self.module = self.module.clone().load_record(weights);
        self.refresh_frozen();
        Ok(())
    }
}

/// Scalar loss tensor of one batch.
pub struct BurnLoss<B: AutodiffBackend>(Tensor<B, 1>);

impl<B: AutodiffBackend> Loss for BurnLoss<B> {
    type Gradients = B::Gradients;

    fn item(&self) -> Result<f64> {
        Ok(self.0.clone().into_scalar().elem::<f64>())
    }

    fn backward(self) -> B::Gradients {
        self.0.backward()
    }
}

/// Mean cross-entropy between logits and integer class labels.
pub struct CrossEntropyCriterion<B: Backend> {
    loss: CrossEntropyLoss<B>,
}

impl<B: Backend> CrossEntropyCriterion<B> {
    pub fn new(device: &B::Device) -> Self {
        Self {
            loss: CrossEntropyLossConfig::new().init(device),
        }
    }
}

impl<B, M> Criterion<BurnClassifier<B, M>> for CrossEntropyCriterion<B>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + LogitsModel<B>,
    M::InnerModule: LogitsModel<B::InnerBackend>,
{
    type Loss = BurnLoss<B>;

    fn loss(&self, scores: &Tensor<B, 2>, labels: &Tensor<B, 1, Int>) -> Result<BurnLoss<B>> {
        Ok(BurnLoss(self.loss.forward(scores.clone(), labels.clone())))
    }
}

/// Adapts a Burn optimizer (e.g. `AdamConfig::new().init()`) to the loop.
pub struct BurnOptimizer<O> {
    optim: O,
    lr: f64,
}

impl<O> BurnOptimizer<O> {
    pub fn new(optim: O, learning_rate: f64) -> Self {
        Self {
            optim,
            lr: learning_rate,
        }
    }
}

impl<B, M, O> Optimizer<BurnClassifier<B, M>> for BurnOptimizer<O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + LogitsModel<B>,
    M::InnerModule: LogitsModel<B::InnerBackend>,
    O: burn::optim::Optimizer<M, B>,
{
    type Gradients = B::Gradients;

    // Burn hands out a fresh gradient container from every backward pass and
    // `step` consumes it, so nothing accumulates between steps.
    fn zero_grad(&mut self) {}

    fn step(&mut self, model: &mut BurnClassifier<B, M>, grads: B::Gradients) -> Result<()> {
        let grads = GradientsParams::from_grads(grads, &model.module);
        model.module = self.optim.step(self.lr, model.module.clone(), grads);
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.lr = lr;
    }
}
