//! Training loop driver.
//!
//! Runs the epoch loop over the train and validation partitions, steps the
//! learning-rate scheduler from validation accuracy, keeps a snapshot of the
//! best weights and stops early once validation accuracy stalls.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::interfaces::{
    Batch, BatchSource, Classifier, Criterion, Loss, Optimizer, Phase, PhaseMap, Scheduler,
    TrainLog,
};
use crate::utils::error::{MrClassError, Result};
use crate::utils::format_duration;

/// Consecutive strictly-worse validation epochs needed to stop early
pub const EARLY_STOP_PATIENCE: usize = 8;

/// Early stopping only fires once the 0-based epoch index is past this value
pub const EARLY_STOP_MIN_EPOCH: usize = 5;

/// Whether the epoch loop keeps going after the phase just finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochControl {
    Continue,
    StopRequested,
}

/// Mean loss and accuracy of one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseMetrics {
    pub loss: f64,
    /// Fraction of correct predictions in [0, 1]
    pub accuracy: f64,
}

/// Per-phase accumulators, reset at the start of every phase.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunningStats {
    loss: f64,
    corrects: usize,
}

impl RunningStats {
    /// Add one batch: `loss` is the batch mean, so it is weighted by the batch size.
    pub fn record(&mut self, loss: f64, batch_size: usize, corrects: usize) {
        self.loss += loss * batch_size as f64;
        self.corrects += corrects;
    }

    /// Divide by the partition size, not the number of batches seen.
    pub fn finish(&self, partition_size: usize) -> PhaseMetrics {
        PhaseMetrics {
            loss: self.loss / partition_size as f64,
            accuracy: self.corrects as f64 / partition_size as f64,
        }
    }
}

/// Outcome of comparing a validation accuracy with the best so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Improved,
    Worse,
    Tie,
}

/// Best validation accuracy, its weight snapshot and the stall counter.
#[derive(Debug, Clone)]
pub struct BestTracker<W> {
    best_acc: f64,
    epochs_no_improve: usize,
    best_weights: W,
}

impl<W> BestTracker<W> {
    /// Start at accuracy 0.0 holding the model's initial weights.
    pub fn new(initial_weights: W) -> Self {
        Self {
            best_acc: 0.0,
            epochs_no_improve: 0,
            best_weights: initial_weights,
        }
    }

    /// Record one validation accuracy. `snapshot` is only called on strict
    /// improvement; the previous snapshot is dropped then.
    pub fn observe<F>(&mut self, accuracy: f64, snapshot: F) -> Verdict
    where
        F: FnOnce() -> W,
    {
        if accuracy > self.best_acc {
            self.best_acc = accuracy;
            self.epochs_no_improve = 0;
            self.best_weights = snapshot();
            Verdict::Improved
        } else if accuracy < self.best_acc {
            self.epochs_no_improve += 1;
            Verdict::Worse
        } else {
            Verdict::Tie
        }
    }

    pub fn control(&self, epoch: usize) -> EpochControl {
        if self.epochs_no_improve >= EARLY_STOP_PATIENCE && epoch > EARLY_STOP_MIN_EPOCH {
            EpochControl::StopRequested
        } else {
            EpochControl::Continue
        }
    }

    pub fn best_acc(&self) -> f64 {
        self.best_acc
    }

    pub fn epochs_no_improve(&self) -> usize {
        self.epochs_no_improve
    }

    pub fn into_best_weights(self) -> W {
        self.best_weights
    }
}

/// Metrics of one completed epoch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train: PhaseMetrics,
    pub val: PhaseMetrics,
    /// Learning rate after the scheduler step of this epoch
    pub learning_rate: f64,
}

/// Result of a training run. The model itself has the best weights restored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainOutcome {
    pub best_acc: f64,
    pub epochs_no_improve: usize,
    pub epochs_run: usize,
    pub stopped_early: bool,
    pub history: Vec<EpochRecord>,
}

/// Train `model` for up to `num_epochs` epochs and restore the weights that
/// reached the best validation accuracy.
///
/// Every progress line goes to the console through `tracing` and, when a
/// `logger` is given, is appended to it as well.
///
/// # Errors
///
/// Returns [`MrClassError::InvalidPartitionSize`] before touching the model if
/// either entry of `dataset_sizes` is zero. Collaborator failures propagate
/// unchanged.
#[allow(clippy::too_many_arguments)]
pub fn train_model<M, L, C, O, S>(
    model: &mut M,
    dataloaders: &PhaseMap<L>,
    criterion: &C,
    optimizer: &mut O,
    scheduler: &mut S,
    num_epochs: usize,
    device: &<L::Batch as Batch>::Device,
    dataset_sizes: &PhaseMap<usize>,
    mut logger: Option<&mut dyn TrainLog>,
) -> Result<TrainOutcome>
where
    M: Classifier,
    L: BatchSource,
    L::Batch: Batch<Input = M::Input, Labels = M::Labels>,
    C: Criterion<M>,
    O: Optimizer<M, Gradients = <C::Loss as Loss>::Gradients>,
    S: Scheduler,
{
    for phase in Phase::ALL {
        if dataset_sizes[phase] == 0 {
            return Err(MrClassError::InvalidPartitionSize { phase });
        }
    }

    let since = Instant::now();
    let mut tracker = BestTracker::new(model.state_dict());
    let mut history = Vec::new();
    let mut control = EpochControl::Continue;

    for epoch in 0..num_epochs {
        emit(
            &mut logger,
            &[
                format!("Epoch {}/{}", epoch, num_epochs - 1),
                "-".repeat(10),
            ],
        )?;

        let mut metrics = PhaseMap::<PhaseMetrics>::default();

        for phase in Phase::ALL {
            let phase_metrics = run_phase(
                model,
                &dataloaders[phase],
                criterion,
                optimizer,
                device,
                phase,
                dataset_sizes[phase],
            )?;
            metrics[phase] = phase_metrics;

            emit(
                &mut logger,
                &[format!(
                    "{} Loss: {:.4} Acc: {:.4}",
                    phase, phase_metrics.loss, phase_metrics.accuracy
                )],
            )?;

            if phase == Phase::Val {
                let lr = scheduler.step(phase_metrics.accuracy * 100.0);
                optimizer.set_learning_rate(lr);

                let verdict = tracker.observe(phase_metrics.accuracy, || model.state_dict());
                match verdict {
                    Verdict::Improved => debug!(
                        "New best validation accuracy {:.4} at epoch {}",
                        tracker.best_acc(),
                        epoch
                    ),
                    Verdict::Worse => emit(
                        &mut logger,
                        &[format!(
                            "No improve in the accuracy in the last {} epoch(s)",
                            tracker.epochs_no_improve()
                        )],
                    )?,
                    Verdict::Tie => {}
                }
            }

            control = tracker.control(epoch);
            if control == EpochControl::StopRequested {
                // The counter only moves in the val phase, so the record below
                // always holds both phases.
                debug_assert_eq!(phase, Phase::Val);
                break;
            }
        }

        history.push(EpochRecord {
            epoch,
            train: metrics.train,
            val: metrics.val,
            learning_rate: optimizer.learning_rate(),
        });

        if control == EpochControl::StopRequested {
            break;
        }
    }

    let elapsed = format_duration(since.elapsed().as_secs_f64());
    let best_line = format!("Best val Acc: {:.6}", tracker.best_acc());
    let complete_line = format!("Training complete in {}", elapsed);
    let stopped_early = control == EpochControl::StopRequested;

    if stopped_early {
        emit(
            &mut logger,
            &["Early stopping!".to_string(), best_line, complete_line],
        )?;
    } else {
        emit(&mut logger, &[complete_line, best_line])?;
    }

    let best_acc = tracker.best_acc();
    let epochs_no_improve = tracker.epochs_no_improve();
    model.load_state_dict(tracker.into_best_weights())?;

    Ok(TrainOutcome {
        best_acc,
        epochs_no_improve,
        epochs_run: history.len(),
        stopped_early,
        history,
    })
}

/// One pass over a partition. Weights are only updated in the train phase.
fn run_phase<M, L, C, O>(
    model: &mut M,
    loader: &L,
    criterion: &C,
    optimizer: &mut O,
    device: &<L::Batch as Batch>::Device,
    phase: Phase,
    partition_size: usize,
) -> Result<PhaseMetrics>
where
    M: Classifier,
    L: BatchSource,
    L::Batch: Batch<Input = M::Input, Labels = M::Labels>,
    C: Criterion<M>,
    O: Optimizer<M, Gradients = <C::Loss as Loss>::Gradients>,
{
    model.set_mode(phase.mode());
    let mut stats = RunningStats::default();

    for (step, batch) in loader.batches().enumerate() {
        let batch_size = batch.size();
        let (inputs, labels) = batch.to_device(device);

        optimizer.zero_grad();

        let scores = model.forward(inputs)?;
        let corrects = model.correct_predictions(&scores, &labels)?;
        let loss = criterion.loss(&scores, &labels)?;
        let loss_value = loss.item()?;

        if phase == Phase::Train {
            let grads = loss.backward();
            optimizer.step(model, grads)?;
        }

        stats.record(loss_value, batch_size, corrects);

        if (step + 1) % 10 == 0 {
            debug!("  {} batch {}: loss = {:.4}", phase, step + 1, loss_value);
        }
    }

    Ok(stats.finish(partition_size))
}

fn emit(logger: &mut Option<&mut dyn TrainLog>, lines: &[String]) -> Result<()> {
    for line in lines {
        info!("{}", line);
    }
    match logger {
        Some(log) => log.append(lines),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::interfaces::Mode;

    struct FakeBatch {
        size: usize,
    }

    impl Batch for FakeBatch {
        type Device = ();
        type Input = usize;
        type Labels = usize;

        fn size(&self) -> usize {
            self.size
        }

        fn to_device(self, _device: &()) -> (usize, usize) {
            (self.size, self.size)
        }
    }

    struct FakeLoader {
        sizes: Vec<usize>,
    }

    impl FakeLoader {
        fn new(sizes: &[usize]) -> Self {
            Self {
                sizes: sizes.to_vec(),
            }
        }
    }

    impl BatchSource for FakeLoader {
        type Batch = FakeBatch;

        fn batches(&self) -> Box<dyn Iterator<Item = FakeBatch> + '_> {
            Box::new(self.sizes.iter().map(|&size| FakeBatch { size }))
        }
    }

    /// Classifier whose validation accuracy follows a script, one entry per
    /// epoch. Weights are a counter of applied optimizer steps.
    struct ScriptedModel {
        mode: Mode,
        val_script: Vec<f64>,
        val_passes: usize,
        weights: u64,
        mode_switches: usize,
    }

    impl ScriptedModel {
        fn new(val_script: &[f64]) -> Self {
            Self {
                mode: Mode::Train,
                val_script: val_script.to_vec(),
                val_passes: 0,
                weights: 0,
                mode_switches: 0,
            }
        }
    }

    impl Classifier for ScriptedModel {
        type Input = usize;
        type Labels = usize;
        type Scores = usize;
        type Weights = u64;

        fn set_mode(&mut self, mode: Mode) {
            self.mode_switches += 1;
            if mode == Mode::Eval {
                self.val_passes += 1;
            }
            self.mode = mode;
        }

        fn forward(&self, input: usize) -> Result<usize> {
            Ok(input)
        }

        fn correct_predictions(&self, scores: &usize, _labels: &usize) -> Result<usize> {
            match self.mode {
                Mode::Train => Ok(scores / 2),
                Mode::Eval => {
                    let accuracy = self.val_script[self.val_passes - 1];
                    Ok((accuracy * *scores as f64).round() as usize)
                }
            }
        }

        fn state_dict(&self) -> u64 {
            self.weights
        }

        fn load_state_dict(&mut self, weights: u64) -> Result<()> {
            self.weights = weights;
            Ok(())
        }
    }

    struct FakeLoss(f64);

    impl Loss for FakeLoss {
        type Gradients = ();

        fn item(&self) -> Result<f64> {
            Ok(self.0)
        }

        fn backward(self) {}
    }

    /// Batch mean loss of 0.1 per sample in the batch.
    struct SizeLoss;

    impl Criterion<ScriptedModel> for SizeLoss {
        type Loss = FakeLoss;

        fn loss(&self, scores: &usize, _labels: &usize) -> Result<FakeLoss> {
            Ok(FakeLoss(0.1 * *scores as f64))
        }
    }

    #[derive(Default)]
    struct CountingOptimizer {
        lr: f64,
        zero_grads: usize,
        steps: usize,
    }

    impl Optimizer<ScriptedModel> for CountingOptimizer {
        type Gradients = ();

        fn zero_grad(&mut self) {
            self.zero_grads += 1;
        }

        fn step(&mut self, model: &mut ScriptedModel, _grads: ()) -> Result<()> {
            assert_eq!(model.mode, Mode::Train, "weights updated outside training");
            model.weights += 1;
            self.steps += 1;
            Ok(())
        }

        fn learning_rate(&self) -> f64 {
            self.lr
        }

        fn set_learning_rate(&mut self, lr: f64) {
            self.lr = lr;
        }
    }

    /// Records every metric and halves the learning rate on each call.
    struct RecordingScheduler {
        lr: f64,
        metrics: Vec<f64>,
    }

    impl Scheduler for RecordingScheduler {
        fn step(&mut self, metric: f64) -> f64 {
            self.metrics.push(metric);
            self.lr *= 0.5;
            self.lr
        }
    }

    impl TrainLog for Vec<String> {
        fn append(&mut self, lines: &[String]) -> Result<()> {
            self.extend_from_slice(lines);
            Ok(())
        }
    }

    struct Run {
        outcome: TrainOutcome,
        model: ScriptedModel,
        optimizer: CountingOptimizer,
        scheduler: RecordingScheduler,
        log: Vec<String>,
    }

    /// Two train batches (3 + 5 samples) and one val batch of 100 samples.
    fn run(val_script: &[f64], num_epochs: usize) -> Run {
        let mut model = ScriptedModel::new(val_script);
        let loaders = PhaseMap::new(FakeLoader::new(&[3, 5]), FakeLoader::new(&[100]));
        let sizes = PhaseMap::new(8, 100);
        let mut optimizer = CountingOptimizer {
            lr: 0.1,
            ..Default::default()
        };
        let mut scheduler = RecordingScheduler {
            lr: 0.1,
            metrics: Vec::new(),
        };
        let mut log = Vec::new();

        let outcome = train_model(
            &mut model,
            &loaders,
            &SizeLoss,
            &mut optimizer,
            &mut scheduler,
            num_epochs,
            &(),
            &sizes,
            Some(&mut log),
        )
        .unwrap();

        Run {
            outcome,
            model,
            optimizer,
            scheduler,
            log,
        }
    }

    #[test]
    fn test_single_epoch() {
        let run = run(&[0.42], 1);

        assert!((run.outcome.best_acc - 0.42).abs() < 1e-12);
        assert_eq!(run.outcome.epochs_no_improve, 0);
        assert_eq!(run.outcome.epochs_run, 1);
        assert!(!run.outcome.stopped_early);
        // Snapshot taken after the only epoch's two train steps
        assert_eq!(run.model.weights, 2);
    }

    #[test]
    fn test_decaying_trace_stops_at_epoch_nine() {
        let trace = [0.5, 0.6, 0.55, 0.55, 0.4, 0.3, 0.2, 0.1, 0.05, 0.01, 0.9, 0.9];
        let run = run(&trace, 12);

        // Epoch 3 repeats 0.55 but is still below the best 0.6, so every
        // epoch from 2 on counts; the counter hits 8 at epoch 9.
        assert!(run.outcome.stopped_early);
        assert_eq!(run.outcome.epochs_run, 10);
        assert_eq!(run.outcome.epochs_no_improve, 8);
        assert!((run.outcome.best_acc - 0.6).abs() < 1e-12);
        assert_eq!(run.model.weights, 4);
        assert!(run.log.iter().any(|l| l == "Early stopping!"));
        assert!(run
            .log
            .iter()
            .any(|l| l == "No improve in the accuracy in the last 8 epoch(s)"));
    }

    #[test]
    fn test_epoch_budget_is_only_an_upper_bound() {
        let trace = [0.9, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5];
        let run = run(&trace, usize::MAX / 2);

        assert!(run.outcome.stopped_early);
        assert_eq!(run.outcome.epochs_run, 9);
        assert_eq!(run.log[0], format!("Epoch 0/{}", usize::MAX / 2 - 1));
    }

    #[test]
    fn test_counter_below_patience_does_not_stop() {
        // Best at epoch 0, then 7 worse epochs
        let trace = [0.9, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5];
        let run = run(&trace, 8);

        assert!(!run.outcome.stopped_early);
        assert_eq!(run.outcome.epochs_run, 8);
        assert_eq!(run.outcome.epochs_no_improve, 7);
        assert_eq!(run.model.weights, 2);
    }

    #[test]
    fn test_stops_as_soon_as_counter_reaches_patience() {
        let trace = [0.9, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5];
        let run = run(&trace, 11);

        assert!(run.outcome.stopped_early);
        assert_eq!(run.outcome.epochs_run, 9);
        assert_eq!(run.outcome.history.last().unwrap().epoch, 8);
        // No train steps happen after the stopping epoch
        assert_eq!(run.optimizer.steps, 18);
        assert_eq!(run.model.weights, 2);
    }

    #[test]
    fn test_tie_leaves_counter_unchanged() {
        let run = run(&[0.5, 0.5, 0.5], 3);

        assert_eq!(run.outcome.epochs_no_improve, 0);
        assert!((run.outcome.best_acc - 0.5).abs() < 1e-12);
        // Ties never re-snapshot: epoch 0 weights are kept
        assert_eq!(run.model.weights, 2);
        assert!(!run.log.iter().any(|l| l.starts_with("No improve")));
    }

    #[test]
    fn test_counter_resets_on_improvement() {
        let run = run(&[0.5, 0.4, 0.3, 0.7, 0.6], 5);

        assert_eq!(run.outcome.epochs_no_improve, 1);
        assert!((run.outcome.best_acc - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_restores_best_not_last_weights() {
        let run = run(&[0.3, 0.7, 0.6], 3);

        assert!(!run.outcome.stopped_early);
        assert_eq!(run.optimizer.steps, 6);
        assert_eq!(run.model.weights, 4);
    }

    #[test]
    fn test_best_acc_is_running_maximum() {
        let trace = [0.2, 0.35, 0.3, 0.5, 0.45, 0.5, 0.6];
        let run = run(&trace, trace.len());

        let mut tracker = BestTracker::new(());
        let mut previous_best = 0.0f64;
        for (record, expected) in run.outcome.history.iter().zip(trace) {
            assert!((record.val.accuracy - expected).abs() < 1e-12);
            tracker.observe(record.val.accuracy, || ());
            assert!(tracker.best_acc() >= previous_best);
            previous_best = tracker.best_acc();
        }
        assert!((run.outcome.best_acc - previous_best).abs() < 1e-12);
        assert!((run.outcome.best_acc - 0.6).abs() < 1e-12);
        // 0.3 and 0.45 were worse, the repeated 0.5 tied, 0.6 reset
        assert_eq!(run.outcome.epochs_no_improve, 0);
    }

    #[test]
    fn test_metrics_use_partition_size_denominator() {
        let mut model = ScriptedModel::new(&[0.5]);
        let loaders = PhaseMap::new(FakeLoader::new(&[3, 5, 2]), FakeLoader::new(&[100]));
        let sizes = PhaseMap::new(10, 100);
        let mut optimizer = CountingOptimizer::default();
        let mut scheduler = RecordingScheduler {
            lr: 0.1,
            metrics: Vec::new(),
        };

        let outcome = train_model(
            &mut model,
            &loaders,
            &SizeLoss,
            &mut optimizer,
            &mut scheduler,
            1,
            &(),
            &sizes,
            None,
        )
        .unwrap();

        let train = outcome.history[0].train;
        // (0.3 * 3 + 0.5 * 5 + 0.2 * 2) / 10, not the mean over 3 batches
        assert!((train.loss - 0.38).abs() < 1e-9);
        // 1 + 2 + 1 correct out of 10
        assert!((train.accuracy - 0.4).abs() < 1e-12);
        assert_eq!(optimizer.zero_grads, 4);
        assert_eq!(optimizer.steps, 3);
    }

    #[test]
    fn test_scheduler_receives_percentage_and_drives_lr() {
        let run = run(&[0.5, 0.6], 2);

        assert_eq!(run.scheduler.metrics.len(), 2);
        assert!((run.scheduler.metrics[0] - 50.0).abs() < 1e-9);
        assert!((run.scheduler.metrics[1] - 60.0).abs() < 1e-9);
        assert!((run.optimizer.lr - 0.025).abs() < 1e-12);
        assert!((run.outcome.history[0].learning_rate - 0.05).abs() < 1e-12);
    }

    #[test]
    fn test_logger_mirrors_progress_lines() {
        let run = run(&[0.5], 1);

        assert_eq!(run.log[0], "Epoch 0/0");
        assert_eq!(run.log[1], "----------");
        assert_eq!(run.log[2], "train Loss: 0.4250 Acc: 0.3750");
        assert_eq!(run.log[3], "val Loss: 10.0000 Acc: 0.5000");
        assert!(run.log[4].starts_with("Training complete in "));
        assert_eq!(run.log[5], "Best val Acc: 0.500000");
        assert_eq!(run.log.len(), 6);
    }

    #[test]
    fn test_empty_partition_fails_before_training() {
        let mut model = ScriptedModel::new(&[0.5]);
        let loaders = PhaseMap::new(FakeLoader::new(&[4]), FakeLoader::new(&[]));
        let sizes = PhaseMap::new(4, 0);
        let mut optimizer = CountingOptimizer::default();
        let mut scheduler = RecordingScheduler {
            lr: 0.1,
            metrics: Vec::new(),
        };

        let err = train_model(
            &mut model,
            &loaders,
            &SizeLoss,
            &mut optimizer,
            &mut scheduler,
            3,
            &(),
            &sizes,
            None,
        )
        .unwrap_err();

        assert!(matches!(
            err,
            MrClassError::InvalidPartitionSize { phase: Phase::Val }
        ));
        assert_eq!(model.mode_switches, 0);
        assert_eq!(optimizer.steps, 0);
    }

    #[test]
    fn test_best_tracker_verdicts() {
        let mut tracker = BestTracker::new("initial");

        assert_eq!(tracker.observe(0.4, || "e0"), Verdict::Improved);
        assert_eq!(tracker.observe(0.4, || "never"), Verdict::Tie);
        assert_eq!(tracker.observe(0.3, || "never"), Verdict::Worse);
        assert_eq!(tracker.epochs_no_improve(), 1);
        assert_eq!(tracker.observe(0.5, || "e3"), Verdict::Improved);
        assert_eq!(tracker.epochs_no_improve(), 0);
        assert_eq!(tracker.into_best_weights(), "e3");
    }

    #[test]
    fn test_best_tracker_control_requires_late_epoch() {
        let mut tracker = BestTracker::new(());
        tracker.observe(1.0, || ());
        for _ in 0..EARLY_STOP_PATIENCE {
            tracker.observe(0.1, || ());
        }

        assert_eq!(tracker.control(5), EpochControl::Continue);
        assert_eq!(tracker.control(6), EpochControl::StopRequested);
    }
}
