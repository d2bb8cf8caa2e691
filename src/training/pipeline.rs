//! `train` command: data, model and optimizer wiring around [`train_model`].

use std::fs;
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    optim::{decay::WeightDecayConfig, AdamConfig},
    record::CompactRecorder,
    tensor::backend::AutodiffBackend,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::burn_adapter::{BurnClassifier, BurnOptimizer, CrossEntropyCriterion};
use super::driver::{train_model, TrainOutcome};
use super::interfaces::{PhaseMap, TrainLog};
use crate::config::AppConfig;
use crate::dataset::{ImageBatchSource, ImageFolder, MrBatcher, MrImageDataset};
use crate::model::MrClassifier;
use crate::utils::error::{MrClassError, Result};
use crate::utils::LogFile;

/// Written as JSON next to the checkpoint after training
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    /// Class directory names in label order
    pub classes: Vec<String>,
    pub dataset_sizes: PhaseMap<usize>,
    /// Images per class and phase, indexed by label
    pub class_counts: PhaseMap<Vec<usize>>,
    pub checkpoint: PathBuf,
    #[serde(flatten)]
    pub outcome: TrainOutcome,
}

impl TrainingSummary {
    /// Location of the summary for a checkpoint path
    pub fn path_for(model_path: &Path) -> PathBuf {
        model_path.with_extension("json")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Train a classifier as described by `config`, save the best weights to
/// `output.model_path` and return the run summary.
pub fn train<B: AutodiffBackend>(config: &AppConfig, device: &B::Device) -> Result<TrainingSummary> {
    let data = &config.data;

    let train_folder = ImageFolder::scan(&data.train_dir)?;
    if train_folder.classes.len() != config.model.num_classes {
        return Err(MrClassError::Config(format!(
            "model.num_classes is {} but {} has {} class directories",
            config.model.num_classes,
            data.train_dir.display(),
            train_folder.classes.len()
        )));
    }
    let val_folder = ImageFolder::scan_with_classes(&data.val_dir, &train_folder.classes)?;

    info!("Pre-loading training data");
    let train_dataset = MrImageDataset::preload(&train_folder, data.image_size, data.channels)?;
    info!("Pre-loading validation data");
    let val_dataset = MrImageDataset::preload(&val_folder, data.image_size, data.channels)?;

    let dataset_sizes = PhaseMap::new(train_folder.len(), val_folder.len());
    let class_counts = PhaseMap::new(
        train_folder.class_distribution(),
        val_folder.class_distribution(),
    );
    for (label, class_name) in train_folder.classes.iter().enumerate() {
        info!(
            "  {}: {} train / {} val",
            class_name, class_counts.train[label], class_counts.val[label]
        );
    }
    let batcher = MrBatcher::new(data.image_size, data.channels);
    let dataloaders = PhaseMap::new(
        ImageBatchSource::<B>::new(train_dataset, batcher.clone(), data.batch_size, device.clone())
            .shuffled(data.seed),
        ImageBatchSource::<B>::new(val_dataset, batcher, data.batch_size, device.clone()),
    );

    let model = config.model_config().init::<B>(device);
    let mut classifier = BurnClassifier::new(model);
    let criterion = CrossEntropyCriterion::<B>::new(device);
    let mut optimizer = BurnOptimizer::new(
        AdamConfig::new()
            .with_weight_decay(Some(WeightDecayConfig::new(
                config.training.weight_decay as f32,
            )))
            .init::<B, MrClassifier<B>>(),
        config.training.learning_rate,
    );
    let mut scheduler = config
        .training
        .scheduler
        .build(config.training.learning_rate);

    let mut log_file = config
        .output
        .log_file
        .as_ref()
        .map(LogFile::create)
        .transpose()?;

    info!(
        "Training on {} images, validating on {} ({} classes, {} epochs, batch size {})",
        dataset_sizes.train,
        dataset_sizes.val,
        train_folder.classes.len(),
        config.training.num_epochs,
        data.batch_size
    );

    let outcome = train_model(
        &mut classifier,
        &dataloaders,
        &criterion,
        &mut optimizer,
        &mut scheduler,
        config.training.num_epochs,
        device,
        &dataset_sizes,
        log_file.as_mut().map(|log| log as &mut dyn TrainLog),
    )?;

    let model_path = &config.output.model_path;
    if let Some(parent) = model_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    classifier
        .into_module()
        .save_file(model_path, &CompactRecorder::new())
        .map_err(|e| MrClassError::Model(format!("Failed to save model: {:?}", e)))?;
    info!("Saved best model to {:?}", model_path);

    let summary = TrainingSummary {
        classes: train_folder.classes,
        dataset_sizes,
        class_counts,
        checkpoint: model_path.clone(),
        outcome,
    };
    let summary_path = TrainingSummary::path_for(model_path);
    fs::write(&summary_path, serde_json::to_string_pretty(&summary)?)?;
    info!("Wrote training summary to {:?}", summary_path);

    Ok(summary)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backend::{default_device, TrainingBackend};
    use crate::config::{DataConfig, ModelConfig, OutputConfig, SchedulerConfig, TrainingConfig};
    use image::{GrayImage, Luma};

    /// Two separable classes of tiny grayscale images under `root/<split>/<class>`.
    pub(crate) fn write_image_tree(root: &Path) {
        for split in ["train", "val"] {
            for (class, value) in [("T1", 20u8), ("T2", 230u8)] {
                let dir = root.join(split).join(class);
                fs::create_dir_all(&dir).unwrap();
                for i in 0..3 {
                    GrayImage::from_pixel(8, 8, Luma([value]))
                        .save(dir.join(format!("{}.png", i)))
                        .unwrap();
                }
            }
        }
    }

    pub(crate) fn small_config(root: &Path) -> AppConfig {
        AppConfig {
            data: DataConfig {
                train_dir: root.join("train"),
                val_dir: root.join("val"),
                image_size: 8,
                channels: 1,
                batch_size: 4,
                seed: 1,
            },
            model: ModelConfig {
                num_classes: 2,
                base_filters: 2,
                dropout: 0.0,
                class_names: None,
            },
            training: TrainingConfig {
                num_epochs: 2,
                learning_rate: 1e-3,
                weight_decay: 0.0,
                scheduler: SchedulerConfig::Constant,
            },
            output: OutputConfig {
                model_path: root.join("out").join("model"),
                log_file: Some(root.join("out").join("train.log")),
            },
            inference: None,
        }
    }

    #[test]
    fn test_train_writes_checkpoint_summary_and_log() {
        let dir = tempfile::tempdir().unwrap();
        write_image_tree(dir.path());
        let config = small_config(dir.path());

        let summary = train::<TrainingBackend>(&config, &default_device()).unwrap();

        assert_eq!(summary.classes, vec!["T1".to_string(), "T2".to_string()]);
        assert_eq!(summary.dataset_sizes, PhaseMap::new(6, 6));
        assert_eq!(
            summary.class_counts,
            PhaseMap::new(vec![3, 3], vec![3, 3])
        );
        assert_eq!(summary.outcome.epochs_run, 2);
        assert!((0.0..=1.0).contains(&summary.outcome.best_acc));

        assert!(dir.path().join("out/model.mpk").exists());

        let reloaded =
            TrainingSummary::load(&TrainingSummary::path_for(&config.output.model_path)).unwrap();
        assert_eq!(reloaded.classes, summary.classes);
        assert_eq!(reloaded.class_counts, summary.class_counts);

        let log = fs::read_to_string(dir.path().join("out/train.log")).unwrap();
        assert!(log.contains("Epoch 0/1"));
        assert!(log.contains("Best val Acc: "));
    }

    #[test]
    fn test_train_rejects_class_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        write_image_tree(dir.path());
        let mut config = small_config(dir.path());
        config.model.num_classes = 3;

        let err = train::<TrainingBackend>(&config, &default_device()).unwrap_err();
        assert!(matches!(err, MrClassError::Config(_)));
    }

    #[test]
    fn test_train_rejects_empty_validation_split() {
        let dir = tempfile::tempdir().unwrap();
        write_image_tree(dir.path());
        for class in ["T1", "T2"] {
            let class_dir = dir.path().join("val").join(class);
            fs::remove_dir_all(&class_dir).unwrap();
            fs::create_dir_all(&class_dir).unwrap();
        }
        let config = small_config(dir.path());

        let err = train::<TrainingBackend>(&config, &default_device()).unwrap_err();
        assert!(matches!(err, MrClassError::InvalidPartitionSize { .. }));
    }
}
