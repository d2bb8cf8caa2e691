//! Configuration file
//!
//! A single TOML file drives both `train` and `infer`. Sections mirror the
//! pipeline stages: `[data]`, `[model]`, `[training]`, `[output]` and the
//! optional `[inference]`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::model::MrClassifierConfig;
use crate::training::scheduler::{ConstantLr, LrScheduler, PlateauMode, ReduceLrOnPlateau};
use crate::utils::error::{MrClassError, Result};

/// Read and parse a TOML file into `T`.
pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let content = fs::read_to_string(path).map_err(|e| {
        MrClassError::Config(format!("Failed to read config {}: {e}", path.display()))
    })?;

    toml::from_str(&content).map_err(|e| {
        MrClassError::Config(format!("Failed to parse config {}: {e}", path.display()))
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub data: DataConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub inference: Option<InferenceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataConfig {
    pub train_dir: PathBuf,
    pub val_dir: PathBuf,
    #[serde(default = "default_image_size")]
    pub image_size: usize,
    #[serde(default = "default_channels")]
    pub channels: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    pub num_classes: usize,
    #[serde(default = "default_base_filters")]
    pub base_filters: usize,
    #[serde(default = "default_dropout")]
    pub dropout: f64,
    /// Display names, one per class index
    #[serde(default)]
    pub class_names: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingConfig {
    #[serde(default = "default_num_epochs")]
    pub num_epochs: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f64,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    /// Checkpoint path, without the recorder's file extension
    pub model_path: PathBuf,
    /// Optional plain-text mirror of the training progress lines
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InferenceConfig {
    pub input_dir: PathBuf,
    pub output_file: PathBuf,
}

/// Learning-rate policy, keyed on validation accuracy (percent)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchedulerConfig {
    Constant,
    ReduceOnPlateau {
        #[serde(default = "default_factor")]
        factor: f64,
        #[serde(default = "default_patience")]
        patience: usize,
        #[serde(default = "default_min_lr")]
        min_lr: f64,
    },
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig::ReduceOnPlateau {
            factor: default_factor(),
            patience: default_patience(),
            min_lr: default_min_lr(),
        }
    }
}

impl SchedulerConfig {
    pub fn build(&self, initial_lr: f64) -> LrScheduler {
        match *self {
            SchedulerConfig::Constant => LrScheduler::Constant(ConstantLr::new(initial_lr)),
            SchedulerConfig::ReduceOnPlateau {
                factor,
                patience,
                min_lr,
            } => LrScheduler::ReduceOnPlateau(ReduceLrOnPlateau::new(
                initial_lr,
                PlateauMode::Max,
                factor,
                patience,
                min_lr,
            )),
        }
    }
}

fn default_image_size() -> usize {
    128
}
fn default_channels() -> usize {
    1
}
fn default_batch_size() -> usize {
    16
}
fn default_seed() -> u64 {
    42
}
fn default_base_filters() -> usize {
    16
}
fn default_dropout() -> f64 {
    0.3
}
fn default_num_epochs() -> usize {
    50
}
fn default_learning_rate() -> f64 {
    1e-3
}
fn default_weight_decay() -> f64 {
    1e-4
}
fn default_factor() -> f64 {
    0.1
}
fn default_patience() -> usize {
    3
}
fn default_min_lr() -> f64 {
    1e-6
}

impl AppConfig {
    /// Load and validate a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: AppConfig = load_toml_config(path.as_ref())?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(MrClassError::Config(msg));

        if self.data.image_size == 0 {
            return fail("data.image_size must be positive".into());
        }
        if self.data.batch_size == 0 {
            return fail("data.batch_size must be positive".into());
        }
        if self.data.channels != 1 && self.data.channels != 3 {
            return fail(format!(
                "data.channels must be 1 or 3, got {}",
                self.data.channels
            ));
        }
        if self.model.num_classes == 0 {
            return fail("model.num_classes must be positive".into());
        }
        if !(0.0..1.0).contains(&self.model.dropout) {
            return fail(format!(
                "model.dropout must be in [0, 1), got {}",
                self.model.dropout
            ));
        }
        if let Some(names) = &self.model.class_names {
            if names.len() != self.model.num_classes {
                return fail(format!(
                    "model.class_names has {} entries but num_classes is {}",
                    names.len(),
                    self.model.num_classes
                ));
            }
        }
        if self.training.learning_rate <= 0.0 {
            return fail(format!(
                "training.learning_rate must be positive, got {}",
                self.training.learning_rate
            ));
        }
        if let SchedulerConfig::ReduceOnPlateau { factor, .. } = self.training.scheduler {
            if !(factor > 0.0 && factor < 1.0) {
                return fail(format!(
                    "training.scheduler.factor must be in (0, 1), got {}",
                    factor
                ));
            }
        }

        Ok(())
    }

    /// Model hyper-parameters derived from the `[data]` and `[model]` sections
    pub fn model_config(&self) -> MrClassifierConfig {
        MrClassifierConfig::new(self.model.num_classes)
            .with_in_channels(self.data.channels)
            .with_base_filters(self.model.base_filters)
            .with_dropout(self.model.dropout)
    }

    /// The `[inference]` section, required by `infer`
    pub fn inference(&self) -> Result<&InferenceConfig> {
        self.inference
            .as_ref()
            .ok_or_else(|| MrClassError::Config("missing [inference] section".into()))
    }
}
