//! Inference module
//!
//! `infer` classifies every image under `inference.input_dir` with the
//! checkpoint at `output.model_path` and writes the predictions as JSON.

pub mod predictor;

use std::fs;
use std::path::Path;

use burn::tensor::backend::Backend;
use tracing::{info, warn};

pub use predictor::{PredictionResult, Predictor};

use crate::config::AppConfig;
use crate::dataset::collect_images;
use crate::training::TrainingSummary;
use crate::utils::error::{MrClassError, Result};

/// Number of images classified per forward pass
pub const INFERENCE_BATCH_SIZE: usize = 32;

/// Run inference as described by `config` and return the predictions in
/// sorted path order.
pub fn infer<B: Backend>(config: &AppConfig, device: &B::Device) -> Result<Vec<PredictionResult>> {
    let settings = config.inference()?;

    let images = collect_images(&settings.input_dir)?;
    if images.is_empty() {
        return Err(MrClassError::Dataset(format!(
            "No images found in {}",
            settings.input_dir.display()
        )));
    }
    info!("Classifying {} images from {:?}", images.len(), settings.input_dir);

    let predictor = Predictor::<B>::load(
        &config.model_config(),
        &config.output.model_path,
        device.clone(),
        config.data.image_size,
        class_names(config),
    )?;

    let mut predictions = Vec::with_capacity(images.len());
    for chunk in images.chunks(INFERENCE_BATCH_SIZE) {
        predictions.extend(predictor.predict_batch(chunk)?);
    }

    write_predictions(&settings.output_file, &predictions)?;
    info!("Wrote {} predictions to {:?}", predictions.len(), settings.output_file);

    Ok(predictions)
}

/// Class names from the config, falling back to the training summary.
fn class_names(config: &AppConfig) -> Vec<String> {
    if let Some(names) = &config.model.class_names {
        return names.clone();
    }

    let summary_path = TrainingSummary::path_for(&config.output.model_path);
    match TrainingSummary::load(&summary_path) {
        Ok(summary) => summary.classes,
        Err(e) => {
            warn!(
                "No class names configured and no summary at {:?} ({}); using indices",
                summary_path, e
            );
            Vec::new()
        }
    }
}

fn write_predictions(path: &Path, predictions: &[PredictionResult]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, serde_json::to_string_pretty(predictions)?)?;
    Ok(())
}
