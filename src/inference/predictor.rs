//! Inference Predictor Module
//!
//! Loads a trained checkpoint and classifies image files in batches.

use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::{
    module::Module,
    prelude::*,
    record::CompactRecorder,
    tensor::activation::softmax,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dataset::{load_image, normalize};
use crate::model::{MrClassifier, MrClassifierConfig};
use crate::utils::error::{MrClassError, Result};

/// Result of a single prediction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PredictionResult {
    pub path: PathBuf,

    /// Predicted class index
    pub predicted_class: usize,

    pub class_name: String,

    /// Probability of the predicted class
    pub confidence: f32,

    /// Full probability distribution over all classes
    pub probabilities: Vec<f32>,
}

impl PredictionResult {
    pub fn new(path: PathBuf, probabilities: Vec<f32>, class_names: &[String]) -> Self {
        let (predicted_class, confidence) = argmax(&probabilities);
        let class_name = class_names
            .get(predicted_class)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", predicted_class));

        Self {
            path,
            predicted_class,
            class_name,
            confidence,
            probabilities,
        }
    }
}

/// Index and value of the largest entry; the first one wins on ties.
fn argmax(values: &[f32]) -> (usize, f32) {
    values
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, v)| {
            if v > best.1 {
                (i, v)
            } else {
                best
            }
        })
}

/// Runs a trained [`MrClassifier`] over image files
pub struct Predictor<B: Backend> {
    model: MrClassifier<B>,
    device: B::Device,
    image_size: usize,
    channels: usize,
    class_names: Vec<String>,
}

impl<B: Backend> Predictor<B> {
    pub fn new(
        model: MrClassifier<B>,
        device: B::Device,
        image_size: usize,
        channels: usize,
        class_names: Vec<String>,
    ) -> Self {
        Self {
            model,
            device,
            image_size,
            channels,
            class_names,
        }
    }

    /// Build the model from `config` and load weights saved with
    /// `CompactRecorder` at `model_path` (extension optional).
    pub fn load(
        config: &MrClassifierConfig,
        model_path: &Path,
        device: B::Device,
        image_size: usize,
        class_names: Vec<String>,
    ) -> Result<Self> {
        info!("Loading checkpoint from {:?}", model_path);
        let model = config
            .init::<B>(&device)
            .load_file(model_path, &CompactRecorder::new(), &device)
            .map_err(|e| {
                MrClassError::Model(format!(
                    "Failed to load model from {}: {:?}",
                    model_path.display(),
                    e
                ))
            })?;

        Ok(Self::new(model, device, image_size, config.in_channels, class_names))
    }

    /// Classify a batch of image files.
    pub fn predict_batch(&self, paths: &[PathBuf]) -> Result<Vec<PredictionResult>> {
        if paths.is_empty() {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let mut pixels = Vec::with_capacity(paths.len() * self.channels * self.image_size.pow(2));
        for path in paths {
            pixels.extend(load_image(path, self.image_size, self.channels)?);
        }

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(
                pixels,
                [paths.len(), self.channels, self.image_size, self.image_size],
            ),
            &self.device,
        );
        let probabilities = softmax(self.model.forward(normalize(images)), 1);

        let num_classes = self.model.num_classes();
        let flat = probabilities
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| MrClassError::Backend(format!("{:?}", e)))?;

        let results = paths
            .iter()
            .zip(flat.chunks(num_classes))
            .map(|(path, row)| PredictionResult::new(path.clone(), row.to_vec(), &self.class_names))
            .collect();

        debug!(
            "Classified {} images in {:.2} ms",
            paths.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(results)
    }
}
