//! Burn Dataset Integration
//!
//! Implements Burn's `Dataset` and `Batcher` for preloaded image folders and
//! the [`ImageBatchSource`] the training loop iterates once per phase.

use std::cell::Cell;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::imageops::FilterType;
use image::ImageReader;
use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::loader::ImageFolder;
use crate::training::interfaces::{Batch, BatchSource};
use crate::utils::error::{MrClassError, Result};

/// Per-channel mean used to standardise pixel values in [0, 1]
pub const PIXEL_MEAN: f32 = 0.5;

/// Per-channel standard deviation used to standardise pixel values
pub const PIXEL_STD: f32 = 0.5;

/// Decode `path`, resize to `image_size` x `image_size` and return the pixels
/// as a flattened CHW array in [0, 1] with `channels` planes (1 or 3).
pub fn load_image(path: &Path, image_size: usize, channels: usize) -> Result<Vec<f32>> {
    let img = ImageReader::open(path)
        .map_err(|e| MrClassError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| MrClassError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .resize_exact(image_size as u32, image_size as u32, FilterType::Triangle);

    let plane = image_size * image_size;
    let mut pixels = vec![0.0f32; channels * plane];

    match channels {
        1 => {
            let gray = img.to_luma8();
            for (i, p) in gray.pixels().enumerate() {
                pixels[i] = p[0] as f32 / 255.0;
            }
        }
        3 => {
            let rgb = img.to_rgb8();
            for (i, p) in rgb.pixels().enumerate() {
                for c in 0..3 {
                    pixels[c * plane + i] = p[c] as f32 / 255.0;
                }
            }
        }
        other => {
            return Err(MrClassError::Config(format!(
                "Unsupported channel count {} (expected 1 or 3)",
                other
            )))
        }
    }

    Ok(pixels)
}

/// Standardise a `[batch, channels, h, w]` tensor of [0, 1] pixels.
pub fn normalize<B: Backend>(images: Tensor<B, 4>) -> Tensor<B, 4> {
    (images - PIXEL_MEAN) / PIXEL_STD
}

/// A single preprocessed image ready for batching
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MrItem {
    /// Flattened CHW pixels in [0, 1]
    pub image: Vec<f32>,
    pub label: usize,
    /// Source file, for logging
    pub path: String,
}

impl MrItem {
    pub fn from_path(path: &Path, label: usize, image_size: usize, channels: usize) -> Result<Self> {
        Ok(Self {
            image: load_image(path, image_size, channels)?,
            label,
            path: path.to_string_lossy().to_string(),
        })
    }
}

/// In-memory image dataset implementing Burn's `Dataset` trait
#[derive(Debug, Clone)]
pub struct MrImageDataset {
    items: Vec<MrItem>,
}

impl MrImageDataset {
    pub fn from_items(items: Vec<MrItem>) -> Self {
        Self { items }
    }

    /// Decode every image of `folder` in parallel.
    ///
    /// Fails on the first image that cannot be read.
    pub fn preload(folder: &ImageFolder, image_size: usize, channels: usize) -> Result<Self> {
        let total = folder.samples.len();
        info!(
            "Pre-loading {} images from {:?} (parallel)",
            total, folder.root_dir
        );

        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        let loaded = AtomicUsize::new(0);

        let items: Result<Vec<MrItem>> = folder
            .samples
            .par_iter()
            .map(|sample| {
                let item = MrItem::from_path(&sample.path, sample.label, image_size, channels);
                let count = loaded.fetch_add(1, Ordering::Relaxed) + 1;
                if count % 100 == 0 || count == total {
                    pb.set_position(count as u64);
                }
                item
            })
            .collect();

        let items = items?;
        pb.finish_with_message(format!("Loaded {} images", items.len()));

        Ok(Self { items })
    }
}

impl Dataset<MrItem> for MrImageDataset {
    fn get(&self, index: usize) -> Option<MrItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// A batch of images and their labels
#[derive(Clone, Debug)]
pub struct MrBatch<B: Backend> {
    /// Shape `[batch_size, channels, height, width]`
    pub images: Tensor<B, 4>,
    /// Shape `[batch_size]`
    pub labels: Tensor<B, 1, Int>,
}

impl<B: Backend> Batch for MrBatch<B> {
    type Device = B::Device;
    type Input = Tensor<B, 4>;
    type Labels = Tensor<B, 1, Int>;

    fn size(&self) -> usize {
        self.labels.dims()[0]
    }

    fn to_device(self, device: &B::Device) -> (Tensor<B, 4>, Tensor<B, 1, Int>) {
        (self.images.to_device(device), self.labels.to_device(device))
    }
}

/// Stacks [`MrItem`]s into a normalised [`MrBatch`]
#[derive(Clone, Debug)]
pub struct MrBatcher {
    image_size: usize,
    channels: usize,
}

impl MrBatcher {
    pub fn new(image_size: usize, channels: usize) -> Self {
        Self {
            image_size,
            channels,
        }
    }
}

impl<B: Backend> Batcher<B, MrItem, MrBatch<B>> for MrBatcher {
    fn batch(&self, items: Vec<MrItem>, device: &B::Device) -> MrBatch<B> {
        let batch_size = items.len();

        let images_data: Vec<f32> = items.iter().flat_map(|item| item.image.clone()).collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(
                images_data,
                [batch_size, self.channels, self.image_size, self.image_size],
            ),
            device,
        );

        let labels_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let labels =
            Tensor::<B, 1, Int>::from_data(TensorData::new(labels_data, [batch_size]), device);

        MrBatch {
            images: normalize(images),
            labels,
        }
    }
}

/// Restartable batch iterator over an [`MrImageDataset`].
///
/// With a shuffle seed, pass `n` visits the items in an order drawn from a
/// `ChaCha8Rng` seeded with `seed + n`, so runs are reproducible while every
/// epoch sees a different order.
pub struct ImageBatchSource<B: Backend> {
    dataset: MrImageDataset,
    batcher: MrBatcher,
    batch_size: usize,
    device: B::Device,
    shuffle_seed: Option<u64>,
    passes: Cell<u64>,
}

impl<B: Backend> ImageBatchSource<B> {
    pub fn new(
        dataset: MrImageDataset,
        batcher: MrBatcher,
        batch_size: usize,
        device: B::Device,
    ) -> Self {
        Self {
            dataset,
            batcher,
            batch_size: batch_size.max(1),
            device,
            shuffle_seed: None,
            passes: Cell::new(0),
        }
    }

    pub fn shuffled(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    fn epoch_order(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.dataset.len()).collect();
        if let Some(seed) = self.shuffle_seed {
            let pass = self.passes.get();
            self.passes.set(pass + 1);
            let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(pass));
            indices.shuffle(&mut rng);
        }
        indices
    }
}

impl<B: Backend> BatchSource for ImageBatchSource<B> {
    type Batch = MrBatch<B>;

    fn batches(&self) -> Box<dyn Iterator<Item = MrBatch<B>> + '_> {
        let order = self.epoch_order();
        let chunks: Vec<Vec<usize>> = order
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();

        Box::new(chunks.into_iter().map(move |chunk| {
            let items: Vec<MrItem> = chunk
                .iter()
                .filter_map(|&idx| self.dataset.get(idx))
                .collect();
            self.batcher.batch(items, &self.device)
        }))
    }
}
