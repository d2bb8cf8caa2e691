//! Dataset module for labeled MR image folders
//!
//! This module provides functionality for:
//! - Discovering class directories and image files on disk
//! - Decoding and preloading images into memory
//! - Burn `Dataset`/`Batcher` implementations and the per-epoch batch source

pub mod burn_dataset;
pub mod loader;

// Re-export main types for convenience
pub use burn_dataset::{
    load_image, normalize, ImageBatchSource, MrBatch, MrBatcher, MrImageDataset, MrItem,
};
pub use loader::{collect_images, ImageFolder, ImageSample};
