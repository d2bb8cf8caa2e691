//! Image-folder scanning
//!
//! A partition directory holds one sub-directory per class:
//!
//! ```text
//! train/
//! ├── FLAIR/
//! │   ├── slice_001.png
//! │   └── slice_002.png
//! ├── T1/
//! │   └── ...
//! └── ...
//! ```
//!
//! Class indices follow the sorted order of the directory names.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::utils::error::{MrClassError, Result};

/// File extensions treated as images
pub const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// A single image on disk with its class label
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSample {
    pub path: PathBuf,
    pub label: usize,
}

/// A labeled partition discovered on disk
#[derive(Debug, Clone)]
pub struct ImageFolder {
    pub root_dir: PathBuf,
    pub classes: Vec<String>,
    pub samples: Vec<ImageSample>,
}

impl ImageFolder {
    /// Scan `root_dir`, deriving classes from its sub-directories.
    pub fn scan<P: AsRef<Path>>(root_dir: P) -> Result<Self> {
        let root_dir = root_dir.as_ref();
        let classes = class_directories(root_dir)?;
        Self::scan_with_classes(root_dir, &classes)
    }

    /// Scan `root_dir` using a fixed class list, so a validation partition
    /// shares the training partition's label indices.
    pub fn scan_with_classes<P: AsRef<Path>>(root_dir: P, classes: &[String]) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        info!("Scanning image folder: {:?}", root_dir);

        if !root_dir.is_dir() {
            return Err(MrClassError::Dataset(format!(
                "Dataset directory does not exist: {}",
                root_dir.display()
            )));
        }

        let class_to_idx: HashMap<&str, usize> = classes
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.as_str(), idx))
            .collect();

        for name in class_directories(&root_dir)? {
            if !class_to_idx.contains_key(name.as_str()) {
                warn!("Skipping unknown class directory '{}'", name);
            }
        }

        let mut samples = Vec::new();
        for (label, class_name) in classes.iter().enumerate() {
            let class_dir = root_dir.join(class_name);
            if !class_dir.is_dir() {
                debug!("Class '{}' has no directory under {:?}", class_name, root_dir);
                continue;
            }

            let mut paths: Vec<PathBuf> = WalkDir::new(&class_dir)
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .map(|e| e.into_path())
                .filter(|p| is_image_file(p))
                .collect();
            paths.sort();

            debug!("Class '{}' (label {}): {} images", class_name, label, paths.len());
            samples.extend(paths.into_iter().map(|path| ImageSample { path, label }));
        }

        info!(
            "Found {} images in {} classes",
            samples.len(),
            classes.len()
        );

        Ok(Self {
            root_dir,
            classes: classes.to_vec(),
            samples,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Images per class, indexed by label
    pub fn class_distribution(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.classes.len()];
        for sample in &self.samples {
            counts[sample.label] += 1;
        }
        counts
    }
}

/// Sorted names of the immediate sub-directories of `root_dir`.
pub fn class_directories(root_dir: &Path) -> Result<Vec<String>> {
    if !root_dir.is_dir() {
        return Err(MrClassError::Dataset(format!(
            "Dataset directory does not exist: {}",
            root_dir.display()
        )));
    }

    let mut names = Vec::new();
    for entry in std::fs::read_dir(root_dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// All images below `dir`, recursively, in sorted path order.
pub fn collect_images(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(MrClassError::Dataset(format!(
            "Input directory does not exist: {}",
            dir.display()
        )));
    }

    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_image_file(p))
        .collect();
    paths.sort();
    Ok(paths)
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}
