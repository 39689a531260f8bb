//! Omniglot loader.
//!
//! Expects `root/<alphabet>/<character>/*.png` (the layout of the
//! `images_background` and `images_evaluation` archives, which may be
//! unpacked side by side under `root`). Every character directory is one
//! class. Classes are ordered by path and split train/val/test in the
//! 1028/172/423 proportions of the standard few-shot split.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;

use crate::data::ClassPool;

/// Side length images are resized to.
pub const IMAGE_SIZE: u32 = 28;

const SPLIT_TRAIN: usize = 1028;
const SPLIT_VAL: usize = 172;
const SPLIT_TOTAL: usize = 1623;

/// Number of `(train, val)` classes for `total` classes.
pub fn split_sizes(total: usize) -> (usize, usize) {
    let train = (total * SPLIT_TRAIN + SPLIT_TOTAL / 2) / SPLIT_TOTAL;
    let val = (total * SPLIT_VAL + SPLIT_TOTAL / 2) / SPLIT_TOTAL;
    (train, val.min(total - train))
}

/// Character directories under `root`, sorted by path.
pub fn find_class_dirs(root: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut classes = Vec::new();
    for dir in sorted_subdirs(root)? {
        let nested = sorted_subdirs(&dir)?;
        if nested.is_empty() {
            continue;
        }
        // One level deeper for background/evaluation archive roots.
        if nested.iter().all(|d| sorted_subdirs(d).map(|s| !s.is_empty()).unwrap_or(false)) {
            for alphabet in nested {
                classes.extend(sorted_subdirs(&alphabet)?);
            }
        } else {
            classes.extend(nested);
        }
    }
    classes.sort();
    Ok(classes)
}

fn sorted_subdirs(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dir)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", dir.display()))?
    {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Load one image as a `1 x 28 x 28` greyscale vector in `[0, 1]`, with
/// strokes as 1 and background as 0.
pub fn load_image(path: &Path) -> anyhow::Result<Vec<f32>> {
    let img = image::open(path)
        .map_err(|e| anyhow::anyhow!("Failed to open {}: {e}", path.display()))?
        .into_luma8();
    let img = image::imageops::resize(&img, IMAGE_SIZE, IMAGE_SIZE, FilterType::Triangle);
    Ok(img.pixels().map(|p| 1.0 - p.0[0] as f32 / 255.0).collect())
}

/// Load every character under `root` into train/val/test pools.
pub fn load_pools(root: &Path) -> anyhow::Result<[ClassPool; 3]> {
    let class_dirs = find_class_dirs(root)?;
    anyhow::ensure!(
        !class_dirs.is_empty(),
        "no Omniglot character directories found under {}",
        root.display()
    );
    let (n_train, n_val) = split_sizes(class_dirs.len());
    let shape = [1, IMAGE_SIZE as usize, IMAGE_SIZE as usize];
    let mut pools = [ClassPool::new(shape), ClassPool::new(shape), ClassPool::new(shape)];

    for (class, dir) in class_dirs.iter().enumerate() {
        let split = if class < n_train {
            0
        } else if class < n_train + n_val {
            1
        } else {
            2
        };
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "png"))
            .collect();
        files.sort();
        for file in files {
            pools[split].add(class as u32, load_image(&file)?);
        }
    }

    tracing::info!(
        root = %root.display(),
        classes = class_dirs.len(),
        train = n_train,
        val = n_val,
        "Loaded Omniglot"
    );
    Ok(pools)
}
