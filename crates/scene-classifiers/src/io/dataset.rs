//! Reading image datasets from disk.
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use image::ImageFormat;
use rayon::prelude::*;

use crate::data_handling::{GroupedDataset, SceneImage};

/// Whether `path` is a regular file with a known image extension.
pub fn is_image_file(path: &Path) -> bool {
    path.is_file() && ImageFormat::from_path(path).is_ok()
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read directory {}", dir.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("Failed to list directory {}", dir.display()))?;
    entries.sort();
    Ok(entries)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Decode one image as grayscale.
pub fn load_image<P: AsRef<Path>>(path: P, id: impl Into<String>) -> Result<SceneImage> {
    let path = path.as_ref();
    let gray = image::open(path)
        .with_context(|| format!("Failed to decode image {}", path.display()))?
        .into_luma8();
    Ok(SceneImage::from_luma8(id, &gray))
}

/// Decode `(path, id)` pairs in parallel, skipping undecodable files.
fn decode_all(files: Vec<(PathBuf, String)>) -> Vec<SceneImage> {
    files
        .par_iter()
        .filter_map(|(path, id)| match load_image(path, id.as_str()) {
            Ok(image) => Some(image),
            Err(e) => {
                log::warn!("Skipping {}: {:#}", path.display(), e);
                None
            }
        })
        .collect()
}

/// Load a training tree: one subdirectory per class label, images inside.
/// Image ids are `"<label>/<file name>"`. Classes without a decodable image
/// are left out.
pub fn load_grouped_dataset<P: AsRef<Path>>(root: P) -> Result<GroupedDataset> {
    let root = root.as_ref();
    let mut dataset = GroupedDataset::new();
    for class_dir in sorted_entries(root)? {
        if !class_dir.is_dir() {
            continue;
        }
        let label = file_name(&class_dir);
        let files: Vec<(PathBuf, String)> = sorted_entries(&class_dir)?
            .into_iter()
            .filter(|path| is_image_file(path))
            .map(|path| {
                let id = format!("{}/{}", label, file_name(&path));
                (path, id)
            })
            .collect();
        let images = decode_all(files);
        if images.is_empty() {
            log::warn!("Class directory {} holds no images", class_dir.display());
        }
        dataset.insert(label, images.into_iter().map(Arc::new));
    }
    dataset.log_summary(&format!("Loaded {}", root.display()));
    Ok(dataset)
}

/// Load every image of a flat directory; ids are the file names.
pub fn load_test_images<P: AsRef<Path>>(dir: P) -> Result<Vec<SceneImage>> {
    let dir = dir.as_ref();
    let files: Vec<(PathBuf, String)> = sorted_entries(dir)?
        .into_iter()
        .filter(|path| is_image_file(path))
        .map(|path| {
            let id = file_name(&path);
            (path, id)
        })
        .collect();
    let images = decode_all(files);
    log::info!("Loaded {} test images from {}", images.len(), dir.display());
    Ok(images)
}
