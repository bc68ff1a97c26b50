//! Bag-of-visual-words over raw grayscale patches.

use std::sync::Arc;

use ndarray::{Array1, Array2};

use crate::data_handling::SceneImage;
use crate::features::image_ops::{l2_normalize, mean_center};
use crate::features::FeatureExtractor;
use crate::vocabulary::{DescriptorSource, Vocabulary};

/// Dense square patches taken on a regular grid.
#[derive(Debug, Clone, Copy)]
pub struct PatchSampler {
    pub patch_size: u32,
    pub stride: u32,
}

impl PatchSampler {
    pub fn new(patch_size: u32, stride: u32) -> Self {
        Self {
            patch_size: patch_size.max(1),
            stride: stride.max(1),
        }
    }

    /// Every patch whose origin satisfies `origin < dim - patch_size`, each mean
    /// centred and scaled to unit length, one per row.
    pub fn patches(&self, image: &SceneImage) -> Array2<f64> {
        let p = self.patch_size;
        let len = (p * p) as usize;
        let (w, h) = (image.width(), image.height());
        if w <= p || h <= p {
            return Array2::zeros((0, len));
        }

        let mut data = Vec::new();
        let mut rows = 0;
        for y in (0..h - p).step_by(self.stride as usize) {
            for x in (0..w - p).step_by(self.stride as usize) {
                let mut patch = Vec::with_capacity(len);
                for dy in 0..p {
                    for dx in 0..p {
                        patch.push(image.pixels.get_pixel(x + dx, y + dy)[0] as f64);
                    }
                }
                mean_center(&mut patch);
                l2_normalize(&mut patch);
                data.extend(patch);
                rows += 1;
            }
        }

        Array2::from_shape_vec((rows, len), data).unwrap_or_else(|_| Array2::zeros((0, len)))
    }
}

impl DescriptorSource for PatchSampler {
    fn descriptors(&self, image: &SceneImage) -> Array2<f64> {
        self.patches(image)
    }

    fn descriptor_len(&self) -> usize {
        (self.patch_size * self.patch_size) as usize
    }
}

/// L2-normalized histogram of visual words over all patches of an image.
#[derive(Debug, Clone)]
pub struct PatchBovwExtractor {
    sampler: PatchSampler,
    vocabulary: Arc<Vocabulary>,
}

impl PatchBovwExtractor {
    pub fn new(sampler: PatchSampler, vocabulary: Arc<Vocabulary>) -> Self {
        Self {
            sampler,
            vocabulary,
        }
    }
}

impl FeatureExtractor for PatchBovwExtractor {
    fn extract(&self, image: &SceneImage) -> Array1<f64> {
        let patches = self.sampler.patches(image);
        let mut histogram = self.vocabulary.histogram(patches.view());
        l2_normalize(&mut histogram);
        Array1::from_vec(histogram)
    }

    fn dimension(&self) -> usize {
        self.vocabulary.size()
    }

    fn name(&self) -> &str {
        "patch_bovw"
    }
}
