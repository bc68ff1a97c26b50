//! PHOW features: dense SIFT words pooled over a spatial pyramid, then lifted
//! by a homogeneous kernel map so that a linear classifier behaves like an
//! additive-kernel one.
use std::sync::Arc;

use ndarray::Array1;

use crate::data_handling::SceneImage;
use crate::features::dsift::{DenseSift, Keypoint};
use crate::features::image_ops::{l1_normalize, l2_normalize};
use crate::features::kernel_map::HomogeneousKernelMap;
use crate::features::FeatureExtractor;
use crate::vocabulary::Vocabulary;

#[derive(Debug, Clone)]
pub struct PhowExtractor {
    sift: DenseSift,
    energy_threshold: f64,
    vocabulary: Arc<Vocabulary>,
    grids: Vec<usize>,
    kernel_map: HomogeneousKernelMap,
}

impl PhowExtractor {
    pub fn new(
        sift: DenseSift,
        energy_threshold: f64,
        vocabulary: Arc<Vocabulary>,
        grids: Vec<usize>,
        kernel_map: HomogeneousKernelMap,
    ) -> Self {
        let grids: Vec<usize> = grids.into_iter().filter(|g| *g > 0).collect();
        Self {
            sift,
            energy_threshold,
            vocabulary,
            grids: if grids.is_empty() { vec![1] } else { grids },
            kernel_map,
        }
    }

    /// Total number of pyramid cells over all levels.
    pub fn cells(&self) -> usize {
        self.grids.iter().map(|g| g * g).sum()
    }

    /// Word counts per pyramid cell. Levels follow `grids` order, cells are
    /// row-major within a level and each cell holds `K` counts.
    pub fn pyramid_histogram(&self, image: &SceneImage, keypoints: &[Keypoint]) -> Vec<f64> {
        let k = self.vocabulary.size();
        let (w, h) = (image.width().max(1) as f64, image.height().max(1) as f64);
        let mut histogram = vec![0.0; k * self.cells()];

        for kp in keypoints {
            let word = self.vocabulary.assign(&kp.descriptor);
            let mut level_base = 0;
            for &g in &self.grids {
                let col = ((kp.x * g as f64 / w).floor() as usize).min(g - 1);
                let row = ((kp.y * g as f64 / h).floor() as usize).min(g - 1);
                histogram[level_base + (row * g + col) * k + word] += 1.0;
                level_base += g * g * k;
            }
        }
        histogram
    }
}

impl FeatureExtractor for PhowExtractor {
    fn extract(&self, image: &SceneImage) -> Array1<f64> {
        let keypoints: Vec<Keypoint> = self
            .sift
            .keypoints(image)
            .into_iter()
            .filter(|kp| kp.energy >= self.energy_threshold)
            .collect();
        log::trace!("{}: {} keypoints above threshold", image.id, keypoints.len());

        let mut histogram = self.pyramid_histogram(image, &keypoints);
        l1_normalize(&mut histogram);
        let mut mapped = self.kernel_map.map(&histogram);
        l2_normalize(&mut mapped);
        Array1::from_vec(mapped)
    }

    fn dimension(&self) -> usize {
        self.vocabulary.size() * self.cells() * self.kernel_map.dimension_multiplier()
    }

    fn name(&self) -> &str {
        "phow"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_handling::FloatImage;
    use crate::features::dsift::DESCRIPTOR_LEN;
    use crate::features::kernel_map::{KernelType, WindowType};
    use image::Luma;
    use ndarray::Array2;

    fn checker(w: u32, h: u32) -> SceneImage {
        SceneImage::new(
            "checker.jpg",
            FloatImage::from_fn(w, h, |x, y| Luma([if (x / 4 + y / 4) % 2 == 0 { 1.0 } else { 0.0 }])),
        )
    }

    fn extractor(words: usize, grids: Vec<usize>) -> PhowExtractor {
        let centroids = Array2::from_shape_fn((words, DESCRIPTOR_LEN), |(r, c)| ((r * 7 + c) % 5) as f64 / 5.0);
        PhowExtractor::new(
            DenseSift::new(5, vec![4, 6], 6.0),
            0.0,
            Arc::new(Vocabulary::new(centroids)),
            grids,
            HomogeneousKernelMap::new(KernelType::Chi2, WindowType::Rectangular, 1),
        )
    }

    #[test]
    fn test_dimension_counts_cells_and_map_order() {
        let phow = extractor(3, vec![2, 4]);
        assert_eq!(phow.cells(), 20);
        assert_eq!(phow.dimension(), 3 * 20 * 3);
        assert_eq!(phow.extract(&checker(64, 48)).len(), phow.dimension());
    }

    #[test]
    fn test_every_level_counts_every_keypoint() {
        let phow = extractor(4, vec![1, 2]);
        let img = checker(40, 40);
        let keypoints = phow.sift.keypoints(&img);
        let histogram = phow.pyramid_histogram(&img, &keypoints);
        let (coarse, fine) = histogram.split_at(4);
        assert_eq!(coarse.iter().sum::<f64>(), keypoints.len() as f64);
        assert_eq!(fine.iter().sum::<f64>(), keypoints.len() as f64);
    }

    #[test]
    fn test_phow_vector_is_unit_length() {
        let fv = extractor(5, vec![2]).extract(&checker(50, 50));
        let norm = fv.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!((norm - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_image_without_keypoints_yields_zeros() {
        let fv = extractor(2, vec![2]).extract(&checker(8, 8));
        assert!(fv.iter().all(|v| *v == 0.0));
    }
}
