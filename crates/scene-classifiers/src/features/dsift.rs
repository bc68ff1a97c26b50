//! Dense SIFT: 4×4 spatial cells × 8 orientation bins computed on a regular
//! grid at several bin sizes.
use image::imageops;
use ndarray::{Array2, Array3};

use crate::data_handling::{FloatImage, SceneImage};
use crate::features::image_ops::{l2_normalize, to_array2};
use crate::vocabulary::DescriptorSource;

pub const SPATIAL_BINS: usize = 4;
pub const ORIENTATION_BINS: usize = 8;
pub const DESCRIPTOR_LEN: usize = SPATIAL_BINS * SPATIAL_BINS * ORIENTATION_BINS;

/// Components are clamped here before the second normalization.
const CLAMP: f64 = 0.2;

/// A descriptor together with the centre of its window.
#[derive(Debug, Clone)]
pub struct Keypoint {
    pub x: f64,
    pub y: f64,
    pub bin_size: usize,
    /// L2 norm of the raw histogram over the pixel count of one spatial bin.
    pub energy: f64,
    pub descriptor: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DenseSift {
    pub step: usize,
    pub bin_sizes: Vec<usize>,
    pub magnification: f32,
}

impl DenseSift {
    pub fn new(step: usize, bin_sizes: Vec<usize>, magnification: f32) -> Self {
        let mut bin_sizes: Vec<usize> = bin_sizes.into_iter().filter(|b| *b > 0).collect();
        if bin_sizes.is_empty() {
            bin_sizes.push(4);
        }
        Self {
            step: step.max(1),
            bin_sizes,
            magnification: if magnification > 0.0 { magnification } else { 6.0 },
        }
    }

    /// Keypoints at every bin size. Window origins are offset per scale so
    /// that window centres line up with those of the largest bin size.
    pub fn keypoints(&self, image: &SceneImage) -> Vec<Keypoint> {
        let max_bin = self.bin_sizes.iter().copied().max().unwrap_or(0);
        let mut keypoints = Vec::new();
        for &bin in &self.bin_sizes {
            let offset = 2 * (max_bin - bin);
            keypoints.extend(self.keypoints_at_scale(&image.pixels, bin, offset));
        }
        log::trace!("{}: {} dense SIFT keypoints", image.id, keypoints.len());
        keypoints
    }

    fn keypoints_at_scale(&self, image: &FloatImage, bin: usize, offset: usize) -> Vec<Keypoint> {
        let window = SPATIAL_BINS * bin;
        let (w, h) = (image.width() as usize, image.height() as usize);
        if w < offset + window || h < offset + window {
            return Vec::new();
        }

        let sigma = bin as f32 / self.magnification;
        let smoothed = imageops::blur(image, sigma);
        let orientations = orientation_planes(&to_array2(&smoothed));

        let bin_pixels = (bin * bin) as f64;
        let mut keypoints = Vec::new();
        for y0 in (offset..=h - window).step_by(self.step) {
            for x0 in (offset..=w - window).step_by(self.step) {
                let mut descriptor = window_histogram(&orientations, x0, y0, bin);
                let raw_norm = descriptor.iter().map(|v| v * v).sum::<f64>().sqrt();
                normalize_clamped(&mut descriptor);
                keypoints.push(Keypoint {
                    x: x0 as f64 + window as f64 / 2.0,
                    y: y0 as f64 + window as f64 / 2.0,
                    bin_size: bin,
                    energy: raw_norm / bin_pixels,
                    descriptor,
                });
            }
        }
        keypoints
    }
}

/// Gradient magnitude split between the two nearest orientation bins, as a
/// `(height, width, ORIENTATION_BINS)` array.
fn orientation_planes(pixels: &Array2<f32>) -> Array3<f64> {
    let (h, w) = pixels.dim();
    let mut planes = Array3::<f64>::zeros((h, w, ORIENTATION_BINS));
    let at = |y: usize, x: usize| pixels[[y, x]] as f64;
    for y in 0..h {
        for x in 0..w {
            let gx = (at(y, (x + 1).min(w - 1)) - at(y, x.saturating_sub(1))) / 2.0;
            let gy = (at((y + 1).min(h - 1), x) - at(y.saturating_sub(1), x)) / 2.0;
            let magnitude = (gx * gx + gy * gy).sqrt();
            if magnitude == 0.0 {
                continue;
            }
            let angle = gy.atan2(gx).rem_euclid(2.0 * std::f64::consts::PI);
            let t = angle / (2.0 * std::f64::consts::PI) * ORIENTATION_BINS as f64;
            let lower = t.floor();
            let frac = t - lower;
            let b0 = (lower as usize) % ORIENTATION_BINS;
            let b1 = (b0 + 1) % ORIENTATION_BINS;
            planes[[y, x, b0]] += magnitude * (1.0 - frac);
            planes[[y, x, b1]] += magnitude * frac;
        }
    }
    planes
}

/// Raw 128-bin histogram of one window, cells in row-major order.
fn window_histogram(planes: &Array3<f64>, x0: usize, y0: usize, bin: usize) -> Vec<f64> {
    let mut hist = vec![0.0; DESCRIPTOR_LEN];
    for cy in 0..SPATIAL_BINS {
        for cx in 0..SPATIAL_BINS {
            let base = (cy * SPATIAL_BINS + cx) * ORIENTATION_BINS;
            for y in y0 + cy * bin..y0 + (cy + 1) * bin {
                for x in x0 + cx * bin..x0 + (cx + 1) * bin {
                    for o in 0..ORIENTATION_BINS {
                        hist[base + o] += planes[[y, x, o]];
                    }
                }
            }
        }
    }
    hist
}

fn normalize_clamped(descriptor: &mut [f64]) {
    l2_normalize(descriptor);
    for v in descriptor.iter_mut() {
        *v = v.min(CLAMP);
    }
    l2_normalize(descriptor);
}

/// Dense SIFT descriptors whose energy reaches `threshold`, as a descriptor
/// source for vocabulary building.
#[derive(Debug, Clone)]
pub struct SiftDescriptors {
    pub sift: DenseSift,
    pub threshold: f64,
}

impl SiftDescriptors {
    pub fn new(sift: DenseSift, threshold: f64) -> Self {
        Self { sift, threshold }
    }
}

impl DescriptorSource for SiftDescriptors {
    fn descriptors(&self, image: &SceneImage) -> Array2<f64> {
        let kept: Vec<Keypoint> = self
            .sift
            .keypoints(image)
            .into_iter()
            .filter(|kp| kp.energy >= self.threshold)
            .collect();
        let rows = kept.len();
        let data: Vec<f64> = kept.into_iter().flat_map(|kp| kp.descriptor).collect();
        Array2::from_shape_vec((rows, DESCRIPTOR_LEN), data)
            .unwrap_or_else(|_| Array2::zeros((0, DESCRIPTOR_LEN)))
    }

    fn descriptor_len(&self) -> usize {
        DESCRIPTOR_LEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn stripes(w: u32, h: u32) -> SceneImage {
        SceneImage::new(
            "stripes.jpg",
            FloatImage::from_fn(w, h, |x, y| Luma([if (x / 3 + y / 5) % 2 == 0 { 0.9 } else { 0.1 }])),
        )
    }

    #[test]
    fn test_descriptors_are_unit_norm_and_non_negative() {
        let sift = DenseSift::new(5, vec![4, 6], 6.0);
        let keypoints = sift.keypoints(&stripes(48, 40));
        assert!(!keypoints.is_empty());
        for kp in &keypoints {
            assert_eq!(kp.descriptor.len(), DESCRIPTOR_LEN);
            assert!(kp.descriptor.iter().all(|v| *v >= 0.0));
            let norm = kp.descriptor.iter().map(|v| v * v).sum::<f64>().sqrt();
            assert!((norm - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_flat_image_has_no_energy() {
        let flat = SceneImage::new("flat.jpg", FloatImage::from_pixel(32, 32, Luma([0.5])));
        let keypoints = DenseSift::new(4, vec![4], 6.0).keypoints(&flat);
        assert!(!keypoints.is_empty());
        assert!(keypoints.iter().all(|kp| kp.energy < 1e-6));
    }

    #[test]
    fn test_window_centres_align_across_scales() {
        let sift = DenseSift::new(100, vec![4, 8], 6.0);
        let keypoints = sift.keypoints(&stripes(64, 64));
        let small = keypoints.iter().find(|kp| kp.bin_size == 4).unwrap();
        let large = keypoints.iter().find(|kp| kp.bin_size == 8).unwrap();
        assert_eq!((small.x, small.y), (large.x, large.y));
    }

    #[test]
    fn test_threshold_filters_flat_windows() {
        let flat = SceneImage::new("flat.jpg", FloatImage::from_pixel(32, 32, Luma([0.5])));
        let source = SiftDescriptors::new(DenseSift::new(4, vec![4], 6.0), 0.005);
        assert_eq!(source.descriptors(&flat).nrows(), 0);
        assert!(source.descriptors(&stripes(32, 32)).nrows() > 0);
    }

    #[test]
    fn test_noise_keeps_most_keypoints_at_feature_threshold() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let noise = SceneImage::new(
            "noise.jpg",
            FloatImage::from_fn(64, 64, |_, _| Luma([rng.gen_range(0.0f32..1.0)])),
        );
        let keypoints = DenseSift::new(5, vec![4, 6, 8, 10], 6.0).keypoints(&noise);
        assert_eq!(keypoints.len(), 174);
        let kept = keypoints.iter().filter(|kp| kp.energy >= 0.015).count();
        assert!(kept * 4 >= keypoints.len() * 3, "only {} of {} kept", kept, keypoints.len());
    }

    #[test]
    fn test_too_small_image_has_no_keypoints() {
        let tiny = stripes(10, 10);
        assert!(DenseSift::new(5, vec![4], 6.0).keypoints(&tiny).is_empty());
    }
}
