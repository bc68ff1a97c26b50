use ndarray::Array1;

use crate::data_handling::SceneImage;
use crate::features::image_ops::{center_square, l2_normalize, mean_center, normalise, pixel_vector, resize_area};
use crate::features::FeatureExtractor;

pub const DEFAULT_CROP_SIZE: u32 = 16;

/// Tiny-image features: centre square, shrunk to `crop_size²`, rescaled to
/// `[0, 1]`, zero-mean and unit length.
#[derive(Debug, Clone)]
pub struct TinyImageExtractor {
    crop_size: u32,
}

impl TinyImageExtractor {
    pub fn new(crop_size: u32) -> Self {
        Self {
            crop_size: crop_size.max(1),
        }
    }
}

impl Default for TinyImageExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_CROP_SIZE)
    }
}

impl FeatureExtractor for TinyImageExtractor {
    fn extract(&self, image: &SceneImage) -> Array1<f64> {
        if image.width() == 0 || image.height() == 0 {
            return Array1::zeros(self.dimension());
        }
        let square = center_square(&image.pixels);
        let mut small = resize_area(&square, self.crop_size, self.crop_size);
        normalise(&mut small);

        let mut fv = pixel_vector(&small);
        mean_center(&mut fv);
        l2_normalize(&mut fv);
        Array1::from_vec(fv)
    }

    fn dimension(&self) -> usize {
        (self.crop_size * self.crop_size) as usize
    }

    fn name(&self) -> &str {
        "tiny_image"
    }
}
