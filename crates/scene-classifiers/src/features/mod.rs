//! Image feature extractors.
//!
//! Every extractor maps one `SceneImage` to a fixed-length `Array1<f64>` and is
//! free of side effects; `cache::CachingExtractor` adds on-disk memoization on
//! top of any of them.
pub mod cache;
pub mod dsift;
pub mod image_ops;
pub mod kernel_map;
pub mod patches;
pub mod phow;
pub mod tiny_image;

use anyhow::Result;
use ndarray::Array2;

use crate::data_handling::SceneImage;
use crate::error::SceneError;

pub use ndarray::Array1;

/// A pure function from an image to a feature vector of constant length.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, image: &SceneImage) -> Array1<f64>;

    /// Length of every vector this extractor produces.
    fn dimension(&self) -> usize;

    fn name(&self) -> &str {
        "extractor"
    }
}

impl FeatureExtractor for Box<dyn FeatureExtractor> {
    fn extract(&self, image: &SceneImage) -> Array1<f64> {
        (**self).extract(image)
    }

    fn dimension(&self) -> usize {
        (**self).dimension()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Extract features for a list of images into a `(n_images, dimension)` matrix.
pub fn feature_matrix<E, I>(extractor: &E, images: I) -> Result<Array2<f64>>
where
    E: FeatureExtractor + ?Sized,
    I: IntoIterator,
    I::Item: AsRef<SceneImage>,
{
    let dim = extractor.dimension();
    let mut data = Vec::new();
    let mut rows = 0;
    for image in images {
        let fv = extractor.extract(image.as_ref());
        if fv.len() != dim {
            return Err(SceneError::DimensionMismatch {
                expected: dim,
                found: fv.len(),
            }
            .into());
        }
        data.extend(fv.iter().copied());
        rows += 1;
    }
    Ok(Array2::from_shape_vec((rows, dim), data)?)
}
