//! Visual vocabularies: k-means centroids over local descriptors and the
//! nearest-centroid (hard) assignment used by the bag-of-visual-words
//! extractors.
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use linfa::traits::Fit;
use linfa::DatasetBase;
use linfa_clustering::KMeans;
use ndarray::{concatenate, Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::config::VocabularyConfig;
use crate::data_handling::{GroupedDataset, SceneImage};
use crate::error::SceneError;

/// Produces the local descriptors of one image, one descriptor per row.
pub trait DescriptorSource: Send + Sync {
    fn descriptors(&self, image: &SceneImage) -> Array2<f64>;

    fn descriptor_len(&self) -> usize;
}

/// `K` centroids in descriptor space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocabulary {
    centroids: Array2<f64>,
}

impl Vocabulary {
    pub fn new(centroids: Array2<f64>) -> Self {
        Self { centroids }
    }

    /// Number of visual words.
    pub fn size(&self) -> usize {
        self.centroids.nrows()
    }

    pub fn descriptor_len(&self) -> usize {
        self.centroids.ncols()
    }

    pub fn centroids(&self) -> &Array2<f64> {
        &self.centroids
    }

    /// Index of the nearest centroid under squared Euclidean distance. The
    /// lowest index wins ties.
    pub fn assign(&self, descriptor: &[f64]) -> usize {
        let mut best = 0;
        let mut best_dist = f64::INFINITY;
        for (idx, centroid) in self.centroids.outer_iter().enumerate() {
            let dist: f64 = centroid
                .iter()
                .zip(descriptor.iter())
                .map(|(c, d)| (c - d) * (c - d))
                .sum();
            if dist < best_dist {
                best_dist = dist;
                best = idx;
            }
        }
        best
    }

    /// Assign every row of `descriptors`.
    pub fn assign_all(&self, descriptors: ArrayView2<f64>) -> Vec<usize> {
        descriptors
            .outer_iter()
            .map(|row| match row.as_slice() {
                Some(slice) => self.assign(slice),
                None => self.assign(&row.to_vec()),
            })
            .collect()
    }

    /// Count of assignments per visual word.
    pub fn histogram(&self, descriptors: ArrayView2<f64>) -> Vec<f64> {
        let mut counts = vec![0.0; self.size()];
        for word in self.assign_all(descriptors) {
            counts[word] += 1.0;
        }
        counts
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let bytes = bincode::serialize(self).context("Failed to serialize vocabulary")?;
        fs::write(path, bytes)
            .with_context(|| format!("Failed to write vocabulary to {}", path.display()))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .with_context(|| format!("Failed to read vocabulary from {}", path.display()))?;
        let vocabulary: Vocabulary = bincode::deserialize(&bytes)
            .with_context(|| format!("Corrupt vocabulary file {}", path.display()))?;
        if vocabulary.size() == 0 {
            anyhow::bail!("Vocabulary file {} holds no centroids", path.display());
        }
        Ok(vocabulary)
    }
}

/// Builds a `Vocabulary` from a per-class sample of training images.
pub struct VocabularyBuilder<'a> {
    config: &'a VocabularyConfig,
}

impl<'a> VocabularyBuilder<'a> {
    pub fn new(config: &'a VocabularyConfig) -> Self {
        Self { config }
    }

    /// Sample images, collect their descriptors and cluster them.
    pub fn build(&self, training: &GroupedDataset, source: &dyn DescriptorSource) -> Result<Vocabulary> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let sample = training.sample_per_class(self.config.samples_per_class, &mut rng);
        log::info!(
            "Collecting descriptors from {} sampled images ({} per class)",
            sample.len(),
            self.config.samples_per_class
        );

        let lists: Vec<Array2<f64>> = sample
            .iter()
            .map(|(_, image)| source.descriptors(image))
            .collect();

        self.cluster(lists, source.descriptor_len())
    }

    /// Apply the list cap, stack the descriptors and run k-means.
    pub fn cluster(&self, mut lists: Vec<Array2<f64>>, descriptor_len: usize) -> Result<Vocabulary> {
        if let Some(cap) = self.config.max_descriptor_lists {
            if lists.len() > cap {
                log::debug!("Keeping the first {} of {} descriptor lists", cap, lists.len());
                lists.truncate(cap);
            }
        }

        let views: Vec<ArrayView2<f64>> = lists
            .iter()
            .filter(|list| list.nrows() > 0 && list.ncols() == descriptor_len)
            .map(|list| list.view())
            .collect();
        if views.is_empty() {
            return Err(SceneError::NoDescriptors.into());
        }
        let observations = concatenate(Axis(0), &views)?;

        let mut clusters = self.config.clusters.max(1);
        if observations.nrows() < clusters {
            log::warn!(
                "Only {} descriptors for {} clusters; reducing the vocabulary size",
                observations.nrows(),
                clusters
            );
            clusters = observations.nrows();
        }

        log::info!(
            "Clustering {} descriptors of length {} into {} visual words",
            observations.nrows(),
            descriptor_len,
            clusters
        );
        let dataset = DatasetBase::from(observations);
        let rng = StdRng::seed_from_u64(self.config.seed);
        let model = KMeans::params_with_rng(clusters, rng)
            .max_n_iterations(self.config.max_iterations)
            .n_runs(self.config.n_runs.max(1))
            .tolerance(self.config.tolerance)
            .fit(&dataset)
            .context("k-means clustering failed")?;

        Ok(Vocabulary::new(model.centroids().to_owned()))
    }
}

/// Load a cached vocabulary, or build one with `build` and write it back.
///
/// A missing or unreadable cache falls back to `build`; failing to write the
/// fresh vocabulary is logged and otherwise ignored.
pub fn load_or_build<P, F>(path: P, build: F) -> Result<Vocabulary>
where
    P: AsRef<Path>,
    F: FnOnce() -> Result<Vocabulary>,
{
    let path = path.as_ref();
    if path.exists() {
        match Vocabulary::load(path) {
            Ok(vocabulary) => {
                log::info!(
                    "Loaded vocabulary of {} words from {}",
                    vocabulary.size(),
                    path.display()
                );
                return Ok(vocabulary);
            }
            Err(e) => log::warn!("Ignoring vocabulary cache: {:#}", e),
        }
    } else {
        log::debug!("No vocabulary cache at {}", path.display());
    }

    let vocabulary = build()?;
    match vocabulary.save(path) {
        Ok(()) => log::info!("Saved vocabulary to {}", path.display()),
        Err(e) => log::warn!("Could not cache vocabulary: {:#}", e),
    }
    Ok(vocabulary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_words() -> Vocabulary {
        Vocabulary::new(array![[0.0, 0.0], [10.0, 10.0]])
    }

    #[test]
    fn test_assign_nearest_centroid() {
        let vocab = two_words();
        assert_eq!(vocab.assign(&[1.0, -1.0]), 0);
        assert_eq!(vocab.assign(&[9.0, 12.0]), 1);
    }

    #[test]
    fn test_assign_tie_goes_to_first_centroid() {
        let vocab = two_words();
        assert_eq!(vocab.assign(&[5.0, 5.0]), 0);
        assert_eq!(vocab.assign(&[5.0, 5.0]), vocab.assign(&[5.0, 5.0]));
    }

    #[test]
    fn test_histogram_counts_assignments() {
        let vocab = two_words();
        let descriptors = array![[0.5, 0.5], [9.0, 9.5], [11.0, 10.0], [0.0, 0.1]];
        assert_eq!(vocab.histogram(descriptors.view()), vec![2.0, 2.0]);
    }

    #[test]
    fn test_cluster_separates_obvious_groups() {
        let config = VocabularyConfig {
            clusters: 2,
            ..VocabularyConfig::default()
        };
        let lists = vec![
            array![[0.0, 0.0], [0.1, 0.0], [0.0, 0.1]],
            array![[5.0, 5.0], [5.1, 5.0], [5.0, 5.1]],
        ];
        let vocab = VocabularyBuilder::new(&config).cluster(lists, 2).unwrap();
        assert_eq!(vocab.size(), 2);
        assert_ne!(vocab.assign(&[0.05, 0.05]), vocab.assign(&[5.05, 5.05]));
    }

    #[test]
    fn test_cluster_applies_list_cap_in_order() {
        let config = VocabularyConfig {
            clusters: 5,
            max_descriptor_lists: Some(1),
            ..VocabularyConfig::default()
        };
        let lists = vec![array![[0.0, 0.0], [1.0, 1.0]], array![[9.0, 9.0], [8.0, 8.0]]];
        let vocab = VocabularyBuilder::new(&config).cluster(lists, 2).unwrap();
        // only the first list survives, so only its two descriptors are clustered
        assert_eq!(vocab.size(), 2);
        assert!(vocab.centroids().iter().all(|v| *v <= 1.0));
    }

    #[test]
    fn test_cluster_without_descriptors_errors() {
        let config = VocabularyConfig::default();
        let result = VocabularyBuilder::new(&config).cluster(vec![Array2::zeros((0, 4))], 4);
        assert!(result.is_err());
    }
}
