//! Data structures and helpers for labeled image collections.
//!
//! This module defines `SceneImage` and `GroupedDataset` and contains helpers
//! for per-class sampling, stratified train/validation splits and stratified
//! folds used by the evaluator.
use std::collections::BTreeMap;
use std::sync::Arc;

use image::{GrayImage, ImageBuffer, Luma};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Grayscale image with `f32` intensities, nominally in `[0, 1]`.
pub type FloatImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// A single image together with its stable, path-derived identifier.
#[derive(Debug, Clone)]
pub struct SceneImage {
    pub id: String,
    pub pixels: FloatImage,
}

impl SceneImage {
    pub fn new(id: impl Into<String>, pixels: FloatImage) -> Self {
        Self {
            id: id.into(),
            pixels,
        }
    }

    /// Build from an 8-bit grayscale image, rescaling intensities to `[0, 1]`.
    pub fn from_luma8(id: impl Into<String>, gray: &GrayImage) -> Self {
        let pixels = ImageBuffer::from_fn(gray.width(), gray.height(), |x, y| {
            Luma([gray.get_pixel(x, y)[0] as f32 / 255.0])
        });
        Self::new(id, pixels)
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }
}

impl AsRef<SceneImage> for SceneImage {
    fn as_ref(&self) -> &SceneImage {
        self
    }
}

/// Images grouped by class label. Labels iterate in lexicographic order and
/// groups are never empty.
#[derive(Debug, Clone, Default)]
pub struct GroupedDataset {
    groups: BTreeMap<String, Vec<Arc<SceneImage>>>,
}

impl GroupedDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append images to a class. Empty batches are ignored so that every stored
    /// group stays non-empty.
    pub fn insert<I>(&mut self, label: impl Into<String>, images: I)
    where
        I: IntoIterator<Item = Arc<SceneImage>>,
    {
        let images: Vec<Arc<SceneImage>> = images.into_iter().collect();
        if images.is_empty() {
            return;
        }
        self.groups.entry(label.into()).or_default().extend(images);
    }

    pub fn push(&mut self, label: impl Into<String>, image: SceneImage) {
        self.insert(label, std::iter::once(Arc::new(image)));
    }

    pub fn labels(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    pub fn group(&self, label: &str) -> Option<&[Arc<SceneImage>]> {
        self.groups.get(label).map(|images| images.as_slice())
    }

    pub fn groups(&self) -> impl Iterator<Item = (&str, &[Arc<SceneImage>])> {
        self.groups
            .iter()
            .map(|(label, images)| (label.as_str(), images.as_slice()))
    }

    /// Every `(label, image)` pair, grouped by label in label order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<SceneImage>)> {
        self.groups
            .iter()
            .flat_map(|(label, images)| images.iter().map(move |img| (label.as_str(), img)))
    }

    pub fn num_classes(&self) -> usize {
        self.groups.len()
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(|images| images.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn log_summary(&self, name: &str) {
        log::info!(
            "{}: {} images across {} classes",
            name,
            self.len(),
            self.num_classes()
        );
        for (label, images) in self.groups() {
            log::debug!("  {:<20} {}", label, images.len());
        }
    }

    /// Draw up to `per_class` images from every class uniformly at random
    /// without replacement.
    pub fn sample_per_class(&self, per_class: usize, rng: &mut StdRng) -> GroupedDataset {
        let mut sample = GroupedDataset::new();
        for (label, images) in self.groups() {
            let chosen: Vec<Arc<SceneImage>> = images
                .choose_multiple(rng, per_class.min(images.len()))
                .cloned()
                .collect();
            sample.insert(label, chosen);
        }
        sample
    }

    /// Stratified split into (train, validation).
    ///
    /// Each class contributes `round(n * train_fraction)` images to the training
    /// side; a class with at least two images always keeps at least one image on
    /// each side.
    pub fn split(&self, train_fraction: f64, rng: &mut StdRng) -> (GroupedDataset, GroupedDataset) {
        let mut train = GroupedDataset::new();
        let mut validation = GroupedDataset::new();

        for (label, images) in self.groups() {
            let mut shuffled = images.to_vec();
            shuffled.shuffle(rng);
            let n = shuffled.len();
            let mut n_train = (n as f64 * train_fraction).round() as usize;
            if n >= 2 {
                n_train = n_train.clamp(1, n - 1);
            } else {
                n_train = n;
            }
            let held_out = shuffled.split_off(n_train);
            train.insert(label, shuffled);
            validation.insert(label, held_out);
        }

        (train, validation)
    }

    /// Stratified k-fold partition. Images of each class are shuffled and dealt
    /// round-robin into `n_folds` folds; fold `f` is returned as
    /// `(everything else, fold f)`. Folds with an empty side are skipped.
    pub fn folds(&self, n_folds: usize, rng: &mut StdRng) -> Vec<(GroupedDataset, GroupedDataset)> {
        let n_folds = n_folds.max(2);
        let mut assignment: Vec<(String, Vec<(usize, Arc<SceneImage>)>)> = Vec::new();
        for (label, images) in self.groups() {
            let mut shuffled = images.to_vec();
            shuffled.shuffle(rng);
            let dealt = shuffled
                .into_iter()
                .enumerate()
                .map(|(i, img)| (i % n_folds, img))
                .collect();
            assignment.push((label.to_string(), dealt));
        }

        (0..n_folds)
            .filter_map(|fold| {
                let mut train = GroupedDataset::new();
                let mut validation = GroupedDataset::new();
                for (label, dealt) in &assignment {
                    let (held, kept): (Vec<_>, Vec<_>) =
                        dealt.iter().partition(|(f, _)| *f == fold);
                    train.insert(label.as_str(), kept.into_iter().map(|(_, img)| img.clone()));
                    validation.insert(label.as_str(), held.into_iter().map(|(_, img)| img.clone()));
                }
                if train.is_empty() || validation.is_empty() {
                    None
                } else {
                    Some((train, validation))
                }
            })
            .collect()
    }
}

/// Seeded RNG when a seed is configured, entropy-seeded otherwise.
pub fn make_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank(id: &str) -> SceneImage {
        SceneImage::new(id, FloatImage::new(4, 4))
    }

    fn dataset(per_class: &[(&str, usize)]) -> GroupedDataset {
        let mut data = GroupedDataset::new();
        for (label, n) in per_class {
            for i in 0..*n {
                data.push(*label, blank(&format!("{}/{}.jpg", label, i)));
            }
        }
        data
    }

    #[test]
    fn test_split_is_stratified() {
        let data = dataset(&[("coast", 10), ("forest", 5)]);
        let mut rng = make_rng(Some(1));
        let (train, validation) = data.split(0.8, &mut rng);

        assert_eq!(train.group("coast").unwrap().len(), 8);
        assert_eq!(validation.group("coast").unwrap().len(), 2);
        assert_eq!(train.group("forest").unwrap().len(), 4);
        assert_eq!(validation.group("forest").unwrap().len(), 1);
        assert_eq!(train.len() + validation.len(), data.len());
    }

    #[test]
    fn test_split_keeps_both_sides_for_small_classes() {
        let data = dataset(&[("a", 2)]);
        let mut rng = make_rng(Some(3));
        let (train, validation) = data.split(0.99, &mut rng);
        assert_eq!(train.len(), 1);
        assert_eq!(validation.len(), 1);
    }

    #[test]
    fn test_folds_partition_every_image_once() {
        let data = dataset(&[("a", 7), ("b", 6)]);
        let mut rng = make_rng(Some(11));
        let folds = data.folds(3, &mut rng);
        assert_eq!(folds.len(), 3);

        let mut seen: Vec<String> = folds
            .iter()
            .flat_map(|(_, validation)| validation.iter().map(|(_, img)| img.id.clone()))
            .collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), data.len());

        for (train, validation) in &folds {
            assert_eq!(train.len() + validation.len(), data.len());
            assert_eq!(validation.num_classes(), 2);
        }
    }

    #[test]
    fn test_sample_per_class_caps_group_size() {
        let data = dataset(&[("a", 40), ("b", 3)]);
        let mut rng = make_rng(Some(5));
        let sample = data.sample_per_class(30, &mut rng);
        assert_eq!(sample.group("a").unwrap().len(), 30);
        assert_eq!(sample.group("b").unwrap().len(), 3);
    }

    #[test]
    fn test_empty_groups_are_not_inserted() {
        let mut data = GroupedDataset::new();
        data.insert("empty", Vec::new());
        assert!(data.is_empty());
        assert_eq!(data.num_classes(), 0);
    }
}
