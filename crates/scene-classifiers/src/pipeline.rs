//! End-to-end training and annotation.
//!
//! `SceneClassifier` turns an extractor configuration and a model type into a
//! trained `Annotator`: it builds (or loads) the visual vocabulary the
//! extractor needs, wraps the extractor in a feature cache, extracts the
//! training matrix and fits the model. The `Annotator` then labels unseen
//! images sequentially or on the rayon pool.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::{ConcurrencyMode, EvaluationConfig, ExtractorConfig, ModelType};
use crate::data_handling::{make_rng, GroupedDataset, SceneImage};
use crate::error::SceneError;
use crate::evaluation::{self, labeled_matrix, ConfusionMatrix, KSelection};
use crate::features::cache::{cache_path, CachingExtractor};
use crate::features::dsift::{DenseSift, SiftDescriptors};
use crate::features::kernel_map::HomogeneousKernelMap;
use crate::features::patches::{PatchBovwExtractor, PatchSampler};
use crate::features::phow::PhowExtractor;
use crate::features::tiny_image::TinyImageExtractor;
use crate::features::FeatureExtractor;
use crate::models::classifier_trait::TrainedClassifier;
use crate::models::factory::build_model;
use crate::vocabulary::{self, DescriptorSource, Vocabulary, VocabularyBuilder};

/// Label assigned to one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub label: String,
    pub confidence: f64,
}

pub type CachedExtractor = CachingExtractor<Box<dyn FeatureExtractor>>;

/// A trained model together with the extractor it was trained with.
pub struct Annotator {
    classes: Vec<String>,
    extractor: CachedExtractor,
    model: Box<dyn TrainedClassifier>,
}

impl Annotator {
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn extractor(&self) -> &CachedExtractor {
        &self.extractor
    }

    pub fn classify(&self, image: &SceneImage) -> Prediction {
        let fv = self.extractor.extract(image);
        let (class, confidence) = self.model.classify(fv.view()).best();
        Prediction {
            id: image.id.clone(),
            label: self.classes.get(class).cloned().unwrap_or_default(),
            confidence,
        }
    }

    /// Classify every image; results are ordered by image id.
    pub fn classify_all(&self, images: &[SceneImage], mode: ConcurrencyMode) -> Vec<Prediction> {
        log::info!("Classifying {} images ({:?})", images.len(), mode);
        let results = match mode {
            ConcurrencyMode::Sequential => images
                .iter()
                .map(|image| (image.id.clone(), self.classify(image)))
                .collect::<BTreeMap<_, _>>(),
            ConcurrencyMode::Parallel => {
                let results = Mutex::new(BTreeMap::new());
                images.par_iter().for_each(|image| {
                    let prediction = self.classify(image);
                    let mut guard = match results.lock() {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    };
                    guard.insert(image.id.clone(), prediction);
                });
                match results.into_inner() {
                    Ok(map) => map,
                    Err(poisoned) => poisoned.into_inner(),
                }
            }
        };
        results.into_values().collect()
    }

    /// Write new cache entries to disk; failures are only logged.
    pub fn persist_cache(&self) {
        persist(&self.extractor);
    }
}

fn persist(extractor: &CachedExtractor) {
    if let Err(e) = extractor.persist() {
        log::warn!("Could not write feature cache: {:#}", e);
    }
}

/// Stable short signature of the image ids of a training set, so that
/// vocabularies and feature caches built from different subsets never mix.
pub fn training_signature(data: &GroupedDataset) -> String {
    // FNV-1a
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for (_, image) in data.iter() {
        for byte in image.id.bytes().chain(std::iter::once(0)) {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
    }
    format!("{}i-{:016x}", data.len(), hash)
}

#[derive(Debug, Clone)]
pub struct SceneClassifier {
    pub run_id: u32,
    pub extractor: ExtractorConfig,
    pub model: ModelType,
    pub model_dir: PathBuf,
    pub use_cache: bool,
}

impl SceneClassifier {
    pub fn new<P: AsRef<Path>>(run_id: u32, extractor: ExtractorConfig, model: ModelType, model_dir: P) -> Self {
        Self {
            run_id,
            extractor,
            model,
            model_dir: model_dir.as_ref().to_path_buf(),
            use_cache: true,
        }
    }

    /// Keep vocabularies and feature vectors in memory only.
    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    /// Directory holding this run's vocabulary and feature caches.
    pub fn run_dir(&self) -> PathBuf {
        self.model_dir.join(format!("run{}", self.run_id))
    }

    fn vocabulary_for(&self, training: &GroupedDataset, source: &dyn DescriptorSource) -> Result<Vocabulary> {
        let config = match self.extractor.vocabulary() {
            Some(config) => config,
            None => anyhow::bail!("Extractor {} has no vocabulary", self.extractor.name()),
        };
        let build = || VocabularyBuilder::new(config).build(training, source);
        match (self.use_cache, self.extractor.vocabulary_fingerprint()) {
            (true, Some(fingerprint)) => {
                let path = self.run_dir().join(format!(
                    "vocabulary-{}-{}.bin",
                    fingerprint,
                    training_signature(training)
                ));
                vocabulary::load_or_build(path, build)
            }
            _ => build(),
        }
    }

    fn base_extractor(&self, training: &GroupedDataset) -> Result<Box<dyn FeatureExtractor>> {
        let extractor: Box<dyn FeatureExtractor> = match &self.extractor {
            ExtractorConfig::TinyImage { crop_size } => Box::new(TinyImageExtractor::new(*crop_size)),
            ExtractorConfig::PatchBovw {
                patch_size, stride, ..
            } => {
                let sampler = PatchSampler::new(*patch_size, *stride);
                let vocabulary = self.vocabulary_for(training, &sampler)?;
                Box::new(PatchBovwExtractor::new(sampler, Arc::new(vocabulary)))
            }
            ExtractorConfig::Phow {
                step,
                bin_sizes,
                magnification,
                vocabulary_energy_threshold,
                feature_energy_threshold,
                pyramid_grids,
                kernel,
                window,
                kernel_order,
                ..
            } => {
                let sift = DenseSift::new(*step, bin_sizes.clone(), *magnification);
                let source = SiftDescriptors::new(sift.clone(), *vocabulary_energy_threshold);
                let vocabulary = self.vocabulary_for(training, &source)?;
                Box::new(PhowExtractor::new(
                    sift,
                    *feature_energy_threshold,
                    Arc::new(vocabulary),
                    pyramid_grids.clone(),
                    HomogeneousKernelMap::new(*kernel, *window, *kernel_order),
                ))
            }
        };
        Ok(extractor)
    }

    /// The configured extractor, with its vocabulary trained on `training`,
    /// behind a feature cache.
    pub fn extractor_for(&self, training: &GroupedDataset) -> Result<CachedExtractor> {
        let base = self.base_extractor(training)?;
        if !self.use_cache {
            return Ok(CachingExtractor::in_memory(base));
        }
        let key = match self.extractor.vocabulary_fingerprint() {
            Some(_) => format!("{}-{}", self.extractor.fingerprint(), training_signature(training)),
            None => self.extractor.fingerprint(),
        };
        Ok(CachingExtractor::open(cache_path(self.run_dir(), &key), base))
    }

    pub fn train(&self, training: &GroupedDataset) -> Result<Annotator> {
        if training.is_empty() {
            return Err(SceneError::EmptyDataset.into());
        }
        training.log_summary("Training set");
        let extractor = self.extractor_for(training)?;
        let classes = training.labels();

        log::info!("Extracting {} features for {} images", extractor.name(), training.len());
        let (x, y) = labeled_matrix(&extractor, training, &classes)?;
        let model = build_model(&self.model);
        log::info!("Training {} on {} x {} features", model.name(), x.nrows(), x.ncols());
        let trained = model.fit(&x, &y, classes.len())?;
        persist(&extractor);

        Ok(Annotator {
            classes,
            extractor,
            model: trained,
        })
    }

    /// Stratified hold-out evaluation of the configured extractor and model.
    pub fn evaluate(&self, data: &GroupedDataset, config: &EvaluationConfig) -> Result<ConfusionMatrix> {
        let mut rng = make_rng(config.seed);
        let (train, validation) = data.split(config.train_fraction, &mut rng);
        log::info!(
            "Evaluating on a {}/{} split",
            train.len(),
            validation.len()
        );
        let extractor = self.extractor_for(&train)?;
        let model = build_model(&self.model);
        let matrix = evaluation::evaluate(&extractor, model.as_ref(), &train, &validation)?;
        persist(&extractor);
        Ok(matrix)
    }

    /// Cross-validated search for the KNN `k` using the configured extractor.
    pub fn select_k(&self, data: &GroupedDataset, config: &EvaluationConfig, holdout: bool) -> Result<KSelection> {
        let extractor = self.extractor_for(data)?;
        let selection = evaluation::select_k(&extractor, data, config, holdout)?;
        persist(&extractor);
        Ok(selection)
    }

    /// Train on all of `training` and label every test image.
    pub fn train_then_classify(
        &self,
        training: &GroupedDataset,
        test: &[SceneImage],
        mode: ConcurrencyMode,
    ) -> Result<Vec<Prediction>> {
        let annotator = self.train(training)?;
        let predictions = annotator.classify_all(test, mode);
        annotator.persist_cache();
        Ok(predictions)
    }
}
