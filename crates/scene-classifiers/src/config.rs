use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::features::kernel_map::{KernelType, WindowType};

/// How classification over a batch of images is scheduled.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    Sequential,
    Parallel,
}

/// Parameters of the visual vocabulary (k-means) step shared by the
/// bag-of-visual-words extractors.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct VocabularyConfig {
    /// Number of visual words (k-means clusters).
    pub clusters: usize,
    /// Images sampled per class to collect descriptors from.
    pub samples_per_class: usize,
    /// Keep at most this many per-image descriptor lists; later lists are dropped.
    pub max_descriptor_lists: Option<usize>,
    pub max_iterations: u64,
    pub n_runs: usize,
    pub tolerance: f64,
    pub seed: u64,
}

impl Default for VocabularyConfig {
    fn default() -> Self {
        Self {
            clusters: 500,
            samples_per_class: 30,
            max_descriptor_lists: None,
            max_iterations: 100,
            n_runs: 1,
            tolerance: 1e-4,
            seed: 42,
        }
    }
}

/// Feature extractor selection and hyper-parameters.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub enum ExtractorConfig {
    TinyImage {
        crop_size: u32,
    },
    PatchBovw {
        patch_size: u32,
        stride: u32,
        vocabulary: VocabularyConfig,
    },
    Phow {
        step: usize,
        bin_sizes: Vec<usize>,
        magnification: f32,
        vocabulary_energy_threshold: f64,
        feature_energy_threshold: f64,
        pyramid_grids: Vec<usize>,
        kernel: KernelType,
        window: WindowType,
        kernel_order: usize,
        vocabulary: VocabularyConfig,
    },
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        ExtractorConfig::TinyImage { crop_size: 16 }
    }
}

impl ExtractorConfig {
    pub fn patch_bovw(patch_size: u32, stride: u32, clusters: usize) -> Self {
        ExtractorConfig::PatchBovw {
            patch_size,
            stride,
            vocabulary: VocabularyConfig {
                clusters,
                ..VocabularyConfig::default()
            },
        }
    }

    pub fn phow(step: usize, clusters: usize) -> Self {
        ExtractorConfig::Phow {
            step,
            bin_sizes: vec![4, 6, 8, 10],
            magnification: 6.0,
            vocabulary_energy_threshold: 0.005,
            feature_energy_threshold: 0.015,
            pyramid_grids: vec![2, 4],
            kernel: KernelType::Chi2,
            window: WindowType::Rectangular,
            kernel_order: 1,
            vocabulary: VocabularyConfig {
                clusters,
                max_descriptor_lists: Some(10_000),
                ..VocabularyConfig::default()
            },
        }
    }

    /// Short name used for logging and report headers.
    pub fn name(&self) -> &'static str {
        match self {
            ExtractorConfig::TinyImage { .. } => "tiny_image",
            ExtractorConfig::PatchBovw { .. } => "patch_bovw",
            ExtractorConfig::Phow { .. } => "phow",
        }
    }

    /// Identifies every parameter that changes the produced feature vectors.
    /// Used to key feature caches on disk.
    pub fn fingerprint(&self) -> String {
        match self {
            ExtractorConfig::TinyImage { crop_size } => format!("tiny-c{}", crop_size),
            ExtractorConfig::PatchBovw { vocabulary, .. } => {
                format!("bovw-{}", self.vocabulary_fingerprint_inner(vocabulary))
            }
            ExtractorConfig::Phow {
                feature_energy_threshold,
                pyramid_grids,
                kernel,
                window,
                kernel_order,
                vocabulary,
                ..
            } => format!(
                "phow-{}-e{}-g{}-{:?}-{:?}-n{}",
                self.vocabulary_fingerprint_inner(vocabulary),
                feature_energy_threshold,
                join(pyramid_grids),
                kernel,
                window,
                kernel_order
            )
            .to_lowercase(),
        }
    }

    /// Fingerprint of the vocabulary this extractor needs, `None` for extractors
    /// without one.
    pub fn vocabulary_fingerprint(&self) -> Option<String> {
        self.vocabulary()
            .map(|vocabulary| self.vocabulary_fingerprint_inner(vocabulary))
    }

    pub fn vocabulary(&self) -> Option<&VocabularyConfig> {
        match self {
            ExtractorConfig::TinyImage { .. } => None,
            ExtractorConfig::PatchBovw { vocabulary, .. } => Some(vocabulary),
            ExtractorConfig::Phow { vocabulary, .. } => Some(vocabulary),
        }
    }

    fn vocabulary_fingerprint_inner(&self, vocabulary: &VocabularyConfig) -> String {
        let descriptor = match self {
            ExtractorConfig::TinyImage { .. } => String::new(),
            ExtractorConfig::PatchBovw {
                patch_size, stride, ..
            } => format!("p{}-s{}", patch_size, stride),
            ExtractorConfig::Phow {
                step,
                bin_sizes,
                magnification,
                vocabulary_energy_threshold,
                ..
            } => format!(
                "st{}-b{}-m{}-e{}",
                step,
                join(bin_sizes),
                magnification,
                vocabulary_energy_threshold
            ),
        };
        let cap = vocabulary
            .max_descriptor_lists
            .map(|cap| cap.to_string())
            .unwrap_or_else(|| "all".to_string());
        format!(
            "{}-k{}-n{}-cap{}-seed{}",
            descriptor, vocabulary.clusters, vocabulary.samples_per_class, cap, vocabulary.seed
        )
    }

    /// Scheduling recommended for classifying with this extractor. The PHOW
    /// variant shares one feature cache file across its heavy extractions and is
    /// kept sequential.
    pub fn recommended_concurrency(&self) -> ConcurrencyMode {
        match self {
            ExtractorConfig::TinyImage { .. } | ExtractorConfig::PatchBovw { .. } => {
                ConcurrencyMode::Parallel
            }
            ExtractorConfig::Phow { .. } => ConcurrencyMode::Sequential,
        }
    }
}

fn join(values: &[usize]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("_")
}

/// Supported model types and their hyper-parameters.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub enum ModelType {
    Knn {
        k: usize,
    },
    #[cfg(feature = "svm")]
    SVM {
        eps: f64,
        c: f64,
        kernel: String,
        gaussian_kernel_eps: f64,
        polynomial_kernel_constant: f64,
        polynomial_kernel_degree: f64,
    },
}

impl Default for ModelType {
    fn default() -> Self {
        ModelType::Knn { k: 6 }
    }
}

impl ModelType {
    #[cfg(feature = "svm")]
    pub fn linear_svm() -> Self {
        ModelType::SVM {
            eps: 1e-5,
            c: 1.0,
            kernel: "linear".to_string(),
            gaussian_kernel_eps: 0.1,
            polynomial_kernel_constant: 1.0,
            polynomial_kernel_degree: 3.0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModelType::Knn { .. } => "knn",
            #[cfg(feature = "svm")]
            ModelType::SVM { .. } => "svm",
        }
    }
}

impl FromStr for ModelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "knn" => Ok(ModelType::default()),
            #[cfg(feature = "svm")]
            "svm" => Ok(ModelType::linear_svm()),
            _ => Err(format!(
                "Unknown model type: {}. To use svm, please compile with `--features svm`",
                s
            )),
        }
    }
}

/// Parameters of the hold-out evaluation and of the k-fold search for KNN's `k`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct EvaluationConfig {
    /// Fraction of every class used for training in the hold-out split.
    pub train_fraction: f64,
    pub folds: usize,
    pub max_k: usize,
    /// Seed for splits; `None` draws from the thread RNG.
    pub seed: Option<u64>,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            train_fraction: 0.8,
            folds: 10,
            max_k: 20,
            seed: Some(7),
        }
    }
}
