use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use clap::ArgMatches;
use serde::{Deserialize, Serialize};

use scene_classifiers::config::{ConcurrencyMode, EvaluationConfig, ExtractorConfig, ModelType};

/// One experiment: where the data lives, which features and model to use
/// and which outputs to produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub run_id: u32,
    pub train_dir: String,
    pub test_dir: String,
    pub output_dir: String,
    /// Vocabularies and feature caches are kept under `<model_dir>/run<id>`.
    pub model_dir: String,
    pub extractor: ExtractorConfig,
    pub model: ModelType,
    pub evaluation: EvaluationConfig,
    /// Run the hold-out evaluation.
    pub validate: bool,
    /// Train on everything and label the test directory.
    pub classify: bool,
    /// Overrides the extractor's recommended scheduling.
    pub concurrency: Option<ConcurrencyMode>,
    pub use_cache: bool,
    pub html_report: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            run_id: 1,
            train_dir: String::from("training"),
            test_dir: String::from("testing"),
            output_dir: String::from("output"),
            model_dir: String::from("models"),
            extractor: ExtractorConfig::default(),
            model: ModelType::default(),
            evaluation: EvaluationConfig::default(),
            validate: true,
            classify: true,
            concurrency: None,
            use_cache: true,
            html_report: false,
        }
    }
}

impl RunConfig {
    /// Built-in configurations of the three reference runs.
    pub fn preset(name: &str) -> Result<Self> {
        let config = match name {
            "run1" => RunConfig {
                run_id: 1,
                extractor: ExtractorConfig::TinyImage { crop_size: 16 },
                model: ModelType::Knn { k: 6 },
                ..RunConfig::default()
            },
            "run2" => RunConfig {
                run_id: 2,
                extractor: ExtractorConfig::patch_bovw(8, 4, 500),
                model: svm_or_knn(),
                ..RunConfig::default()
            },
            "run3" => RunConfig {
                run_id: 3,
                extractor: ExtractorConfig::phow(5, 600),
                model: svm_or_knn(),
                ..RunConfig::default()
            },
            other => anyhow::bail!("Unknown preset: {}. Valid options are: run1, run2, run3", other),
        };
        Ok(config)
    }

    pub fn concurrency(&self) -> ConcurrencyMode {
        self.concurrency
            .unwrap_or_else(|| self.extractor.recommended_concurrency())
    }

    pub fn output_path(&self, suffix: &str) -> PathBuf {
        Path::new(&self.output_dir).join(format!("run{}{}", self.run_id, suffix))
    }

    /// Apply command line overrides on top of the loaded configuration.
    pub fn apply_overrides(&mut self, matches: &ArgMatches) -> Result<()> {
        if let Some(train_dir) = matches.get_one::<String>("train_dir") {
            self.train_dir = train_dir.clone();
        }
        if let Some(test_dir) = matches.get_one::<String>("test_dir") {
            self.test_dir = test_dir.clone();
        }
        if let Some(output_dir) = matches.get_one::<String>("output_dir") {
            self.output_dir = output_dir.clone();
        }
        if let Some(model_dir) = matches.get_one::<String>("model_dir") {
            self.model_dir = model_dir.clone();
        }
        if let Some(model_type) = matches.get_one::<String>("model_type") {
            self.model = ModelType::from_str(model_type).map_err(anyhow::Error::msg)?;
        }
        if let Some(k) = matches.get_one::<usize>("k") {
            match &mut self.model {
                ModelType::Knn { k: current } => *current = *k,
                #[allow(unreachable_patterns)]
                _ => anyhow::bail!("--k only applies to the knn model"),
            }
        }
        if let Some(run_id) = matches.get_one::<u32>("run_id") {
            self.run_id = *run_id;
        }
        if matches.get_flag("no_cache") {
            self.use_cache = false;
        }
        if matches.get_flag("html") {
            self.html_report = true;
        }
        Ok(())
    }
}

#[cfg(feature = "svm")]
fn svm_or_knn() -> ModelType {
    ModelType::linear_svm()
}

#[cfg(not(feature = "svm"))]
fn svm_or_knn() -> ModelType {
    log::warn!("Built without the svm feature; falling back to knn");
    ModelType::default()
}

pub fn load_run_config<P: AsRef<Path>>(path: P) -> Result<RunConfig> {
    let content = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config: {}", path.as_ref().display()))?;
    let config: RunConfig = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse config: {}", path.as_ref().display()))?;
    Ok(config)
}
