use anyhow::Result;
use ndarray::{Array2, ArrayView1};

/// A classifier configuration that can be trained on feature vectors.
///
/// Training never mutates the configuration; it returns a separate trained
/// value, so classifying with an untrained model cannot be expressed.
pub trait ClassifierModel {
    /// Fit on `x` (one feature vector per row) with class indices `y` in
    /// `0..n_classes`.
    fn fit(&self, x: &Array2<f64>, y: &[usize], n_classes: usize) -> Result<Box<dyn TrainedClassifier>>;

    /// Optional human readable name for the model
    fn name(&self) -> &str {
        "classifier"
    }
}

/// Immutable trained state shared by all classification workers.
pub trait TrainedClassifier: Send + Sync {
    fn classify(&self, x: ArrayView1<f64>) -> ClassificationResult;

    fn n_classes(&self) -> usize;

    fn classify_rows(&self, x: &Array2<f64>) -> Vec<ClassificationResult> {
        x.outer_iter().map(|row| self.classify(row)).collect()
    }
}

/// Per-class confidence scores for one feature vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationResult {
    scores: Vec<f64>,
    best: usize,
}

impl ClassificationResult {
    /// The best class is the highest score; the first class wins exact ties.
    pub fn new(scores: Vec<f64>) -> Self {
        let mut best = 0;
        for (idx, score) in scores.iter().enumerate() {
            if *score > scores[best] {
                best = idx;
            }
        }
        Self { scores, best }
    }

    /// Scores with a best class chosen by the model itself.
    pub fn with_best(scores: Vec<f64>, best: usize) -> Self {
        Self { scores, best }
    }

    pub fn scores(&self) -> &[f64] {
        &self.scores
    }

    /// `(class index, confidence)` of the winning class.
    pub fn best(&self) -> (usize, f64) {
        (self.best, self.scores.get(self.best).copied().unwrap_or(0.0))
    }
}
