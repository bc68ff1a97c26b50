use anyhow::Result;
use ndarray::{Array2, ArrayView1};

use crate::error::SceneError;
use crate::models::classifier_trait::{ClassificationResult, ClassifierModel, TrainedClassifier};

/// K-nearest-neighbours under Euclidean distance with majority voting.
#[derive(Debug, Clone)]
pub struct KnnClassifier {
    k: usize,
}

impl KnnClassifier {
    pub fn new(k: usize) -> Self {
        Self { k: k.max(1) }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Train without boxing, for callers that sweep many `k` over one fit.
    pub fn train(&self, x: &Array2<f64>, y: &[usize], n_classes: usize) -> Result<TrainedKnn> {
        if x.nrows() == 0 {
            return Err(SceneError::EmptyDataset.into());
        }
        if x.nrows() != y.len() {
            anyhow::bail!("{} feature vectors but {} labels", x.nrows(), y.len());
        }
        if let Some(bad) = y.iter().find(|c| **c >= n_classes) {
            anyhow::bail!("Class index {} out of range for {} classes", bad, n_classes);
        }
        Ok(TrainedKnn {
            k: self.k,
            reference: x.clone(),
            classes: y.to_vec(),
            n_classes,
        })
    }
}

impl ClassifierModel for KnnClassifier {
    fn fit(&self, x: &Array2<f64>, y: &[usize], n_classes: usize) -> Result<Box<dyn TrainedClassifier>> {
        Ok(Box::new(self.train(x, y, n_classes)?))
    }

    fn name(&self) -> &str {
        "knn"
    }
}

#[derive(Debug, Clone)]
pub struct TrainedKnn {
    k: usize,
    reference: Array2<f64>,
    classes: Vec<usize>,
    n_classes: usize,
}

impl TrainedKnn {
    /// Reference rows ordered by (distance to `x`, insertion index).
    pub fn neighbours(&self, x: ArrayView1<f64>) -> Vec<(f64, usize)> {
        let mut ranked: Vec<(f64, usize)> = self
            .reference
            .outer_iter()
            .enumerate()
            .map(|(idx, row)| {
                let dist = row
                    .iter()
                    .zip(x.iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum::<f64>()
                    .sqrt();
                (dist, idx)
            })
            .collect();
        ranked.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        ranked
    }

    /// Vote among the first `k` of an already ranked neighbour list. Count
    /// ties go to the tied class whose member appears first in the ranking.
    pub fn vote(&self, ranked: &[(f64, usize)], k: usize) -> ClassificationResult {
        let k = k.max(1).min(ranked.len());
        let nearest = &ranked[..k];
        let mut votes = vec![0usize; self.n_classes];
        for (_, idx) in nearest {
            votes[self.classes[*idx]] += 1;
        }
        let top = votes.iter().copied().max().unwrap_or(0);
        let best = nearest
            .iter()
            .map(|(_, idx)| self.classes[*idx])
            .find(|class| votes[*class] == top)
            .unwrap_or(0);
        let scores = votes.iter().map(|v| *v as f64 / k as f64).collect();
        ClassificationResult::with_best(scores, best)
    }
}

impl TrainedClassifier for TrainedKnn {
    fn classify(&self, x: ArrayView1<f64>) -> ClassificationResult {
        let ranked = self.neighbours(x);
        self.vote(&ranked, self.k)
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_one_neighbour_returns_own_label() {
        let x = array![[0.0, 0.0], [1.0, 1.0], [5.0, 5.0], [6.0, 5.0]];
        let y = [0, 0, 1, 1];
        let model = KnnClassifier::new(1).train(&x, &y, 2).unwrap();
        for (row, class) in x.outer_iter().zip(y) {
            assert_eq!(model.classify(row).best().0, class);
        }
    }

    #[test]
    fn test_count_tie_goes_to_nearest_class() {
        // two votes each; the nearest neighbour belongs to class 1
        let x = array![[1.0], [-1.5], [2.0], [-2.5]];
        let y = [1, 0, 1, 0];
        let model = KnnClassifier::new(4).train(&x, &y, 2).unwrap();
        let result = model.classify(array![0.0].view());
        assert_eq!(result.best(), (1, 0.5));
        assert_eq!(result.scores(), &[0.5, 0.5]);
    }

    #[test]
    fn test_distance_tie_uses_insertion_order() {
        let x = array![[1.0], [-1.0]];
        let model = KnnClassifier::new(1).train(&x, &[1, 0], 2).unwrap();
        assert_eq!(model.classify(array![0.0].view()).best().0, 1);
    }

    #[test]
    fn test_k_is_clamped_to_training_size() {
        let x = array![[0.0], [0.1], [3.0]];
        let model = KnnClassifier::new(10).train(&x, &[0, 0, 1], 2).unwrap();
        let result = model.classify(array![0.05].view());
        assert_eq!(result.best().0, 0);
        assert!((result.scores().iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_training_set_errors() {
        let x = Array2::<f64>::zeros((0, 3));
        assert!(KnnClassifier::new(3).fit(&x, &[], 2).is_err());
    }
}
