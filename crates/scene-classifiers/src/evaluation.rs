//! Hold-out evaluation, confusion matrices and cross-validated selection of
//! the KNN neighbour count.
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;

use anyhow::Result;
use ndarray::{Array1, Array2};

use crate::config::EvaluationConfig;
use crate::data_handling::{make_rng, GroupedDataset};
use crate::error::SceneError;
use crate::features::{feature_matrix, FeatureExtractor};
use crate::models::classifier_trait::ClassifierModel;
use crate::models::knn::{KnnClassifier, TrainedKnn};

/// Square count matrix: rows are true classes, columns predicted classes.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfusionMatrix {
    classes: Vec<String>,
    counts: Array2<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassMetrics {
    pub class: String,
    pub support: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl ConfusionMatrix {
    pub fn new(classes: Vec<String>) -> Self {
        let n = classes.len();
        Self {
            classes,
            counts: Array2::zeros((n, n)),
        }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn add(&mut self, truth: usize, predicted: usize) {
        self.counts[[truth, predicted]] += 1;
    }

    pub fn count(&self, truth: usize, predicted: usize) -> usize {
        self.counts[[truth, predicted]]
    }

    /// Number of samples whose true class is `class`.
    pub fn row_total(&self, class: usize) -> usize {
        self.counts.row(class).sum()
    }

    pub fn column_total(&self, class: usize) -> usize {
        self.counts.column(class).sum()
    }

    pub fn total(&self) -> usize {
        self.counts.sum()
    }

    pub fn correct(&self) -> usize {
        self.counts.diag().sum()
    }

    pub fn precision(&self, class: usize) -> f64 {
        ratio(self.count(class, class), self.column_total(class))
    }

    pub fn recall(&self, class: usize) -> f64 {
        ratio(self.count(class, class), self.row_total(class))
    }

    pub fn f1(&self, class: usize) -> f64 {
        let (p, r) = (self.precision(class), self.recall(class));
        if p + r > 0.0 {
            2.0 * p * r / (p + r)
        } else {
            0.0
        }
    }

    /// Overall accuracy as a percentage in `[0, 100]`.
    pub fn accuracy_pct(&self) -> f64 {
        ratio(self.correct(), self.total()) * 100.0
    }

    pub fn error_rate_pct(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            100.0 - self.accuracy_pct()
        }
    }

    pub fn class_metrics(&self) -> Vec<ClassMetrics> {
        (0..self.classes.len())
            .map(|c| ClassMetrics {
                class: self.classes[c].clone(),
                support: self.row_total(c),
                precision: self.precision(c),
                recall: self.recall(c),
                f1: self.f1(c),
            })
            .collect()
    }

    /// Human readable confusion matrix, per-class metrics and accuracy.
    pub fn detail_report(&self) -> String {
        let width = self
            .classes
            .iter()
            .map(|c| c.len())
            .max()
            .unwrap_or(0)
            .max(8);
        let mut out = String::new();

        let _ = writeln!(out, "Confusion matrix (rows: true class, columns: predicted class)");
        let _ = write!(out, "{:<width$}", "", width = width);
        for class in &self.classes {
            let _ = write!(out, " {:>width$}", class, width = width);
        }
        let _ = writeln!(out);
        for (t, class) in self.classes.iter().enumerate() {
            let _ = write!(out, "{:<width$}", class, width = width);
            for p in 0..self.classes.len() {
                let _ = write!(out, " {:>width$}", self.count(t, p), width = width);
            }
            let _ = writeln!(out);
        }

        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{:<width$} {:>8} {:>10} {:>10} {:>10}",
            "Class",
            "Support",
            "Precision",
            "Recall",
            "F1",
            width = width
        );
        for m in self.class_metrics() {
            let _ = writeln!(
                out,
                "{:<width$} {:>8} {:>10.4} {:>10.4} {:>10.4}",
                m.class,
                m.support,
                m.precision,
                m.recall,
                m.f1,
                width = width
            );
        }

        let _ = writeln!(out);
        let _ = writeln!(out, "Accuracy: {:.2}% ({}/{})", self.accuracy_pct(), self.correct(), self.total());
        let _ = writeln!(out, "Error rate: {:.2}%", self.error_rate_pct());
        out
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Sorted union of the class labels of both sides of a split.
pub fn class_list(train: &GroupedDataset, validation: &GroupedDataset) -> Vec<String> {
    let labels: BTreeSet<String> = train
        .labels()
        .into_iter()
        .chain(validation.labels())
        .collect();
    labels.into_iter().collect()
}

/// Features and class indices of a labeled dataset.
pub fn labeled_matrix<E>(
    extractor: &E,
    data: &GroupedDataset,
    classes: &[String],
) -> Result<(Array2<f64>, Vec<usize>)>
where
    E: FeatureExtractor + ?Sized,
{
    let index: HashMap<&str, usize> = classes
        .iter()
        .enumerate()
        .map(|(i, c)| (c.as_str(), i))
        .collect();
    let mut y = Vec::with_capacity(data.len());
    for (label, _) in data.iter() {
        match index.get(label) {
            Some(i) => y.push(*i),
            None => anyhow::bail!("Label {} is not in the class list", label),
        }
    }
    let x = feature_matrix(extractor, data.iter().map(|(_, image)| image))?;
    Ok((x, y))
}

/// Train on `train`, classify every image of `validation` and tabulate.
pub fn evaluate<E>(
    extractor: &E,
    model: &dyn ClassifierModel,
    train: &GroupedDataset,
    validation: &GroupedDataset,
) -> Result<ConfusionMatrix>
where
    E: FeatureExtractor + ?Sized,
{
    if train.is_empty() || validation.is_empty() {
        return Err(SceneError::EmptyDataset.into());
    }
    let classes = class_list(train, validation);

    log::info!("Extracting {} training feature vectors", train.len());
    let (x_train, y_train) = labeled_matrix(extractor, train, &classes)?;
    log::info!("Training {} on {} vectors", model.name(), x_train.nrows());
    let trained = model.fit(&x_train, &y_train, classes.len())?;

    log::info!("Classifying {} validation images", validation.len());
    let (x_val, y_val) = labeled_matrix(extractor, validation, &classes)?;
    let mut matrix = ConfusionMatrix::new(classes);
    for (result, truth) in trained.classify_rows(&x_val).iter().zip(y_val) {
        matrix.add(truth, result.best().0);
    }
    log::debug!("Validation accuracy {:.2}%", matrix.accuracy_pct());
    Ok(matrix)
}

/// Outcome of the cross-validated search for `k`.
#[derive(Debug, Clone, PartialEq)]
pub struct KSelection {
    pub best_k: usize,
    /// Single-fold validation accuracy (percent) of `best_k`.
    pub best_accuracy: f64,
    /// `(k, accuracy)` on the held-out test split each time a new best `k`
    /// was found; empty unless a hold-out was requested.
    pub holdout: Vec<(usize, f64)>,
}

/// Stratified k-fold search over `k = 1..=max_k`.
///
/// Every fold evaluates every `k`; the best `(k, accuracy)` is a running
/// maximum over all folds where only a strictly greater accuracy replaces it.
/// With `holdout`, a stratified test split is set aside first and each new
/// best `k` is additionally scored on it against the training rows of the
/// fold that produced it.
pub fn select_k<E>(
    extractor: &E,
    data: &GroupedDataset,
    config: &EvaluationConfig,
    holdout: bool,
) -> Result<KSelection>
where
    E: FeatureExtractor + ?Sized,
{
    if data.is_empty() {
        return Err(SceneError::EmptyDataset.into());
    }
    let mut rng = make_rng(config.seed);
    let (pool, test) = if holdout {
        data.split(config.train_fraction, &mut rng)
    } else {
        (data.clone(), GroupedDataset::new())
    };
    let classes = class_list(&pool, &test);
    let max_k = config.max_k.max(1);

    // one extraction per image, shared by every fold
    let (x_pool, y_pool) = labeled_matrix(extractor, &pool, &classes)?;
    let rows: HashMap<&str, usize> = pool
        .iter()
        .enumerate()
        .map(|(row, (_, image))| (image.id.as_str(), row))
        .collect();
    let test_matrix = if holdout && !test.is_empty() {
        Some(labeled_matrix(extractor, &test, &classes)?)
    } else {
        None
    };

    let folds = pool.folds(config.folds, &mut rng);
    log::info!(
        "Selecting k in 1..={} over {} folds of {} images",
        max_k,
        folds.len(),
        pool.len()
    );

    let mut best: Option<(usize, f64)> = None;
    let mut holdout_scores = Vec::new();
    for (fold_idx, (fold_train, fold_val)) in folds.iter().enumerate() {
        let (x_train, y_train) = gather(&x_pool, &y_pool, &rows, fold_train);
        let (x_val, y_val) = gather(&x_pool, &y_pool, &rows, fold_val);
        let trained = KnnClassifier::new(max_k).train(&x_train, &y_train, classes.len())?;
        let ranked: Vec<_> = x_val.outer_iter().map(|row| trained.neighbours(row)).collect();

        for k in 1..=max_k {
            let correct = ranked
                .iter()
                .zip(&y_val)
                .filter(|(neighbours, truth)| trained.vote(neighbours, k).best().0 == **truth)
                .count();
            let accuracy = ratio(correct, y_val.len()) * 100.0;
            log::trace!("fold {} k {}: {:.2}%", fold_idx, k, accuracy);

            if best.map_or(true, |(_, acc)| accuracy > acc) {
                best = Some((k, accuracy));
                log::debug!("New best k = {} ({:.2}%) in fold {}", k, accuracy, fold_idx);
                if let Some((x_test, y_test)) = &test_matrix {
                    let held_out = holdout_accuracy(&trained, x_test, y_test, k);
                    log::info!("k = {}: held-out accuracy {:.2}%", k, held_out);
                    holdout_scores.push((k, held_out));
                }
            }
        }
    }

    let (best_k, best_accuracy) = best.ok_or(SceneError::EmptyDataset)?;
    log::info!("Best k = {} ({:.2}%)", best_k, best_accuracy);
    Ok(KSelection {
        best_k,
        best_accuracy,
        holdout: holdout_scores,
    })
}

fn gather(
    x: &Array2<f64>,
    y: &[usize],
    rows: &HashMap<&str, usize>,
    subset: &GroupedDataset,
) -> (Array2<f64>, Vec<usize>) {
    let picked: Vec<usize> = subset
        .iter()
        .filter_map(|(_, image)| rows.get(image.id.as_str()).copied())
        .collect();
    let x_subset = x.select(ndarray::Axis(0), &picked);
    let y_subset = picked.iter().map(|r| y[*r]).collect();
    (x_subset, y_subset)
}

fn holdout_accuracy(trained: &TrainedKnn, x_test: &Array2<f64>, y_test: &[usize], k: usize) -> f64 {
    let predicted: Array1<usize> = x_test
        .outer_iter()
        .map(|row| trained.vote(&trained.neighbours(row), k).best().0)
        .collect();
    let correct = predicted.iter().zip(y_test).filter(|(p, t)| p == t).count();
    ratio(correct, y_test.len()) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_handling::{FloatImage, SceneImage};
    use crate::features::tiny_image::TinyImageExtractor;
    use image::Luma;

    fn matrix() -> ConfusionMatrix {
        let mut m = ConfusionMatrix::new(vec!["coast".into(), "forest".into()]);
        for (t, p) in [(0, 0), (0, 0), (0, 1), (1, 1), (1, 1), (1, 0), (1, 1)] {
            m.add(t, p);
        }
        m
    }

    #[test]
    fn test_confusion_matrix_metrics() {
        let m = matrix();
        assert_eq!(m.total(), 7);
        assert_eq!(m.row_total(0), 3);
        assert!((m.precision(0) - 2.0 / 3.0).abs() < 1e-12);
        assert!((m.recall(1) - 0.75).abs() < 1e-12);
        assert!((m.accuracy_pct() - 500.0 / 7.0).abs() < 1e-9);
        assert!((m.accuracy_pct() + m.error_rate_pct() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_matrix_has_zero_metrics() {
        let m = ConfusionMatrix::new(vec!["a".into()]);
        assert_eq!(m.accuracy_pct(), 0.0);
        assert_eq!(m.f1(0), 0.0);
    }

    #[test]
    fn test_detail_report_mentions_every_class() {
        let report = matrix().detail_report();
        assert!(report.contains("coast"));
        assert!(report.contains("forest"));
        assert!(report.contains("Accuracy: 71.43%"));
    }

    fn synthetic(per_class: usize) -> GroupedDataset {
        let mut data = GroupedDataset::new();
        for i in 0..per_class {
            let shift = i as f32 * 0.01;
            let horizontal = FloatImage::from_fn(24, 24, |_, y| Luma([y as f32 / 24.0 + shift]));
            let vertical = FloatImage::from_fn(24, 24, |x, _| Luma([x as f32 / 24.0 + shift]));
            data.push("horizontal", SceneImage::new(format!("horizontal/{}.jpg", i), horizontal));
            data.push("vertical", SceneImage::new(format!("vertical/{}.jpg", i), vertical));
        }
        data
    }

    #[test]
    fn test_select_k_separable_data() {
        let config = EvaluationConfig {
            folds: 3,
            max_k: 4,
            ..EvaluationConfig::default()
        };
        let selection = select_k(&TinyImageExtractor::new(8), &synthetic(6), &config, false).unwrap();
        assert_eq!(selection.best_k, 1);
        assert_eq!(selection.best_accuracy, 100.0);
        assert!(selection.holdout.is_empty());
    }

    #[test]
    fn test_select_k_with_holdout_scores_new_best() {
        let config = EvaluationConfig {
            folds: 3,
            max_k: 3,
            ..EvaluationConfig::default()
        };
        let selection = select_k(&TinyImageExtractor::new(8), &synthetic(10), &config, true).unwrap();
        assert_eq!(selection.holdout.first().map(|(k, _)| *k), Some(1));
        assert!(selection.holdout.iter().all(|(_, acc)| (0.0..=100.0).contains(acc)));
    }

    #[test]
    fn test_holdout_score_uses_first_fold_training_rows() {
        // overlapping classes so the training rows matter for the held-out score
        let mut data = GroupedDataset::new();
        for i in 0..12u32 {
            let a = FloatImage::from_fn(16, 16, move |x, y| Luma([((x * 7 + y * 3 + i * 5) % 11) as f32 / 11.0]));
            let b = FloatImage::from_fn(16, 16, move |x, y| Luma([((x * 3 + y * 7 + i * 4) % 13) as f32 / 13.0]));
            data.push("a", SceneImage::new(format!("a/{}.jpg", i), a));
            data.push("b", SceneImage::new(format!("b/{}.jpg", i), b));
        }
        let config = EvaluationConfig {
            folds: 4,
            max_k: 2,
            ..EvaluationConfig::default()
        };
        let extractor = TinyImageExtractor::new(8);
        let selection = select_k(&extractor, &data, &config, true).unwrap();

        let mut rng = make_rng(config.seed);
        let (pool, test) = data.split(config.train_fraction, &mut rng);
        let folds = pool.folds(config.folds, &mut rng);
        let classes = class_list(&pool, &test);
        let (x_train, y_train) = labeled_matrix(&extractor, &folds[0].0, &classes).unwrap();
        let (x_test, y_test) = labeled_matrix(&extractor, &test, &classes).unwrap();
        let trained = KnnClassifier::new(1).train(&x_train, &y_train, classes.len()).unwrap();

        let (k, accuracy) = selection.holdout[0];
        assert_eq!(k, 1);
        assert_eq!(accuracy, holdout_accuracy(&trained, &x_test, &y_test, 1));
    }
}
