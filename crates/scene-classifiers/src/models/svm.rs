use anyhow::{Context, Result};
use linfa::dataset::Pr;
use linfa::traits::{Fit, Predict};
use linfa::Dataset;
use linfa_svm::{Svm, SvmParams};
use ndarray::{Array1, Array2, ArrayView1, Axis};

use crate::config::ModelType;
use crate::error::SceneError;
use crate::models::classifier_trait::{ClassificationResult, ClassifierModel, TrainedClassifier};

/// One-vs-rest SVM: one binary Platt-scaled model per class.
pub struct SVMClassifier {
    params: ModelType,
}

impl SVMClassifier {
    pub fn new(params: ModelType) -> Self {
        SVMClassifier { params }
    }

    fn binary_params(&self) -> Result<SvmParams<f64, Pr>> {
        if let ModelType::SVM {
            eps,
            c,
            kernel,
            gaussian_kernel_eps,
            polynomial_kernel_constant,
            polynomial_kernel_degree,
        } = &self.params
        {
            let model: SvmParams<f64, Pr> = Svm::<f64, Pr>::params().eps(*eps).pos_neg_weights(*c, *c);

            // Chain the kernel configuration based on the kernel type
            let model = match kernel.as_str() {
                "linear" => model.linear_kernel(),
                "gauss" => model.gaussian_kernel(*gaussian_kernel_eps),
                "poly" => model.polynomial_kernel(*polynomial_kernel_constant, *polynomial_kernel_degree),
                _ => anyhow::bail!(
                    "Unsupported kernel type: {}. Valid options are: linear, gauss, poly",
                    kernel
                ),
            };
            Ok(model)
        } else {
            anyhow::bail!("Expected ModelType::SVM but got {}", self.params.name())
        }
    }
}

impl ClassifierModel for SVMClassifier {
    fn fit(&self, x: &Array2<f64>, y: &[usize], n_classes: usize) -> Result<Box<dyn TrainedClassifier>> {
        if x.nrows() == 0 {
            return Err(SceneError::EmptyDataset.into());
        }
        if x.nrows() != y.len() {
            anyhow::bail!("{} feature vectors but {} labels", x.nrows(), y.len());
        }
        let present = (0..n_classes).filter(|c| y.contains(c)).count();
        if n_classes < 2 || present < 2 {
            return Err(SceneError::TooFewClasses {
                required: 2,
                found: present,
            }
            .into());
        }

        let params = self.binary_params()?;
        let mut models = Vec::with_capacity(n_classes);
        for class in 0..n_classes {
            // Convert y to [true, false] for the current class versus the rest
            let targets: Array1<bool> = y.iter().map(|&label| label == class).collect();
            let dataset = Dataset::new(x.to_owned(), targets);
            let model = params
                .fit(&dataset)
                .with_context(|| format!("Failed to train the SVM for class {}", class))?;
            log::debug!("Trained one-vs-rest SVM {}/{}", class + 1, n_classes);
            models.push(model);
        }

        Ok(Box::new(TrainedSvm { models }))
    }

    fn name(&self) -> &str {
        "svm"
    }
}

pub struct TrainedSvm {
    models: Vec<Svm<f64, Pr>>,
}

impl TrainedClassifier for TrainedSvm {
    fn classify(&self, x: ArrayView1<f64>) -> ClassificationResult {
        let row = x.insert_axis(Axis(0));
        let scores = self
            .models
            .iter()
            .map(|model| {
                let probability: Array1<Pr> = model.predict(&row);
                probability.get(0).map(|p| **p as f64).unwrap_or(0.0)
            })
            .collect();
        ClassificationResult::new(scores)
    }

    fn n_classes(&self) -> usize {
        self.models.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blobs() -> (Array2<f64>, Vec<usize>) {
        let centres = [[0.0, 0.0], [4.0, 0.0], [0.0, 4.0]];
        let mut data = Vec::new();
        let mut labels = Vec::new();
        for (class, centre) in centres.iter().enumerate() {
            for i in 0..8 {
                let dx = (i % 3) as f64 * 0.2 - 0.2;
                let dy = (i / 3) as f64 * 0.2 - 0.2;
                data.extend([centre[0] + dx, centre[1] + dy]);
                labels.push(class);
            }
        }
        (Array2::from_shape_vec((labels.len(), 2), data).unwrap(), labels)
    }

    #[test]
    fn test_one_vs_rest_separates_blobs() {
        let (x, y) = blobs();
        let model = SVMClassifier::new(ModelType::linear_svm()).fit(&x, &y, 3).unwrap();
        assert_eq!(model.n_classes(), 3);
        let mut correct = 0;
        for (row, class) in x.outer_iter().zip(&y) {
            let result = model.classify(row);
            assert_eq!(result.scores().len(), 3);
            if result.best().0 == *class {
                correct += 1;
            }
        }
        assert!(correct as f64 / y.len() as f64 > 0.8);
    }

    #[test]
    fn test_single_class_is_rejected() {
        let (x, _) = blobs();
        let y = vec![0; x.nrows()];
        let err = SVMClassifier::new(ModelType::linear_svm()).fit(&x, &y, 1).err().unwrap();
        assert!(err.to_string().contains("At least 2 classes"));
    }

    #[test]
    fn test_unknown_kernel_is_rejected() {
        let (x, y) = blobs();
        let params = ModelType::SVM {
            eps: 1e-5,
            c: 1.0,
            kernel: "sigmoid".to_string(),
            gaussian_kernel_eps: 0.1,
            polynomial_kernel_constant: 1.0,
            polynomial_kernel_degree: 3.0,
        };
        assert!(SVMClassifier::new(params).fit(&x, &y, 3).is_err());
    }
}
