use crate::config::ModelType;
use crate::models::classifier_trait::ClassifierModel;

/// Build a boxed classifier model from a `ModelType`.
pub fn build_model(model_type: &ModelType) -> Box<dyn ClassifierModel> {
    match model_type {
        ModelType::Knn { k } => Box::new(crate::models::knn::KnnClassifier::new(*k)),

        #[cfg(feature = "svm")]
        ModelType::SVM { .. } => {
            Box::new(crate::models::svm::SVMClassifier::new(model_type.clone()))
        } // When compiled, `ModelType` only contains the variants enabled by
          // features, so no catch-all arm is necessary.
    }
}
