pub mod knn;
#[cfg(feature = "svm")]
pub mod svm;

pub mod classifier_trait;
pub mod factory;
