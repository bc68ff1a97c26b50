//! scene-classifiers: hand-crafted image features and classifiers for
//! scene-category recognition.
//!
//! This crate provides feature extractors (tiny images, bag of visual words
//! over raw patches, PHOW dense SIFT with a spatial pyramid and homogeneous
//! kernel map), visual vocabularies built with k-means, an on-disk feature
//! cache, KNN and one-vs-rest SVM classifiers, stratified evaluation with
//! confusion matrices and the writers for predictions and reports.
//!
//! The SVM lives behind the default `svm` feature.
pub mod config;
pub mod data_handling;
pub mod error;
pub mod evaluation;
pub mod features;
pub mod io;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod vocabulary;
