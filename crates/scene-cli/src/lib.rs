//! Command line experiment runner for the scene classification pipeline.
pub mod run;
