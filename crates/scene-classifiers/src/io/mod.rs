pub mod dataset;
pub mod predictions;
