use std::error::Error;
use std::fmt;

/// Domain errors raised by dataset handling, feature extraction and models.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneError {
    /// The dataset (or a split of it) contains no images.
    EmptyDataset,
    /// A model needs at least this many classes but got fewer.
    TooFewClasses { required: usize, found: usize },
    /// Feature vectors do not share the expected length.
    DimensionMismatch { expected: usize, found: usize },
    /// No descriptors were collected to build a vocabulary from.
    NoDescriptors,
}

impl fmt::Display for SceneError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SceneError::EmptyDataset => write!(f, "Dataset contains no images"),
            SceneError::TooFewClasses { required, found } => write!(
                f,
                "At least {} classes are required, found {}",
                required, found
            ),
            SceneError::DimensionMismatch { expected, found } => write!(
                f,
                "Feature vector has length {} but {} was expected",
                found, expected
            ),
            SceneError::NoDescriptors => {
                write!(f, "No local descriptors were extracted for the vocabulary")
            }
        }
    }
}

impl Error for SceneError {}
