use std::{fmt, path::PathBuf};

use image::RgbImage;
use thiserror::Error;

use crate::landmarks::{FeatureVector, LandmarkSet};

/// Discrete engagement level produced by a classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to load model from {path:?}")]
    Load {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("extractor returned {actual} landmarks, expected {expected}")]
    LandmarkCount { expected: usize, actual: usize },
    #[error("feature vector has {actual} values, classifier expects {expected}")]
    FeatureLength { expected: usize, actual: usize },
    #[error("invalid model: {0}")]
    InvalidModel(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Face landmark detector.
///
/// Returns `Ok(None)` when no face is present. Only the first face is
/// reported.
pub trait LandmarkExtractor: Send {
    fn extract(&mut self, image: &RgbImage) -> Result<Option<LandmarkSet>, ModelError>;
}

/// Maps a feature vector to an engagement level.
pub trait LevelClassifier: Send {
    fn classify(&self, features: &FeatureVector) -> Result<Label, ModelError>;
}

impl<T: LandmarkExtractor + ?Sized> LandmarkExtractor for Box<T> {
    fn extract(&mut self, image: &RgbImage) -> Result<Option<LandmarkSet>, ModelError> {
        (**self).extract(image)
    }
}

impl<T: LevelClassifier + ?Sized> LevelClassifier for Box<T> {
    fn classify(&self, features: &FeatureVector) -> Result<Label, ModelError> {
        (**self).classify(features)
    }
}
