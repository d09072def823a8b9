//! Model boundary for the engagement pipeline: landmark sets, the feature
//! vectors derived from them, and the extractor/classifier traits.

pub mod forest;
pub mod landmarks;
pub mod model;

#[cfg(feature = "with-tch")]
pub mod face_mesh;

pub use forest::ForestClassifier;
pub use landmarks::{FeatureVector, LandmarkSet, Point3};
pub use model::{Label, LandmarkExtractor, LevelClassifier, ModelError};

#[cfg(feature = "with-tch")]
pub use tch;
