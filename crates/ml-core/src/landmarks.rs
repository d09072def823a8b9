//! Face landmark sets and the flat feature vectors the classifier consumes.

use crate::model::ModelError;

/// Single landmark, `x`/`y` normalised to the frame, `z` relative depth.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Ordered landmarks of the first detected face.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LandmarkSet {
    points: Vec<Point3>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Point3>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[Point3] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Flatten into `[x0, y0, z0, x1, y1, z1, ...]`.
    ///
    /// `expected` is the landmark count the classifier was trained on; any
    /// other count is a model contract violation.
    pub fn to_feature_vector(&self, expected: usize) -> Result<FeatureVector, ModelError> {
        if self.points.len() != expected {
            return Err(ModelError::LandmarkCount {
                expected,
                actual: self.points.len(),
            });
        }
        let mut values = Vec::with_capacity(expected * 3);
        for point in &self.points {
            values.extend_from_slice(&[point.x, point.y, point.z]);
        }
        Ok(FeatureVector { values })
    }
}

/// Flat `3·N` feature vector. Only constructed from a [`LandmarkSet`].
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: Vec<f32>,
}

impl FeatureVector {
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    fn landmarks(count: usize) -> LandmarkSet {
        LandmarkSet::new(
            (0..count)
                .map(|i| {
                    let i = i as f32;
                    Point3::new(i / 1000.0, 0.5 + i / 2000.0, -i / 100.0)
                })
                .collect(),
        )
    }

    #[rstest]
    #[case(1)]
    #[case(5)]
    #[case(468)]
    #[case(478)]
    fn vector_length_is_three_per_point(#[case] count: usize) {
        let features = landmarks(count).to_feature_vector(count).unwrap();
        assert_eq!(features.len(), count * 3);
    }

    #[test]
    fn coordinates_follow_point_order() {
        let set = landmarks(468);
        let features = set.to_feature_vector(468).unwrap();
        for (i, point) in set.points().iter().enumerate() {
            assert_relative_eq!(features.as_slice()[3 * i], point.x);
            assert_relative_eq!(features.as_slice()[3 * i + 1], point.y);
            assert_relative_eq!(features.as_slice()[3 * i + 2], point.z);
        }
    }

    #[test]
    fn vectorizing_is_deterministic() {
        let set = landmarks(32);
        assert_eq!(
            set.to_feature_vector(32).unwrap(),
            set.to_feature_vector(32).unwrap()
        );
    }

    #[rstest]
    #[case(467)]
    #[case(478)]
    #[case(0)]
    fn wrong_arity_is_rejected(#[case] count: usize) {
        let err = landmarks(count).to_feature_vector(468).unwrap_err();
        assert!(matches!(
            err,
            ModelError::LandmarkCount {
                expected: 468,
                actual
            } if actual == count
        ));
    }
}
