// THEORY:
// The `feature` module is the Feature Normalizer. It turns the 21 raw landmarks of
// one hand into a 63-dimensional `FeatureVector` that no longer depends on where
// the hand is in the picture or how close it is to the camera.
//
// Key architectural principles:
// 1.  **Translation Invariance**: every landmark is expressed relative to the wrist.
// 2.  **Scale Invariance**: all relative components are divided by the single
//     largest absolute component, taken jointly over x, y and z. Rotation is
//     deliberately left alone; two hands at different roll angles are different
//     poses.
// 3.  **Shape Guarantee**: a `FeatureVector` can only be built with exactly 63
//     finite elements, so every consumer downstream (store, classifier, persistence) can
//     rely on the dimension without re-checking.

use crate::core_modules::landmark::{LANDMARK_COUNT, Landmark, WRIST};
use crate::error::{GestureError, Result};

/// Dimension of a feature vector: 21 landmarks times 3 axes.
pub const FEATURE_LEN: usize = LANDMARK_COUNT * 3;

/// Normalized pose descriptor for one hand, landmark-major and axis-minor.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Result<Self> {
        if values.len() != FEATURE_LEN {
            return Err(GestureError::InvalidVector {
                expected: FEATURE_LEN,
                actual: values.len(),
            });
        }
        if let Some(index) = values.iter().position(|v| !v.is_finite()) {
            return Err(GestureError::NonFiniteVector { index });
        }
        Ok(Self(values))
    }

    pub fn from_slice(values: &[f32]) -> Result<Self> {
        Self::new(values.to_vec())
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<f32> {
        self.0
    }

    /// Squared Euclidean distance. Ordering by it is identical to ordering by distance.
    pub fn squared_distance(&self, other: &FeatureVector) -> f32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum()
    }

    pub fn distance(&self, other: &FeatureVector) -> f32 {
        self.squared_distance(other).sqrt()
    }
}

impl AsRef<[f32]> for FeatureVector {
    fn as_ref(&self) -> &[f32] {
        &self.0
    }
}

/// Converts raw landmarks into a translation- and scale-invariant feature vector.
///
/// Fails with `DegenerateInput` when every landmark coincides with the wrist, or
/// when the tracker handed over non-finite coordinates. Callers skip such frames.
pub fn normalize(landmarks: &[Landmark; LANDMARK_COUNT]) -> Result<FeatureVector> {
    let wrist = landmarks[WRIST];
    let relative: Vec<f32> = landmarks
        .iter()
        .flat_map(|l| [l.x - wrist.x, l.y - wrist.y, l.z - wrist.z])
        .collect();

    if relative.iter().any(|c| !c.is_finite()) {
        return Err(GestureError::DegenerateInput);
    }

    let max_val = relative.iter().fold(0.0f32, |max, c| max.max(c.abs()));
    if max_val <= 0.0 {
        return Err(GestureError::DegenerateInput);
    }

    FeatureVector::new(relative.into_iter().map(|c| c / max_val).collect())
}
