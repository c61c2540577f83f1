//! Hand poses shared by the unit tests. Coordinates are multiples of 1/64 so
//! translations and power-of-two scalings stay exact in f32.

use crate::core_modules::feature::{FeatureVector, normalize};
use crate::core_modules::landmark::{HandObservation, Handedness, LANDMARK_COUNT, Landmark};

/// Fingers spread, hand pointing up from the wrist.
pub fn open_hand_landmarks() -> [Landmark; LANDMARK_COUNT] {
    std::array::from_fn(|i| {
        Landmark::new(
            0.5 + ((i % 5) as f32 - 2.0) / 32.0,
            0.75 - i as f32 / 32.0,
            -((i % 4) as f32) / 64.0,
        )
    })
}

/// Fingers curled back towards the palm.
pub fn fist_landmarks() -> [Landmark; LANDMARK_COUNT] {
    std::array::from_fn(|i| {
        if i == 0 {
            return Landmark::new(0.5, 0.75, 0.0);
        }
        Landmark::new(
            0.5 + ((i % 5) as f32 - 2.0) / 16.0,
            0.75 - ((i % 4) as f32 + 1.0) / 32.0,
            ((i % 3) as f32) / 64.0,
        )
    })
}

pub fn observation(landmarks: [Landmark; LANDMARK_COUNT], handedness: Handedness) -> HandObservation {
    HandObservation::new(landmarks, handedness)
}

pub fn open_features() -> FeatureVector {
    normalize(&open_hand_landmarks()).expect("open hand normalizes")
}

pub fn fist_features() -> FeatureVector {
    normalize(&fist_landmarks()).expect("fist normalizes")
}

/// A vector with every component set to `value`.
pub fn constant_features(value: f32) -> FeatureVector {
    FeatureVector::new(vec![value; LANDMARK_COUNT * 3]).expect("valid length")
}
