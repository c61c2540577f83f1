// THEORY:
// The `landmark` module holds the raw input vocabulary of the system: the points
// produced by the external hand tracker. A `HandObservation` is one detected hand
// in one frame; a `HandFrame` is everything the tracker reported for one video
// frame. These are plain data objects. They are created per frame and dropped as
// soon as the frame has been processed.

use crate::error::{GestureError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Number of landmarks the tracker reports for every hand.
pub const LANDMARK_COUNT: usize = 21;
/// Index of the wrist, the reference origin for normalization.
pub const WRIST: usize = 0;

/// One tracked 3D point on the hand skeleton, in normalized image coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Landmark {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl From<[f32; 3]> for Landmark {
    fn from([x, y, z]: [f32; 3]) -> Self {
        Self { x, y, z }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Handedness {
    Left,
    Right,
}

impl Handedness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

impl fmt::Display for Handedness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trackers report "Left"/"Right"; anything else is rejected.
impl FromStr for Handedness {
    type Err = GestureError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "left" => Ok(Self::Left),
            "right" => Ok(Self::Right),
            _ => Err(GestureError::InvalidHandedness(s.to_string())),
        }
    }
}

/// A single detected hand within one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandObservation {
    pub landmarks: [Landmark; LANDMARK_COUNT],
    pub handedness: Handedness,
}

impl HandObservation {
    pub fn new(landmarks: [Landmark; LANDMARK_COUNT], handedness: Handedness) -> Self {
        Self { landmarks, handedness }
    }

    /// Builds an observation from a tracker slice, rejecting the wrong landmark count.
    pub fn from_slice(landmarks: &[Landmark], handedness: Handedness) -> Result<Self> {
        let landmarks: [Landmark; LANDMARK_COUNT] =
            landmarks.try_into().map_err(|_| GestureError::InvalidLandmarkCount {
                expected: LANDMARK_COUNT,
                actual: landmarks.len(),
            })?;
        Ok(Self { landmarks, handedness })
    }

    pub fn wrist(&self) -> Landmark {
        self.landmarks[WRIST]
    }
}

/// Everything the tracker reported for one video frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandFrame {
    pub timestamp_ms: u64,
    #[serde(default)]
    pub hands: Vec<HandObservation>,
}

impl HandFrame {
    pub fn new(timestamp_ms: u64, hands: Vec<HandObservation>) -> Self {
        Self { timestamp_ms, hands }
    }

    pub fn empty(timestamp_ms: u64) -> Self {
        Self { timestamp_ms, hands: Vec::new() }
    }
}
