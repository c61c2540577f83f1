// THEORY:
// Every failure the learning pipeline can produce is a variant of `GestureError`.
// The variants map one-to-one onto the recovery policies of the frame loop:
// frame-local problems (`DegenerateInput`, `NoExamples`) are skipped, rejected
// control requests (`InvalidName`, `TrainingInProgress`) go back to the caller,
// and persistence problems (`CorruptModel`, `Storage`) are logged and survived.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GestureError>;

#[derive(Debug, Error)]
pub enum GestureError {
    /// All landmarks coincide with the wrist, so there is no scale to normalize by.
    #[error("degenerate hand: all landmarks coincide with the wrist")]
    DegenerateInput,

    #[error("feature vector has {actual} elements, expected {expected}")]
    InvalidVector { expected: usize, actual: usize },

    #[error("feature vector contains a non-finite component at index {index}")]
    NonFiniteVector { index: usize },

    #[error("hand observation has {actual} landmarks, expected {expected}")]
    InvalidLandmarkCount { expected: usize, actual: usize },

    #[error("no gesture examples have been trained yet")]
    NoExamples,

    #[error("gesture name must not be empty")]
    InvalidName,

    #[error("a training window for '{0}' is already open")]
    TrainingInProgress(String),

    #[error("unknown handedness '{0}'")]
    InvalidHandedness(String),

    #[error("persisted gesture model is corrupt: {0}")]
    CorruptModel(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("gesture pipeline worker has shut down")]
    PipelineClosed,

    #[error("gesture model writer has stopped")]
    WriterClosed,
}

impl GestureError {
    /// True for failures that only concern a single frame and must never stop the loop.
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            GestureError::DegenerateInput
                | GestureError::NoExamples
                | GestureError::InvalidVector { .. }
                | GestureError::NonFiniteVector { .. }
                | GestureError::InvalidLandmarkCount { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_local_classification() {
        assert!(GestureError::DegenerateInput.is_frame_local());
        assert!(GestureError::NoExamples.is_frame_local());
        assert!(!GestureError::InvalidName.is_frame_local());
        assert!(!GestureError::CorruptModel("x".into()).is_frame_local());
    }

    #[test]
    fn messages_name_the_problem() {
        let err = GestureError::InvalidVector { expected: 63, actual: 10 };
        assert_eq!(err.to_string(), "feature vector has 10 elements, expected 63");
        let err = GestureError::TrainingInProgress("wave".into());
        assert!(err.to_string().contains("wave"));
    }
}
