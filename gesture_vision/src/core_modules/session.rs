// THEORY:
// The `session` module is the Session State Machine. It is the single owner of the
// learned examples, the classifier and the output log, and it decides what every
// incoming hand observation is used for.
//
// Key architectural principles:
// 1.  **Orthogonal Modes**: `training` and `detecting` are two independent flags,
//     not one enum. The UI may switch detection on while a training window is
//     still running; in such a frame the example is recorded first and the
//     prediction runs afterwards.
// 2.  **Time Is An Input**: every operation takes the current time in milliseconds.
//     The machine never reads a clock, which keeps it deterministic under test and
//     lets the synchronous and the tokio pipelines share it.
// 3.  **Idempotent Window Closure**: `poll_deadline` closes an elapsed training
//     window exactly once. Calling it again, or after the last example of the window
//     was committed, changes nothing. The caller reacts to the returned
//     `TrainingCompleted` by persisting the store.
// 4.  **Debounced Output**: a detection is only appended to the log when its label
//     differs from the previously emitted one. `clear_log` resets that memory.

use crate::config::SessionConfig;
use crate::core_modules::classifier::{KnnClassifier, Prediction};
use crate::core_modules::example_store::{ExampleStore, GestureLabel};
use crate::core_modules::feature::normalize;
use crate::core_modules::landmark::{HandObservation, Handedness};
use crate::error::{GestureError, Result};
use serde::Serialize;
use tracing::{debug, info};

/// The mutable flags of a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub training: bool,
    pub detecting: bool,
    /// Name of the gesture being (or most recently) trained.
    pub current_gesture: Option<String>,
    pub training_started_ms: Option<u64>,
    /// Absolute time after which the open training window closes.
    pub training_deadline_ms: Option<u64>,
    /// Label of the last detection written to the log.
    pub last_emitted_label: Option<GestureLabel>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEvent {
    /// A trained gesture was recognized.
    Detected { label: GestureLabel, confidence: f32 },
    /// A training window finished.
    Trained { gesture: String, examples: usize },
}

/// One line of the output log shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub event: LogEvent,
}

/// Emitted once when a training window closes.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingCompleted {
    pub gesture: String,
    /// Examples recorded during the window, across both hands.
    pub examples_added: usize,
    pub completed_at_ms: u64,
}

/// What happened to a single hand observation.
#[derive(Debug, Clone, PartialEq)]
pub struct HandResult {
    pub handedness: Handedness,
    /// Label the observation was recorded under, if a training window was open.
    pub trained_label: Option<GestureLabel>,
    /// Classifier output, if detection was on and at least one example exists.
    pub prediction: Option<Prediction>,
    /// Log entry produced by this observation, if any.
    pub emitted: Option<LogEntry>,
}

impl HandResult {
    fn idle(handedness: Handedness) -> Self {
        Self { handedness, trained_label: None, prediction: None, emitted: None }
    }
}

pub struct GestureSession {
    config: SessionConfig,
    state: SessionState,
    store: ExampleStore,
    classifier: KnnClassifier,
    log: Vec<LogEntry>,
    examples_in_window: usize,
}

impl GestureSession {
    pub fn new(config: SessionConfig, store: ExampleStore) -> Self {
        let classifier = KnnClassifier::new(config.k);
        Self {
            config,
            state: SessionState::default(),
            store,
            classifier,
            log: Vec::new(),
            examples_in_window: 0,
        }
    }

    /// Opens a training window for `gesture_name`. Returns the window deadline.
    pub fn start_training(&mut self, gesture_name: &str, now_ms: u64) -> Result<u64> {
        let name = gesture_name.trim();
        if name.is_empty() {
            return Err(GestureError::InvalidName);
        }
        if self.state.training {
            let current = self.state.current_gesture.clone().unwrap_or_default();
            return Err(GestureError::TrainingInProgress(current));
        }

        let deadline = now_ms.saturating_add(self.config.training_window_ms);
        self.state.training = true;
        self.state.current_gesture = Some(name.to_string());
        self.state.training_started_ms = Some(now_ms);
        self.state.training_deadline_ms = Some(deadline);
        self.examples_in_window = 0;
        info!("Training '{}' until t={}ms", name, deadline);
        Ok(deadline)
    }

    /// Flips detection mode and returns the new value.
    pub fn toggle_detecting(&mut self) -> bool {
        self.state.detecting = !self.state.detecting;
        info!("Detection {}", if self.state.detecting { "enabled" } else { "disabled" });
        self.state.detecting
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
        self.state.last_emitted_label = None;
    }

    /// Closes the training window once its deadline has passed.
    pub fn poll_deadline(&mut self, now_ms: u64) -> Option<TrainingCompleted> {
        let deadline = self.state.training_deadline_ms?;
        if !self.state.training || now_ms <= deadline {
            return None;
        }

        self.state.training = false;
        self.state.training_deadline_ms = None;
        self.state.training_started_ms = None;
        let gesture = self.state.current_gesture.clone().unwrap_or_default();
        let examples_added = std::mem::take(&mut self.examples_in_window);

        self.log.push(LogEntry {
            timestamp_ms: now_ms,
            event: LogEvent::Trained { gesture: gesture.clone(), examples: examples_added },
        });
        info!("Training '{}' finished with {} examples", gesture, examples_added);

        Some(TrainingCompleted { gesture, examples_added, completed_at_ms: now_ms })
    }

    /// Feeds one detected hand through training and/or detection.
    ///
    /// Fails only for frame-local problems (a degenerate hand); the caller skips
    /// the observation and keeps going.
    pub fn process_hand(&mut self, hand: &HandObservation, now_ms: u64) -> Result<HandResult> {
        let in_window = self.state.training
            && self.state.training_deadline_ms.is_some_and(|deadline| now_ms <= deadline);
        if !in_window && !self.state.detecting {
            return Ok(HandResult::idle(hand.handedness));
        }

        let features = normalize(&hand.landmarks)?;
        let mut result = HandResult::idle(hand.handedness);

        if in_window {
            let name = self.state.current_gesture.as_deref().unwrap_or_default();
            let label = GestureLabel::new(name, hand.handedness);
            self.store.add(label.clone(), features.clone())?;
            self.examples_in_window += 1;
            debug!("Recorded example {} for '{}'", self.store.count_for(&label), label);
            result.trained_label = Some(label);
        }

        if self.state.detecting {
            match self.classifier.predict(&features, &self.store) {
                Ok(prediction) => {
                    if prediction.confidence > self.config.detection_threshold {
                        result.emitted = self.emit_detection(&prediction, now_ms);
                    }
                    result.prediction = Some(prediction);
                }
                Err(GestureError::NoExamples) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(result)
    }

    fn emit_detection(&mut self, prediction: &Prediction, now_ms: u64) -> Option<LogEntry> {
        if self.state.last_emitted_label.as_ref() == Some(&prediction.label) {
            return None;
        }
        let entry = LogEntry {
            timestamp_ms: now_ms,
            event: LogEvent::Detected {
                label: prediction.label.clone(),
                confidence: prediction.confidence,
            },
        };
        self.state.last_emitted_label = Some(prediction.label.clone());
        self.log.push(entry.clone());
        debug!("Detected '{}' ({:.2})", prediction.label, prediction.confidence);
        Some(entry)
    }

    /// Fraction of the open training window that has elapsed, in [0, 1].
    pub fn training_progress(&self, now_ms: u64) -> Option<f32> {
        if !self.state.training {
            return None;
        }
        let started = self.state.training_started_ms?;
        let elapsed = now_ms.saturating_sub(started) as f32;
        Some((elapsed / self.config.training_window_ms as f32).min(1.0))
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_training(&self) -> bool {
        self.state.training
    }

    pub fn is_detecting(&self) -> bool {
        self.state.detecting
    }

    pub fn store(&self) -> &ExampleStore {
        &self.store
    }

    pub fn log(&self) -> &[LogEntry] {
        &self.log
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::fixtures::{fist_landmarks, observation, open_hand_landmarks};
    use crate::core_modules::landmark::{LANDMARK_COUNT, Landmark};

    fn session() -> GestureSession {
        GestureSession::new(SessionConfig::default(), ExampleStore::new())
    }

    fn open_left() -> HandObservation {
        observation(open_hand_landmarks(), Handedness::Left)
    }

    fn fist_left() -> HandObservation {
        observation(fist_landmarks(), Handedness::Left)
    }

    #[test]
    fn starts_idle() {
        let s = session();
        assert_eq!(s.state(), &SessionState::default());
        assert!(s.log().is_empty());
        assert_eq!(s.training_progress(0), None);
    }

    #[test]
    fn blank_names_are_rejected() {
        let mut s = session();
        assert!(matches!(s.start_training("", 0), Err(GestureError::InvalidName)));
        assert!(matches!(s.start_training("   ", 0), Err(GestureError::InvalidName)));
        assert!(!s.is_training());

        let result = s.process_hand(&open_left(), 10).unwrap();
        assert_eq!(result.trained_label, None);
        assert!(s.store().is_empty());
    }

    #[test]
    fn name_is_trimmed_and_deadline_set() {
        let mut s = session();
        let deadline = s.start_training("  wave ", 1_000).unwrap();
        assert_eq!(deadline, 4_000);
        assert_eq!(s.state().current_gesture.as_deref(), Some("wave"));

        let result = s.process_hand(&open_left(), 1_010).unwrap();
        assert_eq!(result.trained_label.unwrap().as_str(), "wave_left");
    }

    #[test]
    fn second_start_during_window_is_rejected() {
        let mut s = session();
        s.start_training("wave", 0).unwrap();
        assert!(matches!(
            s.start_training("fist", 100),
            Err(GestureError::TrainingInProgress(name)) if name == "wave"
        ));
    }

    #[test]
    fn examples_are_recorded_until_the_deadline_inclusive() {
        let mut s = session();
        s.start_training("open", 0).unwrap();
        s.process_hand(&open_left(), 0).unwrap();
        s.process_hand(&open_left(), 3_000).unwrap();
        let late = s.process_hand(&open_left(), 3_001).unwrap();
        assert_eq!(late.trained_label, None);
        assert_eq!(s.store().count_for(&"open_left".into()), 2);
    }

    #[test]
    fn deadline_closes_the_window_once() {
        let mut s = session();
        s.start_training("open", 0).unwrap();
        s.process_hand(&open_left(), 100).unwrap();
        s.process_hand(&observation(open_hand_landmarks(), Handedness::Right), 100).unwrap();

        assert_eq!(s.poll_deadline(3_000), None);
        let done = s.poll_deadline(3_001).unwrap();
        assert_eq!(done.gesture, "open");
        assert_eq!(done.examples_added, 2);
        assert!(!s.is_training());

        assert_eq!(s.poll_deadline(3_002), None);
        assert_eq!(s.poll_deadline(9_000), None);
        assert_eq!(s.store().len(), 2);
        assert_eq!(s.log().len(), 1);
        assert!(matches!(&s.log()[0].event, LogEvent::Trained { gesture, examples: 2 } if gesture == "open"));
    }

    #[test]
    fn progress_tracks_the_window() {
        let mut s = session();
        s.start_training("open", 1_000).unwrap();
        assert_eq!(s.training_progress(1_000), Some(0.0));
        assert_eq!(s.training_progress(2_500), Some(0.5));
        assert_eq!(s.training_progress(5_000), Some(1.0));
        s.poll_deadline(5_000);
        assert_eq!(s.training_progress(5_000), None);
    }

    #[test]
    fn toggle_flips_detection_only() {
        let mut s = session();
        assert!(s.toggle_detecting());
        assert!(!s.is_training());
        assert!(!s.toggle_detecting());
    }

    #[test]
    fn detection_without_examples_yields_nothing() {
        let mut s = session();
        s.toggle_detecting();
        let result = s.process_hand(&open_left(), 0).unwrap();
        assert_eq!(result.prediction, None);
        assert_eq!(result.emitted, None);
        assert!(s.log().is_empty());
    }

    #[test]
    fn identical_detections_are_debounced() {
        let mut s = session();
        s.start_training("open", 0).unwrap();
        s.process_hand(&open_left(), 10).unwrap();
        s.poll_deadline(3_001);
        s.start_training("fist", 4_000).unwrap();
        s.process_hand(&fist_left(), 4_010).unwrap();
        s.poll_deadline(7_001);
        s.clear_log();

        s.toggle_detecting();
        // With one example per label the neighborhood is split evenly, so use k = 1.
        s.classifier = KnnClassifier::new(1);

        let first = s.process_hand(&open_left(), 8_000).unwrap();
        assert!(first.emitted.is_some());
        let second = s.process_hand(&open_left(), 8_033).unwrap();
        assert_eq!(second.emitted, None);
        assert_eq!(second.prediction.unwrap().label.as_str(), "open_left");
        let third = s.process_hand(&fist_left(), 8_066).unwrap();
        assert!(third.emitted.is_some());

        let labels: Vec<String> = s
            .log()
            .iter()
            .map(|e| match &e.event {
                LogEvent::Detected { label, .. } => label.to_string(),
                LogEvent::Trained { gesture, .. } => gesture.clone(),
            })
            .collect();
        assert_eq!(labels, vec!["open_left", "fist_left"]);
    }

    #[test]
    fn low_confidence_is_not_emitted() {
        let mut s = session();
        s.start_training("open", 0).unwrap();
        s.process_hand(&open_left(), 10).unwrap();
        s.poll_deadline(3_001);
        s.start_training("fist", 4_000).unwrap();
        s.process_hand(&fist_left(), 4_010).unwrap();
        s.poll_deadline(7_001);
        s.clear_log();
        s.toggle_detecting();

        // Default k = 10 over two examples gives 0.5 confidence.
        let result = s.process_hand(&open_left(), 8_000).unwrap();
        assert_eq!(result.prediction.unwrap().confidence, 0.5);
        assert_eq!(result.emitted, None);
        assert!(s.log().is_empty());
    }

    #[test]
    fn clear_log_resets_debounce() {
        let mut s = session();
        s.start_training("open", 0).unwrap();
        s.process_hand(&open_left(), 10).unwrap();
        s.poll_deadline(3_001);
        s.toggle_detecting();

        assert!(s.process_hand(&open_left(), 4_000).unwrap().emitted.is_some());
        s.clear_log();
        assert!(s.log().is_empty());
        assert_eq!(s.state().last_emitted_label, None);
        assert!(s.process_hand(&open_left(), 4_033).unwrap().emitted.is_some());
        assert_eq!(s.log().len(), 1);
    }

    #[test]
    fn training_and_detection_share_a_frame() {
        let mut s = session();
        s.toggle_detecting();
        s.start_training("open", 0).unwrap();
        let result = s.process_hand(&open_left(), 10).unwrap();
        assert_eq!(result.trained_label.as_ref().map(|l| l.as_str()), Some("open_left"));
        let prediction = result.prediction.unwrap();
        assert_eq!(prediction.label.as_str(), "open_left");
        assert_eq!(prediction.confidence, 1.0);
    }

    #[test]
    fn degenerate_hand_is_an_error_and_records_nothing() {
        let mut s = session();
        s.start_training("open", 0).unwrap();
        let collapsed = observation([Landmark::new(0.3, 0.3, 0.0); LANDMARK_COUNT], Handedness::Right);
        assert!(matches!(s.process_hand(&collapsed, 10), Err(GestureError::DegenerateInput)));
        assert!(s.store().is_empty());
    }

    #[test]
    fn idle_session_ignores_degenerate_hands() {
        let mut s = session();
        let collapsed = observation([Landmark::default(); LANDMARK_COUNT], Handedness::Left);
        assert!(s.process_hand(&collapsed, 0).is_ok());
    }

    #[test]
    fn log_entries_serialize_flat() {
        let entry = LogEntry {
            timestamp_ms: 42,
            event: LogEvent::Detected { label: "wave_left".into(), confidence: 1.0 },
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "detected");
        assert_eq!(json["label"], "wave_left");
        assert_eq!(json["timestamp_ms"], 42);
    }
}
