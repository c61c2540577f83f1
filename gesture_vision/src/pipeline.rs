// THEORY:
// The `pipeline` module is the top-level, caller-driven API of the gesture engine.
// It wires the session state machine to persistence: the model is loaded once at
// construction, and every closed training window is handed to a background
// `ModelWriter`, so the frame that closes a window never waits for storage.
//
// The caller owns the frame loop and the clock. It hands over one `HandFrame` at a
// time and calls `tick` from its timer so a training window also closes when no
// hands are visible. Each frame is processed to completion before the call returns;
// hands within a frame are handled in the order the tracker listed them. A problem
// with one hand (a degenerate skeleton, say) is logged and skipped, and the rest of
// the frame and all later frames carry on.

use crate::config::SessionConfig;
use crate::core_modules::example_store::ExampleStore;
use crate::core_modules::landmark::HandFrame;
use crate::core_modules::model_writer::ModelWriter;
use crate::core_modules::persistence::{KeyValueStore, ModelPersistence};
use crate::core_modules::session::{GestureSession, HandResult, LogEntry, TrainingCompleted};
use crate::error::{GestureError, Result};
use std::sync::Arc;
use tracing::{debug, error, warn};

// Re-export key data structures for the public API.
pub use crate::core_modules::classifier::Prediction;
pub use crate::core_modules::example_store::GestureLabel;
pub use crate::core_modules::landmark::{HandObservation, Handedness, Landmark};
pub use crate::core_modules::session::{LogEvent, SessionState};

/// The detailed data package for a frame that changed the output log.
#[derive(Debug, Clone, PartialEq)]
pub struct EventData {
    /// Log entries appended while processing this frame, oldest first.
    pub new_entries: Vec<LogEntry>,
    /// Set when this frame closed a training window.
    pub training_completed: Option<TrainingCompleted>,
}

/// Whether a frame produced anything the UI should show.
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    NoGestureEvent,
    GestureEvent(EventData),
}

/// The full result of processing one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameAnalysis {
    pub timestamp_ms: u64,
    pub report: Report,
    /// One entry per hand that was processed, in tracker order.
    pub hands: Vec<HandResult>,
    /// Hands dropped because they could not be normalized.
    pub skipped_hands: usize,
    pub training_progress: Option<f32>,
}

/// The main, top-level struct for the gesture engine.
pub struct GesturePipeline<K: KeyValueStore + 'static> {
    session: GestureSession,
    persistence: Arc<ModelPersistence<K>>,
    writer: ModelWriter,
}

impl<K: KeyValueStore + 'static> GesturePipeline<K> {
    /// Builds the pipeline and restores the persisted model, falling back to an
    /// empty one when nothing usable is stored.
    pub fn new(config: SessionConfig, kv: K) -> Result<Self> {
        config.validate()?;
        let persistence = ModelPersistence::new(kv, config.storage_key.clone());
        let store = persistence.load_or_empty();
        Self::assemble(config, persistence, store)
    }

    /// Builds the pipeline around an already populated store without touching storage.
    pub fn with_store(config: SessionConfig, kv: K, store: ExampleStore) -> Result<Self> {
        config.validate()?;
        let persistence = ModelPersistence::new(kv, config.storage_key.clone());
        Self::assemble(config, persistence, store)
    }

    fn assemble(config: SessionConfig, persistence: ModelPersistence<K>, store: ExampleStore) -> Result<Self> {
        let persistence = Arc::new(persistence);
        let writer = ModelWriter::spawn(Arc::clone(&persistence))?;
        Ok(Self { session: GestureSession::new(config, store), persistence, writer })
    }

    pub fn start_training(&mut self, gesture_name: &str, now_ms: u64) -> Result<u64> {
        // A window that already elapsed must close (and persist) before a new one opens.
        self.tick(now_ms);
        self.session.start_training(gesture_name, now_ms)
    }

    pub fn toggle_detecting(&mut self) -> bool {
        self.session.toggle_detecting()
    }

    pub fn clear_log(&mut self) {
        self.session.clear_log();
    }

    /// Timer hook. Closes an elapsed training window and queues the store for
    /// writing. Safe to call at any rate; only the first call past the deadline
    /// does work.
    pub fn tick(&mut self, now_ms: u64) -> Option<TrainingCompleted> {
        let completed = self.session.poll_deadline(now_ms)?;
        self.persist();
        Some(completed)
    }

    pub fn process_frame(&mut self, frame: &HandFrame) -> FrameAnalysis {
        let training_completed = self.tick(frame.timestamp_ms);
        analyze_frame(&mut self.session, frame, training_completed)
    }

    /// Convenience wrapper for callers that only care about new log lines.
    pub fn gesture_event_detected(&mut self, frame: &HandFrame) -> bool {
        matches!(self.process_frame(frame).report, Report::GestureEvent(_))
    }

    /// Writes the current store on the calling thread and reports the outcome.
    pub fn save(&self) -> Result<()> {
        self.persistence.save(self.session.store())
    }

    /// Blocks until every queued background save has reached storage.
    pub fn flush(&self) -> Result<()> {
        self.writer.flush_blocking()
    }

    fn persist(&self) {
        if let Err(e) = self.writer.save(self.session.store().clone()) {
            warn!("Failed to queue gesture model save: {e}");
        }
    }

    pub fn training_progress(&self, now_ms: u64) -> Option<f32> {
        self.session.training_progress(now_ms)
    }

    pub fn log(&self) -> &[LogEntry] {
        self.session.log()
    }

    pub fn state(&self) -> &SessionState {
        self.session.state()
    }

    pub fn store(&self) -> &ExampleStore {
        self.session.store()
    }

    pub fn persistence(&self) -> &ModelPersistence<K> {
        &self.persistence
    }
}

/// Runs every hand of `frame` through the session. `training_completed` is the
/// window closure the caller already handled for this frame's timestamp.
pub(crate) fn analyze_frame(
    session: &mut GestureSession,
    frame: &HandFrame,
    training_completed: Option<TrainingCompleted>,
) -> FrameAnalysis {
    let now = frame.timestamp_ms;
    let mut new_entries = Vec::new();
    if training_completed.is_some() {
        new_entries.extend(session.log().last().cloned());
    }

    let mut hands = Vec::with_capacity(frame.hands.len());
    let mut skipped_hands = 0;
    for hand in &frame.hands {
        match session.process_hand(hand, now) {
            Ok(result) => {
                new_entries.extend(result.emitted.clone());
                hands.push(result);
            }
            Err(e) => {
                skipped_hands += 1;
                report_skipped_hand(&e, now);
            }
        }
    }

    let report = if new_entries.is_empty() && training_completed.is_none() {
        Report::NoGestureEvent
    } else {
        Report::GestureEvent(EventData { new_entries, training_completed })
    };

    FrameAnalysis {
        timestamp_ms: now,
        report,
        hands,
        skipped_hands,
        training_progress: session.training_progress(now),
    }
}

fn report_skipped_hand(e: &GestureError, now_ms: u64) {
    match e {
        GestureError::InvalidVector { .. } => {
            error!("Normalizer produced a malformed feature vector at t={now_ms}ms: {e}");
            debug_assert!(false, "normalizer produced a malformed feature vector: {e}");
        }
        e if e.is_frame_local() => debug!("Skipping hand at t={now_ms}ms: {e}"),
        e => warn!("Skipping hand at t={now_ms}ms: {e}"),
    }
}
