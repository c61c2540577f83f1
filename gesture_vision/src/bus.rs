// THEORY:
// The `GestureBus` is the output surface towards the UI collaborator when the
// pipeline runs on its own task. Log entries fan out over a broadcast channel so
// any number of views can follow the detection log; the training progress is a
// `watch` value because a progress bar only ever cares about the latest fraction.
//
// Slow subscribers lag instead of blocking the frame loop: publishing never waits.

use crate::core_modules::session::LogEntry;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Fan-out channels from the pipeline worker to any number of UI listeners.
#[derive(Clone)]
pub struct GestureBus {
    pub log_tx: broadcast::Sender<LogEntry>,
    /// `None` while no training window is open.
    pub progress_tx: Arc<watch::Sender<Option<f32>>>,
}

impl GestureBus {
    pub fn new(capacity: usize) -> Self {
        let (log_tx, _) = broadcast::channel::<LogEntry>(capacity.max(1));
        let (progress_tx, _) = watch::channel::<Option<f32>>(None);
        Self { log_tx, progress_tx: Arc::new(progress_tx) }
    }

    pub fn subscribe_log(&self) -> broadcast::Receiver<LogEntry> {
        self.log_tx.subscribe()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<Option<f32>> {
        self.progress_tx.subscribe()
    }

    /// Publishes a log entry. Having no subscribers is not an error.
    pub fn publish(&self, entry: LogEntry) {
        let _ = self.log_tx.send(entry);
    }

    pub fn set_progress(&self, progress: Option<f32>) {
        self.progress_tx.send_replace(progress);
    }
}
