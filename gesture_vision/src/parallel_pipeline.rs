// THEORY:
// The `parallel_pipeline` runs the gesture engine on its own tokio task so a
// capture loop and a UI can talk to it concurrently without sharing any state.
//
// Key architectural principles:
// 1.  **Single Worker**: one task owns the `GestureSession`. Frames and control
//     requests are queued on an mpsc channel and answered through oneshot replies,
//     so two training writes or predictions never overlap. The queue is the
//     serialization point for the whole session.
// 2.  **Own Clock**: the worker stamps every request with its own monotonic clock
//     (milliseconds since the pipeline started). The training deadline, the frame
//     timestamps and the timer all share that time base.
// 3.  **Timer-Driven Closure**: opening a training window schedules a tick just past
//     the deadline. The tick goes through the same queue as frames and the closure
//     is idempotent, so a tick racing the last frame of a window is harmless.
// 4.  **Fire-and-Forget Saves**: a closed window snapshots the store and hands it to
//     the `ModelWriter`, which writes snapshots one at a time in order. The frame
//     loop never waits for storage; failures are logged. `flush` exists for callers
//     (and tests) that need the write settled.
// 5.  **Off-Runtime Loading**: the persisted model is read on the blocking pool when
//     the worker starts. Requests sent before it finishes simply wait in the queue.

use crate::bus::GestureBus;
use crate::config::SessionConfig;
use crate::core_modules::example_store::ExampleStore;
use crate::core_modules::landmark::{HandFrame, HandObservation};
use crate::core_modules::model_writer::ModelWriter;
use crate::core_modules::persistence::{KeyValueStore, ModelPersistence};
use crate::core_modules::session::{GestureSession, LogEntry, SessionState, TrainingCompleted};
use crate::error::{GestureError, Result};
use crate::pipeline::{FrameAnalysis, Report, analyze_frame};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const BUS_CAPACITY: usize = 64;

/// A point-in-time copy of the worker's session, for UIs and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub log: Vec<LogEntry>,
    pub example_count: usize,
    pub label_count: usize,
    pub now_ms: u64,
}

enum Command {
    Frame(Vec<HandObservation>, oneshot::Sender<FrameAnalysis>),
    StartTraining(String, oneshot::Sender<Result<u64>>),
    ToggleDetecting(oneshot::Sender<bool>),
    ClearLog(oneshot::Sender<()>),
    Tick,
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

#[derive(Clone, Copy)]
struct Clock {
    origin: Instant,
}

impl Clock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

struct Worker {
    session: GestureSession,
    writer: ModelWriter,
    bus: GestureBus,
    clock: Clock,
    /// Used by deadline timers to queue their tick. Weak so that dropping the
    /// last handle still ends the worker.
    timer_sender: mpsc::WeakUnboundedSender<Command>,
}

impl Worker {
    async fn run(mut self, mut task_receiver: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = task_receiver.recv().await {
            let now = self.clock.now_ms();
            match command {
                Command::Frame(hands, reply) => {
                    let completed = self.close_window(now);
                    let frame = HandFrame::new(now, hands);
                    let analysis = analyze_frame(&mut self.session, &frame, completed);
                    if let Report::GestureEvent(data) = &analysis.report {
                        // The closing `Trained` entry was already published by `close_window`.
                        let skip = usize::from(data.training_completed.is_some());
                        for entry in data.new_entries.iter().skip(skip) {
                            self.bus.publish(entry.clone());
                        }
                    }
                    self.bus.set_progress(analysis.training_progress);
                    let _ = reply.send(analysis);
                }
                Command::StartTraining(name, reply) => {
                    self.close_window(now);
                    let result = self.session.start_training(&name, now);
                    if let Ok(deadline) = result {
                        self.schedule_tick(deadline.saturating_sub(now) + 1);
                        self.bus.set_progress(Some(0.0));
                    }
                    let _ = reply.send(result);
                }
                Command::ToggleDetecting(reply) => {
                    let _ = reply.send(self.session.toggle_detecting());
                }
                Command::ClearLog(reply) => {
                    self.session.clear_log();
                    let _ = reply.send(());
                }
                Command::Tick => {
                    self.close_window(now);
                }
                Command::Snapshot(reply) => {
                    let store = self.session.store();
                    let _ = reply.send(SessionSnapshot {
                        state: self.session.state().clone(),
                        log: self.session.log().to_vec(),
                        example_count: store.len(),
                        label_count: store.labels().count(),
                        now_ms: now,
                    });
                }
                Command::Flush(reply) => {
                    self.flush_saves().await;
                    let _ = reply.send(());
                }
                Command::Shutdown => break,
            }
        }

        self.flush_saves().await;
        debug!("Gesture worker stopped");
    }

    /// Closes an elapsed training window, publishes it and queues the save.
    fn close_window(&mut self, now: u64) -> Option<TrainingCompleted> {
        let completed = self.session.poll_deadline(now)?;
        if let Some(entry) = self.session.log().last() {
            self.bus.publish(entry.clone());
        }
        self.bus.set_progress(None);

        if let Err(e) = self.writer.save(self.session.store().clone()) {
            warn!("Failed to queue gesture model save: {e}");
        }
        Some(completed)
    }

    fn schedule_tick(&self, delay_ms: u64) {
        let timer_sender = self.timer_sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            // The worker may be gone by now; nothing left to close then.
            if let Some(task_sender) = timer_sender.upgrade() {
                let _ = task_sender.send(Command::Tick);
            }
        });
    }

    async fn flush_saves(&self) {
        if let Err(e) = self.writer.flush().await {
            warn!("Gesture model writer unavailable: {e}");
        }
    }
}

/// Handle to a gesture engine running on its own task.
pub struct ParallelPipeline {
    task_sender: mpsc::UnboundedSender<Command>,
    worker: JoinHandle<()>,
    bus: GestureBus,
}

impl ParallelPipeline {
    /// Spawns the worker, which restores the persisted model before serving
    /// requests. Must be called from within a tokio runtime.
    pub fn new<K: KeyValueStore + 'static>(config: SessionConfig, kv: K) -> Result<Self> {
        config.validate()?;
        let persistence = Arc::new(ModelPersistence::new(kv, config.storage_key.clone()));
        let writer = ModelWriter::spawn(Arc::clone(&persistence))?;

        let (task_sender, task_receiver) = mpsc::unbounded_channel::<Command>();
        let bus = GestureBus::new(BUS_CAPACITY);
        let worker_bus = bus.clone();
        let timer_sender = task_sender.downgrade();
        let clock = Clock { origin: Instant::now() };

        let worker = tokio::spawn(async move {
            let store = match tokio::task::spawn_blocking(move || persistence.load_or_empty()).await {
                Ok(store) => store,
                Err(e) => {
                    warn!("Gesture model load task failed: {e}");
                    ExampleStore::new()
                }
            };
            info!("Gesture worker ready with {} stored examples", store.len());
            let worker = Worker {
                session: GestureSession::new(config, store),
                writer,
                bus: worker_bus,
                clock,
                timer_sender,
            };
            worker.run(task_receiver).await;
        });

        Ok(Self { task_sender, worker, bus })
    }

    pub fn bus(&self) -> &GestureBus {
        &self.bus
    }

    /// Processes the hands of one frame, stamped with the worker's clock.
    pub async fn process_hands(&self, hands: Vec<HandObservation>) -> Result<FrameAnalysis> {
        self.request(|reply| Command::Frame(hands, reply)).await
    }

    /// Feeds a stream of frames through the worker, one at a time, and returns
    /// how many frames were processed.
    pub async fn drive<S>(&self, frames: S) -> Result<usize>
    where
        S: Stream<Item = Vec<HandObservation>>,
    {
        let mut frames = std::pin::pin!(frames);
        let mut processed = 0;
        while let Some(hands) = frames.next().await {
            self.process_hands(hands).await?;
            processed += 1;
        }
        Ok(processed)
    }

    pub async fn start_training(&self, gesture_name: &str) -> Result<u64> {
        let name = gesture_name.to_string();
        self.request(|reply| Command::StartTraining(name, reply)).await?
    }

    pub async fn toggle_detecting(&self) -> Result<bool> {
        self.request(Command::ToggleDetecting).await
    }

    pub async fn clear_log(&self) -> Result<()> {
        self.request(Command::ClearLog).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.request(Command::Snapshot).await
    }

    /// Waits until every queued save has reached storage.
    pub async fn flush(&self) -> Result<()> {
        self.request(Command::Flush).await
    }

    /// Stops the worker after pending saves complete.
    pub async fn shutdown(self) -> Result<()> {
        self.task_sender
            .send(Command::Shutdown)
            .map_err(|_| GestureError::PipelineClosed)?;
        self.worker.await.map_err(|_| GestureError::PipelineClosed)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply_sender, reply_receiver) = oneshot::channel();
        self.task_sender
            .send(command(reply_sender))
            .map_err(|_| GestureError::PipelineClosed)?;
        reply_receiver.await.map_err(|_| GestureError::PipelineClosed)
    }
}
