// THEORY:
// The `model_writer` keeps storage I/O off the frame path. Both pipelines hand it a
// snapshot of the `ExampleStore` whenever a training window closes and return to
// the next frame immediately; a single dedicated thread performs the writes.
//
// Key architectural principles:
// 1.  **One Writer**: every save goes through the same thread, strictly in the
//     order it was requested. An older snapshot can never land after a newer one.
// 2.  **Latest Wins**: snapshots that queue up behind a slow write are collapsed,
//     only the newest is written. Snapshots only ever grow, so nothing is lost.
// 3.  **Flush Barrier**: `flush` (or `flush_blocking` outside async code) returns
//     once every snapshot queued before it has reached storage. Dropping the writer
//     drains the queue before the thread exits.

use crate::core_modules::example_store::ExampleStore;
use crate::core_modules::persistence::{KeyValueStore, ModelPersistence};
use crate::error::{GestureError, Result};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

enum WriteRequest {
    Save(ExampleStore),
    Flush(oneshot::Sender<()>),
}

/// Background writer for persisted gesture models.
pub struct ModelWriter {
    request_sender: Option<mpsc::UnboundedSender<WriteRequest>>,
    thread: Option<JoinHandle<()>>,
}

impl ModelWriter {
    pub fn spawn<K: KeyValueStore + 'static>(persistence: Arc<ModelPersistence<K>>) -> Result<Self> {
        let (request_sender, request_receiver) = mpsc::unbounded_channel();
        let thread = std::thread::Builder::new()
            .name("gesture-model-writer".into())
            .spawn(move || write_loop(&persistence, request_receiver))?;
        Ok(Self { request_sender: Some(request_sender), thread: Some(thread) })
    }

    /// Queues `store` for writing. Never waits for storage.
    pub fn save(&self, store: ExampleStore) -> Result<()> {
        self.send(WriteRequest::Save(store))
    }

    /// Waits for every queued save from async code.
    pub async fn flush(&self) -> Result<()> {
        let (done_sender, done_receiver) = oneshot::channel();
        self.send(WriteRequest::Flush(done_sender))?;
        done_receiver.await.map_err(|_| GestureError::WriterClosed)
    }

    /// Waits for every queued save. Must not be called from inside an async task.
    pub fn flush_blocking(&self) -> Result<()> {
        let (done_sender, done_receiver) = oneshot::channel();
        self.send(WriteRequest::Flush(done_sender))?;
        done_receiver.blocking_recv().map_err(|_| GestureError::WriterClosed)
    }

    fn send(&self, request: WriteRequest) -> Result<()> {
        self.request_sender
            .as_ref()
            .ok_or(GestureError::WriterClosed)?
            .send(request)
            .map_err(|_| GestureError::WriterClosed)
    }
}

impl Drop for ModelWriter {
    fn drop(&mut self) {
        // Closing the channel lets the thread drain what is queued and exit.
        self.request_sender.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Gesture model writer thread panicked");
            }
        }
    }
}

fn write_loop<K: KeyValueStore>(
    persistence: &ModelPersistence<K>,
    mut request_receiver: mpsc::UnboundedReceiver<WriteRequest>,
) {
    while let Some(request) = request_receiver.blocking_recv() {
        let mut latest = None;
        let mut waiters = Vec::new();
        let mut absorb = |request: WriteRequest| match request {
            WriteRequest::Save(store) => latest = Some(store),
            WriteRequest::Flush(done) => waiters.push(done),
        };
        absorb(request);
        while let Ok(queued) = request_receiver.try_recv() {
            absorb(queued);
        }

        if let Some(store) = latest {
            if let Err(e) = persistence.save(&store) {
                warn!("Failed to persist gesture model: {e}");
            }
        }
        for done in waiters {
            let _ = done.send(());
        }
    }
    debug!("Gesture model writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::fixtures::{constant_features, open_features};
    use crate::core_modules::persistence::MemoryStore;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    /// Memory store whose first write is slow; every write is recorded in order.
    #[derive(Default)]
    struct SlowFirstStore {
        inner: MemoryStore,
        writes: AtomicUsize,
        written: Mutex<Vec<String>>,
    }

    impl KeyValueStore for SlowFirstStore {
        fn get(&self, key: &str) -> Result<Option<String>> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<()> {
            if self.writes.fetch_add(1, Ordering::SeqCst) == 0 {
                std::thread::sleep(Duration::from_millis(300));
            }
            self.written.lock().unwrap().push(value.to_string());
            self.inner.set(key, value)
        }
    }

    fn store_with(count: usize) -> ExampleStore {
        let mut store = ExampleStore::new();
        for i in 0..count {
            store.add("a_left".into(), constant_features(i as f32 / 64.0)).unwrap();
        }
        store
    }

    #[test]
    fn save_returns_before_the_write_finishes() {
        let kv = Arc::new(SlowFirstStore::default());
        let persistence = Arc::new(ModelPersistence::new(kv.clone(), "model"));
        let writer = ModelWriter::spawn(Arc::clone(&persistence)).unwrap();

        let started = Instant::now();
        writer.save(store_with(1)).unwrap();
        assert!(started.elapsed() < Duration::from_millis(150));

        writer.flush_blocking().unwrap();
        assert_eq!(persistence.load().unwrap().len(), 1);
    }

    #[test]
    fn newer_snapshot_is_never_overwritten_by_an_older_one() {
        let kv = Arc::new(SlowFirstStore::default());
        let persistence = Arc::new(ModelPersistence::new(kv.clone(), "model"));
        let writer = ModelWriter::spawn(Arc::clone(&persistence)).unwrap();

        writer.save(store_with(1)).unwrap();
        writer.save(store_with(2)).unwrap();
        writer.save(store_with(3)).unwrap();
        writer.flush_blocking().unwrap();

        assert_eq!(persistence.load().unwrap().len(), 3);
        // The first write was in flight; the two queued behind it collapse into one.
        assert!(kv.written.lock().unwrap().len() <= 3);
    }

    #[test]
    fn dropping_the_writer_drains_the_queue() {
        let kv = Arc::new(SlowFirstStore::default());
        let persistence = Arc::new(ModelPersistence::new(kv.clone(), "model"));
        let writer = ModelWriter::spawn(Arc::clone(&persistence)).unwrap();
        let mut store = ExampleStore::new();
        store.add("open_left".into(), open_features()).unwrap();
        writer.save(store).unwrap();
        drop(writer);

        assert_eq!(persistence.load().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn async_flush_waits_for_storage() {
        let kv = Arc::new(SlowFirstStore::default());
        let persistence = Arc::new(ModelPersistence::new(kv.clone(), "model"));
        let writer = ModelWriter::spawn(Arc::clone(&persistence)).unwrap();
        writer.save(store_with(2)).unwrap();
        writer.flush().await.unwrap();
        assert_eq!(persistence.load().unwrap().len(), 2);
    }
}
