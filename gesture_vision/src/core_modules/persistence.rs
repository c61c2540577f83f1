// THEORY:
// The `persistence` module is the Persistence Adapter. It turns the `ExampleStore`
// into one serialized record kept under a fixed key of a durable key-value store,
// and rebuilds the store from it at startup.
//
// Key architectural principles:
// 1.  **Storage Seam**: the actual medium is hidden behind `KeyValueStore`. The
//     crate ships an in-memory map and a directory of JSON files; embedding
//     applications can plug in anything that can get and set a string.
// 2.  **Flat Layout**: every label is written as a flat array of `63 * count`
//     numbers plus `count`, so a reader can reshape it without knowing anything
//     else. Labels are written in the order they were first trained and read back
//     in document order, which keeps neighbor tie-breaking stable across restarts.
// 3.  **Shape Validation**: a record whose array cannot be reshaped into 63-wide
//     rows is reported as `CorruptModel`. Startup uses `load_or_empty`, which logs
//     the problem and carries on with an empty store instead of failing.

use crate::core_modules::example_store::{ExampleStore, GestureLabel};
use crate::core_modules::feature::{FEATURE_LEN, FeatureVector};
use crate::error::{GestureError, Result};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// Durable string storage addressed by key.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

impl<K: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<K> {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }
}

/// Process-local storage. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| GestureError::Storage(io::Error::other("memory store lock poisoned")))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// Distinguishes temporary files of concurrent writes to the same key.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// One `<key>.json` file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let valid = !key.is_empty()
            && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
            && !key.starts_with('.');
        if !valid {
            return Err(GestureError::InvalidConfig(format!("'{key}' is not a usable storage key")));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;
        std::fs::create_dir_all(&self.dir)?;
        // Write-then-rename so a crash never leaves a half-written model behind.
        let write_id = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("json.{}.{write_id}.tmp", std::process::id()));
        std::fs::write(&tmp, value)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

/// Serialized examples of one label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
enum LabelRecord {
    Shaped { data: Vec<f32>, count: usize },
    /// Bare array without a count, as written by older front ends.
    Flat(Vec<f32>),
}

impl LabelRecord {
    fn into_vectors(self, label: &str) -> Result<Vec<FeatureVector>> {
        let (data, count) = match self {
            LabelRecord::Shaped { data, count } => (data, Some(count)),
            LabelRecord::Flat(data) => (data, None),
        };
        if data.len() % FEATURE_LEN != 0 {
            return Err(GestureError::CorruptModel(format!(
                "label '{label}' holds {} values, not a multiple of {FEATURE_LEN}",
                data.len()
            )));
        }
        let rows = data.len() / FEATURE_LEN;
        if let Some(count) = count {
            if count != rows {
                return Err(GestureError::CorruptModel(format!(
                    "label '{label}' declares {count} examples but holds {rows}"
                )));
            }
        }
        data.chunks_exact(FEATURE_LEN)
            .map(|row| {
                FeatureVector::from_slice(row)
                    .map_err(|e| GestureError::CorruptModel(format!("label '{label}': {e}")))
            })
            .collect()
    }
}

/// The whole persisted model. Labels keep their document order in both directions.
#[derive(Debug, Clone, PartialEq, Default)]
struct ModelRecord(Vec<(String, LabelRecord)>);

impl ModelRecord {
    fn from_store(store: &ExampleStore) -> Self {
        Self(
            store
                .entries()
                .map(|(label, examples)| {
                    let data: Vec<f32> = examples.iter().flat_map(|v| v.as_slice().iter().copied()).collect();
                    (label.to_string(), LabelRecord::Shaped { data, count: examples.len() })
                })
                .collect(),
        )
    }

    fn into_store(self) -> Result<ExampleStore> {
        let mut store = ExampleStore::new();
        for (label, record) in self.0 {
            let vectors = record.into_vectors(&label)?;
            if vectors.is_empty() {
                continue;
            }
            store.load_bulk(GestureLabel::from_raw(label), vectors)?;
        }
        Ok(store)
    }
}

impl Serialize for ModelRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (label, record) in &self.0 {
            map.serialize_entry(label, record)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ModelRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct RecordVisitor;

        impl<'de> Visitor<'de> for RecordVisitor {
            type Value = ModelRecord;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map from gesture label to example data")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((label, record)) = access.next_entry::<String, LabelRecord>()? {
                    entries.push((label, record));
                }
                Ok(ModelRecord(entries))
            }
        }

        deserializer.deserialize_map(RecordVisitor)
    }
}

/// Saves and restores the example store under a fixed key.
#[derive(Debug, Clone)]
pub struct ModelPersistence<K> {
    kv: K,
    key: String,
}

impl<K: KeyValueStore> ModelPersistence<K> {
    pub fn new(kv: K, key: impl Into<String>) -> Self {
        Self { kv, key: key.into() }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn backend(&self) -> &K {
        &self.kv
    }

    pub fn save(&self, store: &ExampleStore) -> Result<()> {
        let record = ModelRecord::from_store(store);
        let json = serde_json::to_string(&record).map_err(|e| GestureError::Storage(io::Error::other(e)))?;
        self.kv.set(&self.key, &json)?;
        info!("Saved {} examples across {} labels under '{}'", store.len(), record.0.len(), self.key);
        Ok(())
    }

    /// Reads the model back. A missing key yields an empty store.
    pub fn load(&self) -> Result<ExampleStore> {
        let Some(raw) = self.kv.get(&self.key)? else {
            debug!("No persisted model under '{}'", self.key);
            return Ok(ExampleStore::new());
        };
        let record: ModelRecord =
            serde_json::from_str(&raw).map_err(|e| GestureError::CorruptModel(e.to_string()))?;
        record.into_store()
    }

    /// Startup helper: any failure is logged and replaced by an empty store.
    pub fn load_or_empty(&self) -> ExampleStore {
        match self.load() {
            Ok(store) => {
                info!("Loaded {} examples across {} labels", store.len(), store.labels().count());
                store
            }
            Err(e) => {
                warn!("Falling back to an empty gesture model: {e}");
                ExampleStore::new()
            }
        }
    }
}
