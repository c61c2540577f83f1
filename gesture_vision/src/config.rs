// THEORY:
// `SessionConfig` gathers the tunable constants of the learning pipeline, in the
// same spirit as a pipeline config handed to the engine at construction time.
// Defaults reproduce the reference behavior: a 3 second training window, a 0.9
// confidence gate, ten neighbors and the `gestureModel` storage key.
//
// Values can come from a JSON file and be overridden by `GV_*` environment
// variables, so the replay tester and embedding applications share one path.

use crate::error::{GestureError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_TRAINING_WINDOW_MS: u64 = 3000;
pub const DEFAULT_DETECTION_THRESHOLD: f32 = 0.9;
pub const DEFAULT_K: usize = 10;
pub const DEFAULT_STORAGE_KEY: &str = "gestureModel";

/// Configuration for the gesture session, allowing for tunable behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Length of a training window in milliseconds.
    pub training_window_ms: u64,
    /// A prediction must be strictly above this confidence to be emitted.
    pub detection_threshold: f32,
    /// Number of neighbors that vote in the classifier.
    pub k: usize,
    /// Key under which the example store is persisted.
    pub storage_key: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            training_window_ms: DEFAULT_TRAINING_WINDOW_MS,
            detection_threshold: DEFAULT_DETECTION_THRESHOLD,
            k: DEFAULT_K,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
        }
    }
}

impl SessionConfig {
    /// Reads a JSON config file. Missing fields fall back to their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: SessionConfig = serde_json::from_str(&raw)
            .map_err(|e| GestureError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Applies `GV_*` environment overrides on top of `self`.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides from an arbitrary variable lookup.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(v) = lookup("GV_TRAINING_WINDOW_MS") {
            self.training_window_ms = parse_var("GV_TRAINING_WINDOW_MS", &v)?;
        }
        if let Some(v) = lookup("GV_DETECTION_THRESHOLD") {
            self.detection_threshold = parse_var("GV_DETECTION_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("GV_K") {
            self.k = parse_var("GV_K", &v)?;
        }
        if let Some(v) = lookup("GV_STORAGE_KEY") {
            if !v.is_empty() {
                self.storage_key = v;
            }
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.training_window_ms == 0 {
            return Err(GestureError::InvalidConfig("training_window_ms must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.detection_threshold) {
            return Err(GestureError::InvalidConfig(
                "detection_threshold must lie in [0, 1]".into(),
            ));
        }
        if self.k == 0 {
            return Err(GestureError::InvalidConfig("k must be at least 1".into()));
        }
        if self.storage_key.trim().is_empty() {
            return Err(GestureError::InvalidConfig("storage_key must not be empty".into()));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| GestureError::InvalidConfig(format!("{name}={value} is not a valid value")))
}
