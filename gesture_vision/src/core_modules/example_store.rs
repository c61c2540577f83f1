// THEORY:
// The `example_store` module is the classifier's dataset: every feature vector the
// user has taught, grouped by `GestureLabel`. It is deliberately append-only. During
// a session examples are only ever added; the only way existing labels change is a
// bulk load from persistence at startup.
//
// Besides grouping by label, the store remembers the global order in which examples
// arrived. The nearest-neighbor search breaks distance ties by that order, so it has
// to survive interleaved training of several labels.

use crate::core_modules::feature::{FEATURE_LEN, FeatureVector};
use crate::core_modules::landmark::Handedness;
use crate::error::{GestureError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Key of the store: gesture name plus handedness, e.g. `wave_left`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GestureLabel(String);

impl GestureLabel {
    pub fn new(gesture_name: &str, handedness: Handedness) -> Self {
        Self(format!("{}_{}", gesture_name, handedness.as_str()))
    }

    /// Wraps a label read back from persisted data.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GestureLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GestureLabel {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

#[derive(Debug, Clone)]
struct ExampleClass {
    label: GestureLabel,
    examples: Vec<FeatureVector>,
}

/// Labeled feature vectors, grouped by gesture label.
#[derive(Debug, Clone, Default)]
pub struct ExampleStore {
    /// Classes in the order their label was first seen.
    classes: Vec<ExampleClass>,
    index: HashMap<GestureLabel, usize>,
    /// `(class, example)` positions in the order the examples arrived.
    insertion_order: Vec<(usize, usize)>,
}

impl ExampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one example under `label`, creating the label if needed.
    pub fn add(&mut self, label: GestureLabel, features: FeatureVector) -> Result<()> {
        check_len(&features)?;
        let class_idx = self.class_index_or_insert(label);
        let class = &mut self.classes[class_idx];
        class.examples.push(features);
        self.insertion_order.push((class_idx, class.examples.len() - 1));
        Ok(())
    }

    /// Installs persisted examples for `label`, replacing whatever the label held.
    pub fn load_bulk(&mut self, label: GestureLabel, vectors: Vec<FeatureVector>) -> Result<()> {
        for v in &vectors {
            check_len(v)?;
        }
        let class_idx = self.class_index_or_insert(label);
        self.insertion_order.retain(|(c, _)| *c != class_idx);
        self.insertion_order
            .extend((0..vectors.len()).map(|example_idx| (class_idx, example_idx)));
        self.classes[class_idx].examples = vectors;
        Ok(())
    }

    /// Read-only snapshot of every label and its examples.
    pub fn all_entries(&self) -> HashMap<GestureLabel, Vec<FeatureVector>> {
        self.classes
            .iter()
            .map(|c| (c.label.clone(), c.examples.clone()))
            .collect()
    }

    /// Labels with their examples, in the order labels were first seen.
    pub fn entries(&self) -> impl Iterator<Item = (&GestureLabel, &[FeatureVector])> {
        self.classes.iter().map(|c| (&c.label, c.examples.as_slice()))
    }

    /// Every example in the order it was added.
    pub fn iter_examples(&self) -> impl Iterator<Item = (&GestureLabel, &FeatureVector)> {
        self.insertion_order.iter().map(|&(c, e)| {
            let class = &self.classes[c];
            (&class.label, &class.examples[e])
        })
    }

    pub fn examples_for(&self, label: &GestureLabel) -> &[FeatureVector] {
        self.index
            .get(label)
            .map(|&i| self.classes[i].examples.as_slice())
            .unwrap_or(&[])
    }

    pub fn count_for(&self, label: &GestureLabel) -> usize {
        self.examples_for(label).len()
    }

    pub fn labels(&self) -> impl Iterator<Item = &GestureLabel> {
        self.classes.iter().map(|c| &c.label)
    }

    /// Total number of stored examples across all labels.
    pub fn len(&self) -> usize {
        self.insertion_order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insertion_order.is_empty()
    }

    fn class_index_or_insert(&mut self, label: GestureLabel) -> usize {
        if let Some(&i) = self.index.get(&label) {
            return i;
        }
        let i = self.classes.len();
        self.index.insert(label.clone(), i);
        self.classes.push(ExampleClass { label, examples: Vec::new() });
        i
    }
}

// `FeatureVector` already guarantees this; the check keeps the store's own
// invariant local and visible.
fn check_len(features: &FeatureVector) -> Result<()> {
    let actual = features.as_slice().len();
    if actual != FEATURE_LEN {
        return Err(GestureError::InvalidVector { expected: FEATURE_LEN, actual });
    }
    Ok(())
}
