// THEORY:
// The `classifier` module answers "which taught gesture does this hand look like?"
// with a k-nearest-neighbor vote. It owns no data: every prediction is computed
// against the `ExampleStore` it is handed, so freshly trained examples take part in
// the very next prediction.
//
// Key architectural principles:
// 1.  **Distance**: plain Euclidean distance on the 63-dimensional normalized vector.
//     This is the only metric that keeps the normalizer's translation and scale
//     guarantees meaningful.
// 2.  **Neighborhood**: the `k` closest examples (or all of them, when fewer exist)
//     vote. Equal distances are resolved by insertion order, first inserted wins.
// 3.  **Confidence**: the share of the neighborhood belonging to a label. With a
//     single trained label every neighbor agrees and confidence is exactly 1.0.

use crate::config::DEFAULT_K;
use crate::core_modules::example_store::{ExampleStore, GestureLabel};
use crate::core_modules::feature::FeatureVector;
use crate::error::{GestureError, Result};
use std::cmp::Ordering;

/// The outcome of a single k-NN vote.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// The winning label.
    pub label: GestureLabel,
    /// Share of the neighborhood that voted for `label`, in [0, 1].
    pub confidence: f32,
    /// Confidence of every label that received at least one vote, best first.
    pub confidences: Vec<(GestureLabel, f32)>,
}

struct Neighbor<'a> {
    distance_sq: f32,
    /// Position of the example in the store's insertion order.
    rank: usize,
    label: &'a GestureLabel,
}

impl Neighbor<'_> {
    fn closest_first(a: &Self, b: &Self) -> Ordering {
        a.distance_sq.total_cmp(&b.distance_sq).then(a.rank.cmp(&b.rank))
    }
}

#[derive(Debug, Clone)]
pub struct KnnClassifier {
    k: usize,
}

impl Default for KnnClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_K)
    }
}

impl KnnClassifier {
    pub fn new(k: usize) -> Self {
        Self { k: k.max(1) }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Classifies `query` against every example in `store`.
    pub fn predict(&self, query: &FeatureVector, store: &ExampleStore) -> Result<Prediction> {
        if store.is_empty() {
            return Err(GestureError::NoExamples);
        }

        let mut neighbors: Vec<Neighbor<'_>> = store
            .iter_examples()
            .enumerate()
            .map(|(rank, (label, example))| Neighbor {
                distance_sq: query.squared_distance(example),
                rank,
                label,
            })
            .collect();

        let k = self.k.min(neighbors.len());
        if k < neighbors.len() {
            neighbors.select_nth_unstable_by(k - 1, Neighbor::closest_first);
            neighbors.truncate(k);
        }
        neighbors.sort_by(Neighbor::closest_first);

        // Tally in neighbor order so that vote ties go to the label seen nearest first.
        let mut votes: Vec<(&GestureLabel, usize)> = Vec::new();
        for n in &neighbors {
            match votes.iter_mut().find(|(l, _)| *l == n.label) {
                Some((_, count)) => *count += 1,
                None => votes.push((n.label, 1)),
            }
        }
        // Stable sort keeps first-seen order among equal counts.
        votes.sort_by(|a, b| b.1.cmp(&a.1));

        let confidences: Vec<(GestureLabel, f32)> = votes
            .iter()
            .map(|(label, count)| ((*label).clone(), *count as f32 / k as f32))
            .collect();
        let (label, confidence) = confidences[0].clone();

        Ok(Prediction { label, confidence, confidences })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::fixtures::{constant_features, fist_features, open_features};

    #[test]
    fn empty_store_has_no_examples() {
        let store = ExampleStore::new();
        let result = KnnClassifier::default().predict(&open_features(), &store);
        assert!(matches!(result, Err(GestureError::NoExamples)));
    }

    #[test]
    fn single_label_is_always_certain() {
        let mut store = ExampleStore::new();
        for _ in 0..3 {
            store.add("A".into(), open_features()).unwrap();
        }
        let classifier = KnnClassifier::default();
        for query in [open_features(), fist_features(), constant_features(-1.0)] {
            let prediction = classifier.predict(&query, &store).unwrap();
            assert_eq!(prediction.label.as_str(), "A");
            assert_eq!(prediction.confidence, 1.0);
        }
    }

    #[test]
    fn majority_of_neighborhood_wins() {
        let mut store = ExampleStore::new();
        for _ in 0..6 {
            store.add("open_left".into(), open_features()).unwrap();
        }
        for _ in 0..6 {
            store.add("fist_left".into(), fist_features()).unwrap();
        }
        let prediction = KnnClassifier::new(10).predict(&open_features(), &store).unwrap();
        assert_eq!(prediction.label.as_str(), "open_left");
        assert_eq!(prediction.confidence, 0.6);
        assert_eq!(prediction.confidences.len(), 2);
        assert_eq!(prediction.confidences[1].0.as_str(), "fist_left");
        assert_eq!(prediction.confidences[1].1, 0.4);
    }

    #[test]
    fn neighborhood_shrinks_to_available_examples() {
        let mut store = ExampleStore::new();
        store.add("near".into(), constant_features(0.1)).unwrap();
        store.add("far".into(), constant_features(0.9)).unwrap();
        let prediction = KnnClassifier::new(10).predict(&constant_features(0.0), &store).unwrap();
        assert_eq!(prediction.label.as_str(), "near");
        assert_eq!(prediction.confidence, 0.5);
    }

    #[test]
    fn distance_ties_go_to_first_inserted() {
        let mut store = ExampleStore::new();
        store.add("first".into(), constant_features(0.5)).unwrap();
        store.add("second".into(), constant_features(0.5)).unwrap();
        let prediction = KnnClassifier::new(1).predict(&constant_features(0.5), &store).unwrap();
        assert_eq!(prediction.label.as_str(), "first");
        assert_eq!(prediction.confidence, 1.0);
    }

    #[test]
    fn vote_ties_go_to_the_nearest_label() {
        let mut store = ExampleStore::new();
        store.add("far".into(), constant_features(0.4)).unwrap();
        store.add("near".into(), constant_features(0.1)).unwrap();
        let prediction = KnnClassifier::new(2).predict(&constant_features(0.0), &store).unwrap();
        assert_eq!(prediction.label.as_str(), "near");
        assert_eq!(prediction.confidence, 0.5);
    }

    #[test]
    fn neighbor_order_is_total_even_for_nan() {
        let a: GestureLabel = "a".into();
        let mut neighbors = vec![
            Neighbor { distance_sq: f32::NAN, rank: 0, label: &a },
            Neighbor { distance_sq: 2.0, rank: 1, label: &a },
            Neighbor { distance_sq: 1.0, rank: 2, label: &a },
        ];
        neighbors.sort_by(Neighbor::closest_first);
        let ranks: Vec<usize> = neighbors.iter().map(|n| n.rank).collect();
        assert_eq!(ranks, vec![2, 1, 0]);
    }

    #[test]
    fn only_k_neighbors_vote() {
        let mut store = ExampleStore::new();
        for _ in 0..3 {
            store.add("close".into(), constant_features(0.0)).unwrap();
        }
        for _ in 0..5 {
            store.add("distant".into(), constant_features(1.0)).unwrap();
        }
        let prediction = KnnClassifier::new(3).predict(&constant_features(0.0), &store).unwrap();
        assert_eq!(prediction.label.as_str(), "close");
        assert_eq!(prediction.confidence, 1.0);
        assert_eq!(prediction.confidences.len(), 1);
    }
}
