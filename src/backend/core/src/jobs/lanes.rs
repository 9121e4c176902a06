//! Lane weighting.
//!
//! Each worker pool is built with a fixed set of lanes and relative weights.
//! Selection uses smooth weighted round-robin: over any window of
//! `sum(weights)` picks, each lane is first in line exactly `weight` times,
//! and the picks are interleaved rather than bursty. The picked lane is tried
//! first, then every other lane in descending weight, so an idle lane never
//! stalls the pool.

use std::collections::BTreeMap;

use crate::error::{Result, VaultError};

/// Relative weights per lane, fixed at worker-pool construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaneWeights {
    /// Sorted by descending weight, then name
    lanes: Vec<(String, u32)>,
}

impl LaneWeights {
    /// Build from a lane to weight map. Zero weights and empty maps are rejected.
    pub fn from_map(map: &BTreeMap<String, u32>) -> Result<Self> {
        if map.is_empty() {
            return Err(VaultError::configuration("at least one lane is required"));
        }
        let mut lanes = Vec::with_capacity(map.len());
        for (name, weight) in map {
            if *weight == 0 {
                return Err(VaultError::configuration(format!(
                    "lane '{}' has weight 0",
                    name
                )));
            }
            lanes.push((name.clone(), *weight));
        }
        lanes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(Self { lanes })
    }

    /// A single lane.
    pub fn single(name: impl Into<String>) -> Self {
        Self {
            lanes: vec![(name.into(), 1)],
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.lanes.iter().map(|(name, _)| name.as_str())
    }

    pub fn weight(&self, lane: &str) -> Option<u32> {
        self.lanes
            .iter()
            .find(|(name, _)| name == lane)
            .map(|(_, weight)| *weight)
    }

    pub fn len(&self) -> usize {
        self.lanes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }
}

impl Default for LaneWeights {
    /// `critical`=6, `default`=3, `low`=1.
    fn default() -> Self {
        Self {
            lanes: vec![
                ("critical".to_string(), 6),
                ("default".to_string(), 3),
                ("low".to_string(), 1),
            ],
        }
    }
}

/// Stateful smooth weighted round-robin over a [`LaneWeights`] set.
#[derive(Debug, Clone)]
pub struct LaneSelector {
    weights: LaneWeights,
    current: Vec<i64>,
    total: i64,
}

impl LaneSelector {
    pub fn new(weights: LaneWeights) -> Self {
        let total = weights.lanes.iter().map(|(_, w)| *w as i64).sum();
        let current = vec![0; weights.lanes.len()];
        Self {
            weights,
            current,
            total,
        }
    }

    /// Advance the round and return the lanes in the order they should be polled.
    pub fn next_order(&mut self) -> Vec<String> {
        let mut best = 0;
        for (i, (_, weight)) in self.weights.lanes.iter().enumerate() {
            self.current[i] += *weight as i64;
            if self.current[i] > self.current[best] {
                best = i;
            }
        }
        self.current[best] -= self.total;

        let mut order = Vec::with_capacity(self.weights.lanes.len());
        order.push(self.weights.lanes[best].0.clone());
        order.extend(
            self.weights
                .lanes
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != best)
                .map(|(_, (name, _))| name.clone()),
        );
        order
    }

    pub fn weights(&self) -> &LaneWeights {
        &self.weights
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_pick_critical_first() {
        let mut selector = LaneSelector::new(LaneWeights::default());
        assert_eq!(selector.next_order(), vec!["critical", "default", "low"]);
    }

    #[test]
    fn test_first_choice_distribution_matches_weights() {
        let mut selector = LaneSelector::new(LaneWeights::default());
        let mut firsts: BTreeMap<String, u32> = BTreeMap::new();
        for _ in 0..100 {
            let first = selector.next_order().swap_remove(0);
            *firsts.entry(first).or_default() += 1;
        }
        assert_eq!(firsts["critical"], 60);
        assert_eq!(firsts["default"], 30);
        assert_eq!(firsts["low"], 10);
    }

    #[test]
    fn test_every_lane_appears_in_every_order() {
        let mut selector = LaneSelector::new(LaneWeights::default());
        for _ in 0..20 {
            let mut order = selector.next_order();
            order.sort_unstable();
            assert_eq!(order, vec!["critical", "default", "low"]);
        }
    }

    #[test]
    fn test_from_map_sorts_and_validates() {
        let map = BTreeMap::from([("a".to_string(), 1), ("b".to_string(), 5)]);
        let weights = LaneWeights::from_map(&map).unwrap();
        assert_eq!(weights.names().collect::<Vec<_>>(), vec!["b", "a"]);
        assert_eq!(weights.weight("a"), Some(1));

        let bad = BTreeMap::from([("a".to_string(), 0)]);
        assert!(LaneWeights::from_map(&bad).is_err());
        assert!(LaneWeights::from_map(&BTreeMap::new()).is_err());
    }
}
