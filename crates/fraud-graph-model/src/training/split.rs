//! Stratified train/validation/test split.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use fraud_graph_core::TrainingConfig;

use crate::error::{ModelError, ModelResult};

/// One of the three split partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    Train,
    Val,
    Test,
}

impl Partition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Train => "train",
            Partition::Val => "val",
            Partition::Test => "test",
        }
    }
}

impl std::fmt::Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Index sets into the labelled node type. Each list is sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSplit {
    pub train: Vec<usize>,
    pub val: Vec<usize>,
    pub test: Vec<usize>,
}

impl DataSplit {
    pub fn len(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every partition with its indices, in train, val, test order.
    pub fn partitions(&self) -> [(Partition, &[usize]); 3] {
        [
            (Partition::Train, self.train.as_slice()),
            (Partition::Val, self.val.as_slice()),
            (Partition::Test, self.test.as_slice()),
        ]
    }

    pub fn indices(&self, partition: Partition) -> &[usize] {
        match partition {
            Partition::Train => &self.train,
            Partition::Val => &self.val,
            Partition::Test => &self.test,
        }
    }

    /// Partition of every index in `0..n`; `None` for indices in no partition.
    pub fn assignment(&self, n: usize) -> Vec<Option<Partition>> {
        let mut out = vec![None; n];
        for (partition, indices) in self.partitions() {
            for &i in indices {
                if let Some(slot) = out.get_mut(i) {
                    *slot = Some(partition);
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SplitRatios {
    pub train: f64,
    pub val: f64,
    pub test: f64,
}

impl SplitRatios {
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self {
            train: config.train_ratio,
            val: config.val_ratio,
            test: config.test_ratio,
        }
    }

    pub fn validate(&self) -> ModelResult<()> {
        for (field, value) in [("train", self.train), ("val", self.val), ("test", self.test)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ModelError::InvalidRatio {
                    field: field.into(),
                    value,
                    message: "must be within [0, 1]".into(),
                });
            }
        }
        let sum = self.train + self.val + self.test;
        if (sum - 1.0).abs() > TrainingConfig::RATIO_TOLERANCE {
            return Err(ModelError::InvalidRatio {
                field: "train+val+test".into(),
                value: sum,
                message: "ratios must sum to 1".into(),
            });
        }
        Ok(())
    }
}

/// Split `labels` per class so each partition keeps the class balance.
///
/// Within a class the indices are shuffled with a ChaCha8 RNG seeded by
/// `seed`; the first `floor(n * train)` go to train, the next
/// `floor(n * val)` to validation and the rest to test. An empty train or
/// validation partition is an error; an empty test partition only warns.
pub fn stratified_split(labels: &[bool], ratios: SplitRatios, seed: u64) -> ModelResult<DataSplit> {
    ratios.validate()?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut split = DataSplit {
        train: Vec::new(),
        val: Vec::new(),
        test: Vec::new(),
    };

    for class in [false, true] {
        let mut indices: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == class)
            .map(|(i, _)| i)
            .collect();
        indices.shuffle(&mut rng);
        let n = indices.len();
        let train_end = share(n, ratios.train);
        let val_end = (train_end + share(n, ratios.val)).min(n);
        split.train.extend_from_slice(&indices[..train_end]);
        split.val.extend_from_slice(&indices[train_end..val_end]);
        split.test.extend_from_slice(&indices[val_end..]);
    }

    split.train.sort_unstable();
    split.val.sort_unstable();
    split.test.sort_unstable();

    if split.train.is_empty() {
        return Err(ModelError::EmptyPartition {
            partition: Partition::Train.to_string(),
        });
    }
    if split.val.is_empty() {
        return Err(ModelError::EmptyPartition {
            partition: Partition::Val.to_string(),
        });
    }
    if split.test.is_empty() {
        warn!("Test partition is empty; test metrics will be zero");
    }

    let positives = |idx: &[usize]| idx.iter().filter(|&&i| labels[i]).count();
    info!(
        train = split.train.len(),
        train_fraud = positives(&split.train),
        val = split.val.len(),
        val_fraud = positives(&split.val),
        test = split.test.len(),
        test_fraud = positives(&split.test),
        "Created stratified split"
    );
    Ok(split)
}

/// `floor(n * ratio)`, tolerant of products like `0.29 * 100 = 28.999..`.
fn share(n: usize, ratio: f64) -> usize {
    ((n as f64 * ratio + 1e-9).floor() as usize).min(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    const DEFAULT: SplitRatios = SplitRatios {
        train: 0.6,
        val: 0.2,
        test: 0.2,
    };

    fn labels(n: usize, fraud_every: usize) -> Vec<bool> {
        (0..n).map(|i| i % fraud_every == 0).collect()
    }

    #[test]
    fn test_partitions_are_disjoint_and_complete() {
        let labels = labels(100, 10);
        let split = stratified_split(&labels, DEFAULT, 42).unwrap();
        let all: BTreeSet<usize> = split
            .train
            .iter()
            .chain(&split.val)
            .chain(&split.test)
            .copied()
            .collect();
        assert_eq!(all.len(), 100);
        assert_eq!(split.len(), 100);
        assert!(split.assignment(100).iter().all(|p| p.is_some()));
    }

    #[test]
    fn test_fraud_rate_preserved() {
        let labels = labels(1000, 20);
        let overall = 0.05;
        let split = stratified_split(&labels, DEFAULT, 7).unwrap();
        for (name, part) in split.partitions() {
            let rate = part.iter().filter(|&&i| labels[i]).count() as f64 / part.len() as f64;
            assert!((rate - overall).abs() < 0.01, "{name}: {rate}");
        }
    }

    #[test]
    fn test_seed_determines_split() {
        let labels = labels(50, 5);
        let a = stratified_split(&labels, DEFAULT, 1).unwrap();
        let b = stratified_split(&labels, DEFAULT, 1).unwrap();
        let c = stratified_split(&labels, DEFAULT, 2).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_bad_ratios_rejected() {
        let labels = labels(10, 2);
        let err = stratified_split(
            &labels,
            SplitRatios {
                train: 0.7,
                val: 0.2,
                test: 0.2,
            },
            0,
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::InvalidRatio { .. }));

        let err = stratified_split(
            &labels,
            SplitRatios {
                train: 1.2,
                val: -0.1,
                test: -0.1,
            },
            0,
        )
        .unwrap_err();
        assert!(matches!(err, ModelError::InvalidRatio { .. }));
    }

    #[test]
    fn test_empty_validation_aborts() {
        let labels = labels(3, 2);
        let err = stratified_split(&labels, DEFAULT, 0).unwrap_err();
        match err {
            ModelError::EmptyPartition { partition } => assert_eq!(partition, "val"),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_empty_test_is_allowed() {
        let labels = labels(20, 5);
        let split = stratified_split(
            &labels,
            SplitRatios {
                train: 0.5,
                val: 0.5,
                test: 0.0,
            },
            0,
        )
        .unwrap();
        assert!(split.test.is_empty());
    }
}
