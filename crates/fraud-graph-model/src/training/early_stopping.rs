//! Stopping rules for the epoch loop.

use serde::{Deserialize, Serialize};

/// Outcome of one [`EarlyStopping::update`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopDecision {
    /// The score is a new best (always true for the first score).
    pub improved: bool,
    /// `patience` scores in a row failed to improve on the best.
    pub stop: bool,
}

/// Patience-based stopping on a score to maximize.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    min_delta: f64,
    best: Option<f64>,
    best_epoch: usize,
    counter: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_delta: f64) -> Self {
        Self {
            patience,
            min_delta,
            best: None,
            best_epoch: 0,
            counter: 0,
        }
    }

    /// Continue from a checkpointed best: later scores must beat `score`
    /// to count as an improvement.
    pub fn resumed(patience: usize, min_delta: f64, epoch: usize, score: f64) -> Self {
        Self {
            best: Some(score),
            best_epoch: epoch,
            ..Self::new(patience, min_delta)
        }
    }

    /// Record `score` for `epoch`. A score improves when it exceeds the best
    /// by more than `min_delta`.
    pub fn update(&mut self, epoch: usize, score: f64) -> StopDecision {
        let improved = match self.best {
            None => true,
            Some(best) => score > best + self.min_delta,
        };
        if improved {
            self.best = Some(score);
            self.best_epoch = epoch;
            self.counter = 0;
        } else {
            self.counter += 1;
        }
        StopDecision {
            improved,
            stop: !improved && self.counter >= self.patience,
        }
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    pub fn best_epoch(&self) -> usize {
        self.best_epoch
    }
}

/// Flags convergence once the training loss changes by less than the
/// tolerance between consecutive epochs. Disabled without a tolerance.
#[derive(Debug, Clone)]
pub struct ConvergenceCheck {
    tolerance: Option<f64>,
    previous: Option<f64>,
}

impl ConvergenceCheck {
    pub fn new(tolerance: Option<f64>) -> Self {
        Self {
            tolerance,
            previous: None,
        }
    }

    pub fn update(&mut self, loss: f64) -> bool {
        let converged = match (self.tolerance, self.previous) {
            (Some(tol), Some(prev)) => (loss - prev).abs() < tol,
            _ => false,
        };
        self.previous = Some(loss);
        converged
    }
}

/// Why the epoch loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Converged,
    EarlyStopped,
    MaxEpochsReached,
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Feed `scores` (epochs from 1) and return the epoch that stopped, if any.
    fn run(stopper: &mut EarlyStopping, scores: &[f64]) -> Option<usize> {
        for (i, score) in scores.iter().enumerate() {
            if stopper.update(i + 1, *score).stop {
                return Some(i + 1);
            }
        }
        None
    }

    #[test]
    fn test_halts_patience_epochs_after_best() {
        let mut stopper = EarlyStopping::new(3, 0.001);
        let scores = [0.2, 0.5, 0.6, 0.55, 0.6005, 0.58, 0.9];
        let stopped = run(&mut stopper, &scores);
        assert_eq!(stopper.best_epoch(), 3);
        assert_eq!(stopped, Some(3 + 3));
        assert_eq!(stopper.best(), Some(0.6));
    }

    #[test]
    fn test_first_epoch_sets_best() {
        let mut stopper = EarlyStopping::new(2, 0.0);
        let decision = stopper.update(1, 0.0);
        assert!(decision.improved);
        assert!(!decision.stop);
        assert_eq!(stopper.best_epoch(), 1);
    }

    #[test]
    fn test_improvement_resets_counter() {
        let mut stopper = EarlyStopping::new(2, 0.0);
        let scores = [0.1, 0.1, 0.2, 0.2, 0.3, 0.3];
        assert_eq!(run(&mut stopper, &scores), None);
        assert_eq!(stopper.best_epoch(), 5);
    }

    #[test]
    fn test_resumed_best_must_be_beaten() {
        let mut stopper = EarlyStopping::resumed(2, 0.0, 10, 0.8);
        let first = stopper.update(11, 0.7);
        assert!(!first.improved);
        assert!(stopper.update(12, 0.8).stop);
        assert_eq!(stopper.best_epoch(), 10);
        assert_eq!(stopper.best(), Some(0.8));

        let mut stopper = EarlyStopping::resumed(2, 0.0, 10, 0.8);
        assert!(stopper.update(11, 0.9).improved);
        assert_eq!(stopper.best_epoch(), 11);
    }

    #[test]
    fn test_convergence_needs_tolerance() {
        let mut off = ConvergenceCheck::new(None);
        assert!(!off.update(1.0));
        assert!(!off.update(1.0));

        let mut on = ConvergenceCheck::new(Some(1e-3));
        assert!(!on.update(0.5));
        assert!(!on.update(0.4));
        assert!(on.update(0.4005));
    }
}
