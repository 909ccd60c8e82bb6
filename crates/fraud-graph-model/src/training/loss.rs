//! Class-weighted binary cross-entropy on logits.

use candle_core::Tensor;

use crate::error::ModelResult;

/// `BCEWithLogits` with a positive-class weight:
///
/// ```text
/// l = (1 - y) x + (1 + (w - 1) y) (log(1 + e^-|x|) + max(-x, 0))
/// ```
///
/// which equals `-(w y log σ(x) + (1 - y) log(1 - σ(x)))` without overflowing
/// for large `|x|`.
#[derive(Debug, Clone, Copy)]
pub struct WeightedBceLoss {
    pos_weight: f64,
}

impl WeightedBceLoss {
    pub fn new(pos_weight: f64) -> Self {
        Self { pos_weight }
    }

    /// `negatives / positives` over `indices`, or 1.0 when weighting is off
    /// or there are no positives.
    pub fn from_labels(labels: &[bool], indices: &[usize], use_class_weights: bool) -> Self {
        if !use_class_weights {
            return Self::new(1.0);
        }
        let pos = indices.iter().filter(|&&i| labels[i]).count();
        let neg = indices.len() - pos;
        if pos == 0 {
            return Self::new(1.0);
        }
        Self::new(neg as f64 / pos as f64)
    }

    pub fn pos_weight(&self) -> f64 {
        self.pos_weight
    }

    /// Mean loss over all elements of `logits` against 0/1 `targets`.
    pub fn forward(&self, logits: &Tensor, targets: &Tensor) -> ModelResult<Tensor> {
        let softplus = (logits.abs()?.neg()?.exp()? + 1.0)?.log()?;
        let tail = (softplus + logits.neg()?.relu()?)?;
        let log_weight = targets.affine(self.pos_weight - 1.0, 1.0)?;
        let negative_part = targets.affine(-1.0, 1.0)?.mul(logits)?;
        let loss = (negative_part + log_weight.mul(&tail)?)?;
        Ok(loss.mean_all()?)
    }
}
