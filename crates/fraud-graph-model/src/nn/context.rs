//! Per-forward-pass state: training flag and the dropout RNG.

use candle_core::Tensor;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::ModelResult;

pub struct ForwardContext {
    training: bool,
    rng: ChaCha8Rng,
}

impl ForwardContext {
    pub fn training(seed: u64) -> Self {
        Self {
            training: true,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn eval() -> Self {
        Self {
            training: false,
            rng: ChaCha8Rng::seed_from_u64(0),
        }
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    /// Inverted dropout. Identity outside training or when `p == 0`.
    pub fn dropout(&mut self, x: &Tensor, p: f64) -> ModelResult<Tensor> {
        if !self.training || p <= 0.0 {
            return Ok(x.clone());
        }
        let keep = 1.0 - p;
        let scale = (1.0 / keep) as f32;
        let n = x.elem_count();
        let mask: Vec<f32> = (0..n)
            .map(|_| if self.rng.gen_bool(keep) { scale } else { 0.0 })
            .collect();
        let mask = Tensor::from_vec(mask, x.dims(), x.device())?;
        Ok(x.mul(&mask)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    #[test]
    fn test_eval_dropout_is_identity() {
        let x = Tensor::ones((3, 4), DType::F32, &Device::Cpu).unwrap();
        let y = ForwardContext::eval().dropout(&x, 0.5).unwrap();
        let y: Vec<Vec<f32>> = y.to_vec2().unwrap();
        assert!(y.iter().flatten().all(|v| *v == 1.0));
    }

    #[test]
    fn test_training_dropout_scales_survivors() {
        let x = Tensor::ones((10, 10), DType::F32, &Device::Cpu).unwrap();
        let y = ForwardContext::training(3).dropout(&x, 0.5).unwrap();
        let y: Vec<Vec<f32>> = y.to_vec2().unwrap();
        let values: Vec<f32> = y.into_iter().flatten().collect();
        assert!(values.iter().all(|v| *v == 0.0 || (*v - 2.0).abs() < 1e-6));
        assert!(values.iter().any(|v| *v == 0.0));
        assert!(values.iter().any(|v| *v > 0.0));
    }

    #[test]
    fn test_same_seed_same_mask() {
        let x = Tensor::ones(50, DType::F32, &Device::Cpu).unwrap();
        let a: Vec<f32> = ForwardContext::training(9).dropout(&x, 0.3).unwrap().to_vec1().unwrap();
        let b: Vec<f32> = ForwardContext::training(9).dropout(&x, 0.3).unwrap().to_vec1().unwrap();
        assert_eq!(a, b);
    }
}
