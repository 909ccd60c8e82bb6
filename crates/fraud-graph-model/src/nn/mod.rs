//! Tensor building blocks shared by the encoders and the classifier.

mod batch_norm;
mod context;
mod linear;
mod params;

pub use batch_norm::BatchNorm;
pub use context::ForwardContext;
pub use linear::Linear;
pub use params::{ParamStore, TensorLookup};

use candle_core::Tensor;

use crate::error::ModelResult;

/// Row-wise L2 normalization, `x / max(||x||, 1e-12)`.
pub fn l2_normalize_rows(x: &Tensor) -> ModelResult<Tensor> {
    let norm = x.sqr()?.sum_keepdim(1)?.sqrt()?.clamp(1e-12f32, f32::MAX)?;
    Ok(x.broadcast_div(&norm)?)
}

/// `LeakyReLU` with the given negative slope.
pub fn leaky_relu(x: &Tensor, slope: f64) -> ModelResult<Tensor> {
    let neg = x.neg()?.relu()?.affine(slope, 0.0)?;
    Ok((x.relu()? - neg)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_l2_normalize_rows() {
        let x = Tensor::from_vec(vec![3f32, 4.0, 0.0, 0.0], (2, 2), &Device::Cpu).unwrap();
        let y: Vec<Vec<f32>> = l2_normalize_rows(&x).unwrap().to_vec2().unwrap();
        assert!((y[0][0] - 0.6).abs() < 1e-6);
        assert!((y[0][1] - 0.8).abs() < 1e-6);
        assert_eq!(y[1], vec![0.0, 0.0]);
    }

    #[test]
    fn test_leaky_relu() {
        let x = Tensor::from_vec(vec![-1f32, 2.0], 2, &Device::Cpu).unwrap();
        let y: Vec<f32> = leaky_relu(&x, 0.2).unwrap().to_vec1().unwrap();
        assert!((y[0] + 0.2).abs() < 1e-6);
        assert!((y[1] - 2.0).abs() < 1e-6);
    }
}
