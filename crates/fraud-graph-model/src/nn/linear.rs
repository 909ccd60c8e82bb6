//! Dense affine layer.

use candle_core::{Tensor, Var};

use crate::error::ModelResult;
use crate::nn::ParamStore;

/// `y = x W + b` with `W` stored as `[in, out]`.
pub struct Linear {
    weight: Var,
    bias: Option<Var>,
    in_dim: usize,
    out_dim: usize,
}

impl Linear {
    pub fn new(
        store: &mut ParamStore,
        name: &str,
        in_dim: usize,
        out_dim: usize,
        bias: bool,
    ) -> ModelResult<Self> {
        let weight = store.glorot(&format!("{}.weight", name), in_dim, out_dim)?;
        let bias = if bias {
            Some(store.zeros(&format!("{}.bias", name), &[out_dim])?)
        } else {
            None
        };
        Ok(Self {
            weight,
            bias,
            in_dim,
            out_dim,
        })
    }

    pub fn in_dim(&self) -> usize {
        self.in_dim
    }

    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    pub fn forward(&self, x: &Tensor) -> ModelResult<Tensor> {
        let y = x.matmul(self.weight.as_tensor())?;
        match &self.bias {
            Some(b) => Ok(y.broadcast_add(b.as_tensor())?),
            None => Ok(y),
        }
    }
}
