//! Batch normalization over rows with running statistics.

use candle_core::{DType, Tensor, Var};

use crate::error::ModelResult;
use crate::nn::{ForwardContext, ParamStore};

const MOMENTUM: f64 = 0.1;
const EPS: f64 = 1e-5;

pub struct BatchNorm {
    gamma: Var,
    beta: Var,
    running_mean: Var,
    running_var: Var,
}

impl BatchNorm {
    pub fn new(store: &mut ParamStore, name: &str, dim: usize) -> ModelResult<Self> {
        let gamma = store.ones(&format!("{}.weight", name), &[dim])?;
        let beta = store.zeros(&format!("{}.bias", name), &[dim])?;
        let device = store.device().clone();
        let running_mean = store.buffer(
            &format!("{}.running_mean", name),
            Tensor::zeros(dim, DType::F32, &device)?,
        )?;
        let running_var = store.buffer(
            &format!("{}.running_var", name),
            Tensor::ones(dim, DType::F32, &device)?,
        )?;
        Ok(Self {
            gamma,
            beta,
            running_mean,
            running_var,
        })
    }

    /// Batch statistics while training (updating the running estimates),
    /// running statistics otherwise. A single-row batch has no variance, so
    /// it falls back to the running statistics even in training.
    pub fn forward(&self, x: &Tensor, ctx: &ForwardContext) -> ModelResult<Tensor> {
        let rows = x.dim(0)?;
        let (mean, var) = if ctx.is_training() && rows > 1 {
            let mean = x.mean_keepdim(0)?;
            let centered = x.broadcast_sub(&mean)?;
            let var = centered.sqr()?.mean_keepdim(0)?;
            self.update_running(&mean, &var, rows)?;
            (mean, var)
        } else {
            (
                self.running_mean.as_tensor().unsqueeze(0)?,
                self.running_var.as_tensor().unsqueeze(0)?,
            )
        };
        let normalized = x
            .broadcast_sub(&mean)?
            .broadcast_div(&(var + EPS)?.sqrt()?)?;
        Ok(normalized
            .broadcast_mul(self.gamma.as_tensor())?
            .broadcast_add(self.beta.as_tensor())?)
    }

    fn update_running(&self, mean: &Tensor, var: &Tensor, rows: usize) -> ModelResult<()> {
        let mean = mean.detach().squeeze(0)?;
        // running variance tracks the unbiased estimate
        let unbiased = var
            .detach()
            .squeeze(0)?
            .affine(rows as f64 / (rows - 1) as f64, 0.0)?;
        let new_mean = ((self.running_mean.as_tensor().detach() * (1.0 - MOMENTUM))?
            + (mean * MOMENTUM)?)?;
        let new_var = ((self.running_var.as_tensor().detach() * (1.0 - MOMENTUM))?
            + (unbiased * MOMENTUM)?)?;
        self.running_mean.set(&new_mean)?;
        self.running_var.set(&new_var)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    fn input() -> Tensor {
        Tensor::from_vec(vec![1f32, 10.0, 3.0, 20.0, 5.0, 30.0], (3, 2), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_training_output_is_standardized() {
        let mut store = ParamStore::new(Device::Cpu, 0);
        let bn = BatchNorm::new(&mut store, "bn", 2).unwrap();
        let ctx = ForwardContext::training(0);
        let y = bn.forward(&input(), &ctx).unwrap();
        let mean: Vec<f32> = y.mean(0).unwrap().to_vec1().unwrap();
        assert!(mean.iter().all(|m| m.abs() < 1e-5));
    }

    #[test]
    fn test_running_stats_move_toward_batch() {
        let mut store = ParamStore::new(Device::Cpu, 0);
        let bn = BatchNorm::new(&mut store, "bn", 2).unwrap();
        bn.forward(&input(), &ForwardContext::training(0)).unwrap();
        let rm: Vec<f32> = bn.running_mean.as_tensor().to_vec1().unwrap();
        // batch means are 3 and 20
        assert!((rm[0] - 0.3).abs() < 1e-5);
        assert!((rm[1] - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_eval_uses_running_stats() {
        let mut store = ParamStore::new(Device::Cpu, 0);
        let bn = BatchNorm::new(&mut store, "bn", 2).unwrap();
        let y = bn.forward(&input(), &ForwardContext::eval()).unwrap();
        let x: Vec<Vec<f32>> = input().to_vec2().unwrap();
        let y: Vec<Vec<f32>> = y.to_vec2().unwrap();
        assert!((y[0][0] - x[0][0]).abs() < 1e-3);
    }
}
