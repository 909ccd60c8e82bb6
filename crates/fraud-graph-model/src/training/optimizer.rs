//! Adam with L2 weight decay.

use std::collections::BTreeMap;

use candle_core::backprop::GradStore;
use candle_core::Tensor;

use crate::error::ModelResult;
use crate::nn::{ParamStore, TensorLookup};

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const EPS: f64 = 1e-8;

/// Prefixes of optimizer state in checkpoint tensor maps.
pub const FIRST_MOMENT_PREFIX: &str = "optim.m.";
pub const SECOND_MOMENT_PREFIX: &str = "optim.v.";

/// Adam where weight decay is added to the gradient (`g + λ θ`), as in
/// classic L2-regularized Adam rather than decoupled AdamW.
pub struct Adam {
    learning_rate: f64,
    weight_decay: f64,
    step: usize,
    first_moment: BTreeMap<String, Tensor>,
    second_moment: BTreeMap<String, Tensor>,
}

impl Adam {
    pub fn new(learning_rate: f64, weight_decay: f64) -> Self {
        Self {
            learning_rate,
            weight_decay,
            step: 0,
            first_moment: BTreeMap::new(),
            second_moment: BTreeMap::new(),
        }
    }

    pub fn step_count(&self) -> usize {
        self.step
    }

    /// Apply one update to every parameter in `store` that has a gradient.
    pub fn step(&mut self, store: &ParamStore, grads: &GradStore) -> ModelResult<()> {
        self.step += 1;
        let t = self.step as i32;
        let bias1 = 1.0 - BETA1.powi(t);
        let bias2 = 1.0 - BETA2.powi(t);

        for (name, var) in store.trainable() {
            let Some(grad) = grads.get(var.as_tensor()) else {
                continue;
            };
            let param = var.as_tensor().detach();
            let grad = if self.weight_decay > 0.0 {
                (grad + param.affine(self.weight_decay, 0.0)?)?
            } else {
                grad.clone()
            };

            let m = match self.first_moment.get(name) {
                Some(m) => (m.affine(BETA1, 0.0)? + grad.affine(1.0 - BETA1, 0.0)?)?,
                None => grad.affine(1.0 - BETA1, 0.0)?,
            };
            let v = match self.second_moment.get(name) {
                Some(v) => (v.affine(BETA2, 0.0)? + grad.sqr()?.affine(1.0 - BETA2, 0.0)?)?,
                None => grad.sqr()?.affine(1.0 - BETA2, 0.0)?,
            };

            let m_hat = m.affine(1.0 / bias1, 0.0)?;
            let v_hat = v.affine(1.0 / bias2, 0.0)?;
            let update = m_hat.div(&(v_hat.sqrt()? + EPS)?)?;
            var.set(&(param - update.affine(self.learning_rate, 0.0)?)?)?;

            self.first_moment.insert(name.to_string(), m);
            self.second_moment.insert(name.to_string(), v);
        }
        Ok(())
    }

    /// Moment estimates keyed for a checkpoint.
    pub fn state_tensors(&self) -> BTreeMap<String, Tensor> {
        let mut out = BTreeMap::new();
        for (name, m) in &self.first_moment {
            out.insert(format!("{}{}", FIRST_MOMENT_PREFIX, name), m.clone());
        }
        for (name, v) in &self.second_moment {
            out.insert(format!("{}{}", SECOND_MOMENT_PREFIX, name), v.clone());
        }
        out
    }

    /// Replace the state with the moments stored in `tensors`. Parameters
    /// without saved moments start from zero.
    pub fn load_state<T: TensorLookup>(&mut self, step: usize, store: &ParamStore, tensors: &T) {
        self.step = step;
        self.first_moment.clear();
        self.second_moment.clear();
        for (name, _) in store.trainable() {
            if let Some(m) = tensors.lookup(&format!("{}{}", FIRST_MOMENT_PREFIX, name)) {
                self.first_moment.insert(name.to_string(), m.clone());
            }
            if let Some(v) = tensors.lookup(&format!("{}{}", SECOND_MOMENT_PREFIX, name)) {
                self.second_moment.insert(name.to_string(), v.clone());
            }
        }
    }
}
