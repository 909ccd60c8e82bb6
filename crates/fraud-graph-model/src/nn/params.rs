//! Named parameter store.
//!
//! Every trainable weight and every batch-norm buffer lives here under a
//! dotted name (`encoder.layer0.account.root.weight`). The store owns the
//! seeded initializer, so two stores built with the same seed and the same
//! construction order hold identical weights.

use std::collections::{BTreeMap, HashMap};

use candle_core::{DType, Device, Tensor, Var};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::{ModelError, ModelResult};

pub struct ParamStore {
    device: Device,
    params: BTreeMap<String, Var>,
    buffers: BTreeMap<String, Var>,
    rng: ChaCha8Rng,
}

impl ParamStore {
    pub fn new(device: Device, seed: u64) -> Self {
        Self {
            device,
            params: BTreeMap::new(),
            buffers: BTreeMap::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Glorot-uniform weight of shape `[fan_in, fan_out]`.
    pub fn glorot(&mut self, name: &str, fan_in: usize, fan_out: usize) -> ModelResult<Var> {
        let bound = (6.0 / (fan_in + fan_out).max(1) as f64).sqrt();
        self.uniform(name, &[fan_in, fan_out], bound)
    }

    /// Uniform `[-bound, bound]` parameter of arbitrary shape.
    pub fn uniform(&mut self, name: &str, shape: &[usize], bound: f64) -> ModelResult<Var> {
        let n: usize = shape.iter().product();
        let data: Vec<f32> = (0..n)
            .map(|_| self.rng.gen_range(-bound..=bound) as f32)
            .collect();
        let tensor = Tensor::from_vec(data, shape, &self.device)?;
        self.register(name, tensor)
    }

    pub fn zeros(&mut self, name: &str, shape: &[usize]) -> ModelResult<Var> {
        let tensor = Tensor::zeros(shape, DType::F32, &self.device)?;
        self.register(name, tensor)
    }

    pub fn ones(&mut self, name: &str, shape: &[usize]) -> ModelResult<Var> {
        let tensor = Tensor::ones(shape, DType::F32, &self.device)?;
        self.register(name, tensor)
    }

    /// Non-trainable state saved with the parameters (batch-norm running stats).
    pub fn buffer(&mut self, name: &str, init: Tensor) -> ModelResult<Var> {
        if self.params.contains_key(name) || self.buffers.contains_key(name) {
            return Err(ModelError::Config(format!("duplicate tensor name '{}'", name)));
        }
        let var = Var::from_tensor(&init)?;
        self.buffers.insert(name.to_string(), var.clone());
        Ok(var)
    }

    fn register(&mut self, name: &str, tensor: Tensor) -> ModelResult<Var> {
        if self.params.contains_key(name) || self.buffers.contains_key(name) {
            return Err(ModelError::Config(format!("duplicate tensor name '{}'", name)));
        }
        let var = Var::from_tensor(&tensor)?;
        self.params.insert(name.to_string(), var.clone());
        Ok(var)
    }

    /// Trainable parameters in name order.
    pub fn trainable(&self) -> impl Iterator<Item = (&str, &Var)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn num_parameters(&self) -> usize {
        self.params.values().map(|v| v.elem_count()).sum()
    }

    /// Detached copies of every parameter and buffer.
    pub fn snapshot(&self) -> ModelResult<BTreeMap<String, Tensor>> {
        let mut out = BTreeMap::new();
        for (name, var) in self.params.iter().chain(self.buffers.iter()) {
            out.insert(name.clone(), var.as_tensor().copy()?);
        }
        Ok(out)
    }

    /// Overwrite every parameter and buffer from `tensors`. All names must be
    /// present with matching shapes; nothing is written unless all match.
    pub fn restore<T>(&self, tensors: &T) -> ModelResult<()>
    where
        T: TensorLookup,
    {
        let mut pending = Vec::new();
        for (name, var) in self.params.iter().chain(self.buffers.iter()) {
            let src = tensors
                .lookup(name)
                .ok_or_else(|| ModelError::MissingParameter { name: name.clone() })?;
            if src.dims() != var.dims() {
                return Err(ModelError::ShapeMismatch {
                    name: name.clone(),
                    expected: var.dims().to_vec(),
                    found: src.dims().to_vec(),
                });
            }
            pending.push((var, src));
        }
        for (var, src) in pending {
            var.set(&src.to_dtype(DType::F32)?)?;
        }
        Ok(())
    }
}

/// Name-keyed tensor lookup, implemented for the map types checkpoints use.
pub trait TensorLookup {
    fn lookup(&self, name: &str) -> Option<&Tensor>;
}

impl TensorLookup for BTreeMap<String, Tensor> {
    fn lookup(&self, name: &str) -> Option<&Tensor> {
        self.get(name)
    }
}

impl TensorLookup for HashMap<String, Tensor> {
    fn lookup(&self, name: &str) -> Option<&Tensor> {
        self.get(name)
    }
}
