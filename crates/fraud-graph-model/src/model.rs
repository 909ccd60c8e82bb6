//! Encoder and classifier trained as one unit.

use candle_core::Tensor;

use fraud_graph_core::{EncoderKind, ModelConfig, NodeType};

use crate::classifier::{sigmoid, FraudClassifier};
use crate::encoder::{build_encoder, GraphTensors, MessagePassingEncoder};
use crate::error::{ModelError, ModelResult};
use crate::nn::{ForwardContext, ParamStore};

/// Node type the classifier scores.
pub const TARGET_NODE_TYPE: NodeType = NodeType::Account;

pub struct FraudModel {
    config: ModelConfig,
    store: ParamStore,
    encoder: Box<dyn MessagePassingEncoder>,
    classifier: FraudClassifier,
}

impl FraudModel {
    /// Build encoder and classifier for `graph`, initializing every weight
    /// from `seed`.
    pub fn new(config: &ModelConfig, graph: &GraphTensors, seed: u64) -> ModelResult<Self> {
        let mut store = ParamStore::new(graph.device().clone(), seed);
        let encoder = build_encoder(config, graph, &mut store)?;
        let embedding_dim = encoder.out_dim(TARGET_NODE_TYPE);
        if embedding_dim == 0 {
            return Err(ModelError::Config(format!(
                "{} encoder produces empty {} embeddings",
                config.kind, TARGET_NODE_TYPE
            )));
        }
        let classifier = FraudClassifier::new(
            &mut store,
            embedding_dim,
            config.classifier_hidden,
            config.dropout,
        )?;
        Ok(Self {
            config: config.clone(),
            store,
            encoder,
            classifier,
        })
    }

    pub fn kind(&self) -> EncoderKind {
        self.encoder.kind()
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn store(&self) -> &ParamStore {
        &self.store
    }

    /// Account logits, shape `[N_account]`.
    pub fn forward(&self, graph: &GraphTensors, ctx: &mut ForwardContext) -> ModelResult<Tensor> {
        let embeddings = self.encoder.forward(graph, ctx)?;
        let accounts = embeddings.get(&TARGET_NODE_TYPE).ok_or_else(|| {
            ModelError::Config(format!("encoder returned no {} embeddings", TARGET_NODE_TYPE))
        })?;
        self.classifier.forward(accounts, ctx)
    }

    /// Fraud probability per account from an eval-mode forward pass.
    pub fn predict_proba(&self, graph: &GraphTensors) -> ModelResult<Vec<f64>> {
        let logits = self.forward(graph, &mut ForwardContext::eval())?.detach();
        let probs: Vec<f32> = sigmoid(&logits)?.to_vec1()?;
        Ok(probs.into_iter().map(f64::from).collect())
    }
}
