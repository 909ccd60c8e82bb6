//! Message-passing encoders.
//!
//! Every variant implements [`MessagePassingEncoder`]: it takes the graph
//! tensors and a [`ForwardContext`] and returns one embedding matrix per node
//! type with the same row counts as the input. Variants are chosen by
//! [`EncoderKind`] through [`build_encoder`].
//!
//! | kind | aggregation |
//! |------|-------------|
//! | `graphsage` | per-relation mean, summed over relations, plus root |
//! | `gat` | per-relation multi-head attention, summed over relations |
//! | `rgcn` | relation-specific weights (optionally basis-decomposed), mean over all incoming edges |
//! | `identity` | none, features pass through |
//!
//! The three learned variants share the same outer shape: a per-type input
//! projection to `hidden_channels`, then `num_layers` message-passing layers
//! where every non-final layer is followed by batch norm, ReLU and dropout.

mod gat;
mod identity;
mod rgcn;
mod sage;
mod tensors;

pub use gat::GatEncoder;
pub use identity::IdentityEncoder;
pub use rgcn::RgcnEncoder;
pub use sage::SageEncoder;
pub use tensors::{GraphTensors, RelationTensors};

use std::collections::BTreeMap;

use candle_core::Tensor;
use tracing::info;

use fraud_graph_core::{EncoderKind, ModelConfig, NodeType};

use crate::error::{ModelError, ModelResult};
use crate::nn::{BatchNorm, ForwardContext, Linear, ParamStore};

/// Embedding matrix per node type.
pub type Embeddings = BTreeMap<NodeType, Tensor>;

pub trait MessagePassingEncoder {
    fn kind(&self) -> EncoderKind;

    /// Embedding width produced for `node_type`.
    fn out_dim(&self, node_type: NodeType) -> usize;

    fn forward(&self, graph: &GraphTensors, ctx: &mut ForwardContext) -> ModelResult<Embeddings>;
}

/// Build the encoder selected by `config.kind`, registering its parameters
/// in `store` under the `encoder.` prefix.
pub fn build_encoder(
    config: &ModelConfig,
    graph: &GraphTensors,
    store: &mut ParamStore,
) -> ModelResult<Box<dyn MessagePassingEncoder>> {
    config.validate()?;
    let encoder: Box<dyn MessagePassingEncoder> = match config.kind {
        EncoderKind::Sage => Box::new(SageEncoder::new(config, graph, store)?),
        EncoderKind::Gat => Box::new(GatEncoder::new(config, graph, store)?),
        EncoderKind::Rgcn => Box::new(RgcnEncoder::new(config, graph, store)?),
        EncoderKind::Identity => Box::new(IdentityEncoder::new(graph)),
    };
    info!(
        kind = %config.kind,
        layers = config.num_layers,
        parameters = store.num_parameters(),
        "Built encoder"
    );
    Ok(encoder)
}

/// Per-type linear map from raw feature width to `hidden`.
pub(crate) struct InputProjection {
    lins: BTreeMap<NodeType, Linear>,
}

impl InputProjection {
    pub(crate) fn new(
        store: &mut ParamStore,
        graph: &GraphTensors,
        hidden: usize,
    ) -> ModelResult<Self> {
        let mut lins = BTreeMap::new();
        for node_type in NodeType::ALL {
            let width = graph.feature_width(node_type);
            if width == 0 {
                return Err(ModelError::Config(format!(
                    "cannot project {} features of width 0",
                    node_type
                )));
            }
            let name = format!("encoder.input.{}", node_type);
            lins.insert(node_type, Linear::new(store, &name, width, hidden, true)?);
        }
        Ok(Self { lins })
    }

    pub(crate) fn forward(&self, graph: &GraphTensors) -> ModelResult<Embeddings> {
        let mut out = BTreeMap::new();
        for (node_type, lin) in &self.lins {
            out.insert(*node_type, lin.forward(graph.features(*node_type)?)?);
        }
        Ok(out)
    }
}

/// Batch norm, ReLU and dropout applied per node type after a non-final layer.
pub(crate) struct HiddenActivation {
    norms: BTreeMap<NodeType, BatchNorm>,
    dropout: f64,
}

impl HiddenActivation {
    pub(crate) fn new(
        store: &mut ParamStore,
        prefix: &str,
        dim: usize,
        dropout: f64,
    ) -> ModelResult<Self> {
        let mut norms = BTreeMap::new();
        for node_type in NodeType::ALL {
            let name = format!("{}.norm.{}", prefix, node_type);
            norms.insert(node_type, BatchNorm::new(store, &name, dim)?);
        }
        Ok(Self { norms, dropout })
    }

    pub(crate) fn forward(
        &self,
        h: Embeddings,
        ctx: &mut ForwardContext,
    ) -> ModelResult<Embeddings> {
        let mut out = BTreeMap::new();
        for (node_type, x) in h {
            let x = match self.norms.get(&node_type) {
                Some(norm) => norm.forward(&x, ctx)?,
                None => x,
            };
            let x = ctx.dropout(&x.relu()?, self.dropout)?;
            out.insert(node_type, x);
        }
        Ok(out)
    }
}

/// Output width of layer `layer` for encoders whose hidden layers keep
/// `hidden_channels`.
pub(crate) fn layer_out_dim(config: &ModelConfig, layer: usize) -> usize {
    if layer + 1 < config.num_layers {
        config.hidden_channels
    } else {
        config.out_channels
    }
}

#[cfg(test)]
pub(crate) mod test_graph {
    use fraud_graph_core::{EdgeRow, EntityRow, RelationType, TabularSnapshot};
    use fraud_graph_graph::{GraphAssembler, HeteroGraph};

    use super::*;

    /// Three accounts, two merchants, two devices. `A3` has no device edges
    /// and merchant `M2` has no incoming transactions.
    pub(crate) fn small_graph() -> HeteroGraph {
        let mut s = TabularSnapshot::default();
        s.nodes.insert(
            NodeType::Account,
            vec![
                EntityRow::new("A1")
                    .with_numeric("total_amount", 100.0)
                    .with_label(false),
                EntityRow::new("A2")
                    .with_numeric("total_amount", 900.0)
                    .with_label(true),
                EntityRow::new("A3")
                    .with_numeric("total_amount", 50.0)
                    .with_label(false),
            ],
        );
        s.nodes.insert(
            NodeType::Merchant,
            vec![
                EntityRow::new("M1").with_numeric("fraud_rate", 0.5),
                EntityRow::new("M2").with_numeric("fraud_rate", 0.0),
            ],
        );
        s.nodes.insert(
            NodeType::Device,
            vec![
                EntityRow::new("D1").with_numeric("total_users", 2.0),
                EntityRow::new("D2").with_numeric("total_users", 1.0),
            ],
        );
        s.edges.insert(
            RelationType::TransactsWith,
            vec![
                EdgeRow::new("A1", "M1").with_numeric("transaction_amount", 10.0),
                EdgeRow::new("A2", "M1").with_numeric("transaction_amount", 900.0),
                EdgeRow::new("A3", "M1").with_numeric("transaction_amount", 50.0),
            ],
        );
        s.edges.insert(
            RelationType::Uses,
            vec![EdgeRow::new("A1", "D1"), EdgeRow::new("A2", "D1"), EdgeRow::new("A2", "D2")],
        );
        GraphAssembler::default().assemble(&s).unwrap()
    }

    pub(crate) fn config(kind: EncoderKind) -> ModelConfig {
        ModelConfig {
            kind,
            hidden_channels: 8,
            out_channels: 4,
            num_layers: 2,
            heads: 2,
            num_bases: None,
            dropout: 0.2,
            classifier_hidden: 8,
            normalize_embeddings: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_graph::{config, small_graph};
    use super::*;
    use candle_core::Device;

    fn check_shapes(kind: EncoderKind) {
        let graph = small_graph();
        let tensors = GraphTensors::from_graph(&graph, &Device::Cpu).unwrap();
        let mut store = ParamStore::new(Device::Cpu, 1);
        let encoder = build_encoder(&config(kind), &tensors, &mut store).unwrap();
        assert_eq!(encoder.kind(), kind);

        for mut ctx in [ForwardContext::training(2), ForwardContext::eval()] {
            let out = encoder.forward(&tensors, &mut ctx).unwrap();
            for node_type in NodeType::ALL {
                let emb = &out[&node_type];
                assert_eq!(emb.dims()[0], graph.num_nodes(node_type), "{kind} {node_type}");
                assert_eq!(emb.dims()[1], encoder.out_dim(node_type), "{kind} {node_type}");
                let values: Vec<Vec<f32>> = emb.to_vec2().unwrap();
                assert!(values.iter().flatten().all(|v| v.is_finite()), "{kind}");
            }
        }
    }

    #[test]
    fn test_every_kind_keeps_row_counts() {
        for kind in [
            EncoderKind::Sage,
            EncoderKind::Gat,
            EncoderKind::Rgcn,
            EncoderKind::Identity,
        ] {
            check_shapes(kind);
        }
    }

    #[test]
    fn test_rgcn_with_bases() {
        let graph = small_graph();
        let tensors = GraphTensors::from_graph(&graph, &Device::Cpu).unwrap();
        let mut store = ParamStore::new(Device::Cpu, 1);
        let mut cfg = config(EncoderKind::Rgcn);
        cfg.num_bases = Some(2);
        let encoder = build_encoder(&cfg, &tensors, &mut store).unwrap();
        let out = encoder
            .forward(&tensors, &mut ForwardContext::eval())
            .unwrap();
        assert_eq!(out[&NodeType::Account].dims(), &[3, 4]);
    }

    #[test]
    fn test_eval_forward_is_deterministic() {
        let graph = small_graph();
        let tensors = GraphTensors::from_graph(&graph, &Device::Cpu).unwrap();
        let mut store = ParamStore::new(Device::Cpu, 1);
        let encoder = build_encoder(&config(EncoderKind::Gat), &tensors, &mut store).unwrap();
        let a: Vec<Vec<f32>> = encoder
            .forward(&tensors, &mut ForwardContext::eval())
            .unwrap()[&NodeType::Account]
            .to_vec2()
            .unwrap();
        let b: Vec<Vec<f32>> = encoder
            .forward(&tensors, &mut ForwardContext::eval())
            .unwrap()[&NodeType::Account]
            .to_vec2()
            .unwrap();
        assert_eq!(a, b);
    }
}
