//! Mean-aggregation encoder.

use std::collections::BTreeMap;

use candle_core::{DType, Tensor};
use tracing::debug;

use fraud_graph_core::{EncoderKind, ModelConfig, NodeType, RelationType};

use super::{
    layer_out_dim, Embeddings, GraphTensors, HiddenActivation, InputProjection,
    MessagePassingEncoder,
};
use crate::error::{ModelError, ModelResult};
use crate::nn::{l2_normalize_rows, ForwardContext, Linear, ParamStore};

struct SageLayer {
    /// Neighbor transform per relation, with bias.
    neighbor: BTreeMap<RelationType, Linear>,
    /// Root transform per destination type, without bias.
    root: BTreeMap<NodeType, Linear>,
    out_dim: usize,
}

impl SageLayer {
    fn new(store: &mut ParamStore, prefix: &str, in_dim: usize, out_dim: usize) -> ModelResult<Self> {
        let mut neighbor = BTreeMap::new();
        for relation in RelationType::ALL {
            let name = format!("{}.{}.neighbor", prefix, relation);
            neighbor.insert(relation, Linear::new(store, &name, in_dim, out_dim, true)?);
        }
        let mut root = BTreeMap::new();
        for node_type in NodeType::ALL {
            let name = format!("{}.{}.root", prefix, node_type);
            root.insert(node_type, Linear::new(store, &name, in_dim, out_dim, false)?);
        }
        Ok(Self {
            neighbor,
            root,
            out_dim,
        })
    }

    fn forward(&self, h: &Embeddings, graph: &GraphTensors, normalize: bool) -> ModelResult<Embeddings> {
        let mut out = BTreeMap::new();
        for (node_type, root) in &self.root {
            out.insert(*node_type, root.forward(input(h, *node_type)?)?);
        }

        for rel in graph.active_relations() {
            let Some(lin) = self.neighbor.get(&rel.relation) else {
                continue;
            };
            let src_h = input(h, rel.relation.source())?;
            let num_dst = graph.num_nodes(rel.relation.target());
            let in_dim = src_h.dim(1)?;

            let gathered = src_h.index_select(&rel.src, 0)?;
            let summed = Tensor::zeros((num_dst, in_dim), DType::F32, graph.device())?
                .index_add(&rel.dst, &gathered, 0)?;
            let mean = summed.broadcast_div(&rel.degree)?;
            // destinations without incoming edges get neither message nor bias
            let message = lin.forward(&mean)?.broadcast_mul(&rel.has_incoming)?;

            let target = rel.relation.target();
            let acc = match out.remove(&target) {
                Some(acc) => (acc + message)?,
                None => message,
            };
            out.insert(target, acc);
            debug!(relation = %rel.relation, edges = rel.num_edges, "sage aggregate");
        }

        if normalize {
            for x in out.values_mut() {
                *x = l2_normalize_rows(x)?;
            }
        }
        Ok(out)
    }
}

fn input(h: &Embeddings, node_type: NodeType) -> ModelResult<&Tensor> {
    h.get(&node_type)
        .ok_or_else(|| ModelError::Config(format!("no representation for {} nodes", node_type)))
}

pub struct SageEncoder {
    projection: InputProjection,
    layers: Vec<SageLayer>,
    activations: Vec<HiddenActivation>,
    normalize: bool,
    out_dim: usize,
}

impl SageEncoder {
    pub fn new(config: &ModelConfig, graph: &GraphTensors, store: &mut ParamStore) -> ModelResult<Self> {
        let projection = InputProjection::new(store, graph, config.hidden_channels)?;
        let mut layers = Vec::with_capacity(config.num_layers);
        let mut activations = Vec::new();
        for i in 0..config.num_layers {
            let prefix = format!("encoder.layer{}", i);
            let out_dim = layer_out_dim(config, i);
            layers.push(SageLayer::new(store, &prefix, config.hidden_channels, out_dim)?);
            if i + 1 < config.num_layers {
                activations.push(HiddenActivation::new(store, &prefix, out_dim, config.dropout)?);
            }
        }
        Ok(Self {
            projection,
            out_dim: layers.last().map(|l| l.out_dim).unwrap_or(config.hidden_channels),
            layers,
            activations,
            normalize: config.normalize_embeddings,
        })
    }
}

impl MessagePassingEncoder for SageEncoder {
    fn kind(&self) -> EncoderKind {
        EncoderKind::Sage
    }

    fn out_dim(&self, _node_type: NodeType) -> usize {
        self.out_dim
    }

    fn forward(&self, graph: &GraphTensors, ctx: &mut ForwardContext) -> ModelResult<Embeddings> {
        let mut h = self.projection.forward(graph)?;
        for (i, layer) in self.layers.iter().enumerate() {
            h = layer.forward(&h, graph, self.normalize)?;
            if let Some(activation) = self.activations.get(i) {
                h = activation.forward(h, ctx)?;
            }
        }
        Ok(h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::test_graph::{config, small_graph};
    use candle_core::Device;

    #[test]
    fn test_isolated_destination_gets_root_only() {
        let graph = small_graph();
        let tensors = GraphTensors::from_graph(&graph, &Device::Cpu).unwrap();
        let mut store = ParamStore::new(Device::Cpu, 3);
        let mut cfg = config(EncoderKind::Sage);
        cfg.num_layers = 1;
        cfg.normalize_embeddings = false;
        let encoder = SageEncoder::new(&cfg, &tensors, &mut store).unwrap();

        let h = encoder.projection.forward(&tensors).unwrap();
        let out = encoder.layers[0].forward(&h, &tensors, false).unwrap();
        let root = encoder.layers[0].root[&NodeType::Merchant]
            .forward(&h[&NodeType::Merchant])
            .unwrap();

        // M2 has no incoming transactions
        let m2 = graph.mappings().index_of(NodeType::Merchant, "M2").unwrap();
        let out: Vec<Vec<f32>> = out[&NodeType::Merchant].to_vec2().unwrap();
        let root: Vec<Vec<f32>> = root.to_vec2().unwrap();
        for (a, b) in out[m2].iter().zip(root[m2].iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_normalized_rows_have_unit_norm() {
        let graph = small_graph();
        let tensors = GraphTensors::from_graph(&graph, &Device::Cpu).unwrap();
        let mut store = ParamStore::new(Device::Cpu, 3);
        let mut cfg = config(EncoderKind::Sage);
        cfg.num_layers = 1;
        let encoder = SageEncoder::new(&cfg, &tensors, &mut store).unwrap();
        let out = encoder
            .forward(&tensors, &mut ForwardContext::eval())
            .unwrap();
        let rows: Vec<Vec<f32>> = out[&NodeType::Account].to_vec2().unwrap();
        for row in rows {
            let norm: f32 = row.iter().map(|v| v * v).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-4 || norm < 1e-6);
        }
    }
}
