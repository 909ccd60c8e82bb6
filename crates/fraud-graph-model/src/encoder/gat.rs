//! Multi-head attention encoder.
//!
//! For an edge `j -> i` of relation `r` and head `k`:
//!
//! ```text
//! z      = h W_r                      (shared by source and destination)
//! e_ijk  = LeakyReLU(a_src_k . z_jk + a_dst_k . z_ik, 0.2)
//! α_ijk  = softmax over the incoming edges of i
//! out_ik = Σ_j α_ijk z_jk
//! ```
//!
//! Heads are concatenated on hidden layers and averaged on the last one.
//! Hidden layers use `hidden_channels` per head, so their output width is
//! `hidden_channels * heads`.

use std::collections::BTreeMap;

use candle_core::{DType, Tensor, Var};
use tracing::debug;

use fraud_graph_core::{EncoderKind, ModelConfig, NodeType, RelationType};

use super::{
    Embeddings, GraphTensors, HiddenActivation, InputProjection, MessagePassingEncoder,
    RelationTensors,
};
use crate::error::{ModelError, ModelResult};
use crate::nn::{leaky_relu, ForwardContext, Linear, ParamStore};

const NEGATIVE_SLOPE: f64 = 0.2;
const SOFTMAX_EPS: f64 = 1e-16;

struct GatRelation {
    lin: Linear,
    att_src: Var,
    att_dst: Var,
}

struct GatLayer {
    relations: BTreeMap<RelationType, GatRelation>,
    bias: BTreeMap<NodeType, Var>,
    heads: usize,
    head_dim: usize,
    concat: bool,
    dropout: f64,
}

impl GatLayer {
    fn new(
        store: &mut ParamStore,
        prefix: &str,
        in_dim: usize,
        heads: usize,
        head_dim: usize,
        concat: bool,
        dropout: f64,
    ) -> ModelResult<Self> {
        let bound = (6.0 / (1 + head_dim) as f64).sqrt();
        let mut relations = BTreeMap::new();
        for relation in RelationType::ALL {
            let name = format!("{}.{}", prefix, relation);
            let lin = Linear::new(store, &format!("{}.lin", name), in_dim, heads * head_dim, false)?;
            let att_src = store.uniform(&format!("{}.att_src", name), &[1, heads, head_dim], bound)?;
            let att_dst = store.uniform(&format!("{}.att_dst", name), &[1, heads, head_dim], bound)?;
            relations.insert(
                relation,
                GatRelation {
                    lin,
                    att_src,
                    att_dst,
                },
            );
        }
        let width = if concat { heads * head_dim } else { head_dim };
        let mut bias = BTreeMap::new();
        for node_type in NodeType::ALL {
            bias.insert(node_type, store.zeros(&format!("{}.{}.bias", prefix, node_type), &[width])?);
        }
        Ok(Self {
            relations,
            bias,
            heads,
            head_dim,
            concat,
            dropout,
        })
    }

    fn out_dim(&self) -> usize {
        if self.concat {
            self.heads * self.head_dim
        } else {
            self.head_dim
        }
    }

    /// Softmax-normalized attention `[E, heads]` and projected sources
    /// `[N_src, heads, head_dim]` for one relation.
    fn attention(
        &self,
        params: &GatRelation,
        rel: &RelationTensors,
        h: &Embeddings,
        graph: &GraphTensors,
    ) -> ModelResult<(Tensor, Tensor)> {
        let source = rel.relation.source();
        let target = rel.relation.target();
        let n_src = graph.num_nodes(source);
        let n_dst = graph.num_nodes(target);
        let (heads, d) = (self.heads, self.head_dim);

        let z_src = params.lin.forward(input(h, source)?)?.reshape((n_src, heads, d))?;
        let z_dst = params.lin.forward(input(h, target)?)?.reshape((n_dst, heads, d))?;

        let a_src = z_src.broadcast_mul(params.att_src.as_tensor())?.sum(2)?;
        let a_dst = z_dst.broadcast_mul(params.att_dst.as_tensor())?.sum(2)?;

        let scores = (a_src.index_select(&rel.src, 0)? + a_dst.index_select(&rel.dst, 0)?)?;
        let scores = leaky_relu(&scores, NEGATIVE_SLOPE)?;

        let shift =
            destination_max(&scores, rel.dst_indices(), n_dst)?.index_select(&rel.dst, 0)?;
        let exp = (scores - shift)?.exp()?;
        let denom = Tensor::zeros((n_dst, heads), DType::F32, graph.device())?
            .index_add(&rel.dst, &exp, 0)?;
        let denom = (denom.index_select(&rel.dst, 0)? + SOFTMAX_EPS)?;
        Ok((exp.div(&denom)?, z_src))
    }

    /// Attention-weighted messages of one relation, `[N_dst, heads, head_dim]`.
    fn attend(
        &self,
        params: &GatRelation,
        rel: &RelationTensors,
        h: &Embeddings,
        graph: &GraphTensors,
        ctx: &mut ForwardContext,
    ) -> ModelResult<Tensor> {
        let (alpha, z_src) = self.attention(params, rel, h, graph)?;
        let alpha = ctx.dropout(&alpha, self.dropout)?;
        let n_dst = graph.num_nodes(rel.relation.target());
        let messages = z_src
            .index_select(&rel.src, 0)?
            .broadcast_mul(&alpha.unsqueeze(2)?)?;
        let out = Tensor::zeros((n_dst, self.heads, self.head_dim), DType::F32, graph.device())?
            .index_add(&rel.dst, &messages, 0)?;
        Ok(out)
    }

    fn forward(
        &self,
        h: &Embeddings,
        graph: &GraphTensors,
        ctx: &mut ForwardContext,
    ) -> ModelResult<Embeddings> {
        let mut acc: BTreeMap<NodeType, Tensor> = BTreeMap::new();
        for rel in graph.active_relations() {
            let Some(params) = self.relations.get(&rel.relation) else {
                continue;
            };
            let message = self.attend(params, rel, h, graph, ctx)?;
            let target = rel.relation.target();
            let summed = match acc.remove(&target) {
                Some(prev) => (prev + message)?,
                None => message,
            };
            acc.insert(target, summed);
            debug!(relation = %rel.relation, edges = rel.num_edges, "gat attend");
        }

        let mut out = BTreeMap::new();
        for (node_type, bias) in &self.bias {
            let n = graph.num_nodes(*node_type);
            let merged = match acc.remove(node_type) {
                Some(x) if self.concat => x.reshape((n, self.heads * self.head_dim))?,
                Some(x) => x.mean(1)?,
                None => Tensor::zeros((n, self.out_dim()), DType::F32, graph.device())?,
            };
            out.insert(*node_type, merged.broadcast_add(bias.as_tensor())?);
        }
        Ok(out)
    }
}

/// Per-destination, per-head maximum of `scores` `[E, heads]`, shape
/// `[n_dst, heads]`. Destinations without incoming edges get 0. The result
/// is detached: it only shifts each softmax and carries no gradient.
fn destination_max(scores: &Tensor, dst: &[u32], n_dst: usize) -> ModelResult<Tensor> {
    let rows: Vec<Vec<f32>> = scores.detach().to_vec2()?;
    let heads = scores.dim(1)?;
    let mut max = vec![f32::NEG_INFINITY; n_dst * heads];
    for (row, d) in rows.iter().zip(dst) {
        let base = *d as usize * heads;
        for (k, v) in row.iter().enumerate() {
            if *v > max[base + k] {
                max[base + k] = *v;
            }
        }
    }
    for m in max.iter_mut().filter(|m| !m.is_finite()) {
        *m = 0.0;
    }
    Ok(Tensor::from_vec(max, (n_dst, heads), scores.device())?)
}

fn input(h: &Embeddings, node_type: NodeType) -> ModelResult<&Tensor> {
    h.get(&node_type)
        .ok_or_else(|| ModelError::Config(format!("no representation for {} nodes", node_type)))
}

pub struct GatEncoder {
    projection: InputProjection,
    layers: Vec<GatLayer>,
    activations: Vec<HiddenActivation>,
}

impl GatEncoder {
    pub fn new(config: &ModelConfig, graph: &GraphTensors, store: &mut ParamStore) -> ModelResult<Self> {
        let projection = InputProjection::new(store, graph, config.hidden_channels)?;
        let mut layers = Vec::with_capacity(config.num_layers);
        let mut activations = Vec::new();
        let mut in_dim = config.hidden_channels;
        for i in 0..config.num_layers {
            let prefix = format!("encoder.layer{}", i);
            let last = i + 1 == config.num_layers;
            let layer = if last {
                GatLayer::new(store, &prefix, in_dim, config.heads, config.out_channels, false, config.dropout)?
            } else {
                GatLayer::new(store, &prefix, in_dim, config.heads, config.hidden_channels, true, config.dropout)?
            };
            in_dim = layer.out_dim();
            if !last {
                activations.push(HiddenActivation::new(store, &prefix, in_dim, config.dropout)?);
            }
            layers.push(layer);
        }
        Ok(Self {
            projection,
            layers,
            activations,
        })
    }
}

impl MessagePassingEncoder for GatEncoder {
    fn kind(&self) -> EncoderKind {
        EncoderKind::Gat
    }

    fn out_dim(&self, _node_type: NodeType) -> usize {
        self.layers.last().map(|l| l.out_dim()).unwrap_or(0)
    }

    fn forward(&self, graph: &GraphTensors, ctx: &mut ForwardContext) -> ModelResult<Embeddings> {
        let mut h = self.projection.forward(graph)?;
        for (i, layer) in self.layers.iter().enumerate() {
            h = layer.forward(&h, graph, ctx)?;
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

    /// Sum attention per destination and head for the first layer, with the
    /// projected inputs multiplied by `scale`.
    fn check_attention_normalized(scale: f64) {
        let graph = small_graph();
        let tensors = GraphTensors::from_graph(&graph, &Device::Cpu).unwrap();
        let mut store = ParamStore::new(Device::Cpu, 5);
        let cfg = config(EncoderKind::Gat);
        let encoder = GatEncoder::new(&cfg, &tensors, &mut store).unwrap();
        let layer = &encoder.layers[0];
        let h: Embeddings = encoder
            .projection
            .forward(&tensors)
            .unwrap()
            .into_iter()
            .map(|(t, x)| (t, (x * scale).unwrap()))
            .collect();

        for relation in [RelationType::TransactsWith, RelationType::Uses] {
            let rel = tensors.relation(relation).unwrap();
            let params = &layer.relations[&relation];
            let (alpha, _) = layer.attention(params, rel, &h, &tensors).unwrap();
            let alpha: Vec<Vec<f32>> = alpha.to_vec2().unwrap();

            let n_dst = tensors.num_nodes(relation.target());
            let mut totals = vec![vec![0f32; cfg.heads]; n_dst];
            for (e, dst) in rel.dst_indices().iter().enumerate() {
                for k in 0..cfg.heads {
                    totals[*dst as usize][k] += alpha[e][k];
                }
            }
            let degree = graph.edge_store(relation).unwrap().in_degree(n_dst);
            for (i, row) in totals.iter().enumerate() {
                for total in row {
                    if degree[i] > 0 {
                        assert!(
                            (total - 1.0).abs() < 1e-5,
                            "{relation} dst {i}: {total} (x{scale})"
                        );
                    } else {
                        assert_eq!(*total, 0.0);
                    }
                }
            }
        }
    }

    #[test]
    fn test_attention_sums_to_one_per_destination() {
        check_attention_normalized(1.0);
    }

    #[test]
    fn test_attention_survives_large_scores() {
        // scores far apart across destinations must not underflow
        check_attention_normalized(1000.0);
    }

    #[test]
    fn test_destination_max_ignores_other_destinations() {
        let scores =
            Tensor::from_vec(vec![-500f32, 1.0, 3.0, 2.0, 900.0, -4.0], (3, 2), &Device::Cpu)
                .unwrap();
        let max: Vec<Vec<f32>> = destination_max(&scores, &[0, 0, 2], 3)
            .unwrap()
            .to_vec2()
            .unwrap();
        assert_eq!(max, vec![vec![3.0, 2.0], vec![0.0, 0.0], vec![900.0, -4.0]]);
    }

    #[test]
    fn test_hidden_width_is_heads_times_hidden() {
        let graph = small_graph();
        let tensors = GraphTensors::from_graph(&graph, &Device::Cpu).unwrap();
        let mut store = ParamStore::new(Device::Cpu, 5);
        let cfg = config(EncoderKind::Gat);
        let encoder = GatEncoder::new(&cfg, &tensors, &mut store).unwrap();
        assert_eq!(encoder.layers[0].out_dim(), cfg.hidden_channels * cfg.heads);
        assert_eq!(encoder.out_dim(NodeType::Account), cfg.out_channels);
    }
}
