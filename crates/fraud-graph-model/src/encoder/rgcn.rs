//! Relational graph convolution over a flattened view of the graph.
//!
//! All node types are stacked into one matrix (per-type row offsets) and every
//! edge is tagged with its relation id. A layer computes
//!
//! ```text
//! out_i = (1 / deg_i) Σ_{(j, r) -> i} h_j W_r  +  h_i W_root + b
//! ```
//!
//! where `deg_i` counts incoming edges of all relations. With `num_bases`
//! set, `W_r = Σ_b a_rb V_b`; otherwise every relation owns its weight.

use std::collections::BTreeMap;

use candle_core::{DType, Device, Tensor, Var};
use tracing::debug;

use fraud_graph_core::{EncoderKind, ModelConfig, NodeType, RelationType};

use super::{layer_out_dim, Embeddings, GraphTensors, InputProjection, MessagePassingEncoder};
use crate::error::{ModelError, ModelResult};
use crate::nn::{BatchNorm, ForwardContext, Linear, ParamStore};

/// Homogeneous view of the graph. Lives only inside this module.
struct FlatView {
    offsets: BTreeMap<NodeType, (usize, usize)>,
    total: usize,
    edges: Vec<FlatEdges>,
    degree: Tensor,
}

struct FlatEdges {
    relation_id: usize,
    src: Tensor,
    dst: Tensor,
}

impl FlatView {
    fn new(graph: &GraphTensors) -> ModelResult<Self> {
        let mut offsets = BTreeMap::new();
        let mut total = 0;
        for node_type in NodeType::ALL {
            let n = graph.num_nodes(node_type);
            offsets.insert(node_type, (total, n));
            total += n;
        }

        let device = graph.device();
        let mut degree = vec![0usize; total];
        let mut edges = Vec::new();
        for rel in graph.active_relations() {
            let src_offset = offsets[&rel.relation.source()].0 as u32;
            let dst_offset = offsets[&rel.relation.target()].0 as u32;
            let src: Vec<u32> = rel.src_indices().iter().map(|s| s + src_offset).collect();
            let dst: Vec<u32> = rel.dst_indices().iter().map(|d| d + dst_offset).collect();
            for d in &dst {
                degree[*d as usize] += 1;
            }
            let e = src.len();
            edges.push(FlatEdges {
                relation_id: rel.relation.id(),
                src: Tensor::from_vec(src, e, device)?,
                dst: Tensor::from_vec(dst, e, device)?,
            });
        }
        let degree: Vec<f32> = degree.into_iter().map(|d| d.max(1) as f32).collect();
        Ok(Self {
            offsets,
            total,
            edges,
            degree: Tensor::from_vec(degree, (total, 1), device)?,
        })
    }

    fn stack(&self, h: &Embeddings) -> ModelResult<Tensor> {
        let parts: Vec<&Tensor> = NodeType::ALL
            .iter()
            .map(|t| {
                h.get(t)
                    .ok_or_else(|| ModelError::Config(format!("no representation for {} nodes", t)))
            })
            .collect::<ModelResult<_>>()?;
        Ok(Tensor::cat(&parts, 0)?)
    }

    fn split(&self, x: &Tensor) -> ModelResult<Embeddings> {
        let mut out = BTreeMap::new();
        for (node_type, (offset, n)) in &self.offsets {
            out.insert(*node_type, x.narrow(0, *offset, *n)?);
        }
        Ok(out)
    }
}

enum RelationWeights {
    Basis { bases: Var, coefficients: Var },
    Full { weights: Var },
}

impl RelationWeights {
    /// `[num_relations, in * out]`.
    fn matrix(&self) -> ModelResult<Tensor> {
        match self {
            RelationWeights::Basis {
                bases,
                coefficients,
            } => Ok(coefficients.as_tensor().matmul(bases.as_tensor())?),
            RelationWeights::Full { weights } => Ok(weights.as_tensor().clone()),
        }
    }
}

struct RgcnLayer {
    weights: RelationWeights,
    root: Linear,
    in_dim: usize,
    out_dim: usize,
}

impl RgcnLayer {
    fn new(
        store: &mut ParamStore,
        prefix: &str,
        in_dim: usize,
        out_dim: usize,
        num_bases: Option<usize>,
    ) -> ModelResult<Self> {
        let num_relations = RelationType::ALL.len();
        let bound = (6.0 / (in_dim + out_dim) as f64).sqrt();
        let weights = match num_bases {
            Some(b) => RelationWeights::Basis {
                bases: store.uniform(&format!("{}.bases", prefix), &[b, in_dim * out_dim], bound)?,
                coefficients: store.uniform(
                    &format!("{}.coefficients", prefix),
                    &[num_relations, b],
                    (1.0 / b as f64).sqrt(),
                )?,
            },
            None => RelationWeights::Full {
                weights: store.uniform(
                    &format!("{}.relation_weights", prefix),
                    &[num_relations, in_dim * out_dim],
                    bound,
                )?,
            },
        };
        let root = Linear::new(store, &format!("{}.root", prefix), in_dim, out_dim, true)?;
        Ok(Self {
            weights,
            root,
            in_dim,
            out_dim,
        })
    }

    fn forward(&self, x: &Tensor, view: &FlatView, device: &Device) -> ModelResult<Tensor> {
        let matrix = self.weights.matrix()?;
        let mut agg = Tensor::zeros((view.total, self.out_dim), DType::F32, device)?;
        for edges in &view.edges {
            let w = matrix
                .get(edges.relation_id)?
                .reshape((self.in_dim, self.out_dim))?;
            let messages = x.index_select(&edges.src, 0)?.matmul(&w)?;
            agg = agg.index_add(&edges.dst, &messages, 0)?;
        }
        let mean = agg.broadcast_div(&view.degree)?;
        Ok((mean + self.root.forward(x)?)?)
    }
}

pub struct RgcnEncoder {
    projection: InputProjection,
    layers: Vec<RgcnLayer>,
    /// One norm per hidden layer, shared by all node types in the flat view.
    norms: Vec<BatchNorm>,
    dropout: f64,
}

impl RgcnEncoder {
    pub fn new(config: &ModelConfig, graph: &GraphTensors, store: &mut ParamStore) -> ModelResult<Self> {
        let projection = InputProjection::new(store, graph, config.hidden_channels)?;
        let mut layers = Vec::with_capacity(config.num_layers);
        let mut norms = Vec::new();
        for i in 0..config.num_layers {
            let prefix = format!("encoder.layer{}", i);
            let out_dim = layer_out_dim(config, i);
            layers.push(RgcnLayer::new(
                store,
                &prefix,
                config.hidden_channels,
                out_dim,
                config.num_bases,
            )?);
            if i + 1 < config.num_layers {
                norms.push(BatchNorm::new(store, &format!("{}.norm", prefix), out_dim)?);
            }
        }
        Ok(Self {
            projection,
            layers,
            norms,
            dropout: config.dropout,
        })
    }
}

impl MessagePassingEncoder for RgcnEncoder {
    fn kind(&self) -> EncoderKind {
        EncoderKind::Rgcn
    }

    fn out_dim(&self, _node_type: NodeType) -> usize {
        self.layers.last().map(|l| l.out_dim).unwrap_or(0)
    }

    fn forward(&self, graph: &GraphTensors, ctx: &mut ForwardContext) -> ModelResult<Embeddings> {
        let view = FlatView::new(graph)?;
        debug!(nodes = view.total, relations = view.edges.len(), "rgcn flat view");
        let mut x = view.stack(&self.projection.forward(graph)?)?;
        for (i, layer) in self.layers.iter().enumerate() {
            x = layer.forward(&x, &view, graph.device())?;
            if let Some(norm) = self.norms.get(i) {
                x = norm.forward(&x, ctx)?.relu()?;
                x = ctx.dropout(&x, self.dropout)?;
            }
        }
        view.split(&x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::test_graph::small_graph;
    use candle_core::Device;

    #[test]
    fn test_flat_view_round_trip() {
        let graph = small_graph();
        let tensors = GraphTensors::from_graph(&graph, &Device::Cpu).unwrap();
        let view = FlatView::new(&tensors).unwrap();
        assert_eq!(view.total, 3 + 2 + 2);

        let stacked = view.stack(tensors.all_features()).unwrap_err();
        // raw features have different widths per type
        assert!(matches!(stacked, ModelError::Candle(_)));

        let mut h = BTreeMap::new();
        for node_type in NodeType::ALL {
            let n = tensors.num_nodes(node_type);
            h.insert(node_type, Tensor::ones((n, 2), DType::F32, &Device::Cpu).unwrap());
        }
        let split = view.split(&view.stack(&h).unwrap()).unwrap();
        for node_type in NodeType::ALL {
            assert_eq!(split[&node_type].dims(), h[&node_type].dims());
        }
    }

    #[test]
    fn test_degree_counts_all_relations() {
        let graph = small_graph();
        let tensors = GraphTensors::from_graph(&graph, &Device::Cpu).unwrap();
        let view = FlatView::new(&tensors).unwrap();
        let degree: Vec<Vec<f32>> = view.degree.to_vec2().unwrap();
        // A2 receives one rev_transacts_with and two used_by edges
        let a2 = graph.mappings().index_of(NodeType::Account, "A2").unwrap();
        assert_eq!(degree[a2][0], 3.0);
    }

    #[test]
    fn test_basis_matrix_shape() {
        let mut store = ParamStore::new(Device::Cpu, 0);
        let layer = RgcnLayer::new(&mut store, "l", 4, 3, Some(2)).unwrap();
        assert_eq!(
            layer.weights.matrix().unwrap().dims(),
            &[RelationType::ALL.len(), 12]
        );
        // bases + coefficients + root weight + root bias
        assert_eq!(store.num_parameters(), 2 * 12 + 6 * 2 + 12 + 3);
    }
}
