//! Fraud classification heads: per-account and per-transaction-edge.

use candle_core::{Tensor, D};

use crate::encoder::RelationTensors;
use crate::error::{ModelError, ModelResult};
use crate::nn::{BatchNorm, ForwardContext, Linear, ParamStore};

/// Two hidden blocks (`Linear -> BatchNorm -> ReLU -> Dropout`) narrowing
/// `E -> H -> H/2`, then a single-logit output layer.
pub struct FraudClassifier {
    fc1: Linear,
    bn1: BatchNorm,
    fc2: Linear,
    bn2: BatchNorm,
    out: Linear,
    dropout: f64,
}

impl FraudClassifier {
    pub fn new(
        store: &mut ParamStore,
        embedding_dim: usize,
        hidden: usize,
        dropout: f64,
    ) -> ModelResult<Self> {
        let half = (hidden / 2).max(1);
        Ok(Self {
            fc1: Linear::new(store, "classifier.fc1", embedding_dim, hidden, true)?,
            bn1: BatchNorm::new(store, "classifier.bn1", hidden)?,
            fc2: Linear::new(store, "classifier.fc2", hidden, half, true)?,
            bn2: BatchNorm::new(store, "classifier.bn2", half)?,
            out: Linear::new(store, "classifier.out", half, 1, true)?,
            dropout,
        })
    }

    pub fn embedding_dim(&self) -> usize {
        self.fc1.in_dim()
    }

    /// Raw logits, shape `[N]`.
    pub fn forward(&self, embeddings: &Tensor, ctx: &mut ForwardContext) -> ModelResult<Tensor> {
        let x = self.fc1.forward(embeddings)?;
        let x = self.bn1.forward(&x, ctx)?.relu()?;
        let x = ctx.dropout(&x, self.dropout)?;
        let x = self.fc2.forward(&x)?;
        let x = self.bn2.forward(&x, ctx)?.relu()?;
        let x = ctx.dropout(&x, self.dropout)?;
        Ok(self.out.forward(&x)?.squeeze(1)?)
    }
}

/// Edge-level head: scores each edge from its endpoint embeddings and
/// optional edge features.
///
/// The input row of an edge is `[x_src, x_dst, edge_attr]`, followed by the
/// same two hidden blocks and single-logit output as [`FraudClassifier`].
pub struct EdgeClassifier {
    fc1: Linear,
    bn1: BatchNorm,
    fc2: Linear,
    bn2: BatchNorm,
    out: Linear,
    embedding_dim: usize,
    edge_feature_dim: usize,
    dropout: f64,
}

impl EdgeClassifier {
    pub fn new(
        store: &mut ParamStore,
        embedding_dim: usize,
        edge_feature_dim: usize,
        hidden: usize,
        dropout: f64,
    ) -> ModelResult<Self> {
        let half = (hidden / 2).max(1);
        let input = 2 * embedding_dim + edge_feature_dim;
        Ok(Self {
            fc1: Linear::new(store, "edge_classifier.fc1", input, hidden, true)?,
            bn1: BatchNorm::new(store, "edge_classifier.bn1", hidden)?,
            fc2: Linear::new(store, "edge_classifier.fc2", hidden, half, true)?,
            bn2: BatchNorm::new(store, "edge_classifier.bn2", half)?,
            out: Linear::new(store, "edge_classifier.out", half, 1, true)?,
            embedding_dim,
            edge_feature_dim,
            dropout,
        })
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    pub fn edge_feature_dim(&self) -> usize {
        self.edge_feature_dim
    }

    /// Raw logits, shape `[E]`, one per edge of `edges`.
    ///
    /// `x_src` and `x_dst` are the node embeddings of the relation's source
    /// and target types. `edge_attr` is `[E, edge_feature_dim]` and must be
    /// given exactly when `edge_feature_dim > 0`.
    pub fn forward(
        &self,
        x_src: &Tensor,
        x_dst: &Tensor,
        edges: &RelationTensors,
        edge_attr: Option<&Tensor>,
        ctx: &mut ForwardContext,
    ) -> ModelResult<Tensor> {
        let src = x_src.index_select(&edges.src, 0)?;
        let dst = x_dst.index_select(&edges.dst, 0)?;
        let x = match (edge_attr, self.edge_feature_dim) {
            (Some(attr), _) => Tensor::cat(&[&src, &dst, attr], D::Minus1)?,
            (None, 0) => Tensor::cat(&[&src, &dst], D::Minus1)?,
            (None, width) => {
                return Err(ModelError::ShapeMismatch {
                    name: format!("{} edge features", edges.relation),
                    expected: vec![edges.num_edges, width],
                    found: vec![edges.num_edges, 0],
                })
            }
        };
        let expected = vec![edges.num_edges, self.fc1.in_dim()];
        if x.dims() != expected.as_slice() {
            return Err(ModelError::ShapeMismatch {
                name: format!("{} edge classifier input", edges.relation),
                expected,
                found: x.dims().to_vec(),
            });
        }

        let x = self.fc1.forward(&x)?;
        let x = self.bn1.forward(&x, ctx)?.relu()?;
        let x = ctx.dropout(&x, self.dropout)?;
        let x = self.fc2.forward(&x)?;
        let x = self.bn2.forward(&x, ctx)?.relu()?;
        let x = ctx.dropout(&x, self.dropout)?;
        Ok(self.out.forward(&x)?.squeeze(1)?)
    }
}

/// Element-wise probabilities from logits.
pub fn sigmoid(logits: &Tensor) -> ModelResult<Tensor> {
    Ok(candle_nn::ops::sigmoid(logits)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::test_graph::small_graph;
    use crate::encoder::GraphTensors;
    use candle_core::Device;
    use fraud_graph_core::{NodeType, RelationType};

    fn transactions(tensors: &GraphTensors) -> &RelationTensors {
        tensors.relation(RelationType::TransactsWith).unwrap()
    }

    #[test]
    fn test_logits_one_per_row() {
        let mut store = ParamStore::new(Device::Cpu, 0);
        let clf = FraudClassifier::new(&mut store, 6, 8, 0.2).unwrap();
        let x = Tensor::randn(0f32, 1.0, (5, 6), &Device::Cpu).unwrap();
        let logits = clf.forward(&x, &mut ForwardContext::training(1)).unwrap();
        assert_eq!(logits.dims(), &[5]);
        assert_eq!(clf.embedding_dim(), 6);
    }

    #[test]
    fn test_edge_logits_one_per_edge() {
        let graph = small_graph();
        let tensors = GraphTensors::from_graph(&graph, &Device::Cpu).unwrap();
        let edges = transactions(&tensors);
        let mut store = ParamStore::new(Device::Cpu, 0);
        let clf = EdgeClassifier::new(&mut store, 4, 3, 8, 0.3).unwrap();
        assert!(store.trainable().any(|(name, _)| name == "edge_classifier.fc1.weight"));

        let x_acc = Tensor::randn(0f32, 1.0, (3, 4), &Device::Cpu).unwrap();
        let x_mer = Tensor::randn(0f32, 1.0, (2, 4), &Device::Cpu).unwrap();
        let attr = Tensor::randn(0f32, 1.0, (edges.num_edges, 3), &Device::Cpu).unwrap();
        let mut ctx = ForwardContext::training(3);
        let logits = clf.forward(&x_acc, &x_mer, edges, Some(&attr), &mut ctx).unwrap();
        assert_eq!(logits.dims(), &[edges.num_edges]);
        assert_eq!(graph.num_nodes(NodeType::Account), 3);
    }

    #[test]
    fn test_edge_logits_deterministic_in_eval() {
        let tensors = GraphTensors::from_graph(&small_graph(), &Device::Cpu).unwrap();
        let edges = transactions(&tensors);
        let mut store = ParamStore::new(Device::Cpu, 7);
        let clf = EdgeClassifier::new(&mut store, 4, 0, 8, 0.5).unwrap();
        let x_acc = Tensor::randn(0f32, 1.0, (3, 4), &Device::Cpu).unwrap();
        let x_mer = Tensor::randn(0f32, 1.0, (2, 4), &Device::Cpu).unwrap();

        let first: Vec<f32> = clf
            .forward(&x_acc, &x_mer, edges, None, &mut ForwardContext::eval())
            .unwrap()
            .to_vec1()
            .unwrap();
        let second: Vec<f32> = clf
            .forward(&x_acc, &x_mer, edges, None, &mut ForwardContext::eval())
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(first.len(), edges.num_edges);
        assert_eq!(first, second);
    }

    #[test]
    fn test_edge_features_required_when_configured() {
        let tensors = GraphTensors::from_graph(&small_graph(), &Device::Cpu).unwrap();
        let edges = transactions(&tensors);
        let mut store = ParamStore::new(Device::Cpu, 0);
        let clf = EdgeClassifier::new(&mut store, 4, 3, 8, 0.0).unwrap();
        let x_acc = Tensor::zeros((3, 4), candle_core::DType::F32, &Device::Cpu).unwrap();
        let x_mer = Tensor::zeros((2, 4), candle_core::DType::F32, &Device::Cpu).unwrap();
        let err = clf
            .forward(&x_acc, &x_mer, edges, None, &mut ForwardContext::eval())
            .unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { .. }));

        let narrow = Tensor::zeros((edges.num_edges, 2), candle_core::DType::F32, &Device::Cpu)
            .unwrap();
        let err = clf
            .forward(&x_acc, &x_mer, edges, Some(&narrow), &mut ForwardContext::eval())
            .unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_sigmoid_range() {
        let logits = Tensor::from_vec(vec![-30f32, 0.0, 30.0], 3, &Device::Cpu).unwrap();
        let p: Vec<f32> = sigmoid(&logits).unwrap().to_vec1().unwrap();
        assert!(p[0] < 1e-6);
        assert!((p[1] - 0.5).abs() < 1e-6);
        assert!(p[2] > 1.0 - 1e-6);
    }
}
