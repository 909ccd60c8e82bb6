//! Pass-through encoder for ablations.

use std::collections::BTreeMap;

use fraud_graph_core::{EncoderKind, NodeType};

use super::{Embeddings, GraphTensors, MessagePassingEncoder};
use crate::error::ModelResult;
use crate::nn::ForwardContext;

/// Returns node features unchanged, so the classifier sees only each
/// account's own aggregates.
pub struct IdentityEncoder {
    widths: BTreeMap<NodeType, usize>,
}

impl IdentityEncoder {
    pub fn new(graph: &GraphTensors) -> Self {
        let widths = NodeType::ALL
            .iter()
            .map(|t| (*t, graph.feature_width(*t)))
            .collect();
        Self { widths }
    }
}

impl MessagePassingEncoder for IdentityEncoder {
    fn kind(&self) -> EncoderKind {
        EncoderKind::Identity
    }

    fn out_dim(&self, node_type: NodeType) -> usize {
        self.widths.get(&node_type).copied().unwrap_or(0)
    }

    fn forward(&self, graph: &GraphTensors, _ctx: &mut ForwardContext) -> ModelResult<Embeddings> {
        Ok(graph.all_features().clone())
    }
}
