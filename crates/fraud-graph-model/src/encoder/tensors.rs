//! Device tensors for one graph artifact.

use std::collections::BTreeMap;

use candle_core::{Device, Tensor};

use fraud_graph_core::{NodeType, RelationType};
use fraud_graph_graph::HeteroGraph;

use crate::error::{ModelError, ModelResult};

/// Edge index tensors for one relation.
pub struct RelationTensors {
    pub relation: RelationType,
    pub num_edges: usize,
    /// `[E]` u32 source indices.
    pub src: Tensor,
    /// `[E]` u32 destination indices.
    pub dst: Tensor,
    /// `[N_dst, 1]` in-degree clamped to at least 1.
    pub degree: Tensor,
    /// `[N_dst, 1]` 1.0 where the destination has an incoming edge.
    pub has_incoming: Tensor,
    src_host: Vec<u32>,
    dst_host: Vec<u32>,
}

impl RelationTensors {
    pub fn src_indices(&self) -> &[u32] {
        &self.src_host
    }

    pub fn dst_indices(&self) -> &[u32] {
        &self.dst_host
    }
}

/// Node features and edge indices of a [`HeteroGraph`] on one device.
pub struct GraphTensors {
    device: Device,
    features: BTreeMap<NodeType, Tensor>,
    num_nodes: BTreeMap<NodeType, usize>,
    relations: BTreeMap<RelationType, RelationTensors>,
}

impl GraphTensors {
    pub fn from_graph(graph: &HeteroGraph, device: &Device) -> ModelResult<Self> {
        let mut features = BTreeMap::new();
        let mut num_nodes = BTreeMap::new();
        for store in graph.node_stores() {
            let n = store.num_nodes();
            let width = store.feature_width();
            if width == 0 {
                return Err(ModelError::Config(format!(
                    "node type {} has no feature columns",
                    store.node_type
                )));
            }
            let x = Tensor::from_slice(store.features.data(), (n, width), device)?;
            features.insert(store.node_type, x);
            num_nodes.insert(store.node_type, n);
        }

        let mut relations = BTreeMap::new();
        for store in graph.edge_stores() {
            let num_dst = num_nodes
                .get(&store.relation.target())
                .copied()
                .unwrap_or(0);
            let degree = store.in_degree(num_dst);
            let clamped: Vec<f32> = degree.iter().map(|d| (*d).max(1) as f32).collect();
            let mask: Vec<f32> = degree
                .iter()
                .map(|d| if *d > 0 { 1.0 } else { 0.0 })
                .collect();
            let e = store.num_edges();
            relations.insert(
                store.relation,
                RelationTensors {
                    relation: store.relation,
                    num_edges: e,
                    src: Tensor::from_slice(&store.src, e, device)?,
                    dst: Tensor::from_slice(&store.dst, e, device)?,
                    degree: Tensor::from_vec(clamped, (num_dst, 1), device)?,
                    has_incoming: Tensor::from_vec(mask, (num_dst, 1), device)?,
                    src_host: store.src.clone(),
                    dst_host: store.dst.clone(),
                },
            );
        }

        Ok(Self {
            device: device.clone(),
            features,
            num_nodes,
            relations,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn features(&self, node_type: NodeType) -> ModelResult<&Tensor> {
        self.features
            .get(&node_type)
            .ok_or_else(|| ModelError::Config(format!("graph has no {} nodes", node_type)))
    }

    pub fn all_features(&self) -> &BTreeMap<NodeType, Tensor> {
        &self.features
    }

    pub fn num_nodes(&self, node_type: NodeType) -> usize {
        self.num_nodes.get(&node_type).copied().unwrap_or(0)
    }

    pub fn feature_width(&self, node_type: NodeType) -> usize {
        self.features
            .get(&node_type)
            .and_then(|x| x.dims().get(1).copied())
            .unwrap_or(0)
    }

    /// Relations with at least one edge, in relation order.
    pub fn active_relations(&self) -> impl Iterator<Item = &RelationTensors> {
        self.relations.values().filter(|r| r.num_edges > 0)
    }

    pub fn relation(&self, relation: RelationType) -> Option<&RelationTensors> {
        self.relations.get(&relation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fraud_graph_core::{EdgeRow, EntityRow, TabularSnapshot};
    use fraud_graph_graph::GraphAssembler;

    fn graph() -> HeteroGraph {
        let mut s = TabularSnapshot::default();
        s.nodes.insert(
            NodeType::Account,
            vec![
                EntityRow::new("A1").with_numeric("total_amount", 10.0),
                EntityRow::new("A2").with_numeric("total_amount", 20.0),
            ],
        );
        s.nodes.insert(NodeType::Merchant, vec![EntityRow::new("M1")]);
        s.nodes.insert(NodeType::Device, vec![EntityRow::new("D1")]);
        s.edges.insert(
            RelationType::TransactsWith,
            vec![EdgeRow::new("A1", "M1"), EdgeRow::new("A2", "M1")],
        );
        GraphAssembler::default().assemble(&s).unwrap()
    }

    #[test]
    fn test_shapes_follow_graph() {
        let g = graph();
        let t = GraphTensors::from_graph(&g, &Device::Cpu).unwrap();
        assert_eq!(t.features(NodeType::Account).unwrap().dims()[0], 2);
        assert_eq!(
            t.feature_width(NodeType::Account),
            g.node_store(NodeType::Account).unwrap().feature_width()
        );
        let rel = t.relation(RelationType::TransactsWith).unwrap();
        assert_eq!(rel.num_edges, 2);
        let degree: Vec<Vec<f32>> = rel.degree.to_vec2().unwrap();
        assert_eq!(degree, vec![vec![2.0]]);
    }

    #[test]
    fn test_empty_relations_are_inactive() {
        let g = graph();
        let t = GraphTensors::from_graph(&g, &Device::Cpu).unwrap();
        let active: Vec<RelationType> = t.active_relations().map(|r| r.relation).collect();
        assert!(active.contains(&RelationType::TransactsWith));
        assert!(!active.contains(&RelationType::Uses));
    }
}
