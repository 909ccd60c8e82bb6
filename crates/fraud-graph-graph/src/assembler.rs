//! Heterogeneous graph assembly from entity and relation tables.

use std::collections::{BTreeMap, HashSet};

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use fraud_graph_core::{
    EdgeRow, EntityRow, FeatureSpec, FeaturesConfig, NodeType, RelationType, TabularSnapshot,
};

use crate::error::{GraphError, GraphResult};
use crate::mapping::NodeMappings;
use crate::normalizer::{FeatureMatrix, FeatureNormalizer};
use crate::stats::GraphStats;

/// Nodes of one type: feature matrix (row `i` is index `i`) and optional labels.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NodeStore {
    pub node_type: NodeType,
    pub features: FeatureMatrix,
    pub labels: Option<Vec<bool>>,
}

impl NodeStore {
    pub fn num_nodes(&self) -> usize {
        self.features.rows()
    }

    pub fn feature_width(&self) -> usize {
        self.features.cols()
    }
}

/// Edges of one relation as parallel index arrays.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EdgeStore {
    pub relation: RelationType,
    pub src: Vec<u32>,
    pub dst: Vec<u32>,
    /// One row per edge; zero columns when the relation has no features.
    pub features: FeatureMatrix,
    pub labels: Option<Vec<bool>>,
}

impl EdgeStore {
    pub fn num_edges(&self) -> usize {
        self.src.len()
    }

    /// Incoming edge count per destination index.
    pub fn in_degree(&self, num_dst: usize) -> Vec<usize> {
        let mut degree = vec![0; num_dst];
        for &d in &self.dst {
            if let Some(slot) = degree.get_mut(d as usize) {
                *slot += 1;
            }
        }
        degree
    }
}

/// Immutable typed graph: node stores, edge stores, mappings and statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct HeteroGraph {
    artifact_id: Uuid,
    nodes: BTreeMap<NodeType, NodeStore>,
    edges: BTreeMap<RelationType, EdgeStore>,
    mappings: NodeMappings,
    stats: GraphStats,
}

impl HeteroGraph {
    pub(crate) fn from_parts(
        artifact_id: Uuid,
        nodes: BTreeMap<NodeType, NodeStore>,
        edges: BTreeMap<RelationType, EdgeStore>,
        mappings: NodeMappings,
        stats: GraphStats,
    ) -> Self {
        Self {
            artifact_id,
            nodes,
            edges,
            mappings,
            stats,
        }
    }

    /// Id shared by the three artifact files this graph is saved as.
    pub fn artifact_id(&self) -> Uuid {
        self.artifact_id
    }

    pub fn node_store(&self, node_type: NodeType) -> Option<&NodeStore> {
        self.nodes.get(&node_type)
    }

    pub fn edge_store(&self, relation: RelationType) -> Option<&EdgeStore> {
        self.edges.get(&relation)
    }

    pub fn node_stores(&self) -> impl Iterator<Item = &NodeStore> {
        self.nodes.values()
    }

    pub fn edge_stores(&self) -> impl Iterator<Item = &EdgeStore> {
        self.edges.values()
    }

    pub fn num_nodes(&self, node_type: NodeType) -> usize {
        self.nodes.get(&node_type).map_or(0, NodeStore::num_nodes)
    }

    pub fn mappings(&self) -> &NodeMappings {
        &self.mappings
    }

    pub fn stats(&self) -> &GraphStats {
        &self.stats
    }

    /// Account labels, one per account index.
    pub fn account_labels(&self) -> Option<&[bool]> {
        self.nodes
            .get(&NodeType::Account)
            .and_then(|s| s.labels.as_deref())
    }
}

/// Assign dense indices per node type in input order.
pub fn create_node_mappings(snapshot: &TabularSnapshot) -> NodeMappings {
    let mut mappings = NodeMappings::default();
    for node_type in NodeType::ALL {
        mappings.insert_ids(
            node_type,
            snapshot.nodes_of(node_type).iter().map(|r| r.id.as_str()),
        );
    }
    mappings
}

/// Map one forward relation table to index arrays.
///
/// Rows whose endpoints are not in `mappings` are dropped; the number dropped
/// is returned with the store. Edge features are normalized over the kept rows.
pub fn build_edges(
    relation: RelationType,
    rows: &[EdgeRow],
    mappings: &NodeMappings,
    spec: Option<&FeatureSpec>,
) -> GraphResult<(EdgeStore, usize)> {
    if !relation.is_forward() {
        return Err(GraphError::NotForward { relation });
    }

    let mut src = Vec::with_capacity(rows.len());
    let mut dst = Vec::with_capacity(rows.len());
    let mut kept: Vec<&EdgeRow> = Vec::with_capacity(rows.len());

    for row in rows {
        let s = mappings.index_of(relation.source(), &row.src_id);
        let d = mappings.index_of(relation.target(), &row.dst_id);
        match (s, d) {
            (Some(s), Some(d)) => {
                src.push(s as u32);
                dst.push(d as u32);
                kept.push(row);
            }
            _ => {
                debug!(
                    relation = relation.as_str(),
                    src = %row.src_id,
                    dst = %row.dst_id,
                    "Dropping edge with unknown endpoint"
                );
            }
        }
    }
    let dropped = rows.len() - kept.len();

    let features = match spec {
        Some(spec) => FeatureNormalizer::new(spec).transform(&kept).matrix,
        None => FeatureMatrix::empty(kept.len()),
    };

    let labels = relation
        .carries_labels()
        .then(|| kept.iter().map(|r| r.label.unwrap_or(false)).collect());

    Ok((
        EdgeStore {
            relation,
            src,
            dst,
            features,
            labels,
        },
        dropped,
    ))
}

/// Reverse relation: endpoints swapped, no labels, features only when the
/// relation is symmetric.
pub fn add_reverse_edges(forward: &EdgeStore) -> EdgeStore {
    let relation = forward.relation.reverse();
    let features = if forward.relation.mirrors_features() {
        forward.features.clone()
    } else {
        FeatureMatrix::empty(forward.num_edges())
    };
    EdgeStore {
        relation,
        src: forward.dst.clone(),
        dst: forward.src.clone(),
        features,
        labels: None,
    }
}

/// Builds a [`HeteroGraph`] from a [`TabularSnapshot`].
#[derive(Debug, Clone, Default)]
pub struct GraphAssembler {
    features: FeaturesConfig,
}

impl GraphAssembler {
    pub fn new(features: FeaturesConfig) -> Self {
        Self { features }
    }

    pub fn assemble(&self, snapshot: &TabularSnapshot) -> GraphResult<HeteroGraph> {
        for node_type in NodeType::ALL {
            if snapshot.nodes_of(node_type).is_empty() {
                return Err(GraphError::EmptyNodeType { node_type });
            }
        }
        self.features.validate()?;

        let mappings = create_node_mappings(snapshot);

        let mut nodes = BTreeMap::new();
        let mut node_feature_stats = BTreeMap::new();
        for node_type in NodeType::ALL {
            let rows = first_occurrences(snapshot.nodes_of(node_type));
            let duplicates = mappings.duplicates(node_type);
            if duplicates > 0 {
                warn!(node_type = %node_type, duplicates, "Ignoring repeated entity ids");
            }
            let normalized =
                FeatureNormalizer::new(self.features.node_spec(node_type)).transform(&rows);
            let labels = rows
                .iter()
                .any(|r| r.label.is_some())
                .then(|| rows.iter().map(|r| r.label.unwrap_or(false)).collect());
            node_feature_stats.insert(node_type, normalized.stats);
            nodes.insert(
                node_type,
                NodeStore {
                    node_type,
                    features: normalized.matrix,
                    labels,
                },
            );
        }

        let mut edges = BTreeMap::new();
        let mut dropped_edges = BTreeMap::new();
        for relation in RelationType::FORWARD {
            let (forward, dropped) = build_edges(
                relation,
                snapshot.edges_of(relation),
                &mappings,
                self.features.edge_spec(relation),
            )?;
            if dropped > 0 {
                warn!(relation = relation.as_str(), dropped, "Dropped edges with unknown endpoints");
            }
            debug!(
                relation = relation.as_str(),
                edges = forward.num_edges(),
                "Built relation"
            );
            dropped_edges.insert(relation, dropped);
            let reverse = add_reverse_edges(&forward);
            edges.insert(reverse.relation, reverse);
            edges.insert(relation, forward);
        }

        let stats = compute_stats(&nodes, &edges, &mappings, dropped_edges, node_feature_stats);
        info!(
            nodes = stats.total_nodes(),
            edges = stats.total_edges(),
            dropped = stats.total_dropped_edges(),
            fraud_accounts = stats.fraud_accounts,
            transaction_fraud_rate = stats.transaction_fraud_rate,
            "Assembled heterogeneous graph"
        );

        Ok(HeteroGraph::from_parts(
            Uuid::new_v4(),
            nodes,
            edges,
            mappings,
            stats,
        ))
    }
}

/// Rows in index order: the first row for each id.
fn first_occurrences(rows: &[EntityRow]) -> Vec<&EntityRow> {
    let mut seen = HashSet::with_capacity(rows.len());
    rows.iter()
        .filter(|r| seen.insert(r.id.as_str()))
        .collect()
}

fn compute_stats(
    nodes: &BTreeMap<NodeType, NodeStore>,
    edges: &BTreeMap<RelationType, EdgeStore>,
    mappings: &NodeMappings,
    dropped_edges: BTreeMap<RelationType, usize>,
    node_feature_stats: BTreeMap<NodeType, Vec<crate::normalizer::ColumnStats>>,
) -> GraphStats {
    let (fraud_tx, labelled_tx) = edges
        .values()
        .filter_map(|e| e.labels.as_ref())
        .flatten()
        .fold((0usize, 0usize), |(f, n), &l| (f + usize::from(l), n + 1));

    let account_labels = nodes
        .get(&NodeType::Account)
        .and_then(|s| s.labels.as_ref());

    GraphStats {
        built_at: Utc::now(),
        node_counts: nodes.iter().map(|(t, s)| (*t, s.num_nodes())).collect(),
        edge_counts: edges.iter().map(|(r, e)| (*r, e.num_edges())).collect(),
        dropped_edges,
        duplicate_nodes: NodeType::ALL
            .iter()
            .map(|t| (*t, mappings.duplicates(*t)))
            .collect(),
        node_feature_widths: nodes.iter().map(|(t, s)| (*t, s.feature_width())).collect(),
        edge_feature_widths: edges.iter().map(|(r, e)| (*r, e.features.cols())).collect(),
        node_feature_stats,
        transaction_fraud_rate: if labelled_tx == 0 {
            0.0
        } else {
            fraud_tx as f64 / labelled_tx as f64
        },
        fraud_accounts: account_labels.map_or(0, |l| l.iter().filter(|x| **x).count()),
        labelled_accounts: account_labels.map_or(0, Vec::len),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> TabularSnapshot {
        let mut s = TabularSnapshot::default();
        s.nodes.insert(
            NodeType::Account,
            vec![
                EntityRow::new("A1").with_numeric("total_amount", 10.0).with_label(true),
                EntityRow::new("A2").with_numeric("total_amount", 20.0).with_label(false),
            ],
        );
        s.nodes.insert(NodeType::Merchant, vec![EntityRow::new("M1")]);
        s.nodes.insert(NodeType::Device, vec![EntityRow::new("D1")]);
        s.edges.insert(
            RelationType::TransactsWith,
            vec![
                EdgeRow::new("A1", "M1")
                    .with_numeric("transaction_amount", 5.0)
                    .with_label(true),
                EdgeRow::new("A2", "M1")
                    .with_numeric("transaction_amount", 7.0)
                    .with_label(false),
                EdgeRow::new("A9", "M1").with_label(true),
            ],
        );
        s.edges.insert(
            RelationType::Shares,
            vec![
                EdgeRow::new("A1", "D1").with_numeric("transaction_count", 3.0),
                EdgeRow::new("A2", "D1").with_numeric("transaction_count", 1.0),
            ],
        );
        s
    }

    #[test]
    fn test_dangling_rows_are_dropped_and_counted() {
        let graph = GraphAssembler::default().assemble(&snapshot()).unwrap();
        let tx = graph.edge_store(RelationType::TransactsWith).unwrap();
        assert_eq!(tx.num_edges(), 2);
        assert_eq!(graph.stats().dropped_edges[&RelationType::TransactsWith], 1);
        assert_eq!(tx.labels.as_deref(), Some(&[true, false][..]));
        assert!((graph.stats().transaction_fraud_rate - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_reverse_edges_swap_endpoints_without_labels() {
        let graph = GraphAssembler::default().assemble(&snapshot()).unwrap();
        let fwd = graph.edge_store(RelationType::TransactsWith).unwrap();
        let rev = graph.edge_store(RelationType::RevTransactsWith).unwrap();
        assert_eq!(rev.src, fwd.dst);
        assert_eq!(rev.dst, fwd.src);
        assert!(rev.labels.is_none());
        assert_eq!(rev.features.cols(), 0);
        assert_eq!(rev.features.rows(), fwd.num_edges());
    }

    #[test]
    fn test_shared_device_features_are_mirrored() {
        let graph = GraphAssembler::default().assemble(&snapshot()).unwrap();
        let fwd = graph.edge_store(RelationType::Shares).unwrap();
        let rev = graph.edge_store(RelationType::SharedBy).unwrap();
        assert_eq!(fwd.features.cols(), 2);
        assert_eq!(rev.features, fwd.features);
    }

    #[test]
    fn test_empty_node_type_is_rejected() {
        let mut s = snapshot();
        s.nodes.insert(NodeType::Device, Vec::new());
        let err = GraphAssembler::default().assemble(&s).unwrap_err();
        assert!(matches!(
            err,
            GraphError::EmptyNodeType {
                node_type: NodeType::Device
            }
        ));
    }

    #[test]
    fn test_missing_relation_table_gives_empty_store() {
        let graph = GraphAssembler::default().assemble(&snapshot()).unwrap();
        let uses = graph.edge_store(RelationType::Uses).unwrap();
        assert_eq!(uses.num_edges(), 0);
        assert_eq!(uses.features.cols(), 1);
    }

    #[test]
    fn test_build_edges_rejects_reverse_relation() {
        let mappings = create_node_mappings(&snapshot());
        assert!(build_edges(RelationType::UsedBy, &[], &mappings, None).is_err());
    }

    #[test]
    fn test_duplicate_entities_keep_first_row() {
        let mut s = snapshot();
        s.nodes.get_mut(&NodeType::Merchant).unwrap().extend([
            EntityRow::new("M2"),
            EntityRow::new("M1"),
        ]);
        let graph = GraphAssembler::default().assemble(&s).unwrap();
        assert_eq!(graph.num_nodes(NodeType::Merchant), 2);
        assert_eq!(graph.stats().duplicate_nodes[&NodeType::Merchant], 1);
    }

    #[test]
    fn test_in_degree() {
        let graph = GraphAssembler::default().assemble(&snapshot()).unwrap();
        let rev = graph.edge_store(RelationType::RevTransactsWith).unwrap();
        assert_eq!(rev.in_degree(2), vec![1, 1]);
        assert_eq!(graph.account_labels(), Some(&[true, false][..]));
    }
}
