//! Build statistics, computed once when the graph is assembled.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fraud_graph_core::{NodeType, RelationType};

use crate::normalizer::ColumnStats;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub built_at: DateTime<Utc>,
    pub node_counts: BTreeMap<NodeType, usize>,
    pub edge_counts: BTreeMap<RelationType, usize>,
    /// Rows dropped per forward relation because an endpoint id was unknown.
    pub dropped_edges: BTreeMap<RelationType, usize>,
    /// Repeated entity ids ignored per node type.
    pub duplicate_nodes: BTreeMap<NodeType, usize>,
    pub node_feature_widths: BTreeMap<NodeType, usize>,
    pub edge_feature_widths: BTreeMap<RelationType, usize>,
    /// Per-column normalization statistics per node type.
    pub node_feature_stats: BTreeMap<NodeType, Vec<ColumnStats>>,
    /// Fraction of labelled transaction edges that are fraudulent.
    pub transaction_fraud_rate: f64,
    pub fraud_accounts: usize,
    pub labelled_accounts: usize,
}

impl GraphStats {
    pub fn total_nodes(&self) -> usize {
        self.node_counts.values().sum()
    }

    pub fn total_edges(&self) -> usize {
        self.edge_counts.values().sum()
    }

    pub fn total_dropped_edges(&self) -> usize {
        self.dropped_edges.values().sum()
    }

    /// Fraction of labelled accounts that are fraudulent.
    pub fn account_fraud_rate(&self) -> f64 {
        if self.labelled_accounts == 0 {
            0.0
        } else {
            self.fraud_accounts as f64 / self.labelled_accounts as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_totals_and_rates() {
        let mut stats = GraphStats {
            built_at: Utc::now(),
            node_counts: BTreeMap::new(),
            edge_counts: BTreeMap::new(),
            dropped_edges: BTreeMap::new(),
            duplicate_nodes: BTreeMap::new(),
            node_feature_widths: BTreeMap::new(),
            edge_feature_widths: BTreeMap::new(),
            node_feature_stats: BTreeMap::new(),
            transaction_fraud_rate: 0.0,
            fraud_accounts: 0,
            labelled_accounts: 0,
        };
        assert_eq!(stats.account_fraud_rate(), 0.0);

        stats.node_counts.insert(NodeType::Account, 10);
        stats.node_counts.insert(NodeType::Merchant, 3);
        stats.edge_counts.insert(RelationType::TransactsWith, 20);
        stats.edge_counts.insert(RelationType::RevTransactsWith, 20);
        stats.fraud_accounts = 2;
        stats.labelled_accounts = 10;
        assert_eq!(stats.total_nodes(), 13);
        assert_eq!(stats.total_edges(), 40);
        assert!((stats.account_fraud_rate() - 0.2).abs() < 1e-12);
    }
}
