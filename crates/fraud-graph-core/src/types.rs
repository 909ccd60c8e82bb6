//! Node, relation and record types shared across the workspace.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Entity category in the typed graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Account,
    Merchant,
    Device,
}

impl NodeType {
    /// All node types in canonical order. Flattened index spaces follow this order.
    pub const ALL: [NodeType; 3] = [NodeType::Account, NodeType::Merchant, NodeType::Device];

    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Account => "account",
            NodeType::Merchant => "merchant",
            NodeType::Device => "device",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named, directed edge category.
///
/// Every forward relation has a synthesized reverse so that messages can flow
/// back into accounts during propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    /// account -> merchant, one edge per transaction.
    TransactsWith,
    /// merchant -> account.
    RevTransactsWith,
    /// account -> device, one edge per transaction with a device.
    Uses,
    /// device -> account.
    UsedBy,
    /// account -> device, one edge per (device, account) pair on a shared device.
    Shares,
    /// device -> account.
    SharedBy,
}

impl RelationType {
    /// Relations built from input tables.
    pub const FORWARD: [RelationType; 3] = [
        RelationType::TransactsWith,
        RelationType::Uses,
        RelationType::Shares,
    ];

    /// All relations; the position in this array is the relation id.
    pub const ALL: [RelationType; 6] = [
        RelationType::TransactsWith,
        RelationType::RevTransactsWith,
        RelationType::Uses,
        RelationType::UsedBy,
        RelationType::Shares,
        RelationType::SharedBy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::TransactsWith => "transacts_with",
            RelationType::RevTransactsWith => "rev_transacts_with",
            RelationType::Uses => "uses",
            RelationType::UsedBy => "used_by",
            RelationType::Shares => "shares",
            RelationType::SharedBy => "shared_by",
        }
    }

    /// Node type at the tail of the edge.
    pub fn source(&self) -> NodeType {
        match self {
            RelationType::TransactsWith | RelationType::Uses | RelationType::Shares => {
                NodeType::Account
            }
            RelationType::RevTransactsWith => NodeType::Merchant,
            RelationType::UsedBy | RelationType::SharedBy => NodeType::Device,
        }
    }

    /// Node type at the head of the edge.
    pub fn target(&self) -> NodeType {
        match self {
            RelationType::TransactsWith => NodeType::Merchant,
            RelationType::Uses | RelationType::Shares => NodeType::Device,
            RelationType::RevTransactsWith | RelationType::UsedBy | RelationType::SharedBy => {
                NodeType::Account
            }
        }
    }

    pub fn reverse(&self) -> RelationType {
        match self {
            RelationType::TransactsWith => RelationType::RevTransactsWith,
            RelationType::RevTransactsWith => RelationType::TransactsWith,
            RelationType::Uses => RelationType::UsedBy,
            RelationType::UsedBy => RelationType::Uses,
            RelationType::Shares => RelationType::SharedBy,
            RelationType::SharedBy => RelationType::Shares,
        }
    }

    pub fn is_forward(&self) -> bool {
        Self::FORWARD.contains(self)
    }

    /// Only transaction edges carry fraud labels.
    pub fn carries_labels(&self) -> bool {
        matches!(self, RelationType::TransactsWith)
    }

    /// Whether the reverse relation keeps the forward edge features.
    ///
    /// Shared-device pair statistics read the same in both directions;
    /// per-transaction attributes do not.
    pub fn mirrors_features(&self) -> bool {
        matches!(self, RelationType::Shares)
    }

    /// Dense relation id (position in [`RelationType::ALL`]).
    pub fn id(&self) -> usize {
        Self::ALL
            .iter()
            .position(|r| r == self)
            .unwrap_or_default()
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -[{}]-> {}",
            self.source(),
            self.as_str(),
            self.target()
        )
    }
}

/// One row of the input tabular interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: Option<String>,
    pub account_id: String,
    pub merchant_id: String,
    pub device_id: Option<String>,
    pub transaction_amount: f64,
    pub transaction_timestamp: DateTime<Utc>,
    pub is_fraud: bool,
    pub device_type: Option<String>,
    pub country: Option<String>,
    pub merchant_category: Option<String>,
}

impl TransactionRecord {
    /// Create a record with the required fields; optional metadata stays empty.
    pub fn new(
        account_id: impl Into<String>,
        merchant_id: impl Into<String>,
        device_id: Option<String>,
        transaction_amount: f64,
        transaction_timestamp: DateTime<Utc>,
        is_fraud: bool,
    ) -> Self {
        Self {
            transaction_id: None,
            account_id: account_id.into(),
            merchant_id: merchant_id.into(),
            device_id,
            transaction_amount,
            transaction_timestamp,
            is_fraud,
            device_type: None,
            country: None,
            merchant_category: None,
        }
    }

    pub fn with_transaction_id(mut self, id: impl Into<String>) -> Self {
        self.transaction_id = Some(id.into());
        self
    }

    pub fn with_device_type(mut self, device_type: impl Into<String>) -> Self {
        self.device_type = Some(device_type.into());
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_merchant_category(mut self, category: impl Into<String>) -> Self {
        self.merchant_category = Some(category.into());
        self
    }
}

/// Aggregated attributes of one entity (account, merchant or device).
///
/// Absent keys are treated as missing and filled with zero by the normalizer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityRow {
    pub id: String,
    pub numeric: BTreeMap<String, f64>,
    pub categorical: BTreeMap<String, String>,
    /// Node-level fraud label, defined for accounts only.
    pub label: Option<bool>,
}

impl EntityRow {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_numeric(mut self, column: impl Into<String>, value: f64) -> Self {
        self.numeric.insert(column.into(), value);
        self
    }

    pub fn with_categorical(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.categorical.insert(column.into(), value.into());
        self
    }

    pub fn with_label(mut self, label: bool) -> Self {
        self.label = Some(label);
        self
    }
}

/// One row of a relation table, addressed by original ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeRow {
    pub src_id: String,
    pub dst_id: String,
    pub numeric: BTreeMap<String, f64>,
    pub label: Option<bool>,
}

impl EdgeRow {
    pub fn new(src_id: impl Into<String>, dst_id: impl Into<String>) -> Self {
        Self {
            src_id: src_id.into(),
            dst_id: dst_id.into(),
            ..Default::default()
        }
    }

    pub fn with_numeric(mut self, column: impl Into<String>, value: f64) -> Self {
        self.numeric.insert(column.into(), value);
        self
    }

    pub fn with_label(mut self, label: bool) -> Self {
        self.label = Some(label);
        self
    }
}

/// Entity and relation tables for one dataset snapshot.
///
/// This is the contract the relational layer hands to graph assembly. Only
/// forward relations are present; reverses are synthesized by the assembler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TabularSnapshot {
    pub nodes: BTreeMap<NodeType, Vec<EntityRow>>,
    pub edges: BTreeMap<RelationType, Vec<EdgeRow>>,
}

impl TabularSnapshot {
    pub fn nodes_of(&self, node_type: NodeType) -> &[EntityRow] {
        self.nodes.get(&node_type).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn edges_of(&self, relation: RelationType) -> &[EdgeRow] {
        self.edges.get(&relation).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_is_involution() {
        for relation in RelationType::ALL {
            assert_eq!(relation.reverse().reverse(), relation);
            assert_eq!(relation.reverse().source(), relation.target());
            assert_eq!(relation.reverse().target(), relation.source());
        }
    }

    #[test]
    fn test_forward_relations_start_at_accounts() {
        for relation in RelationType::FORWARD {
            assert!(relation.is_forward());
            assert!(!relation.reverse().is_forward());
            assert_eq!(relation.source(), NodeType::Account);
        }
    }

    #[test]
    fn test_relation_ids_are_dense() {
        let ids: Vec<usize> = RelationType::ALL.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_only_transactions_carry_labels() {
        let labelled: Vec<_> = RelationType::ALL
            .iter()
            .filter(|r| r.carries_labels())
            .collect();
        assert_eq!(labelled, vec![&RelationType::TransactsWith]);
    }

    #[test]
    fn test_node_type_serializes_lowercase() {
        let json = serde_json::to_string(&NodeType::Merchant).unwrap();
        assert_eq!(json, "\"merchant\"");
        let rel = serde_json::to_string(&RelationType::RevTransactsWith).unwrap();
        assert_eq!(rel, "\"rev_transacts_with\"");
    }

    #[test]
    fn test_snapshot_missing_tables_are_empty() {
        let snapshot = TabularSnapshot::default();
        assert!(snapshot.nodes_of(NodeType::Device).is_empty());
        assert!(snapshot.edges_of(RelationType::Shares).is_empty());
    }
}
