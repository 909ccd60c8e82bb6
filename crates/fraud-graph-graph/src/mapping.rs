//! Original id <-> dense index mappings per node type.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use fraud_graph_core::NodeType;

/// How indices were assigned. Recorded in the mapping artifact so consumers
/// know what row `i` means.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingOrdering {
    /// Index `i` is the `i`-th distinct id in input order.
    #[default]
    InputOrder,
}

/// Bijection between original ids and 0-based indices, per node type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeMappings {
    ordering: MappingOrdering,
    ids: BTreeMap<NodeType, Vec<String>>,
    index: BTreeMap<NodeType, HashMap<String, usize>>,
    duplicates: BTreeMap<NodeType, usize>,
}

impl NodeMappings {
    /// Assign indices to ids in input order. Repeated ids keep their first
    /// index and are counted as duplicates.
    pub fn insert_ids<'a, I>(&mut self, node_type: NodeType, ids: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let ordered = self.ids.entry(node_type).or_default();
        let index = self.index.entry(node_type).or_default();
        let mut duplicates = 0;
        for id in ids {
            if index.contains_key(id) {
                duplicates += 1;
                continue;
            }
            index.insert(id.to_string(), ordered.len());
            ordered.push(id.to_string());
        }
        *self.duplicates.entry(node_type).or_default() += duplicates;
    }

    /// Rebuild from stored ordered id lists (artifact load path).
    pub fn from_ordered(ordering: MappingOrdering, ids: BTreeMap<NodeType, Vec<String>>) -> Self {
        let index = ids
            .iter()
            .map(|(node_type, list)| {
                let map = list
                    .iter()
                    .enumerate()
                    .map(|(i, id)| (id.clone(), i))
                    .collect();
                (*node_type, map)
            })
            .collect();
        Self {
            ordering,
            ids,
            index,
            duplicates: BTreeMap::new(),
        }
    }

    pub fn ordering(&self) -> MappingOrdering {
        self.ordering
    }

    pub fn index_of(&self, node_type: NodeType, id: &str) -> Option<usize> {
        self.index.get(&node_type).and_then(|m| m.get(id)).copied()
    }

    pub fn id_of(&self, node_type: NodeType, index: usize) -> Option<&str> {
        self.ids
            .get(&node_type)
            .and_then(|ids| ids.get(index))
            .map(String::as_str)
    }

    pub fn len(&self, node_type: NodeType) -> usize {
        self.ids.get(&node_type).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, node_type: NodeType) -> bool {
        self.len(node_type) == 0
    }

    pub fn ids(&self, node_type: NodeType) -> &[String] {
        self.ids.get(&node_type).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn all_ids(&self) -> &BTreeMap<NodeType, Vec<String>> {
        &self.ids
    }

    /// Repeated ids seen while building (0 after an artifact load).
    pub fn duplicates(&self, node_type: NodeType) -> usize {
        self.duplicates.get(&node_type).copied().unwrap_or(0)
    }
}
