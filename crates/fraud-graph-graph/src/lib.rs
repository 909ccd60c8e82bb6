//! Heterogeneous graph construction for fraud-graph.
//!
//! Turns entity and relation tables into a typed graph:
//!
//! - [`normalizer`]: column selection, `log1p`, standardization, categorical encoding
//! - [`mapping`]: original id <-> dense index per node type
//! - [`assembler`]: node stores, forward edges, synthesized reverse edges
//! - [`stats`]: statistics computed once at build
//! - [`artifact`]: three-file on-disk artifact (`graph.bin`, `node_mappings.json`,
//!   `graph_stats.json`) sharing one artifact id
//!
//! # Example
//!
//! ```rust,ignore
//! use fraud_graph_graph::{artifact, GraphAssembler};
//!
//! let graph = GraphAssembler::new(config.features.clone()).assemble(&snapshot)?;
//! artifact::save_graph(&graph, &config.data.artifact_dir)?;
//! ```

pub mod artifact;
pub mod assembler;
pub mod error;
pub mod mapping;
pub mod normalizer;
pub mod stats;

pub use assembler::{
    add_reverse_edges, build_edges, create_node_mappings, EdgeStore, GraphAssembler, HeteroGraph,
    NodeStore,
};
pub use error::{GraphError, GraphResult};
pub use mapping::{MappingOrdering, NodeMappings};
pub use normalizer::{ColumnStats, FeatureMatrix, FeatureNormalizer, NormalizedFeatures};
pub use stats::GraphStats;
