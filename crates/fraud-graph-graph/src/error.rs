//! Error types for graph assembly and graph artifacts.

use std::path::PathBuf;

use thiserror::Error;

use fraud_graph_core::{CoreError, NodeType, RelationType};

/// Errors from feature normalization, graph assembly and artifact I/O.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A node type has no rows. Raised before any edge work.
    #[error("Node type '{node_type}' has no rows; every node type needs at least one entity")]
    EmptyNodeType { node_type: NodeType },

    #[error("Relation {relation} is not a forward relation")]
    NotForward { relation: RelationType },

    #[error("Graph artifact file missing: {}", path.display())]
    MissingArtifactFile { path: PathBuf },

    #[error("Artifact id mismatch in {}: expected {expected}, found {found}", path.display())]
    ArtifactIdMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("Unsupported format version in {}: expected {expected}, found {found}", path.display())]
    FormatVersion {
        path: PathBuf,
        expected: u32,
        found: u32,
    },

    #[error("Corrupt graph artifact {}: {message}", path.display())]
    Corrupt { path: PathBuf, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<bincode::Error> for GraphError {
    fn from(err: bincode::Error) -> Self {
        GraphError::Serialization(format!("bincode: {}", err))
    }
}

impl From<serde_json::Error> for GraphError {
    fn from(err: serde_json::Error) -> Self {
        GraphError::Serialization(format!("json: {}", err))
    }
}

/// Result type alias for graph operations.
pub type GraphResult<T> = Result<T, GraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_node_type_names_type() {
        let err = GraphError::EmptyNodeType {
            node_type: NodeType::Device,
        };
        assert!(err.to_string().contains("device"));
    }

    #[test]
    fn test_id_mismatch_names_file() {
        let err = GraphError::ArtifactIdMismatch {
            path: PathBuf::from("out/graph_stats.json"),
            expected: "a".into(),
            found: "b".into(),
        };
        assert!(err.to_string().contains("graph_stats.json"));
    }
}
