//! Error types for fraud-graph-model.

use std::path::PathBuf;

use thiserror::Error;

use fraud_graph_core::CoreError;
use fraud_graph_graph::GraphError;

use crate::training::TrainingState;

/// Errors from tensor computation, training orchestration and checkpoints.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Operation not allowed in state {actual:?}; expected {expected}")]
    InvalidState {
        expected: String,
        actual: TrainingState,
    },

    #[error("Invalid split ratio {field}={value}: {message}")]
    InvalidRatio {
        field: String,
        value: f64,
        message: String,
    },

    #[error("Split partition '{partition}' is empty")]
    EmptyPartition { partition: String },

    #[error("Graph has no {node_type} labels to train on")]
    MissingLabels { node_type: String },

    #[error("Invalid model configuration: {0}")]
    Config(String),

    #[error("Checkpoint error at {}: {message}", path.display())]
    Checkpoint { path: PathBuf, message: String },

    #[error("Checkpoint is missing parameter '{name}'")]
    MissingParameter { name: String },

    #[error("Parameter '{name}' has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Serialization(err.to_string())
    }
}

impl From<safetensors::SafeTensorError> for ModelError {
    fn from(err: safetensors::SafeTensorError) -> Self {
        ModelError::Serialization(format!("safetensors: {}", err))
    }
}

/// Result type alias for model operations.
pub type ModelResult<T> = Result<T, ModelError>;
