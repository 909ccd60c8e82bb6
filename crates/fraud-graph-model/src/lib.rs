//! Fraud detection models over the fraud-graph heterogeneous graph.
//!
//! - [`encoder`]: message-passing encoders (GraphSAGE, GAT, R-GCN, identity)
//! - [`classifier`]: MLP heads producing one logit per account or per edge
//! - [`model`]: encoder and classifier sharing one parameter store
//! - [`training`]: stratified split, weighted loss, Adam, early stopping,
//!   checkpoints and prediction export, driven by [`TrainingOrchestrator`]
//! - [`metrics`]: threshold metrics, ROC-AUC, average precision, threshold sweep
//!
//! # Example
//!
//! ```rust,ignore
//! use fraud_graph_model::TrainingOrchestrator;
//!
//! let graph = fraud_graph_graph::artifact::load_graph(&config.data.artifact_dir)?;
//! let mut orchestrator = TrainingOrchestrator::new(&graph, &config)?
//!     .with_checkpoint_dir(&config.data.checkpoint_dir);
//! let report = orchestrator.run()?;
//! println!("{}", report.test);
//! ```

pub mod classifier;
pub mod encoder;
pub mod error;
pub mod metrics;
pub mod model;
pub mod nn;
pub mod training;

pub use classifier::{EdgeClassifier, FraudClassifier};
pub use encoder::{build_encoder, Embeddings, GraphTensors, MessagePassingEncoder};
pub use error::{ModelError, ModelResult};
pub use metrics::{ClassificationMetrics, ConfusionCounts, ThresholdSweep};
pub use model::{FraudModel, TARGET_NODE_TYPE};
pub use training::{
    EvaluationReport, Partition, PredictionsFile, StopReason, TrainingHistory,
    TrainingOrchestrator, TrainingState,
};
