//! Core types for the fraud-graph workspace.
//!
//! This crate holds everything the graph and model crates agree on:
//!
//! - [`types`]: node and relation types, raw transaction records and the
//!   per-entity rows produced by aggregation
//! - [`features`]: column specifications consumed by the feature normalizer
//! - [`config`]: layered configuration (`config/default.toml`, env overrides)
//! - [`ingest`]: CSV reading and aggregation of transactions into entity tables
//! - [`logging`]: tracing subscriber bootstrap for binaries
//!
//! # Example
//!
//! ```rust,ignore
//! use fraud_graph_core::ingest::{aggregate_transactions, read_transactions_csv};
//!
//! let loaded = read_transactions_csv("data/raw/transactions.csv")?;
//! let snapshot = aggregate_transactions(&loaded.records)?;
//! assert!(!snapshot.nodes_of(NodeType::Account).is_empty());
//! ```

pub mod config;
pub mod error;
pub mod features;
pub mod ingest;
pub mod logging;
pub mod types;

pub use config::{
    DataConfig, EncoderKind, FraudGraphConfig, LogFormat, LoggingConfig, MetricsConfig, ModelConfig,
    ThresholdMetric, TrainingConfig,
};
pub use error::{CoreError, CoreResult};
pub use features::{ColumnSpec, FeatureSpec, FeaturesConfig};
pub use types::{EdgeRow, EntityRow, NodeType, RelationType, TabularSnapshot, TransactionRecord};
