//! Sub-configuration structures for fraud-graph components.
//!
//! This module contains the individual configuration sections that make up
//! [`FraudGraphConfig`](super::FraudGraphConfig).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

// ============================================================================
// Logging
// ============================================================================

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

// ============================================================================
// Data locations
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataConfig {
    /// Raw transaction CSV.
    pub transactions_path: PathBuf,
    /// Directory holding `graph.bin`, `node_mappings.json`, `graph_stats.json`.
    pub artifact_dir: PathBuf,
    /// Directory holding `best_<model>.safetensors` and `predictions.json`.
    pub checkpoint_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            transactions_path: PathBuf::from("data/raw/transactions.csv"),
            artifact_dir: PathBuf::from("data/processed"),
            checkpoint_dir: PathBuf::from("models/checkpoints"),
        }
    }
}

// ============================================================================
// Model
// ============================================================================

/// Neighbor-aggregation algorithm.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub enum EncoderKind {
    /// Mean aggregation.
    #[default]
    #[serde(rename = "graphsage")]
    Sage,
    /// Multi-head attention aggregation.
    #[serde(rename = "gat")]
    Gat,
    /// Relation-specific weights with optional basis decomposition.
    #[serde(rename = "rgcn")]
    Rgcn,
    /// No propagation; node features pass straight to the classifier.
    #[serde(rename = "identity")]
    Identity,
}

impl EncoderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncoderKind::Sage => "graphsage",
            EncoderKind::Gat => "gat",
            EncoderKind::Rgcn => "rgcn",
            EncoderKind::Identity => "identity",
        }
    }
}

impl std::fmt::Display for EncoderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EncoderKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "graphsage" | "sage" => Ok(EncoderKind::Sage),
            "gat" => Ok(EncoderKind::Gat),
            "rgcn" => Ok(EncoderKind::Rgcn),
            "identity" => Ok(EncoderKind::Identity),
            other => Err(CoreError::ValidationError {
                field: "model.kind".into(),
                message: format!(
                    "unknown encoder '{}', expected graphsage, gat, rgcn or identity",
                    other
                ),
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub kind: EncoderKind,
    #[serde(default = "default_hidden_channels")]
    pub hidden_channels: usize,
    /// Embedding width produced by the final encoder layer.
    #[serde(default = "default_out_channels")]
    pub out_channels: usize,
    #[serde(default = "default_num_layers")]
    pub num_layers: usize,
    /// Attention heads (attention encoder only).
    #[serde(default = "default_heads")]
    pub heads: usize,
    /// Shared weight bases (relation-basis encoder only). `None` uses full
    /// per-relation weights.
    #[serde(default)]
    pub num_bases: Option<usize>,
    #[serde(default = "default_dropout")]
    pub dropout: f64,
    #[serde(default = "default_classifier_hidden")]
    pub classifier_hidden: usize,
    /// L2-normalize mean-aggregation outputs per row.
    #[serde(default = "default_true")]
    pub normalize_embeddings: bool,
}

fn default_hidden_channels() -> usize {
    128
}

fn default_out_channels() -> usize {
    64
}

fn default_num_layers() -> usize {
    3
}

fn default_heads() -> usize {
    4
}

fn default_dropout() -> f64 {
    0.2
}

fn default_classifier_hidden() -> usize {
    64
}

fn default_true() -> bool {
    true
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            kind: EncoderKind::default(),
            hidden_channels: default_hidden_channels(),
            out_channels: default_out_channels(),
            num_layers: default_num_layers(),
            heads: default_heads(),
            num_bases: None,
            dropout: default_dropout(),
            classifier_hidden: default_classifier_hidden(),
            normalize_embeddings: true,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if self.hidden_channels == 0 || self.out_channels == 0 || self.classifier_hidden == 0 {
            return Err(CoreError::ValidationError {
                field: "model".into(),
                message: "hidden_channels, out_channels and classifier_hidden must be > 0".into(),
            });
        }
        if self.num_layers == 0 {
            return Err(CoreError::ValidationError {
                field: "model.num_layers".into(),
                message: "must be > 0".into(),
            });
        }
        if self.heads == 0 {
            return Err(CoreError::ValidationError {
                field: "model.heads".into(),
                message: "must be > 0".into(),
            });
        }
        if self.num_bases == Some(0) {
            return Err(CoreError::ValidationError {
                field: "model.num_bases".into(),
                message: "must be > 0 when set".into(),
            });
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(CoreError::ValidationError {
                field: "model.dropout".into(),
                message: format!("must be in [0, 1), got {}", self.dropout),
            });
        }
        if self.classifier_hidden < 2 {
            return Err(CoreError::ValidationError {
                field: "model.classifier_hidden".into(),
                message: "must be >= 2 so the second classifier layer is non-empty".into(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Training
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrainingConfig {
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f64,
    #[serde(default = "default_num_epochs")]
    pub num_epochs: usize,
    /// Epochs without validation F1 improvement before stopping.
    #[serde(default = "default_patience")]
    pub patience: usize,
    /// Minimum validation F1 gain that counts as an improvement.
    #[serde(default = "default_min_delta")]
    pub min_delta: f64,
    #[serde(default = "default_train_ratio")]
    pub train_ratio: f64,
    #[serde(default = "default_holdout_ratio")]
    pub val_ratio: f64,
    #[serde(default = "default_holdout_ratio")]
    pub test_ratio: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Weight positives by `negatives / positives` in the loss.
    #[serde(default = "default_true")]
    pub use_class_weights: bool,
    /// Stop as converged when the training loss moves less than this between
    /// epochs. Disabled when unset.
    #[serde(default)]
    pub convergence_tolerance: Option<f64>,
    #[serde(default = "default_decision_threshold")]
    pub decision_threshold: f64,
}

fn default_learning_rate() -> f64 {
    1e-3
}

fn default_weight_decay() -> f64 {
    5e-4
}

fn default_num_epochs() -> usize {
    100
}

fn default_patience() -> usize {
    10
}

fn default_min_delta() -> f64 {
    0.001
}

fn default_train_ratio() -> f64 {
    0.6
}

fn default_holdout_ratio() -> f64 {
    0.2
}

fn default_seed() -> u64 {
    42
}

fn default_decision_threshold() -> f64 {
    0.5
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            weight_decay: default_weight_decay(),
            num_epochs: default_num_epochs(),
            patience: default_patience(),
            min_delta: default_min_delta(),
            train_ratio: default_train_ratio(),
            val_ratio: default_holdout_ratio(),
            test_ratio: default_holdout_ratio(),
            seed: default_seed(),
            use_class_weights: true,
            convergence_tolerance: None,
            decision_threshold: default_decision_threshold(),
        }
    }
}

impl TrainingConfig {
    /// Tolerance when checking that split ratios sum to one.
    pub const RATIO_TOLERANCE: f64 = 1e-6;

    pub fn validate(&self) -> CoreResult<()> {
        for (field, ratio) in [
            ("training.train_ratio", self.train_ratio),
            ("training.val_ratio", self.val_ratio),
            ("training.test_ratio", self.test_ratio),
        ] {
            if !(0.0..=1.0).contains(&ratio) {
                return Err(CoreError::ValidationError {
                    field: field.into(),
                    message: format!("must be in [0, 1], got {}", ratio),
                });
            }
        }
        let sum = self.train_ratio + self.val_ratio + self.test_ratio;
        if (sum - 1.0).abs() > Self::RATIO_TOLERANCE {
            return Err(CoreError::ValidationError {
                field: "training.train_ratio".into(),
                message: format!("train/val/test ratios must sum to 1.0, got {}", sum),
            });
        }
        if self.learning_rate <= 0.0 {
            return Err(CoreError::ValidationError {
                field: "training.learning_rate".into(),
                message: "must be > 0".into(),
            });
        }
        if self.weight_decay < 0.0 {
            return Err(CoreError::ValidationError {
                field: "training.weight_decay".into(),
                message: "must be >= 0".into(),
            });
        }
        if self.num_epochs == 0 {
            return Err(CoreError::ValidationError {
                field: "training.num_epochs".into(),
                message: "must be > 0".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.decision_threshold) {
            return Err(CoreError::ValidationError {
                field: "training.decision_threshold".into(),
                message: format!("must be in [0, 1], got {}", self.decision_threshold),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Metric maximized by the threshold sweep.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMetric {
    #[default]
    F1,
    Precision,
    Recall,
    Accuracy,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default = "default_threshold_grid")]
    pub threshold_grid: Vec<f64>,
    #[serde(default)]
    pub optimize_metric: ThresholdMetric,
}

fn default_threshold_grid() -> Vec<f64> {
    (1..=9).map(|i| i as f64 / 10.0).collect()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            threshold_grid: default_threshold_grid(),
            optimize_metric: ThresholdMetric::default(),
        }
    }
}

impl MetricsConfig {
    pub fn validate(&self) -> CoreResult<()> {
        if self.threshold_grid.is_empty() {
            return Err(CoreError::ValidationError {
                field: "metrics.threshold_grid".into(),
                message: "must contain at least one threshold".into(),
            });
        }
        if let Some(bad) = self
            .threshold_grid
            .iter()
            .find(|t| !(0.0..=1.0).contains(*t))
        {
            return Err(CoreError::ValidationError {
                field: "metrics.threshold_grid".into(),
                message: format!("thresholds must be in [0, 1], got {}", bad),
            });
        }
        Ok(())
    }
}
