//! Training orchestration.
//!
//! [`TrainingOrchestrator`] walks a fixed sequence of states:
//!
//! ```text
//! Initialized -> SplitCreated -> ModelBuilt -> Training
//!     -> Converged | EarlyStopped | MaxEpochsReached -> Evaluated
//! ```
//!
//! Each step checks the current state first and returns
//! [`ModelError::InvalidState`] naming the state it needs.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use fraud_graph_core::{FraudGraphConfig, MetricsConfig, ModelConfig, TrainingConfig};
use fraud_graph_graph::HeteroGraph;

use crate::encoder::GraphTensors;
use crate::error::{ModelError, ModelResult};
use crate::metrics::{sweep_thresholds, ClassificationMetrics, ThresholdSweep};
use crate::model::{FraudModel, TARGET_NODE_TYPE};
use crate::nn::ForwardContext;
use crate::training::checkpoint::{
    checkpoint_path, load_checkpoint, save_checkpoint, CheckpointMetadata,
    CHECKPOINT_FORMAT_VERSION,
};
use crate::training::early_stopping::{ConvergenceCheck, EarlyStopping, StopReason};
use crate::training::loss::WeightedBceLoss;
use crate::training::optimizer::Adam;
use crate::training::predictions::{write_predictions, PredictionRecord, PredictionsFile};
use crate::training::split::{stratified_split, DataSplit, Partition, SplitRatios};

/// Epochs between `info!` progress lines; other epochs log at debug.
const LOG_EVERY: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingState {
    Initialized,
    SplitCreated,
    ModelBuilt,
    Training,
    Converged,
    EarlyStopped,
    MaxEpochsReached,
    Evaluated,
}

impl TrainingState {
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            TrainingState::Converged | TrainingState::EarlyStopped | TrainingState::MaxEpochsReached
        )
    }
}

impl From<StopReason> for TrainingState {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::Converged => TrainingState::Converged,
            StopReason::EarlyStopped => TrainingState::EarlyStopped,
            StopReason::MaxEpochsReached => TrainingState::MaxEpochsReached,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_f1: f64,
    pub val_f1: f64,
    pub val_roc_auc: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochRecord>,
    pub best_epoch: usize,
    pub best_val_f1: f64,
    pub pos_weight: f64,
    pub stop_reason: Option<StopReason>,
    /// Path of the last checkpoint written, if any.
    pub checkpoint: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub threshold: f64,
    pub train: ClassificationMetrics,
    pub val: ClassificationMetrics,
    pub test: ClassificationMetrics,
    /// Threshold sweep over the validation partition.
    pub val_sweep: ThresholdSweep,
}

impl EvaluationReport {
    pub fn partition(&self, partition: Partition) -> &ClassificationMetrics {
        match partition {
            Partition::Train => &self.train,
            Partition::Val => &self.val,
            Partition::Test => &self.test,
        }
    }
}

pub struct TrainingOrchestrator<'g> {
    graph: &'g HeteroGraph,
    model_config: ModelConfig,
    training: TrainingConfig,
    metrics: MetricsConfig,
    checkpoint_dir: Option<PathBuf>,
    state: TrainingState,
    labels: Vec<bool>,
    tensors: GraphTensors,
    split: Option<DataSplit>,
    model: Option<FraudModel>,
    optimizer: Option<Adam>,
    history: TrainingHistory,
    report: Option<EvaluationReport>,
    /// Checkpoint loaded by [`TrainingOrchestrator::resume_from`].
    resumed: Option<ResumePoint>,
}

/// Where a resumed run picks up: the checkpoint's epoch and validation F1.
#[derive(Debug, Clone)]
struct ResumePoint {
    epoch: usize,
    val_f1: f64,
    path: PathBuf,
}

impl<'g> TrainingOrchestrator<'g> {
    pub fn new(graph: &'g HeteroGraph, config: &FraudGraphConfig) -> ModelResult<Self> {
        config.model.validate()?;
        config.training.validate()?;
        config.metrics.validate()?;
        let labels = graph
            .account_labels()
            .ok_or_else(|| ModelError::MissingLabels {
                node_type: TARGET_NODE_TYPE.to_string(),
            })?
            .to_vec();
        let tensors = GraphTensors::from_graph(graph, &Device::Cpu)?;
        Ok(Self {
            graph,
            model_config: config.model.clone(),
            training: config.training.clone(),
            metrics: config.metrics.clone(),
            checkpoint_dir: None,
            state: TrainingState::Initialized,
            labels,
            tensors,
            split: None,
            model: None,
            optimizer: None,
            history: TrainingHistory::default(),
            report: None,
            resumed: None,
        })
    }

    /// Write `best_<kind>.safetensors` into `dir` on every new best epoch.
    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = Some(dir.into());
        self
    }

    pub fn state(&self) -> TrainingState {
        self.state
    }

    pub fn split(&self) -> Option<&DataSplit> {
        self.split.as_ref()
    }

    pub fn model(&self) -> Option<&FraudModel> {
        self.model.as_ref()
    }

    pub fn history(&self) -> &TrainingHistory {
        &self.history
    }

    pub fn report(&self) -> Option<&EvaluationReport> {
        self.report.as_ref()
    }

    fn expect_state(&self, expected: &[TrainingState]) -> ModelResult<()> {
        if expected.contains(&self.state) {
            return Ok(());
        }
        let names: Vec<String> = expected.iter().map(|s| format!("{:?}", s)).collect();
        Err(ModelError::InvalidState {
            expected: names.join(" | "),
            actual: self.state,
        })
    }

    /// `Initialized -> SplitCreated`
    pub fn create_split(&mut self) -> ModelResult<&DataSplit> {
        self.expect_state(&[TrainingState::Initialized])?;
        let split = stratified_split(
            &self.labels,
            SplitRatios::from_config(&self.training),
            self.training.seed,
        )?;
        self.state = TrainingState::SplitCreated;
        Ok(self.split.insert(split))
    }

    /// `SplitCreated -> ModelBuilt`
    pub fn build_model(&mut self) -> ModelResult<()> {
        self.expect_state(&[TrainingState::SplitCreated])?;
        let model = FraudModel::new(&self.model_config, &self.tensors, self.training.seed)?;
        info!(
            kind = %model.kind(),
            parameters = model.store().num_parameters(),
            "Built fraud model"
        );
        self.optimizer = Some(Adam::new(
            self.training.learning_rate,
            self.training.weight_decay,
        ));
        self.model = Some(model);
        self.state = TrainingState::ModelBuilt;
        Ok(())
    }

    /// Load parameters, buffers and optimizer moments from a checkpoint
    /// written for the same model configuration. Allowed in `ModelBuilt`;
    /// afterwards either [`train`](Self::train) continues from it or
    /// [`evaluate`](Self::evaluate) scores it as is. A continued run numbers
    /// its epochs after the checkpoint's and keeps the checkpoint as the best
    /// until a later epoch beats its validation F1.
    pub fn resume_from(&mut self, path: &Path) -> ModelResult<usize> {
        self.expect_state(&[TrainingState::ModelBuilt])?;
        let checkpoint = load_checkpoint(path, self.tensors.device())?;
        let (Some(model), Some(optimizer)) = (self.model.as_ref(), self.optimizer.as_mut()) else {
            return Err(not_built(self.state));
        };
        if checkpoint.metadata.model_kind != model.kind() {
            return Err(ModelError::Checkpoint {
                path: path.to_path_buf(),
                message: format!(
                    "checkpoint is for {} but the model is {}",
                    checkpoint.metadata.model_kind,
                    model.kind()
                ),
            });
        }
        model.store().restore(&checkpoint.tensors)?;
        optimizer.load_state(
            checkpoint.metadata.optimizer_step,
            model.store(),
            &checkpoint.tensors,
        );
        info!(
            path = %path.display(),
            epoch = checkpoint.metadata.epoch,
            "Resumed from checkpoint"
        );
        self.resumed = Some(ResumePoint {
            epoch: checkpoint.metadata.epoch,
            val_f1: checkpoint.metadata.metrics.f1,
            path: path.to_path_buf(),
        });
        Ok(checkpoint.metadata.epoch)
    }

    /// `ModelBuilt -> Training -> Converged | EarlyStopped | MaxEpochsReached`
    ///
    /// Runs up to `num_epochs` full-batch epochs until a stopping rule fires,
    /// then restores the parameters of the best validation-F1 epoch. After
    /// [`resume_from`](Self::resume_from), epochs continue from the
    /// checkpoint's epoch.
    pub fn train(&mut self) -> ModelResult<&TrainingHistory> {
        self.expect_state(&[TrainingState::ModelBuilt])?;
        let split = self.split.clone().ok_or_else(|| ModelError::InvalidState {
            expected: "SplitCreated".into(),
            actual: self.state,
        })?;
        self.state = TrainingState::Training;

        let loss_fn = WeightedBceLoss::from_labels(
            &self.labels,
            &split.train,
            self.training.use_class_weights,
        );
        self.history = TrainingHistory {
            pos_weight: loss_fn.pos_weight(),
            ..Default::default()
        };

        let device = self.tensors.device().clone();
        let targets: Vec<f32> = self.labels.iter().map(|l| f32::from(u8::from(*l))).collect();
        let targets = Tensor::from_vec(targets, self.labels.len(), &device)?;
        let train_index: Vec<u32> = split.train.iter().map(|i| *i as u32).collect();
        let train_index = Tensor::from_vec(train_index, split.train.len(), &device)?;
        let train_targets = targets.index_select(&train_index, 0)?;

        let (patience, min_delta) = (self.training.patience, self.training.min_delta);
        let mut stopper = EarlyStopping::new(patience, min_delta);
        let mut best_params: Option<BTreeMap<String, Tensor>> = None;
        let mut start = 0;
        if let (Some(resumed), Some(model)) = (self.resumed.as_ref(), self.model.as_ref()) {
            stopper = EarlyStopping::resumed(patience, min_delta, resumed.epoch, resumed.val_f1);
            best_params = Some(model.store().snapshot()?);
            self.history.best_epoch = resumed.epoch;
            self.history.best_val_f1 = resumed.val_f1;
            self.history.checkpoint = Some(resumed.path.clone());
            start = resumed.epoch;
            info!(epoch = start, best_val_f1 = resumed.val_f1, "Continuing from checkpoint");
        }
        let mut convergence = ConvergenceCheck::new(self.training.convergence_tolerance);
        let mut reason = StopReason::MaxEpochsReached;

        info!(
            epochs = self.training.num_epochs,
            pos_weight = loss_fn.pos_weight(),
            train = split.train.len(),
            val = split.val.len(),
            "Starting training"
        );

        for epoch in start + 1..=start + self.training.num_epochs {
            let (Some(model), Some(optimizer)) = (self.model.as_ref(), self.optimizer.as_mut())
            else {
                return Err(not_built(self.state));
            };

            let mut ctx = ForwardContext::training(self.training.seed.wrapping_add(epoch as u64));
            let logits = model.forward(&self.tensors, &mut ctx)?;
            let loss = loss_fn.forward(&logits.index_select(&train_index, 0)?, &train_targets)?;
            let grads = loss.backward()?;
            optimizer.step(model.store(), &grads)?;
            let train_loss = f64::from(loss.to_scalar::<f32>()?);

            let probs = model.predict_proba(&self.tensors)?;
            let threshold = self.training.decision_threshold;
            let train_metrics = partition_metrics(&self.labels, &probs, &split.train, threshold);
            let val_metrics = partition_metrics(&self.labels, &probs, &split.val, threshold);

            let record = EpochRecord {
                epoch,
                train_loss,
                train_f1: train_metrics.f1,
                val_f1: val_metrics.f1,
                val_roc_auc: val_metrics.roc_auc.unwrap_or(0.0),
            };
            if epoch == start + 1 || epoch % LOG_EVERY == 0 {
                info!(
                    epoch,
                    loss = record.train_loss,
                    train_f1 = record.train_f1,
                    val_f1 = record.val_f1,
                    val_auc = record.val_roc_auc,
                    "Epoch"
                );
            } else {
                debug!(epoch, loss = record.train_loss, val_f1 = record.val_f1, "Epoch");
            }

            let decision = stopper.update(epoch, val_metrics.f1);
            if decision.improved {
                best_params = Some(model.store().snapshot()?);
                self.history.best_epoch = epoch;
                self.history.best_val_f1 = val_metrics.f1;
                self.write_checkpoint(epoch, &val_metrics);
            }
            self.history.epochs.push(record);

            if decision.stop {
                info!(epoch, best_epoch = stopper.best_epoch(), "Early stopping");
                reason = StopReason::EarlyStopped;
                break;
            }
            if convergence.update(train_loss) {
                info!(epoch, loss = train_loss, "Training loss converged");
                reason = StopReason::Converged;
                break;
            }
        }

        if let (Some(best), Some(model)) = (best_params.as_ref(), self.model.as_ref()) {
            model.store().restore(best)?;
            debug!(epoch = self.history.best_epoch, "Restored best parameters");
        }
        self.history.stop_reason = Some(reason);
        self.state = reason.into();
        info!(
            best_epoch = self.history.best_epoch,
            best_val_f1 = self.history.best_val_f1,
            state = ?self.state,
            "Training finished"
        );
        Ok(&self.history)
    }

    /// Save the current parameters as the best checkpoint. Failures are
    /// logged and training continues with in-memory state unchanged.
    fn write_checkpoint(&mut self, epoch: usize, val_metrics: &ClassificationMetrics) {
        let (Some(dir), Some(model), Some(optimizer)) = (
            self.checkpoint_dir.as_ref(),
            self.model.as_ref(),
            self.optimizer.as_ref(),
        ) else {
            return;
        };
        let path = checkpoint_path(dir, model.kind());
        let metadata = CheckpointMetadata {
            format_version: CHECKPOINT_FORMAT_VERSION,
            model_kind: model.kind(),
            model: model.config().clone(),
            epoch,
            optimizer_step: optimizer.step_count(),
            metrics: val_metrics.clone(),
            graph_artifact_id: self.graph.artifact_id(),
            created_at: Utc::now(),
        };
        let result = model.store().snapshot().and_then(|mut tensors| {
            tensors.extend(optimizer.state_tensors());
            save_checkpoint(&path, &tensors, &metadata)
        });
        match result {
            Ok(()) => self.history.checkpoint = Some(path),
            Err(e) => error!(path = %path.display(), error = %e, "Failed to write checkpoint"),
        }
    }

    /// `Converged | EarlyStopped | MaxEpochsReached -> Evaluated`, or
    /// `ModelBuilt -> Evaluated` once a checkpoint has been resumed.
    pub fn evaluate(&mut self) -> ModelResult<&EvaluationReport> {
        if !(self.state == TrainingState::ModelBuilt && self.resumed.is_some()) {
            self.expect_state(&[
                TrainingState::Converged,
                TrainingState::EarlyStopped,
                TrainingState::MaxEpochsReached,
            ])?;
        }
        let (model, split) = match (self.model.as_ref(), self.split.as_ref()) {
            (Some(m), Some(s)) => (m, s),
            _ => return Err(not_built(self.state)),
        };
        let probs = model.predict_proba(&self.tensors)?;
        let threshold = self.training.decision_threshold;
        let train = partition_metrics(&self.labels, &probs, &split.train, threshold);
        let val = partition_metrics(&self.labels, &probs, &split.val, threshold);
        let test = partition_metrics(&self.labels, &probs, &split.test, threshold);

        let (val_labels, val_probs) = gather(&self.labels, &probs, &split.val);
        let val_sweep = sweep_thresholds(
            &val_labels,
            &val_probs,
            &self.metrics.threshold_grid,
            self.metrics.optimize_metric,
        );

        for (name, m) in [("train", &train), ("val", &val), ("test", &test)] {
            info!(partition = name, metrics = %m, "Evaluation");
        }
        info!(
            metric = ?val_sweep.metric,
            best_threshold = val_sweep.best_threshold,
            best_value = val_sweep.best_value,
            "Validation threshold sweep"
        );

        self.state = TrainingState::Evaluated;
        Ok(self.report.insert(EvaluationReport {
            threshold,
            train,
            val,
            test,
            val_sweep,
        }))
    }

    /// Per-account probabilities and labels at the decision threshold.
    pub fn predictions(&self) -> ModelResult<PredictionsFile> {
        self.expect_state(&[TrainingState::Evaluated])?;
        let (model, split) = match (self.model.as_ref(), self.split.as_ref()) {
            (Some(m), Some(s)) => (m, s),
            _ => return Err(not_built(self.state)),
        };
        let probs = model.predict_proba(&self.tensors)?;
        let threshold = self.training.decision_threshold;
        let assignment = split.assignment(probs.len());
        let ids = self.graph.mappings().ids(TARGET_NODE_TYPE);
        let predictions = probs
            .iter()
            .enumerate()
            .map(|(i, p)| PredictionRecord {
                account_id: ids.get(i).cloned().unwrap_or_default(),
                probability: *p,
                predicted_fraud: *p >= threshold,
                is_fraud: self.labels[i],
                partition: assignment[i],
            })
            .collect();
        Ok(PredictionsFile {
            graph_artifact_id: self.graph.artifact_id(),
            model_kind: model.kind(),
            threshold,
            created_at: Utc::now(),
            predictions,
        })
    }

    /// Write `predictions.json` into `dir` (normally the checkpoint directory).
    pub fn export_predictions(&self, dir: &Path) -> ModelResult<PathBuf> {
        let file = self.predictions()?;
        write_predictions(dir, &file)
    }

    /// Split, build, train and evaluate in one call.
    pub fn run(&mut self) -> ModelResult<&EvaluationReport> {
        self.create_split()?;
        self.build_model()?;
        self.train()?;
        self.evaluate()
    }
}

fn not_built(actual: TrainingState) -> ModelError {
    ModelError::InvalidState {
        expected: "ModelBuilt".into(),
        actual,
    }
}

fn gather(labels: &[bool], probs: &[f64], indices: &[usize]) -> (Vec<bool>, Vec<f64>) {
    indices.iter().map(|&i| (labels[i], probs[i])).unzip()
}

fn partition_metrics(
    labels: &[bool],
    probs: &[f64],
    indices: &[usize],
    threshold: f64,
) -> ClassificationMetrics {
    if indices.is_empty() {
        warn!("Empty partition, metrics are zero");
        return ClassificationMetrics::default();
    }
    let (l, p) = gather(labels, probs, indices);
    ClassificationMetrics::compute(&l, &p, threshold)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fraud_graph_core::{EncoderKind, TabularSnapshot};
    use fraud_graph_core::{EntityRow, NodeType};
    use fraud_graph_graph::GraphAssembler;

    fn graph() -> HeteroGraph {
        let mut s = TabularSnapshot::default();
        let accounts = (0..20)
            .map(|i| {
                let fraud = i % 4 == 0;
                EntityRow::new(format!("A{i}"))
                    .with_numeric("total_amount", if fraud { 5000.0 } else { 50.0 } + i as f64)
                    .with_label(fraud)
            })
            .collect();
        s.nodes.insert(NodeType::Account, accounts);
        s.nodes.insert(NodeType::Merchant, vec![EntityRow::new("M1")]);
        s.nodes.insert(NodeType::Device, vec![EntityRow::new("D1")]);
        GraphAssembler::default().assemble(&s).unwrap()
    }

    fn config(epochs: usize) -> FraudGraphConfig {
        let mut config = FraudGraphConfig::default();
        config.model.kind = EncoderKind::Identity;
        config.model.classifier_hidden = 8;
        config.training.num_epochs = epochs;
        config.training.patience = 3;
        config.training.learning_rate = 0.01;
        config.training.train_ratio = 0.5;
        config.training.val_ratio = 0.25;
        config.training.test_ratio = 0.25;
        config
    }

    #[test]
    fn test_out_of_order_calls_rejected() {
        let g = graph();
        let mut orch = TrainingOrchestrator::new(&g, &config(2)).unwrap();
        match orch.build_model().unwrap_err() {
            ModelError::InvalidState { expected, actual } => {
                assert_eq!(expected, "SplitCreated");
                assert_eq!(actual, TrainingState::Initialized);
            }
            other => panic!("unexpected: {other}"),
        }
        assert!(orch.train().is_err());
        assert!(orch.evaluate().is_err());
        assert!(orch.predictions().is_err());

        orch.create_split().unwrap();
        assert!(orch.create_split().is_err());
        assert_eq!(orch.state(), TrainingState::SplitCreated);

        orch.build_model().unwrap();
        // evaluating an untrained model needs a resumed checkpoint
        assert!(orch.evaluate().is_err());
        assert_eq!(orch.state(), TrainingState::ModelBuilt);
    }

    #[test]
    fn test_full_run_reaches_evaluated() {
        let g = graph();
        let mut orch = TrainingOrchestrator::new(&g, &config(4)).unwrap();
        orch.run().unwrap();
        assert_eq!(orch.state(), TrainingState::Evaluated);
        let history = orch.history();
        assert!(!history.epochs.is_empty());
        assert!(history.epochs.len() <= 4);
        assert!(history.best_epoch >= 1);
        // 7 legitimate and 2 fraud accounts land in train
        assert!((history.pos_weight - 3.5).abs() < 1e-9);

        let predictions = orch.predictions().unwrap();
        assert_eq!(predictions.predictions.len(), 20);
        assert!(predictions.predictions.iter().all(|p| p.partition.is_some()));
    }

    #[test]
    fn test_missing_labels_rejected() {
        let mut s = TabularSnapshot::default();
        s.nodes.insert(NodeType::Account, vec![EntityRow::new("A1")]);
        s.nodes.insert(NodeType::Merchant, vec![EntityRow::new("M1")]);
        s.nodes.insert(NodeType::Device, vec![EntityRow::new("D1")]);
        let g = GraphAssembler::default().assemble(&s).unwrap();
        let result = TrainingOrchestrator::new(&g, &config(1));
        assert!(matches!(result, Err(ModelError::MissingLabels { .. })));
    }
}
