//! Synthetic transactions through graph assembly, training, evaluation and
//! export.

use fraud_graph_core::ingest::aggregate_transactions;
use fraud_graph_core::{EncoderKind, FeaturesConfig, FraudGraphConfig};
use fraud_graph_graph::{GraphAssembler, HeteroGraph};
use fraud_graph_model::training::{
    checkpoint_path, read_checkpoint_metadata, read_predictions, Partition,
};
use fraud_graph_model::{StopReason, TrainingOrchestrator, TrainingState};
use fraud_graph_test_utils::{fraud_account_count, generate_transactions, SyntheticConfig};

fn build_graph() -> HeteroGraph {
    let records = generate_transactions(&SyntheticConfig::default());
    let snapshot = aggregate_transactions(&records).expect("aggregation");
    GraphAssembler::new(FeaturesConfig::default())
        .assemble(&snapshot)
        .expect("assembly")
}

fn config(kind: EncoderKind, epochs: usize) -> FraudGraphConfig {
    let mut config = FraudGraphConfig::default();
    config.model.kind = kind;
    config.model.hidden_channels = 16;
    config.model.out_channels = 8;
    config.model.heads = 2;
    config.model.classifier_hidden = 16;
    config.model.dropout = 0.1;
    config.training.num_epochs = epochs;
    config.training.patience = epochs;
    config.training.learning_rate = 0.01;
    config
}

#[test]
fn test_identity_baseline_flags_held_out_fraud() {
    let graph = build_graph();
    let labels = graph.account_labels().expect("labels");
    assert_eq!(
        labels.iter().filter(|l| **l).count(),
        fraud_account_count(&SyntheticConfig::default())
    );

    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = TrainingOrchestrator::new(&graph, &config(EncoderKind::Identity, 80))
        .unwrap()
        .with_checkpoint_dir(dir.path());
    let report = orchestrator.run().unwrap().clone();
    assert_eq!(orchestrator.state(), TrainingState::Evaluated);

    let history = orchestrator.history();
    assert!(history.pos_weight > 1.0);
    assert!(history.epochs.iter().all(|e| e.train_loss.is_finite()));
    assert!(matches!(
        history.stop_reason,
        Some(StopReason::MaxEpochsReached | StopReason::EarlyStopped)
    ));

    let path = dir.path().join("predictions");
    let predictions = read_predictions(&orchestrator.export_predictions(&path).unwrap()).unwrap();
    assert_eq!(predictions.predictions.len(), 100);
    assert_eq!(predictions.graph_artifact_id, graph.artifact_id());

    let held_out_fraud: Vec<_> = predictions
        .predictions
        .iter()
        .filter(|p| p.is_fraud && matches!(p.partition, Some(Partition::Val | Partition::Test)))
        .collect();
    assert!(!held_out_fraud.is_empty());
    assert!(
        held_out_fraud.iter().any(|p| p.predicted_fraud),
        "no held-out fraud account flagged; test metrics: {}",
        report.test
    );
}

#[test]
fn test_best_epoch_is_checkpointed_and_resumable() {
    let graph = build_graph();
    let dir = tempfile::tempdir().unwrap();
    let mut orchestrator = TrainingOrchestrator::new(&graph, &config(EncoderKind::Identity, 15))
        .unwrap()
        .with_checkpoint_dir(dir.path());
    orchestrator.create_split().unwrap();
    orchestrator.build_model().unwrap();
    orchestrator.train().unwrap();

    let path = checkpoint_path(dir.path(), EncoderKind::Identity);
    assert_eq!(orchestrator.history().checkpoint.as_deref(), Some(path.as_path()));
    let metadata = read_checkpoint_metadata(&path).unwrap();
    assert_eq!(metadata.epoch, orchestrator.history().best_epoch);
    assert_eq!(metadata.model_kind, EncoderKind::Identity);
    assert_eq!(metadata.graph_artifact_id, graph.artifact_id());

    // a fresh model of the same shape resumes from it
    let mut resumed = TrainingOrchestrator::new(&graph, &config(EncoderKind::Identity, 3)).unwrap();
    resumed.create_split().unwrap();
    resumed.build_model().unwrap();
    assert_eq!(resumed.resume_from(&path).unwrap(), metadata.epoch);
    let history = resumed.train().unwrap();
    let numbered: Vec<usize> = history.epochs.iter().map(|e| e.epoch).collect();
    let first = metadata.epoch + 1;
    assert_eq!(numbered, (first..first + numbered.len()).collect::<Vec<_>>());
    assert!(history.best_epoch >= metadata.epoch);
    assert!(history.best_val_f1 >= metadata.metrics.f1);
    if history.best_epoch == metadata.epoch {
        assert_eq!(history.checkpoint.as_deref(), Some(path.as_path()));
    }
    assert!(resumed.state().is_finished());

    // or scored without further training
    let mut scored = TrainingOrchestrator::new(&graph, &config(EncoderKind::Identity, 3)).unwrap();
    scored.create_split().unwrap();
    scored.build_model().unwrap();
    scored.resume_from(&path).unwrap();
    let report = scored.evaluate().unwrap();
    assert!((report.val.f1 - metadata.metrics.f1).abs() < 1e-9);
    assert!(scored.history().epochs.is_empty());
}

#[test]
fn test_message_passing_encoders_train_and_evaluate() {
    let graph = build_graph();
    for kind in [EncoderKind::Sage, EncoderKind::Gat, EncoderKind::Rgcn] {
        let mut orchestrator = TrainingOrchestrator::new(&graph, &config(kind, 3)).unwrap();
        let report = orchestrator.run().unwrap();
        assert_eq!(report.val_sweep.points.len(), 9, "{kind}");
        for partition in [Partition::Train, Partition::Val, Partition::Test] {
            let m = report.partition(partition);
            assert!((0.0..=1.0).contains(&m.f1), "{kind} {partition}");
        }
        assert_eq!(orchestrator.history().epochs.len(), 3, "{kind}");
    }
}
