//! `fraud-graph train`: fit a model on the graph artifact.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use fraud_graph_core::{EncoderKind, FraudGraphConfig};
use fraud_graph_graph::artifact;
use fraud_graph_model::training::checkpoint_path;
use fraud_graph_model::{EvaluationReport, TrainingHistory, TrainingOrchestrator};

use super::fail;

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Encoder: graphsage, gat, rgcn or identity (default: `model.kind`).
    #[arg(long, short = 'm')]
    pub model: Option<EncoderKind>,

    /// Maximum number of epochs to run, counted after the checkpoint with
    /// `--resume` (default: `training.num_epochs`).
    #[arg(long)]
    pub epochs: Option<usize>,

    /// Seed for splitting, initialization and dropout (default: `training.seed`).
    #[arg(long)]
    pub seed: Option<u64>,

    /// Graph artifact directory (default: `data.artifact_dir`).
    #[arg(long)]
    pub graph_dir: Option<PathBuf>,

    /// Checkpoint directory (default: `data.checkpoint_dir`).
    #[arg(long)]
    pub checkpoint_dir: Option<PathBuf>,

    /// Continue from the existing best checkpoint for this model.
    #[arg(long)]
    pub resume: bool,

    /// Print the evaluation report as JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

impl TrainArgs {
    fn apply(&self, config: &mut FraudGraphConfig) -> Result<()> {
        if let Some(kind) = self.model {
            config.model.kind = kind;
        }
        if let Some(epochs) = self.epochs {
            config.training.num_epochs = epochs;
        }
        if let Some(seed) = self.seed {
            config.training.seed = seed;
        }
        if let Some(dir) = &self.graph_dir {
            config.data.artifact_dir = dir.clone();
        }
        if let Some(dir) = &self.checkpoint_dir {
            config.data.checkpoint_dir = dir.clone();
        }
        config.validate().context("invalid configuration after overrides")?;
        Ok(())
    }
}

pub fn handle_train(args: TrainArgs, mut config: FraudGraphConfig) -> u8 {
    let json = args.json;
    match train(args, &mut config) {
        Ok((history, report)) => {
            if json {
                match serde_json::to_string_pretty(&report) {
                    Ok(text) => println!("{}", text),
                    Err(e) => return fail("Failed to render report", e.into()),
                }
            } else {
                println!("{}", history_summary(&history));
                println!("{}", report_summary(&report));
            }
            0
        }
        Err(e) => fail("Training failed", e),
    }
}

fn train(
    args: TrainArgs,
    config: &mut FraudGraphConfig,
) -> Result<(TrainingHistory, EvaluationReport)> {
    args.apply(config)?;
    let graph_dir = &config.data.artifact_dir;
    let checkpoint_dir = config.data.checkpoint_dir.clone();

    let graph = artifact::load_graph(graph_dir)
        .with_context(|| format!("loading graph artifact from {}", graph_dir.display()))?;
    info!(
        artifact_id = %graph.artifact_id(),
        model = %config.model.kind,
        "Training"
    );

    let mut orchestrator = TrainingOrchestrator::new(&graph, config)
        .context("preparing training")?
        .with_checkpoint_dir(&checkpoint_dir);
    orchestrator.create_split()?;
    orchestrator.build_model()?;
    if args.resume {
        let path = checkpoint_path(&checkpoint_dir, config.model.kind);
        orchestrator
            .resume_from(&path)
            .with_context(|| format!("resuming from {}", path.display()))?;
    }
    orchestrator.train()?;
    let report = orchestrator.evaluate()?.clone();
    let predictions = orchestrator
        .export_predictions(&checkpoint_dir)
        .with_context(|| format!("exporting predictions to {}", checkpoint_dir.display()))?;
    info!(path = %predictions.display(), "Wrote predictions");

    Ok((orchestrator.history().clone(), report))
}

fn history_summary(history: &TrainingHistory) -> String {
    let reason = history
        .stop_reason
        .map(|r| format!("{:?}", r))
        .unwrap_or_else(|| "-".into());
    let mut text = format!(
        "epochs: {}  best epoch: {}  best val F1: {:.4}  stop: {}  pos_weight: {:.2}",
        history.epochs.len(),
        history.best_epoch,
        history.best_val_f1,
        reason,
        history.pos_weight
    );
    if let Some(path) = &history.checkpoint {
        text.push_str(&format!("\ncheckpoint: {}", path.display()));
    }
    text
}

pub(crate) fn report_summary(report: &EvaluationReport) -> String {
    format!(
        "threshold {:.2}\n  train {}\n  val   {}\n  test  {}\nbest val threshold for {:?}: {:.2} ({:.4})",
        report.threshold,
        report.train,
        report.val,
        report.test,
        report.val_sweep.metric,
        report.val_sweep.best_threshold,
        report.val_sweep.best_value
    )
}
