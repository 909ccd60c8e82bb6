//! `fraud-graph evaluate`: score a saved checkpoint without training.
//!
//! The model shape comes from the checkpoint metadata, so the configured
//! `[model]` section does not need to match the one used for training.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::{info, warn};

use fraud_graph_core::{EncoderKind, FraudGraphConfig};
use fraud_graph_graph::artifact;
use fraud_graph_model::training::{checkpoint_path, read_checkpoint_metadata};
use fraud_graph_model::{EvaluationReport, TrainingOrchestrator};

use super::fail;
use super::train::report_summary;

#[derive(Args, Debug)]
pub struct EvaluateArgs {
    /// Encoder whose `best_<model>.safetensors` to load (default: `model.kind`).
    #[arg(long, short = 'm', conflicts_with = "checkpoint")]
    pub model: Option<EncoderKind>,

    /// Explicit checkpoint file.
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    /// Graph artifact directory (default: `data.artifact_dir`).
    #[arg(long)]
    pub graph_dir: Option<PathBuf>,

    /// Also write `predictions.json` next to the checkpoint.
    #[arg(long)]
    pub export: bool,

    /// Print the evaluation report as JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

pub fn handle_evaluate(args: EvaluateArgs, config: FraudGraphConfig) -> u8 {
    let json = args.json;
    match evaluate(args, config) {
        Ok(report) => {
            if json {
                match serde_json::to_string_pretty(&report) {
                    Ok(text) => println!("{}", text),
                    Err(e) => return fail("Failed to render report", e.into()),
                }
            } else {
                println!("{}", report_summary(&report));
            }
            0
        }
        Err(e) => fail("Evaluation failed", e),
    }
}

fn evaluate(args: EvaluateArgs, mut config: FraudGraphConfig) -> Result<EvaluationReport> {
    let path = match args.checkpoint {
        Some(path) => path,
        None => checkpoint_path(
            &config.data.checkpoint_dir,
            args.model.unwrap_or(config.model.kind),
        ),
    };
    if !path.exists() {
        bail!("checkpoint {} does not exist; run `fraud-graph train` first", path.display());
    }
    let metadata = read_checkpoint_metadata(&path)
        .with_context(|| format!("reading checkpoint metadata from {}", path.display()))?;
    config.model = metadata.model.clone();

    let graph_dir = args.graph_dir.unwrap_or_else(|| config.data.artifact_dir.clone());
    let graph = artifact::load_graph(&graph_dir)
        .with_context(|| format!("loading graph artifact from {}", graph_dir.display()))?;
    if graph.artifact_id() != metadata.graph_artifact_id {
        warn!(
            checkpoint = %metadata.graph_artifact_id,
            graph = %graph.artifact_id(),
            "Checkpoint was trained on a different graph artifact"
        );
    }
    info!(
        checkpoint = %path.display(),
        model = %metadata.model_kind,
        epoch = metadata.epoch,
        "Evaluating checkpoint"
    );

    let mut orchestrator = TrainingOrchestrator::new(&graph, &config)?;
    orchestrator.create_split()?;
    orchestrator.build_model()?;
    orchestrator
        .resume_from(&path)
        .with_context(|| format!("loading checkpoint {}", path.display()))?;
    let report = orchestrator.evaluate()?.clone();

    if args.export {
        let dir = path.parent().map(PathBuf::from).unwrap_or_default();
        orchestrator
            .export_predictions(&dir)
            .with_context(|| format!("exporting predictions to {}", dir.display()))?;
    }
    Ok(report)
}
