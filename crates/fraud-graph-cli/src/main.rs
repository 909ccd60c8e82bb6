//! fraud-graph command-line interface.
//!
//! # Usage
//!
//! ```bash
//! # Build the graph artifact from the configured transaction CSV
//! fraud-graph build-graph
//!
//! # Override input and output locations
//! fraud-graph build-graph --input data/raw/tx.csv --output data/processed
//!
//! # Train an R-GCN with 4 bases for 50 epochs
//! fraud-graph train --model rgcn --epochs 50
//!
//! # Score the saved best checkpoint without training
//! fraud-graph evaluate --model gat
//!
//! # Explicit config file and verbose logs
//! RUST_LOG=debug fraud-graph --config config/prod.toml train
//! ```
//!
//! Without `--config`, configuration is layered from `config/default.toml`,
//! `config/{FRAUD_GRAPH_ENV}.toml` and `FRAUD_GRAPH__*` environment variables.
//! Exit codes: 0 on success, 1 on any error.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use fraud_graph_core::logging::init_logging;
use fraud_graph_core::FraudGraphConfig;

use commands::build_graph::BuildGraphArgs;
use commands::evaluate::EvaluateArgs;
use commands::train::TrainArgs;

#[derive(Parser, Debug)]
#[command(name = "fraud-graph", version, about = "Graph-based fraud detection")]
struct Cli {
    /// Configuration file (TOML). Overrides the layered default lookup.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Aggregate transactions and write the graph artifact
    BuildGraph(BuildGraphArgs),
    /// Train a model on the graph artifact and write the best checkpoint
    Train(TrainArgs),
    /// Evaluate a saved checkpoint on the graph artifact
    Evaluate(EvaluateArgs),
}

fn load_config(path: Option<&PathBuf>) -> Result<FraudGraphConfig> {
    match path {
        Some(path) => FraudGraphConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => FraudGraphConfig::load().context("loading layered configuration"),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(1);
        }
    };
    if let Err(e) = init_logging(&config.logging) {
        eprintln!("Error: {}", e);
        return ExitCode::from(1);
    }

    let code = match cli.command {
        Command::BuildGraph(args) => commands::build_graph::handle_build_graph(args, config),
        Command::Train(args) => commands::train::handle_train(args, config),
        Command::Evaluate(args) => commands::evaluate::handle_evaluate(args, config),
    };
    ExitCode::from(code)
}
