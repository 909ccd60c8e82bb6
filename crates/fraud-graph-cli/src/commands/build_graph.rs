//! `fraud-graph build-graph`: raw transactions to the on-disk graph artifact.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::{info, warn};

use fraud_graph_core::ingest::{aggregate_transactions, read_transactions_csv};
use fraud_graph_core::{FraudGraphConfig, NodeType};
use fraud_graph_graph::{artifact, GraphAssembler, GraphStats};

use super::fail;

#[derive(Args, Debug)]
pub struct BuildGraphArgs {
    /// Transaction CSV (default: `data.transactions_path`).
    #[arg(long, short = 'i')]
    pub input: Option<PathBuf>,

    /// Artifact directory (default: `data.artifact_dir`).
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
}

pub fn handle_build_graph(args: BuildGraphArgs, config: FraudGraphConfig) -> u8 {
    match build_graph(args, &config) {
        Ok(stats) => {
            println!("{}", summary(&stats));
            0
        }
        Err(e) => fail("Failed to build graph", e),
    }
}

fn build_graph(args: BuildGraphArgs, config: &FraudGraphConfig) -> Result<GraphStats> {
    let input = args.input.unwrap_or_else(|| config.data.transactions_path.clone());
    let output = args.output.unwrap_or_else(|| config.data.artifact_dir.clone());

    let loaded = read_transactions_csv(&input)
        .with_context(|| format!("reading transactions from {}", input.display()))?;
    if loaded.skipped_rows > 0 {
        warn!(skipped = loaded.skipped_rows, "Skipped malformed transaction rows");
    }
    info!(records = loaded.records.len(), input = %input.display(), "Loaded transactions");

    let snapshot = aggregate_transactions(&loaded.records).context("aggregating transactions")?;
    let graph = GraphAssembler::new(config.features.clone())
        .assemble(&snapshot)
        .context("assembling heterogeneous graph")?;
    artifact::save_graph(&graph, &output)
        .with_context(|| format!("writing graph artifact to {}", output.display()))?;

    Ok(graph.stats().clone())
}

fn summary(stats: &GraphStats) -> String {
    let mut lines = vec![format!(
        "nodes: {}  edges: {}  dropped edges: {}",
        stats.total_nodes(),
        stats.total_edges(),
        stats.total_dropped_edges()
    )];
    for node_type in NodeType::ALL {
        let count = stats.node_counts.get(&node_type).copied().unwrap_or(0);
        lines.push(format!("  {:<9} {}", node_type, count));
    }
    for (relation, count) in &stats.edge_counts {
        lines.push(format!("  {:<20} {}", relation, count));
    }
    lines.push(format!(
        "fraud accounts: {}/{} ({:.2}%)",
        stats.fraud_accounts,
        stats.labelled_accounts,
        100.0 * stats.account_fraud_rate()
    ));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use fraud_graph_test_utils::{generate_transactions, to_csv, SyntheticConfig};

    #[test]
    fn test_build_graph_writes_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("tx.csv");
        std::fs::write(&csv, to_csv(&generate_transactions(&SyntheticConfig::default()))).unwrap();
        let out = dir.path().join("processed");

        let stats = build_graph(
            BuildGraphArgs {
                input: Some(csv),
                output: Some(out.clone()),
            },
            &FraudGraphConfig::default(),
        )
        .unwrap();

        assert_eq!(stats.node_counts[&NodeType::Account], 100);
        for path in artifact::artifact_paths(&out) {
            assert!(path.exists(), "{}", path.display());
        }
        assert!(summary(&stats).contains("fraud accounts: 5/100"));
    }

    #[test]
    fn test_missing_input_fails_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let args = BuildGraphArgs {
            input: Some(dir.path().join("absent.csv")),
            output: Some(dir.path().to_path_buf()),
        };
        let err = build_graph(args, &FraudGraphConfig::default()).unwrap_err();
        assert!(format!("{:#}", err).contains("absent.csv"));
    }
}
