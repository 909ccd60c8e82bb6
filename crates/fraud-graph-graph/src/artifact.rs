//! Graph artifact persistence.
//!
//! A built graph is stored as three co-located files:
//!
//! | file | format | contents |
//! |------|--------|----------|
//! | `graph.bin` | magic + bincode | node stores and edge stores |
//! | `node_mappings.json` | JSON | ordered original ids per node type |
//! | `graph_stats.json` | JSON | build statistics |
//!
//! Every file carries the same artifact id and format version. Loading fails
//! when a file is missing, the ids disagree, or the stores are structurally
//! inconsistent (see [`validate_graph`]). Writes go to a temp file first and
//! are renamed into place.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use fraud_graph_core::{NodeType, RelationType};

use crate::assembler::{EdgeStore, HeteroGraph, NodeStore};
use crate::error::{GraphError, GraphResult};
use crate::mapping::{MappingOrdering, NodeMappings};
use crate::normalizer::FeatureMatrix;
use crate::stats::GraphStats;

pub const GRAPH_FILE: &str = "graph.bin";
pub const MAPPINGS_FILE: &str = "node_mappings.json";
pub const STATS_FILE: &str = "graph_stats.json";

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 1;

const GRAPH_MAGIC: [u8; 4] = *b"FGRB";

#[derive(Serialize, Deserialize)]
struct GraphFile {
    artifact_id: Uuid,
    format_version: u32,
    nodes: BTreeMap<NodeType, NodeStore>,
    edges: BTreeMap<RelationType, EdgeStore>,
}

#[derive(Serialize, Deserialize)]
struct MappingsFile {
    artifact_id: Uuid,
    format_version: u32,
    ordering: MappingOrdering,
    node_types: BTreeMap<NodeType, Vec<String>>,
}

#[derive(Serialize, Deserialize)]
struct StatsFile {
    artifact_id: Uuid,
    format_version: u32,
    stats: GraphStats,
}

/// Paths of the three artifact files inside `dir`.
pub fn artifact_paths(dir: &Path) -> [PathBuf; 3] {
    [
        dir.join(GRAPH_FILE),
        dir.join(MAPPINGS_FILE),
        dir.join(STATS_FILE),
    ]
}

/// Write `graph` into `dir`, creating the directory if needed.
pub fn save_graph(graph: &HeteroGraph, dir: &Path) -> GraphResult<()> {
    fs::create_dir_all(dir)?;
    let [graph_path, mappings_path, stats_path] = artifact_paths(dir);

    let graph_file = GraphFile {
        artifact_id: graph.artifact_id(),
        format_version: FORMAT_VERSION,
        nodes: graph
            .node_stores()
            .map(|s| (s.node_type, s.clone()))
            .collect(),
        edges: graph
            .edge_stores()
            .map(|e| (e.relation, e.clone()))
            .collect(),
    };
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&GRAPH_MAGIC);
    bytes.extend_from_slice(&bincode::serialize(&graph_file)?);
    write_atomic(&graph_path, &bytes)?;

    let mappings_file = MappingsFile {
        artifact_id: graph.artifact_id(),
        format_version: FORMAT_VERSION,
        ordering: graph.mappings().ordering(),
        node_types: graph.mappings().all_ids().clone(),
    };
    write_atomic(&mappings_path, &serde_json::to_vec_pretty(&mappings_file)?)?;

    let stats_file = StatsFile {
        artifact_id: graph.artifact_id(),
        format_version: FORMAT_VERSION,
        stats: graph.stats().clone(),
    };
    write_atomic(&stats_path, &serde_json::to_vec_pretty(&stats_file)?)?;

    info!(
        dir = %dir.display(),
        artifact_id = %graph.artifact_id(),
        "Saved graph artifact"
    );
    Ok(())
}

/// Load a graph saved by [`save_graph`].
pub fn load_graph(dir: &Path) -> GraphResult<HeteroGraph> {
    let [graph_path, mappings_path, stats_path] = artifact_paths(dir);
    for path in [&graph_path, &mappings_path, &stats_path] {
        if !path.exists() {
            return Err(GraphError::MissingArtifactFile { path: path.clone() });
        }
    }

    let bytes = fs::read(&graph_path)?;
    if bytes.len() < GRAPH_MAGIC.len() || bytes[..GRAPH_MAGIC.len()] != GRAPH_MAGIC {
        return Err(GraphError::Corrupt {
            path: graph_path,
            message: "bad magic header".into(),
        });
    }
    let graph_file: GraphFile =
        bincode::deserialize(&bytes[GRAPH_MAGIC.len()..]).map_err(|e| GraphError::Corrupt {
            path: graph_path.clone(),
            message: e.to_string(),
        })?;
    check_version(&graph_path, graph_file.format_version)?;

    let mappings_file: MappingsFile = serde_json::from_slice(&fs::read(&mappings_path)?)?;
    check_version(&mappings_path, mappings_file.format_version)?;
    check_id(&mappings_path, graph_file.artifact_id, mappings_file.artifact_id)?;

    let stats_file: StatsFile = serde_json::from_slice(&fs::read(&stats_path)?)?;
    check_version(&stats_path, stats_file.format_version)?;
    check_id(&stats_path, graph_file.artifact_id, stats_file.artifact_id)?;

    let graph = HeteroGraph::from_parts(
        graph_file.artifact_id,
        graph_file.nodes,
        graph_file.edges,
        NodeMappings::from_ordered(mappings_file.ordering, mappings_file.node_types),
        stats_file.stats,
    );
    validate_graph(&graph, &graph_path)?;

    debug!(artifact_id = %graph.artifact_id(), "Loaded graph artifact");
    Ok(graph)
}

/// Check that every store agrees with the node counts it refers to.
///
/// Node stores: feature data fills `rows * cols`, labels have one entry per
/// row, and the id mapping has one id per row. Edge stores: `src` and `dst`
/// have equal length, every index is below its endpoint's node count, and
/// feature rows and labels have one entry per edge. Violations are reported
/// as [`GraphError::Corrupt`] against `path`.
pub fn validate_graph(graph: &HeteroGraph, path: &Path) -> GraphResult<()> {
    let corrupt = |message: String| GraphError::Corrupt {
        path: path.to_path_buf(),
        message,
    };

    for store in graph.node_stores() {
        let node_type = store.node_type;
        let rows = store.num_nodes();
        check_matrix(&store.features)
            .map_err(|m| corrupt(format!("{node_type} features: {m}")))?;
        if let Some(labels) = &store.labels {
            if labels.len() != rows {
                return Err(corrupt(format!(
                    "{node_type} has {} labels for {rows} nodes",
                    labels.len()
                )));
            }
        }
        let mapped = graph.mappings().len(node_type);
        if mapped != rows {
            return Err(corrupt(format!(
                "{node_type} mapping has {mapped} ids for {rows} nodes"
            )));
        }
    }
    for (node_type, ids) in graph.mappings().all_ids() {
        if graph.node_store(*node_type).is_none() && !ids.is_empty() {
            return Err(corrupt(format!(
                "{node_type} mapping has {} ids but no node store",
                ids.len()
            )));
        }
    }

    for store in graph.edge_stores() {
        let relation = store.relation;
        let edges = store.num_edges();
        if store.dst.len() != edges {
            return Err(corrupt(format!(
                "{relation} has {edges} sources and {} destinations",
                store.dst.len()
            )));
        }
        check_indices(&store.src, graph.num_nodes(relation.source()))
            .map_err(|m| corrupt(format!("{relation} source {m}")))?;
        check_indices(&store.dst, graph.num_nodes(relation.target()))
            .map_err(|m| corrupt(format!("{relation} destination {m}")))?;
        check_matrix(&store.features)
            .map_err(|m| corrupt(format!("{relation} features: {m}")))?;
        if store.features.rows() != edges {
            return Err(corrupt(format!(
                "{relation} has {} feature rows for {edges} edges",
                store.features.rows()
            )));
        }
        if let Some(labels) = &store.labels {
            if labels.len() != edges {
                return Err(corrupt(format!(
                    "{relation} has {} labels for {edges} edges",
                    labels.len()
                )));
            }
        }
    }
    Ok(())
}

fn check_matrix(matrix: &FeatureMatrix) -> Result<(), String> {
    let expected = matrix.rows() * matrix.cols();
    if matrix.data().len() != expected {
        return Err(format!(
            "{} values for {}x{}",
            matrix.data().len(),
            matrix.rows(),
            matrix.cols()
        ));
    }
    if matrix.names().len() != matrix.cols() {
        return Err(format!(
            "{} column names for {} columns",
            matrix.names().len(),
            matrix.cols()
        ));
    }
    Ok(())
}

fn check_indices(indices: &[u32], num_nodes: usize) -> Result<(), String> {
    match indices.iter().enumerate().find(|(_, &i)| i as usize >= num_nodes) {
        Some((edge, index)) => Err(format!(
            "index {index} at edge {edge} is out of range for {num_nodes} nodes"
        )),
        None => Ok(()),
    }
}

/// Read only the statistics file (consumer view).
pub fn load_stats(dir: &Path) -> GraphResult<GraphStats> {
    let path = dir.join(STATS_FILE);
    if !path.exists() {
        return Err(GraphError::MissingArtifactFile { path });
    }
    let file: StatsFile = serde_json::from_slice(&fs::read(&path)?)?;
    check_version(&path, file.format_version)?;
    Ok(file.stats)
}

fn check_version(path: &Path, found: u32) -> GraphResult<()> {
    if found != FORMAT_VERSION {
        return Err(GraphError::FormatVersion {
            path: path.to_path_buf(),
            expected: FORMAT_VERSION,
            found,
        });
    }
    Ok(())
}

fn check_id(path: &Path, expected: Uuid, found: Uuid) -> GraphResult<()> {
    if expected != found {
        return Err(GraphError::ArtifactIdMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            found: found.to_string(),
        });
    }
    Ok(())
}

/// Write via a sibling temp file and rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> GraphResult<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
