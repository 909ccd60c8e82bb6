//! Best-model checkpoints.
//!
//! A checkpoint is one safetensors file, `best_<kind>.safetensors`, holding
//! the model parameters, batch-norm buffers and Adam moments. A JSON document
//! in the safetensors header metadata (key [`METADATA_KEY`]) records the
//! epoch, validation metrics, optimizer step and model configuration so
//! consumers can read them without loading tensors.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use fraud_graph_core::{EncoderKind, ModelConfig};

use crate::error::{ModelError, ModelResult};
use crate::metrics::ClassificationMetrics;

pub const METADATA_KEY: &str = "fraud_graph";
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub format_version: u32,
    pub model_kind: EncoderKind,
    pub model: ModelConfig,
    pub epoch: usize,
    pub optimizer_step: usize,
    /// Validation metrics at `epoch`.
    pub metrics: ClassificationMetrics,
    pub graph_artifact_id: Uuid,
    pub created_at: DateTime<Utc>,
}

pub struct Checkpoint {
    pub metadata: CheckpointMetadata,
    pub tensors: HashMap<String, Tensor>,
}

/// `<dir>/best_<kind>.safetensors`
pub fn checkpoint_path(dir: &Path, kind: EncoderKind) -> PathBuf {
    dir.join(format!("best_{}.safetensors", kind))
}

/// Write `tensors` and `metadata` to `path` through a temp file and rename.
/// On failure the previous checkpoint at `path`, if any, is left intact.
pub fn save_checkpoint(
    path: &Path,
    tensors: &BTreeMap<String, Tensor>,
    metadata: &CheckpointMetadata,
) -> ModelResult<()> {
    let failed = |message: String| ModelError::Checkpoint {
        path: path.to_path_buf(),
        message,
    };

    let mut header = HashMap::new();
    header.insert(METADATA_KEY.to_string(), serde_json::to_string(metadata)?);
    let bytes = safetensors::tensor::serialize(tensors.iter(), &Some(header))
        .map_err(|e| failed(e.to_string()))?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| failed(e.to_string()))?;
    }
    let tmp = path.with_extension("safetensors.tmp");
    fs::write(&tmp, &bytes).map_err(|e| failed(e.to_string()))?;
    fs::rename(&tmp, path).map_err(|e| failed(e.to_string()))?;

    info!(
        path = %path.display(),
        epoch = metadata.epoch,
        tensors = tensors.len(),
        "Saved checkpoint"
    );
    Ok(())
}

pub fn load_checkpoint(path: &Path, device: &Device) -> ModelResult<Checkpoint> {
    let bytes = read(path)?;
    let metadata = parse_metadata(path, &bytes)?;
    let tensors = candle_core::safetensors::load_buffer(&bytes, device)?;
    Ok(Checkpoint { metadata, tensors })
}

/// Header metadata only; tensors are not materialized.
pub fn read_checkpoint_metadata(path: &Path) -> ModelResult<CheckpointMetadata> {
    let bytes = read(path)?;
    parse_metadata(path, &bytes)
}

fn read(path: &Path) -> ModelResult<Vec<u8>> {
    fs::read(path).map_err(|e| ModelError::Checkpoint {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn parse_metadata(path: &Path, bytes: &[u8]) -> ModelResult<CheckpointMetadata> {
    let corrupt = |message: String| ModelError::Checkpoint {
        path: path.to_path_buf(),
        message,
    };
    let (_, header) =
        safetensors::SafeTensors::read_metadata(bytes).map_err(|e| corrupt(e.to_string()))?;
    let json = header
        .metadata()
        .as_ref()
        .and_then(|m| m.get(METADATA_KEY))
        .ok_or_else(|| corrupt(format!("missing '{}' metadata", METADATA_KEY)))?;
    let metadata: CheckpointMetadata =
        serde_json::from_str(json).map_err(|e| corrupt(e.to_string()))?;
    if metadata.format_version != CHECKPOINT_FORMAT_VERSION {
        return Err(corrupt(format!(
            "format version {} (expected {})",
            metadata.format_version, CHECKPOINT_FORMAT_VERSION
        )));
    }
    Ok(metadata)
}
