//! Per-account prediction export (`predictions.json`).

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use fraud_graph_core::EncoderKind;

use crate::error::{ModelError, ModelResult};
use crate::training::split::Partition;

pub const PREDICTIONS_FILE: &str = "predictions.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub account_id: String,
    pub probability: f64,
    pub predicted_fraud: bool,
    pub is_fraud: bool,
    pub partition: Option<Partition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionsFile {
    pub graph_artifact_id: Uuid,
    pub model_kind: EncoderKind,
    pub threshold: f64,
    pub created_at: DateTime<Utc>,
    pub predictions: Vec<PredictionRecord>,
}

impl PredictionsFile {
    pub fn flagged(&self) -> impl Iterator<Item = &PredictionRecord> {
        self.predictions.iter().filter(|p| p.predicted_fraud)
    }
}

/// Write `file` to `<dir>/predictions.json` via a temp file and rename.
pub fn write_predictions(dir: &Path, file: &PredictionsFile) -> ModelResult<PathBuf> {
    fs::create_dir_all(dir)?;
    let path = dir.join(PREDICTIONS_FILE);
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(file)?)?;
    fs::rename(&tmp, &path)?;
    info!(
        path = %path.display(),
        accounts = file.predictions.len(),
        flagged = file.flagged().count(),
        "Exported predictions"
    );
    Ok(path)
}

pub fn read_predictions(path: &Path) -> ModelResult<PredictionsFile> {
    let bytes = fs::read(path).map_err(|e| ModelError::Checkpoint {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(serde_json::from_slice(&bytes)?)
}
