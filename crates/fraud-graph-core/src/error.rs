//! Error types for fraud-graph-core.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for configuration and ingestion.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Validation error: {field} - {message}")]
    ValidationError { field: String, message: String },

    #[error("Data file not found: {}", path.display())]
    MissingFile { path: PathBuf },

    #[error("Missing required column '{column}' in {source_name}")]
    MissingColumn { source_name: String, column: String },

    #[error("Dataset is empty: {source_name}")]
    EmptyDataset { source_name: String },

    #[error("Invalid record at row {row}, column '{column}': {message}")]
    InvalidRecord {
        row: usize,
        column: String,
        message: String,
    },

    #[error("CSV error in {source_name}: {message}")]
    Csv { source_name: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for CoreError {
    fn from(err: config::ConfigError) -> Self {
        CoreError::ConfigError(err.to_string())
    }
}

impl From<toml::de::Error> for CoreError {
    fn from(err: toml::de::Error) -> Self {
        CoreError::ConfigError(format!("Failed to parse config file: {}", err))
    }
}

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_column_names_column_and_source() {
        let err = CoreError::MissingColumn {
            source_name: "transactions.csv".into(),
            column: "account_id".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("account_id"));
        assert!(msg.contains("transactions.csv"));
    }

    #[test]
    fn test_validation_error_display() {
        let err = CoreError::ValidationError {
            field: "training.train_ratio".into(),
            message: "ratios must sum to 1.0".into(),
        };
        assert!(err.to_string().contains("training.train_ratio"));
    }
}
