//! Configuration management for fraud-graph.

mod sub_configs;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::features::FeaturesConfig;

pub use sub_configs::{
    DataConfig, EncoderKind, LogFormat, LoggingConfig, MetricsConfig, ModelConfig,
    ThresholdMetric, TrainingConfig,
};

/// Environment variable selecting the environment-specific config file.
pub const ENV_VAR: &str = "FRAUD_GRAPH_ENV";

/// Prefix of environment overrides (`FRAUD_GRAPH__TRAINING__SEED=7`).
pub const ENV_PREFIX: &str = "FRAUD_GRAPH";

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FraudGraphConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl FraudGraphConfig {
    /// Load configuration from files and environment.
    ///
    /// Configuration is loaded in order:
    /// 1. config/default.toml (base settings)
    /// 2. config/{FRAUD_GRAPH_ENV}.toml (environment-specific)
    /// 3. Environment variables with the FRAUD_GRAPH prefix and `__` separator
    pub fn load() -> CoreResult<Self> {
        let env = std::env::var(ENV_VAR).unwrap_or_else(|_| "development".to_string());

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            );

        let config: FraudGraphConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CoreError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: FraudGraphConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> CoreResult<()> {
        self.features.validate()?;
        self.model.validate()?;
        self.training.validate()?;
        self.metrics.validate()?;
        Ok(())
    }
}
