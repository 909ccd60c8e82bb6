//! Feature column specifications.
//!
//! A [`FeatureSpec`] is the ordered list of columns the normalizer selects for
//! one node type or relation. Categorical metadata (risk levels, device types,
//! countries) is declared here as configuration rather than parsed by
//! hard-coded rules.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::ingest::columns;
use crate::types::{NodeType, RelationType};

fn default_true() -> bool {
    true
}

/// One input column and how it becomes output features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnSpec {
    /// Numeric column, optionally `log1p`-compressed and standardized.
    Numeric {
        name: String,
        #[serde(default)]
        log1p: bool,
        #[serde(default = "default_true")]
        standardize: bool,
    },
    /// Categorical column mapped to its position in `levels` (unknown -> 0).
    Ordinal { name: String, levels: Vec<String> },
    /// Categorical column expanded to one indicator per level (unknown -> all zero).
    OneHot { name: String, levels: Vec<String> },
}

impl ColumnSpec {
    /// Standardized numeric column.
    pub fn numeric(name: &str) -> Self {
        ColumnSpec::Numeric {
            name: name.to_string(),
            log1p: false,
            standardize: true,
        }
    }

    /// Heavy-tailed count/amount column: `log1p` then standardize.
    pub fn log_numeric(name: &str) -> Self {
        ColumnSpec::Numeric {
            name: name.to_string(),
            log1p: true,
            standardize: true,
        }
    }

    /// Binary or already-encoded column passed through untouched.
    pub fn passthrough(name: &str) -> Self {
        ColumnSpec::Numeric {
            name: name.to_string(),
            log1p: false,
            standardize: false,
        }
    }

    /// `log1p` without standardization.
    pub fn log_only(name: &str) -> Self {
        ColumnSpec::Numeric {
            name: name.to_string(),
            log1p: true,
            standardize: false,
        }
    }

    pub fn ordinal(name: &str, levels: &[&str]) -> Self {
        ColumnSpec::Ordinal {
            name: name.to_string(),
            levels: levels.iter().map(|l| l.to_string()).collect(),
        }
    }

    pub fn one_hot(name: &str, levels: &[&str]) -> Self {
        ColumnSpec::OneHot {
            name: name.to_string(),
            levels: levels.iter().map(|l| l.to_string()).collect(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ColumnSpec::Numeric { name, .. }
            | ColumnSpec::Ordinal { name, .. }
            | ColumnSpec::OneHot { name, .. } => name,
        }
    }

    /// Number of output features this column produces.
    pub fn width(&self) -> usize {
        match self {
            ColumnSpec::Numeric { .. } | ColumnSpec::Ordinal { .. } => 1,
            ColumnSpec::OneHot { levels, .. } => levels.len(),
        }
    }

    /// Output feature names, in order.
    pub fn output_names(&self) -> Vec<String> {
        match self {
            ColumnSpec::Numeric { name, .. } | ColumnSpec::Ordinal { name, .. } => {
                vec![name.clone()]
            }
            ColumnSpec::OneHot { name, levels } => levels
                .iter()
                .map(|level| format!("{}={}", name, level))
                .collect(),
        }
    }
}

/// Ordered column selection for one node type or relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub columns: Vec<ColumnSpec>,
}

impl FeatureSpec {
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self { columns }
    }

    /// Total output width.
    pub fn width(&self) -> usize {
        self.columns.iter().map(ColumnSpec::width).sum()
    }

    pub fn output_names(&self) -> Vec<String> {
        self.columns
            .iter()
            .flat_map(ColumnSpec::output_names)
            .collect()
    }

    /// Account features. The fraud label and everything derived from it
    /// (fraud count, fraud rate, risk score) are excluded.
    pub fn account_default() -> Self {
        Self::new(vec![
            ColumnSpec::log_numeric(columns::TOTAL_TRANSACTIONS),
            ColumnSpec::log_numeric(columns::TOTAL_AMOUNT),
            ColumnSpec::log_numeric(columns::AVG_AMOUNT),
            ColumnSpec::log_numeric(columns::ACCOUNT_AGE_DAYS),
            ColumnSpec::log_numeric(columns::DISTINCT_MERCHANTS),
            ColumnSpec::log_numeric(columns::DISTINCT_DEVICES),
        ])
    }

    pub fn merchant_default() -> Self {
        Self::new(vec![
            ColumnSpec::numeric(columns::FRAUD_RATE),
            ColumnSpec::log_numeric(columns::TOTAL_TRANSACTIONS),
            ColumnSpec::log_numeric(columns::AVG_TRANSACTION_AMOUNT),
            ColumnSpec::ordinal(columns::RISK_LEVEL, &columns::RISK_LEVELS),
        ])
    }

    pub fn device_default() -> Self {
        Self::new(vec![
            ColumnSpec::numeric(columns::FRAUD_RATE),
            ColumnSpec::log_numeric(columns::TOTAL_USERS),
            ColumnSpec::log_numeric(columns::TOTAL_TRANSACTIONS),
            ColumnSpec::passthrough(columns::IS_SHARED),
            ColumnSpec::numeric(columns::RISK_SCORE),
        ])
    }

    pub fn transaction_edges_default() -> Self {
        Self::new(vec![
            ColumnSpec::log_numeric(columns::TRANSACTION_AMOUNT),
            ColumnSpec::numeric(columns::TRANSACTION_HOUR),
            ColumnSpec::numeric(columns::TRANSACTION_DAY_OF_WEEK),
        ])
    }

    pub fn device_usage_edges_default() -> Self {
        Self::new(vec![ColumnSpec::log_only(columns::TRANSACTION_AMOUNT)])
    }

    pub fn shared_device_edges_default() -> Self {
        Self::new(vec![
            ColumnSpec::log_only(columns::TRANSACTION_COUNT),
            ColumnSpec::log_only(columns::FRAUD_COUNT),
        ])
    }

    fn validate(&self, field: &str) -> CoreResult<()> {
        if self.columns.is_empty() {
            return Err(CoreError::ValidationError {
                field: field.to_string(),
                message: "feature spec must select at least one column".into(),
            });
        }
        for column in &self.columns {
            if let ColumnSpec::OneHot { name, levels } | ColumnSpec::Ordinal { name, levels } =
                column
            {
                if levels.is_empty() {
                    return Err(CoreError::ValidationError {
                        field: format!("{}.{}", field, name),
                        message: "categorical column needs at least one level".into(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Feature specs for every node type and forward relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturesConfig {
    pub account: FeatureSpec,
    pub merchant: FeatureSpec,
    pub device: FeatureSpec,
    pub transacts_with: FeatureSpec,
    pub uses: FeatureSpec,
    pub shares: FeatureSpec,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            account: FeatureSpec::account_default(),
            merchant: FeatureSpec::merchant_default(),
            device: FeatureSpec::device_default(),
            transacts_with: FeatureSpec::transaction_edges_default(),
            uses: FeatureSpec::device_usage_edges_default(),
            shares: FeatureSpec::shared_device_edges_default(),
        }
    }
}

impl FeaturesConfig {
    pub fn node_spec(&self, node_type: NodeType) -> &FeatureSpec {
        match node_type {
            NodeType::Account => &self.account,
            NodeType::Merchant => &self.merchant,
            NodeType::Device => &self.device,
        }
    }

    /// Spec for a forward relation; reverse relations have none of their own.
    pub fn edge_spec(&self, relation: RelationType) -> Option<&FeatureSpec> {
        match relation {
            RelationType::TransactsWith => Some(&self.transacts_with),
            RelationType::Uses => Some(&self.uses),
            RelationType::Shares => Some(&self.shares),
            _ => None,
        }
    }

    pub fn validate(&self) -> CoreResult<()> {
        self.account.validate("features.account")?;
        self.merchant.validate("features.merchant")?;
        self.device.validate("features.device")?;
        self.transacts_with.validate("features.transacts_with")?;
        self.uses.validate("features.uses")?;
        self.shares.validate("features.shares")?;
        Ok(())
    }
}
