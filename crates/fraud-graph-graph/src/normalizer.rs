//! Feature normalization: entity and edge rows to dense numeric matrices.
//!
//! Per output column, in `FeatureSpec` order:
//!
//! 1. select the value; missing values are 0
//! 2. numeric columns: optional `log1p` (negative inputs clamp to 0 first)
//! 3. numeric columns: optional standardization with population mean/std,
//!    skipped when std <= 0
//!
//! Categorical columns are encoded (ordinal index or one-hot) and never
//! standardized. The transform is pure and deterministic.

use serde::{Deserialize, Serialize};
use tracing::debug;

use fraud_graph_core::{ColumnSpec, EdgeRow, EntityRow, FeatureSpec};

/// Dense row-major `f32` matrix with named columns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
    names: Vec<String>,
}

impl FeatureMatrix {
    /// Matrix with `rows` rows and no columns.
    pub fn empty(rows: usize) -> Self {
        Self {
            rows,
            cols: 0,
            data: Vec::new(),
            names: Vec::new(),
        }
    }

    /// Build from row-major data. Returns `None` when the length does not match.
    pub fn from_rows(rows: usize, names: Vec<String>, data: Vec<f32>) -> Option<Self> {
        let cols = names.len();
        if data.len() != rows * cols {
            return None;
        }
        Some(Self {
            rows,
            cols,
            data,
            names,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    pub fn column(&self, j: usize) -> Vec<f32> {
        (0..self.rows).map(|i| self.data[i * self.cols + j]).collect()
    }

    /// Copy of the given rows, in order.
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let mut data = Vec::with_capacity(indices.len() * self.cols);
        for &i in indices {
            data.extend_from_slice(self.row(i));
        }
        Self {
            rows: indices.len(),
            cols: self.cols,
            data,
            names: self.names.clone(),
        }
    }
}

/// Statistics of one output column, taken after `log1p` and before standardization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub name: String,
    pub mean: f64,
    pub std: f64,
    /// Whether the column was standardized (false for categorical, pass-through
    /// and zero-variance columns).
    pub standardized: bool,
}

/// Normalized matrix plus per-column statistics for reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedFeatures {
    pub matrix: FeatureMatrix,
    pub stats: Vec<ColumnStats>,
}

/// Row that exposes named attributes to the normalizer.
pub trait FeatureSource {
    fn numeric(&self, column: &str) -> Option<f64>;
    fn categorical(&self, column: &str) -> Option<&str>;
}

impl FeatureSource for EntityRow {
    fn numeric(&self, column: &str) -> Option<f64> {
        self.numeric.get(column).copied()
    }

    fn categorical(&self, column: &str) -> Option<&str> {
        self.categorical.get(column).map(String::as_str)
    }
}

impl FeatureSource for EdgeRow {
    fn numeric(&self, column: &str) -> Option<f64> {
        self.numeric.get(column).copied()
    }

    fn categorical(&self, _column: &str) -> Option<&str> {
        None
    }
}

impl<T: FeatureSource + ?Sized> FeatureSource for &T {
    fn numeric(&self, column: &str) -> Option<f64> {
        (**self).numeric(column)
    }

    fn categorical(&self, column: &str) -> Option<&str> {
        (**self).categorical(column)
    }
}

/// Applies one [`FeatureSpec`] to a table of rows.
#[derive(Debug, Clone)]
pub struct FeatureNormalizer<'a> {
    spec: &'a FeatureSpec,
}

impl<'a> FeatureNormalizer<'a> {
    pub fn new(spec: &'a FeatureSpec) -> Self {
        Self { spec }
    }

    pub fn transform<R: FeatureSource>(&self, rows: &[R]) -> NormalizedFeatures {
        let n = rows.len();
        let width = self.spec.width();
        let mut columns: Vec<Vec<f64>> = Vec::with_capacity(width);
        let mut stats = Vec::with_capacity(width);

        for column in &self.spec.columns {
            match column {
                ColumnSpec::Numeric {
                    name,
                    log1p,
                    standardize,
                } => {
                    let mut values: Vec<f64> = rows
                        .iter()
                        .map(|row| {
                            let v = row.numeric(name).filter(|v| v.is_finite()).unwrap_or(0.0);
                            if *log1p {
                                v.max(0.0).ln_1p()
                            } else {
                                v
                            }
                        })
                        .collect();
                    let (mean, std) = mean_std(&values);
                    let applied = *standardize && std > 0.0;
                    if applied {
                        for v in &mut values {
                            *v = (*v - mean) / std;
                        }
                    } else if *standardize {
                        debug!(column = %name, "Zero variance column left unscaled");
                    }
                    stats.push(ColumnStats {
                        name: name.clone(),
                        mean,
                        std,
                        standardized: applied,
                    });
                    columns.push(values);
                }
                ColumnSpec::Ordinal { name, levels } => {
                    let values: Vec<f64> = rows
                        .iter()
                        .map(|row| {
                            row.categorical(name)
                                .and_then(|v| levels.iter().position(|l| l == v))
                                .map(|p| p as f64)
                                .unwrap_or(0.0)
                        })
                        .collect();
                    let (mean, std) = mean_std(&values);
                    stats.push(ColumnStats {
                        name: name.clone(),
                        mean,
                        std,
                        standardized: false,
                    });
                    columns.push(values);
                }
                ColumnSpec::OneHot { name, levels } => {
                    for level in levels {
                        let values: Vec<f64> = rows
                            .iter()
                            .map(|row| {
                                if row.categorical(name) == Some(level.as_str()) {
                                    1.0
                                } else {
                                    0.0
                                }
                            })
                            .collect();
                        let (mean, std) = mean_std(&values);
                        stats.push(ColumnStats {
                            name: format!("{}={}", name, level),
                            mean,
                            std,
                            standardized: false,
                        });
                        columns.push(values);
                    }
                }
            }
        }

        let mut data = Vec::with_capacity(n * width);
        for i in 0..n {
            for column in &columns {
                data.push(column[i] as f32);
            }
        }

        NormalizedFeatures {
            matrix: FeatureMatrix {
                rows: n,
                cols: width,
                data,
                names: self.spec.output_names(),
            },
            stats,
        }
    }
}

/// Population mean and standard deviation; `(0, 0)` for an empty slice.
fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows() -> Vec<EntityRow> {
        vec![
            EntityRow::new("a")
                .with_numeric("amount", 10.0)
                .with_numeric("flag", 1.0)
                .with_categorical("level", "HIGH"),
            EntityRow::new("b")
                .with_numeric("amount", 100.0)
                .with_numeric("flag", 1.0)
                .with_categorical("level", "LOW"),
            EntityRow::new("c")
                .with_numeric("amount", 1000.0)
                .with_numeric("flag", 1.0)
                .with_categorical("level", "unknown"),
            EntityRow::new("d").with_numeric("amount", -5.0),
        ]
    }

    #[test]
    fn test_standardized_columns_have_zero_mean_unit_std() {
        let spec = FeatureSpec::new(vec![ColumnSpec::log_numeric("amount")]);
        let out = FeatureNormalizer::new(&spec).transform(&rows());
        let col = out.matrix.column(0);
        let mean: f32 = col.iter().sum::<f32>() / col.len() as f32;
        let var: f32 = col.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / col.len() as f32;
        assert!(mean.abs() < 1e-5);
        assert!((var.sqrt() - 1.0).abs() < 1e-4);
        assert!(out.stats[0].standardized);
    }

    #[test]
    fn test_negative_inputs_clamp_before_log1p() {
        let spec = FeatureSpec::new(vec![ColumnSpec::log_only("amount")]);
        let out = FeatureNormalizer::new(&spec).transform(&rows());
        assert_eq!(out.matrix.row(3), &[0.0]);
        assert!((out.matrix.row(0)[0] - 11.0f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn test_zero_variance_column_is_not_scaled() {
        let spec = FeatureSpec::new(vec![ColumnSpec::numeric("constant")]);
        let out = FeatureNormalizer::new(&spec).transform(&rows());
        assert!(out.matrix.column(0).iter().all(|v| *v == 0.0));
        assert!(!out.stats[0].standardized);
        assert_eq!(out.stats[0].std, 0.0);
    }

    #[test]
    fn test_missing_values_are_zero() {
        let spec = FeatureSpec::new(vec![ColumnSpec::passthrough("flag")]);
        let out = FeatureNormalizer::new(&spec).transform(&rows());
        assert_eq!(out.matrix.column(0), vec![1.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_categorical_encodings() {
        let spec = FeatureSpec::new(vec![
            ColumnSpec::ordinal("level", &["LOW", "MEDIUM", "HIGH"]),
            ColumnSpec::one_hot("level", &["LOW", "HIGH"]),
        ]);
        let out = FeatureNormalizer::new(&spec).transform(&rows());
        assert_eq!(out.matrix.cols(), 3);
        assert_eq!(out.matrix.row(0), &[2.0, 0.0, 1.0]);
        assert_eq!(out.matrix.row(1), &[0.0, 1.0, 0.0]);
        // unknown level: ordinal 0, one-hot all zero
        assert_eq!(out.matrix.row(2), &[0.0, 0.0, 0.0]);
        assert!(out.stats.iter().all(|s| !s.standardized));
        assert_eq!(out.matrix.names()[1], "level=LOW");
    }

    #[test]
    fn test_empty_table_keeps_width() {
        let spec = FeatureSpec::new(vec![ColumnSpec::numeric("amount"), ColumnSpec::numeric("x")]);
        let out = FeatureNormalizer::new(&spec).transform::<EntityRow>(&[]);
        assert_eq!(out.matrix.rows(), 0);
        assert_eq!(out.matrix.cols(), 2);
    }

    #[test]
    fn test_select_rows() {
        let m = FeatureMatrix::from_rows(3, vec!["x".into()], vec![1.0, 2.0, 3.0]).unwrap();
        let picked = m.select_rows(&[2, 0]);
        assert_eq!(picked.data(), &[3.0, 1.0]);
        assert!(FeatureMatrix::from_rows(2, vec!["x".into()], vec![1.0]).is_none());
    }
}
