//! # Column-Wise Preprocessing
//!
//! A [`FittedPreprocessor`] is learned once from the training rows and then
//! applied unchanged to every record scored afterwards:
//!
//! - numeric columns: missing cells are replaced by the training median;
//! - categorical columns: missing cells are replaced by the training mode, then
//!   the value is one-hot encoded against the sorted training vocabulary. A
//!   category never seen during training encodes to an all-zero block.
//!
//! The output layout is fixed: all numeric columns first (schema order), then
//! one block per categorical column.

use crate::data::{ColumnKind, ColumnValues, Dataset, Record, Schema, SchemaMismatch, Value};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error(
        "Column '{0}' has no observed values in the training rows, so no imputation value can be learned."
    )]
    NoObservedValues(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericImputer {
    pub column: String,
    pub median: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalEncoder {
    pub column: String,
    pub mode: String,
    /// Sorted training vocabulary; index `i` is the `i`-th indicator column.
    pub categories: Vec<String>,
}

impl CategoricalEncoder {
    /// Position of the indicator to set, or `None` for an unknown category.
    fn indicator(&self, value: Option<&str>) -> Option<usize> {
        let value = value.unwrap_or(&self.mode);
        self.categories
            .binary_search_by(|c| c.as_str().cmp(value))
            .ok()
    }
}

/// The fitted imputation and encoding state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedPreprocessor {
    /// The input schema, in table order.
    pub schema: Schema,
    pub numeric: Vec<NumericImputer>,
    pub categorical: Vec<CategoricalEncoder>,
}

impl FittedPreprocessor {
    /// Learns medians, modes and vocabularies from `rows` of `dataset` only.
    pub fn fit(dataset: &Dataset, rows: &[usize]) -> Result<Self, PreprocessError> {
        let mut numeric = Vec::new();
        let mut categorical = Vec::new();

        for column in dataset.columns() {
            match &column.values {
                ColumnValues::Numeric(values) => {
                    let mut observed: Vec<f64> =
                        rows.iter().filter_map(|&r| values[r]).collect();
                    let median = median(&mut observed)
                        .ok_or_else(|| PreprocessError::NoObservedValues(column.name.clone()))?;
                    numeric.push(NumericImputer {
                        column: column.name.clone(),
                        median,
                    });
                }
                ColumnValues::Categorical(values) => {
                    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
                    for &r in rows {
                        if let Some(v) = values[r].as_deref() {
                            *counts.entry(v).or_insert(0) += 1;
                        }
                    }
                    // Ties resolve to the smallest category because the map is sorted.
                    let mode = counts
                        .iter()
                        .fold(None::<(&str, usize)>, |best, (&v, &n)| match best {
                            Some((_, m)) if m >= n => best,
                            _ => Some((v, n)),
                        })
                        .map(|(v, _)| v.to_string())
                        .ok_or_else(|| PreprocessError::NoObservedValues(column.name.clone()))?;
                    log::debug!(
                        "Column '{}': {} categories, mode '{}'",
                        column.name,
                        counts.len(),
                        mode
                    );
                    categorical.push(CategoricalEncoder {
                        column: column.name.clone(),
                        mode,
                        categories: counts.keys().map(|c| c.to_string()).collect(),
                    });
                }
            }
        }

        Ok(Self {
            schema: dataset.schema().clone(),
            numeric,
            categorical,
        })
    }

    /// Width of the transformed feature vector.
    pub fn n_outputs(&self) -> usize {
        self.numeric.len()
            + self
                .categorical
                .iter()
                .map(|c| c.categories.len())
                .sum::<usize>()
    }

    /// Names of the transformed features, `column` for numeric inputs and
    /// `column=category` for indicators.
    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.numeric.iter().map(|n| n.column.clone()).collect();
        for encoder in &self.categorical {
            names.extend(
                encoder
                    .categories
                    .iter()
                    .map(|c| format!("{}={}", encoder.column, c)),
            );
        }
        names
    }

    /// Transforms a single record. The record must carry exactly the trained
    /// columns; missing cells are fine and get imputed.
    pub fn transform_record(&self, record: &Record) -> Result<Array1<f64>, SchemaMismatch> {
        let mut out = Array1::zeros(self.n_outputs());

        for (i, imputer) in self.numeric.iter().enumerate() {
            let cell = match record.get(&imputer.column) {
                None => return Err(self.missing_column(&imputer.column)),
                Some(Value::Number(x)) => Some(*x).filter(|x| !x.is_nan()),
                Some(Value::Missing) => None,
                Some(Value::Text(_)) => {
                    return Err(SchemaMismatch::WrongKind {
                        column: imputer.column.clone(),
                        expected: ColumnKind::Numeric,
                        found: ColumnKind::Categorical,
                    });
                }
            };
            out[i] = cell.unwrap_or(imputer.median);
        }

        let mut offset = self.numeric.len();
        for encoder in &self.categorical {
            let cell = match record.get(&encoder.column) {
                None => return Err(self.missing_column(&encoder.column)),
                Some(Value::Text(s)) => Some(s.as_str()),
                Some(Value::Missing) => None,
                Some(Value::Number(_)) => {
                    return Err(SchemaMismatch::WrongKind {
                        column: encoder.column.clone(),
                        expected: ColumnKind::Categorical,
                        found: ColumnKind::Numeric,
                    });
                }
            };
            if let Some(position) = encoder.indicator(cell) {
                out[offset + position] = 1.0;
            }
            offset += encoder.categories.len();
        }

        if let Some(extra) = record.names().find(|name| self.schema.get(name).is_none()) {
            return Err(SchemaMismatch::UnexpectedColumn {
                column: extra.to_string(),
                expected: self.schema.to_string(),
            });
        }

        Ok(out)
    }

    /// Transforms `rows` of a dataset into a dense `[rows.len(), n_outputs]`
    /// matrix. Produces the same rows as [`Self::transform_record`].
    pub fn transform_rows(
        &self,
        dataset: &Dataset,
        rows: &[usize],
    ) -> Result<Array2<f64>, SchemaMismatch> {
        self.schema.check_matches(dataset.schema())?;
        let mut out = Array2::zeros((rows.len(), self.n_outputs()));

        for (j, imputer) in self.numeric.iter().enumerate() {
            let values = match dataset.column(&imputer.column).map(|c| &c.values) {
                Some(ColumnValues::Numeric(values)) => values,
                _ => return Err(self.missing_column(&imputer.column)),
            };
            for (i, &r) in rows.iter().enumerate() {
                out[[i, j]] = values[r].unwrap_or(imputer.median);
            }
        }

        let mut offset = self.numeric.len();
        for encoder in &self.categorical {
            let values = match dataset.column(&encoder.column).map(|c| &c.values) {
                Some(ColumnValues::Categorical(values)) => values,
                _ => return Err(self.missing_column(&encoder.column)),
            };
            for (i, &r) in rows.iter().enumerate() {
                if let Some(position) = encoder.indicator(values[r].as_deref()) {
                    out[[i, offset + position]] = 1.0;
                }
            }
            offset += encoder.categories.len();
        }

        Ok(out)
    }

    fn missing_column(&self, column: &str) -> SchemaMismatch {
        SchemaMismatch::MissingColumn {
            column: column.to_string(),
            expected: self.schema.to_string(),
        }
    }
}

/// Median of the observed values (mean of the two middle values for an even
/// count). Sorts `values` in place.
fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some(0.5 * (values[mid - 1] + values[mid]))
    }
}
