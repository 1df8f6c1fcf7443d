//! # Inference and Explanation Service
//!
//! A [`RiskService`] is built once from a trained artifact and the reference
//! dataset, and then answers every query without refitting anything:
//! single-record prediction, patient assessment, what-if simulation, exact
//! attributions and a descriptive fairness breakdown.
//!
//! The service is immutable after construction. Reference-row probabilities
//! are computed once up front and reused by the fairness breakdown and the
//! score export.

use crate::data::{
    ColumnKind, ColumnSpec, Dataset, DatasetOptions, Record, SchemaMismatch, TargetColumn, Value,
    load_dataset,
};
use crate::model::TrainedPipeline;
use crate::shap::Explanation;
use itertools::Itertools;
use ndarray::{Array1, ArrayView1};
use std::cmp::Ordering;
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Columns with this many distinct values or more cannot be broken down.
pub const MAX_GROUP_CARDINALITY: usize = 10;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Record does not match the model's feature schema: {0}")]
    SchemaMismatch(#[from] SchemaMismatch),

    #[error("Failed to load '{path}': {reason}")]
    ArtifactLoadFailure { path: String, reason: String },

    #[error("Patient index {index} is out of range; the dataset has {len} rows.")]
    InvalidIndex { index: usize, len: usize },

    #[error("Unknown column '{0}'.")]
    UnknownColumn(String),

    #[error(
        "Column '{column}' has {distinct} distinct values; a breakdown needs fewer than {limit}."
    )]
    CardinalityTooHigh {
        column: String,
        distinct: usize,
        limit: usize,
    },

    #[error("Override for {0} does not match any column.")]
    UnmatchedOverride(FieldSelector),
}

/// Coarse interpretation of a probability for the patient view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskBand {
    /// Probability at most 0.5.
    Low,
    /// Above 0.5, at most 0.8.
    Moderate,
    /// Above 0.8.
    Critical,
}

impl RiskBand {
    pub fn from_probability(p: f64) -> Self {
        if p > 0.8 {
            RiskBand::Critical
        } else if p > 0.5 {
            RiskBand::Moderate
        } else {
            RiskBand::Low
        }
    }
}

impl fmt::Display for RiskBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RiskBand::Low => "Low",
            RiskBand::Moderate => "Moderate",
            RiskBand::Critical => "Critical",
        };
        f.write_str(label)
    }
}

/// Which column(s) an override applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSelector {
    /// The column with exactly this name.
    Exact(String),
    /// Every column whose name contains this text, ignoring case.
    Contains(String),
}

impl FieldSelector {
    fn matches(&self, column: &str) -> bool {
        match self {
            FieldSelector::Exact(name) => column == name,
            FieldSelector::Contains(needle) => column
                .to_lowercase()
                .contains(&needle.to_lowercase()),
        }
    }
}

impl fmt::Display for FieldSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldSelector::Exact(name) => write!(f, "column '{name}'"),
            FieldSelector::Contains(needle) => write!(f, "columns containing '{needle}'"),
        }
    }
}

/// The value an override assigns.
#[derive(Debug, Clone, PartialEq)]
pub enum OverrideValue {
    /// An already typed value; it must fit every selected column.
    Typed(Value),
    /// Text as a user typed it, read according to each selected column's kind,
    /// so `02139` stays a label in a categorical column.
    Raw(String),
}

impl OverrideValue {
    fn resolve(&self, kind: ColumnKind) -> Value {
        match self {
            OverrideValue::Typed(value) => value.clone(),
            OverrideValue::Raw(text) => Value::parse_as(text, kind),
        }
    }
}

/// One field edit of a what-if simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct Override {
    pub selector: FieldSelector,
    pub value: OverrideValue,
}

impl Override {
    pub fn exact(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            selector: FieldSelector::Exact(column.into()),
            value: OverrideValue::Typed(value.into()),
        }
    }

    pub fn matching(needle: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            selector: FieldSelector::Contains(needle.into()),
            value: OverrideValue::Typed(value.into()),
        }
    }

    /// An override whose value is typed text, interpreted per target column.
    pub fn from_text(selector: FieldSelector, raw: impl Into<String>) -> Self {
        Self {
            selector,
            value: OverrideValue::Raw(raw.into()),
        }
    }
}

/// The patient-dashboard view of one reference row.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub index: usize,
    pub record: Record,
    pub probability: f64,
    pub band: RiskBand,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhatIfOutcome {
    pub original: f64,
    pub modified: f64,
    /// `|modified - original|`.
    pub delta: f64,
    /// The edited copy of the record that produced `modified`.
    pub record: Record,
    /// Columns actually changed, in override order.
    pub changed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupSummary {
    pub value: Value,
    pub mean_probability: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FairnessBreakdown {
    pub column: String,
    /// One entry per observed value, in sorted value order.
    pub groups: Vec<GroupSummary>,
}

pub struct RiskService {
    pipeline: TrainedPipeline,
    dataset: Dataset,
    reference_scores: Array1<f64>,
}

impl RiskService {
    /// Loads the artifact and the reference dataset from disk. The dataset is
    /// read with the label column and field separator recorded in the artifact.
    pub fn open(
        model_path: impl AsRef<Path>,
        data_path: impl AsRef<Path>,
    ) -> Result<Self, ServiceError> {
        Self::open_with(model_path, data_path, None)
    }

    /// Like [`Self::open`], reading the reference dataset with `separator`
    /// instead of the training table's separator when one is given.
    pub fn open_with(
        model_path: impl AsRef<Path>,
        data_path: impl AsRef<Path>,
        separator: Option<u8>,
    ) -> Result<Self, ServiceError> {
        let model_path = model_path.as_ref();
        let data_path = data_path.as_ref();
        let pipeline =
            TrainedPipeline::load(model_path).map_err(|e| ServiceError::ArtifactLoadFailure {
                path: model_path.display().to_string(),
                reason: e.to_string(),
            })?;
        let options = DatasetOptions {
            target: TargetColumn::Named(pipeline.target_column.clone()),
            separator: separator.unwrap_or(pipeline.separator),
        };
        let dataset =
            load_dataset(data_path, &options).map_err(|e| ServiceError::ArtifactLoadFailure {
                path: data_path.display().to_string(),
                reason: e.to_string(),
            })?;
        Self::new(pipeline, dataset)
    }

    /// Checks the dataset against the artifact's schema and scores every
    /// reference row once.
    pub fn new(pipeline: TrainedPipeline, dataset: Dataset) -> Result<Self, ServiceError> {
        pipeline.schema().check_matches(dataset.schema())?;
        let rows: Vec<usize> = (0..dataset.len()).collect();
        let reference_scores = pipeline.score_rows(&dataset, &rows)?;
        log::info!(
            "Risk service ready: {} reference patients, {} features",
            dataset.len(),
            pipeline.preprocessor.n_outputs()
        );
        Ok(Self {
            pipeline,
            dataset,
            reference_scores,
        })
    }

    pub fn pipeline(&self) -> &TrainedPipeline {
        &self.pipeline
    }

    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// Owned copy of reference row `index`.
    pub fn record(&self, index: usize) -> Result<Record, ServiceError> {
        self.dataset
            .record(index)
            .ok_or(ServiceError::InvalidIndex {
                index,
                len: self.dataset.len(),
            })
    }

    /// Probabilities of every reference row, in dataset order.
    pub fn reference_scores(&self) -> ArrayView1<'_, f64> {
        self.reference_scores.view()
    }

    /// Positive-class probability of an arbitrary record.
    pub fn predict(&self, record: &Record) -> Result<f64, ServiceError> {
        Ok(self.pipeline.predict_proba(record)?)
    }

    pub fn assess(&self, index: usize) -> Result<Assessment, ServiceError> {
        let record = self.record(index)?;
        let probability = self.predict(&record)?;
        Ok(Assessment {
            index,
            record,
            probability,
            band: RiskBand::from_probability(probability),
        })
    }

    /// Scores row `index` before and after applying `overrides` to a copy of it.
    /// Overrides apply in order, so a later one wins on a column both select.
    pub fn what_if(&self, index: usize, overrides: &[Override]) -> Result<WhatIfOutcome, ServiceError> {
        let original_record = self.record(index)?;
        let mut record = original_record.clone();
        let mut changed = Vec::new();

        for edit in overrides {
            let targets: Vec<&ColumnSpec> = self
                .pipeline
                .schema()
                .columns
                .iter()
                .filter(|c| edit.selector.matches(&c.name))
                .collect();
            if targets.is_empty() {
                return Err(ServiceError::UnmatchedOverride(edit.selector.clone()));
            }
            for column in targets {
                let value = edit.value.resolve(column.kind);
                check_value_fits(column, &value)?;
                record.set(column.name.clone(), value);
                if !changed.contains(&column.name) {
                    changed.push(column.name.clone());
                }
            }
        }

        let original = self.predict(&original_record)?;
        let modified = self.predict(&record)?;
        log::debug!(
            "What-if on patient {index}: {original:.4} -> {modified:.4} after editing {}",
            changed.iter().join(", ")
        );
        Ok(WhatIfOutcome {
            original,
            modified,
            delta: (modified - original).abs(),
            record,
            changed,
        })
    }

    /// Exact attribution of row `index`'s prediction, strongest first.
    pub fn explain(&self, index: usize) -> Result<Explanation, ServiceError> {
        let record = self.record(index)?;
        Ok(self.pipeline.explain(&record)?)
    }

    /// Feature columns with few enough distinct values for a breakdown.
    pub fn sensitive_columns(&self) -> Vec<&str> {
        self.dataset
            .columns()
            .iter()
            .filter(|c| c.values.distinct_count() < MAX_GROUP_CARDINALITY)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Mean reference probability per value of a low-cardinality column.
    /// Rows missing the value are left out. Descriptive only.
    pub fn fairness_breakdown(&self, column: &str) -> Result<FairnessBreakdown, ServiceError> {
        let feature = self
            .dataset
            .column(column)
            .ok_or_else(|| ServiceError::UnknownColumn(column.to_string()))?;
        let distinct = feature.values.distinct_count();
        if distinct >= MAX_GROUP_CARDINALITY {
            return Err(ServiceError::CardinalityTooHigh {
                column: column.to_string(),
                distinct,
                limit: MAX_GROUP_CARDINALITY,
            });
        }

        let mut observed: Vec<(Value, f64)> = (0..self.dataset.len())
            .map(|i| (feature.values.value(i), self.reference_scores[i]))
            .filter(|(value, _)| !value.is_missing())
            .collect();
        observed.sort_by(|a, b| compare_values(&a.0, &b.0));

        let groups = observed
            .iter()
            .chunk_by(|(value, _)| value.clone())
            .into_iter()
            .map(|(value, members)| {
                let scores: Vec<f64> = members.map(|(_, p)| *p).collect();
                GroupSummary {
                    value,
                    mean_probability: scores.iter().sum::<f64>() / scores.len() as f64,
                    count: scores.len(),
                }
            })
            .collect();

        Ok(FairnessBreakdown {
            column: column.to_string(),
            groups,
        })
    }
}

fn check_value_fits(column: &ColumnSpec, value: &Value) -> Result<(), SchemaMismatch> {
    match value.kind() {
        Some(kind) if kind != column.kind => Err(SchemaMismatch::WrongKind {
            column: column.name.clone(),
            expected: column.kind,
            found: kind,
        }),
        _ => Ok(()),
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.total_cmp(y),
        (Value::Text(x), Value::Text(y)) => x.cmp(y),
        // A column never mixes kinds; missing cells are filtered out earlier.
        _ => Ordering::Equal,
    }
}
