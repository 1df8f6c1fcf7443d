//! # Dataset Loading and Schema Validation
//!
//! This module is the only entry point for user-provided tables. It reads a
//! delimited file with a header row, splits it into feature columns and one
//! binary target column, and infers for every feature whether it is numeric or
//! categorical.
//!
//! - Inferred Schema: integer and float columns are numeric; everything else
//!   (strings, booleans, unparsed dates) is categorical. The resulting
//!   [`Schema`] is stored in the trained artifact and every record scored later
//!   must match it exactly.
//! - Explicit Target: the target defaults to the last column, but it can be
//!   named instead through [`TargetColumn::Named`].
//! - User-Centric Errors: failures are assumed to be input errors, so
//!   [`DataError`] and [`SchemaMismatch`] name the offending column.

use ndarray::Array1;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Whether a feature column is imputed by median (numeric) or by mode and
/// one-hot encoded (categorical).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnKind {
    Numeric,
    Categorical,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnKind::Numeric => write!(f, "numeric"),
            ColumnKind::Categorical => write!(f, "categorical"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// The ordered feature columns a pipeline was fitted on.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<ColumnSpec>,
}

impl Schema {
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn columns_of_kind(&self, kind: ColumnKind) -> impl Iterator<Item = &ColumnSpec> {
        self.columns.iter().filter(move |c| c.kind == kind)
    }

    /// Checks that `actual` holds exactly the same columns with the same kinds.
    /// Column order is not part of the contract.
    pub fn check_matches(&self, actual: &Schema) -> Result<(), SchemaMismatch> {
        for expected in &self.columns {
            match actual.get(&expected.name) {
                None => {
                    return Err(SchemaMismatch::MissingColumn {
                        column: expected.name.clone(),
                        expected: self.to_string(),
                    });
                }
                Some(found) if found.kind != expected.kind => {
                    return Err(SchemaMismatch::WrongKind {
                        column: expected.name.clone(),
                        expected: expected.kind,
                        found: found.kind,
                    });
                }
                Some(_) => {}
            }
        }
        if let Some(extra) = actual.columns.iter().find(|c| self.get(&c.name).is_none()) {
            return Err(SchemaMismatch::UnexpectedColumn {
                column: extra.name.clone(),
                expected: self.to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, column) in self.columns.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", column.name, column.kind)?;
        }
        write!(f, "]")
    }
}

/// A record (or override) does not fit the schema the pipeline was trained on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaMismatch {
    #[error("Required column '{column}' is missing. Expected schema: {expected}")]
    MissingColumn { column: String, expected: String },

    #[error("Column '{column}' is not part of the trained schema. Expected schema: {expected}")]
    UnexpectedColumn { column: String, expected: String },

    #[error("Column '{column}' holds {found} data, but the model was trained on {expected} data.")]
    WrongKind {
        column: String,
        expected: ColumnKind,
        found: ColumnKind,
    },
}

/// A single cell of a patient record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Number(f64),
    Text(String),
    Missing,
}

impl Value {
    /// Parses a user-typed cell: blank and `NA` are missing, anything that
    /// parses as a float is a number, the rest is text.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "NA" {
            return Value::Missing;
        }
        match trimmed.parse::<f64>() {
            Ok(v) if v.is_nan() => Value::Missing,
            Ok(v) => Value::Number(v),
            Err(_) => Value::Text(trimmed.to_string()),
        }
    }

    /// Parses a user-typed cell destined for a column of known kind. In a
    /// categorical column every non-missing cell is a label, including
    /// numeric-looking ones such as `02139`.
    pub fn parse_as(raw: &str, kind: ColumnKind) -> Self {
        match kind {
            ColumnKind::Numeric => Value::parse(raw),
            ColumnKind::Categorical => match raw.trim() {
                "" | "NA" => Value::Missing,
                label => Value::Text(label.to_string()),
            },
        }
    }

    /// The column kind this value can be stored in; `None` for a missing cell,
    /// which fits either kind.
    pub fn kind(&self) -> Option<ColumnKind> {
        match self {
            Value::Number(_) => Some(ColumnKind::Numeric),
            Value::Text(_) => Some(ColumnKind::Categorical),
            Value::Missing => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(v) => write!(f, "{v}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Missing => write!(f, "NA"),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        if v.is_nan() { Value::Missing } else { Value::Number(v) }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

/// One row of feature values, keyed by column name in table order.
///
/// Records are always owned copies: editing one never touches the dataset it
/// was read from.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Sets `name` to `value`, appending the field if it does not exist yet.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        let position = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(position).1)
    }

    pub fn fields(&self) -> &[(String, Value)] {
        &self.fields
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (name, value) in iter {
            record.set(name, value);
        }
        record
    }
}

/// Column storage; `None` marks a missing cell.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Numeric(Vec<Option<f64>>),
    Categorical(Vec<Option<String>>),
}

impl ColumnValues {
    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Numeric(v) => v.len(),
            ColumnValues::Categorical(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            ColumnValues::Numeric(_) => ColumnKind::Numeric,
            ColumnValues::Categorical(_) => ColumnKind::Categorical,
        }
    }

    pub fn value(&self, row: usize) -> Value {
        match self {
            ColumnValues::Numeric(v) => match v.get(row).copied().flatten() {
                Some(x) => Value::Number(x),
                None => Value::Missing,
            },
            ColumnValues::Categorical(v) => match v.get(row).cloned().flatten() {
                Some(s) => Value::Text(s),
                None => Value::Missing,
            },
        }
    }

    /// Number of distinct non-missing values.
    pub fn distinct_count(&self) -> usize {
        match self {
            ColumnValues::Numeric(v) => v
                .iter()
                .flatten()
                .map(|x| if *x == 0.0 { 0.0f64.to_bits() } else { x.to_bits() })
                .collect::<HashSet<u64>>()
                .len(),
            ColumnValues::Categorical(v) => {
                v.iter().flatten().map(String::as_str).collect::<HashSet<&str>>().len()
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureColumn {
    pub name: String,
    pub values: ColumnValues,
}

impl FeatureColumn {
    pub fn numeric(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            values: ColumnValues::Numeric(values),
        }
    }

    pub fn categorical(name: impl Into<String>, values: Vec<Option<String>>) -> Self {
        Self {
            name: name.into(),
            values: ColumnValues::Categorical(values),
        }
    }

    pub fn spec(&self) -> ColumnSpec {
        ColumnSpec::new(self.name.clone(), self.values.kind())
    }
}

/// A validated labeled table: feature columns plus a 0/1 target.
#[derive(Debug, Clone)]
pub struct Dataset {
    columns: Vec<FeatureColumn>,
    schema: Schema,
    target_name: String,
    target: Array1<f64>,
    separator: u8,
}

/// Field separator assumed for tables that were not read from a file.
pub const DEFAULT_SEPARATOR: u8 = b',';

impl Dataset {
    /// Assembles a dataset from already-typed columns, validating shape and
    /// target encoding.
    pub fn from_columns(
        columns: Vec<FeatureColumn>,
        target_name: impl Into<String>,
        target: Vec<f64>,
    ) -> Result<Self, DataError> {
        let target_name = target_name.into();
        if columns.is_empty() {
            return Err(DataError::TooFewColumns {
                found: columns.len() + 1,
            });
        }
        if target.is_empty() {
            return Err(DataError::EmptyTable);
        }

        let mut seen = HashSet::new();
        for column in &columns {
            if column.name == target_name || !seen.insert(column.name.as_str()) {
                return Err(DataError::DuplicateColumn(column.name.clone()));
            }
            if column.values.len() != target.len() {
                return Err(DataError::RaggedColumn {
                    column: column.name.clone(),
                    found: column.values.len(),
                    expected: target.len(),
                });
            }
        }

        for (row, &value) in target.iter().enumerate() {
            if value.is_nan() {
                return Err(DataError::MissingTargetValues(target_name));
            }
            if value != 0.0 && value != 1.0 {
                return Err(DataError::NonBinaryTarget {
                    column: target_name,
                    row: row + 1,
                    value,
                });
            }
        }

        let schema = Schema::new(columns.iter().map(FeatureColumn::spec).collect());
        Ok(Self {
            columns,
            schema,
            target_name,
            target: Array1::from_vec(target),
            separator: DEFAULT_SEPARATOR,
        })
    }

    /// Records the field separator of the file this table was read from.
    pub fn with_separator(mut self, separator: u8) -> Self {
        self.separator = separator;
        self
    }

    pub fn separator(&self) -> u8 {
        self.separator
    }

    pub fn len(&self) -> usize {
        self.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn columns(&self) -> &[FeatureColumn] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&FeatureColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    pub fn target(&self) -> &Array1<f64> {
        &self.target
    }

    /// Returns an owned copy of row `index`, or `None` when out of range.
    pub fn record(&self, index: usize) -> Option<Record> {
        if index >= self.len() {
            return None;
        }
        Some(
            self.columns
                .iter()
                .map(|c| (c.name.clone(), c.values.value(index)))
                .collect(),
        )
    }

    /// `(negatives, positives)`.
    pub fn class_counts(&self) -> (usize, usize) {
        let positives = self.target.iter().filter(|&&y| y == 1.0).count();
        (self.len() - positives, positives)
    }
}

/// Which column of the file holds the label.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TargetColumn {
    /// The positionally last column of the file.
    #[default]
    Last,
    Named(String),
}

#[derive(Debug, Clone)]
pub struct DatasetOptions {
    pub target: TargetColumn,
    pub separator: u8,
}

impl Default for DatasetOptions {
    fn default() -> Self {
        Self {
            target: TargetColumn::Last,
            separator: DEFAULT_SEPARATOR,
        }
    }
}

/// A comprehensive error type for all data loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error(
        "The input table has {found} column(s); at least one feature column and one target column are required."
    )]
    TooFewColumns { found: usize },

    #[error("The input table contains no data rows.")]
    EmptyTable,

    #[error(
        "The target column '{0}' was not found in the input file. Please check spelling and case."
    )]
    TargetNotFound(String),

    #[error("The target column '{column}' must be numeric, but it holds {found_type} data.")]
    TargetWrongType { column: String, found_type: String },

    #[error("Missing values were found in the target column '{0}'. Every row needs a label.")]
    MissingTargetValues(String),

    #[error("The target column '{column}' must only contain 0 and 1, but row {row} holds {value}.")]
    NonBinaryTarget {
        column: String,
        row: usize,
        value: f64,
    },

    #[error("Column '{column}' has {found} values, but the target column has {expected}.")]
    RaggedColumn {
        column: String,
        found: usize,
        expected: usize,
    },

    #[error("Column '{0}' appears more than once in the input table.")]
    DuplicateColumn(String),
}

/// Reads a delimited file with a header row into a [`Dataset`].
pub fn load_dataset(path: impl AsRef<Path>, options: &DatasetOptions) -> Result<Dataset, DataError> {
    let path = path.as_ref();
    log::info!("Loading data from '{}'", path.display());

    let df = CsvReader::new(File::open(path)?)
        .with_options(
            CsvReadOptions::default()
                .with_has_header(true)
                .with_infer_schema_length(None)
                .with_parse_options(
                    CsvParseOptions::default()
                        .with_separator(options.separator)
                        .with_null_values(Some(NullValues::AllColumns(vec!["NA".into()]))),
                ),
        )
        .finish()?;

    let dataset =
        internal::dataset_from_frame(&df, &options.target)?.with_separator(options.separator);
    log::info!(
        "Loaded {} rows with {} feature columns (target: '{}')",
        dataset.len(),
        dataset.columns().len(),
        dataset.target_name()
    );
    Ok(dataset)
}

/// Internal module for the polars-specific conversion.
mod internal {
    use super::*;

    fn is_numeric_dtype(dtype: &DataType) -> bool {
        matches!(
            dtype,
            DataType::Int8
                | DataType::Int16
                | DataType::Int32
                | DataType::Int64
                | DataType::UInt8
                | DataType::UInt16
                | DataType::UInt32
                | DataType::UInt64
                | DataType::Float32
                | DataType::Float64
        )
    }

    fn extract_target(df: &DataFrame, name: &str) -> Result<Vec<f64>, DataError> {
        let column = df.column(name)?;
        if !is_numeric_dtype(column.dtype()) {
            return Err(DataError::TargetWrongType {
                column: name.to_string(),
                found_type: format!("{:?}", column.dtype()),
            });
        }
        if column.null_count() > 0 {
            return Err(DataError::MissingTargetValues(name.to_string()));
        }
        let casted = column.cast(&DataType::Float64)?;
        Ok(casted
            .f64()?
            .into_iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect())
    }

    fn extract_feature(df: &DataFrame, name: &str) -> Result<FeatureColumn, DataError> {
        let column = df.column(name)?;
        if is_numeric_dtype(column.dtype()) {
            let casted = column.cast(&DataType::Float64)?;
            let values = casted
                .f64()?
                .into_iter()
                .map(|v| v.filter(|x| !x.is_nan()))
                .collect();
            Ok(FeatureColumn::numeric(name, values))
        } else {
            let casted = column.cast(&DataType::String)?;
            let values = casted
                .str()?
                .into_iter()
                .map(|v| v.map(str::to_owned))
                .collect();
            Ok(FeatureColumn::categorical(name, values))
        }
    }

    pub(super) fn dataset_from_frame(
        df: &DataFrame,
        target: &TargetColumn,
    ) -> Result<Dataset, DataError> {
        let names: Vec<String> = df
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        if names.len() < 2 {
            return Err(DataError::TooFewColumns { found: names.len() });
        }
        if df.height() == 0 {
            return Err(DataError::EmptyTable);
        }

        let target_name = match target {
            TargetColumn::Last => names
                .last()
                .cloned()
                .ok_or(DataError::TooFewColumns { found: 0 })?,
            TargetColumn::Named(name) => {
                if !names.contains(name) {
                    return Err(DataError::TargetNotFound(name.clone()));
                }
                name.clone()
            }
        };
        log::info!("Detected target column: {target_name}");

        let target_values = extract_target(df, &target_name)?;
        let columns = names
            .iter()
            .filter(|name| **name != target_name)
            .map(|name| extract_feature(df, name))
            .collect::<Result<Vec<_>, _>>()?;

        Dataset::from_columns(columns, target_name, target_values)
    }
}

// --- Unit Tests ---
#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::io::{self, Write};
    use tempfile::NamedTempFile;

    fn create_test_csv(content: &str) -> io::Result<NamedTempFile> {
        let mut file = NamedTempFile::new()?;
        writeln!(file, "{}", content)?;
        file.flush()?;
        Ok(file)
    }

    const MIXED_TABLE: &str = "age,bmi,sex,smoker,outcome\n\
        50,31.5,F,yes,1\n\
        31,,M,no,0\n\
        44,27.0,F,NA,0\n\
        62,35.2,,yes,1";

    #[test]
    fn test_load_infers_numeric_and_categorical_columns() {
        let file = create_test_csv(MIXED_TABLE).unwrap();
        let data = load_dataset(file.path(), &DatasetOptions::default()).unwrap();

        assert_eq!(data.len(), 4);
        assert_eq!(data.target_name(), "outcome");
        assert_eq!(
            data.schema().columns,
            vec![
                ColumnSpec::new("age", ColumnKind::Numeric),
                ColumnSpec::new("bmi", ColumnKind::Numeric),
                ColumnSpec::new("sex", ColumnKind::Categorical),
                ColumnSpec::new("smoker", ColumnKind::Categorical),
            ]
        );
        assert_eq!(data.class_counts(), (2, 2));
        assert_abs_diff_eq!(data.target()[0], 1.0);
    }

    #[test]
    fn test_missing_cells_are_preserved_as_missing() {
        let file = create_test_csv(MIXED_TABLE).unwrap();
        let data = load_dataset(file.path(), &DatasetOptions::default()).unwrap();

        let second = data.record(1).unwrap();
        assert_eq!(second.get("bmi"), Some(&Value::Missing));
        assert_eq!(second.get("sex"), Some(&Value::Text("M".to_string())));

        let third = data.record(2).unwrap();
        assert_eq!(third.get("smoker"), Some(&Value::Missing));

        let fourth = data.record(3).unwrap();
        assert_eq!(fourth.get("sex"), Some(&Value::Missing));
        assert_eq!(fourth.get("age"), Some(&Value::Number(62.0)));
    }

    #[test]
    fn test_named_target_column() {
        let content = "outcome,glucose,bmi\n1,140,30.1\n0,90,22.4";
        let file = create_test_csv(content).unwrap();
        let options = DatasetOptions {
            target: TargetColumn::Named("outcome".to_string()),
            ..DatasetOptions::default()
        };
        let data = load_dataset(file.path(), &options).unwrap();
        assert_eq!(data.target_name(), "outcome");
        assert_eq!(data.schema().names().collect::<Vec<_>>(), vec!["glucose", "bmi"]);
    }

    #[test]
    fn test_unknown_named_target_is_rejected() {
        let file = create_test_csv("a,b\n1,0").unwrap();
        let options = DatasetOptions {
            target: TargetColumn::Named("label".to_string()),
            ..DatasetOptions::default()
        };
        match load_dataset(file.path(), &options).unwrap_err() {
            DataError::TargetNotFound(name) => assert_eq!(name, "label"),
            other => panic!("Expected TargetNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_non_binary_target_is_rejected() {
        let file = create_test_csv("x,y\n1.0,0\n2.0,2").unwrap();
        match load_dataset(file.path(), &DatasetOptions::default()).unwrap_err() {
            DataError::NonBinaryTarget { column, row, value } => {
                assert_eq!(column, "y");
                assert_eq!(row, 2);
                assert_abs_diff_eq!(value, 2.0);
            }
            other => panic!("Expected NonBinaryTarget, got {:?}", other),
        }
    }

    #[test]
    fn test_text_target_is_rejected() {
        let file = create_test_csv("x,y\n1.0,yes\n2.0,no").unwrap();
        assert!(matches!(
            load_dataset(file.path(), &DatasetOptions::default()),
            Err(DataError::TargetWrongType { .. })
        ));
    }

    #[test]
    fn test_single_column_table_is_rejected() {
        let file = create_test_csv("y\n1\n0").unwrap();
        assert!(matches!(
            load_dataset(file.path(), &DatasetOptions::default()),
            Err(DataError::TooFewColumns { found: 1 })
        ));
    }

    #[test]
    fn test_tab_separated_input() {
        let file = create_test_csv("bmi\tglucose\tdiabetes\n25.0\t100\t0\n31.0\t180\t1").unwrap();
        let options = DatasetOptions {
            separator: b'\t',
            ..DatasetOptions::default()
        };
        let data = load_dataset(file.path(), &options).unwrap();
        assert_eq!(data.len(), 2);
        assert_eq!(data.separator(), b'\t');
        assert_eq!(data.record(1).unwrap().get("glucose"), Some(&Value::Number(180.0)));
    }

    #[test]
    fn test_record_out_of_range_is_none() {
        let file = create_test_csv(MIXED_TABLE).unwrap();
        let data = load_dataset(file.path(), &DatasetOptions::default()).unwrap();
        assert!(data.record(4).is_none());
    }

    #[test]
    fn test_distinct_count_ignores_missing() {
        let column = ColumnValues::Categorical(vec![
            Some("F".to_string()),
            None,
            Some("M".to_string()),
            Some("F".to_string()),
        ]);
        assert_eq!(column.distinct_count(), 2);

        let numeric = ColumnValues::Numeric(vec![Some(1.0), Some(-0.0), Some(0.0), None]);
        assert_eq!(numeric.distinct_count(), 2);
    }

    #[test]
    fn test_ragged_columns_are_rejected() {
        let err = Dataset::from_columns(
            vec![FeatureColumn::numeric("bmi", vec![Some(1.0)])],
            "y",
            vec![0.0, 1.0],
        )
        .unwrap_err();
        assert!(matches!(err, DataError::RaggedColumn { found: 1, expected: 2, .. }));
    }

    #[test]
    fn test_schema_check_reports_each_mismatch() {
        let trained = Schema::new(vec![
            ColumnSpec::new("bmi", ColumnKind::Numeric),
            ColumnSpec::new("sex", ColumnKind::Categorical),
        ]);

        let missing = Schema::new(vec![ColumnSpec::new("bmi", ColumnKind::Numeric)]);
        match trained.check_matches(&missing).unwrap_err() {
            SchemaMismatch::MissingColumn { column, expected } => {
                assert_eq!(column, "sex");
                assert_eq!(expected, "[bmi: numeric, sex: categorical]");
            }
            other => panic!("Expected MissingColumn, got {:?}", other),
        }

        let retyped = Schema::new(vec![
            ColumnSpec::new("sex", ColumnKind::Numeric),
            ColumnSpec::new("bmi", ColumnKind::Numeric),
        ]);
        assert_eq!(
            trained.check_matches(&retyped).unwrap_err(),
            SchemaMismatch::WrongKind {
                column: "sex".to_string(),
                expected: ColumnKind::Categorical,
                found: ColumnKind::Numeric,
            }
        );

        let extra = Schema::new(vec![
            ColumnSpec::new("sex", ColumnKind::Categorical),
            ColumnSpec::new("bmi", ColumnKind::Numeric),
            ColumnSpec::new("age", ColumnKind::Numeric),
        ]);
        assert!(matches!(
            trained.check_matches(&extra).unwrap_err(),
            SchemaMismatch::UnexpectedColumn { column, .. } if column == "age"
        ));
    }

    #[test]
    fn test_value_parse() {
        assert_eq!(Value::parse("40"), Value::Number(40.0));
        assert_eq!(Value::parse(" 27.5 "), Value::Number(27.5));
        assert_eq!(Value::parse("NA"), Value::Missing);
        assert_eq!(Value::parse(""), Value::Missing);
        assert_eq!(Value::parse("F"), Value::Text("F".to_string()));
    }

    #[test]
    fn test_value_parse_as_column_kind() {
        assert_eq!(
            Value::parse_as(" 02139 ", ColumnKind::Categorical),
            Value::Text("02139".to_string())
        );
        assert_eq!(Value::parse_as("1", ColumnKind::Categorical), Value::Text("1".to_string()));
        assert_eq!(Value::parse_as("NA", ColumnKind::Categorical), Value::Missing);
        assert_eq!(Value::parse_as("40", ColumnKind::Numeric), Value::Number(40.0));
        assert_eq!(Value::parse_as("heavy", ColumnKind::Numeric), Value::Text("heavy".to_string()));
    }

    #[test]
    fn test_record_set_replaces_in_place() {
        let mut record = Record::new().with("bmi", 25.0).with("sex", "F");
        record.set("bmi", 40.0);
        assert_eq!(record.names().collect::<Vec<_>>(), vec!["bmi", "sex"]);
        assert_eq!(record.get("bmi"), Some(&Value::Number(40.0)));
        assert_eq!(record.remove("sex"), Some(Value::Text("F".to_string())));
        assert_eq!(record.len(), 1);
    }
}
