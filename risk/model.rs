//! # Trained Artifact
//!
//! [`TrainedPipeline`] bundles the fitted preprocessor, the boosted classifier,
//! the training configuration and the validation metrics into one value that
//! is saved as a single human-readable TOML file.
//!
//! The file also records the label column and the field separator of the
//! training table, so the reference data can be read back exactly as it was
//! during training. A `format_version` is checked before anything else is
//! decoded.

use crate::data::{DEFAULT_SEPARATOR, Dataset, Record, Schema, SchemaMismatch};
use crate::gbdt::GradientBoostedClassifier;
use crate::metrics::ValidationMetrics;
use crate::preprocess::FittedPreprocessor;
use crate::shap::{self, Explanation};
use crate::train::TrainingConfig;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Version of the on-disk artifact layout. Bumped whenever a field changes
/// meaning, so stale artifacts are refused instead of silently misread.
pub const FORMAT_VERSION: u32 = 1;

/// The complete trained pipeline: everything needed to score and explain a
/// patient record. This is the structure saved to and loaded from the TOML
/// artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedPipeline {
    pub format_version: u32,
    /// Name of the label column in the training table.
    pub target_column: String,
    /// Field separator of the training table, as a byte.
    #[serde(default = "default_separator")]
    pub separator: u8,
    pub config: TrainingConfig,
    pub metrics: ValidationMetrics,
    pub preprocessor: FittedPreprocessor,
    pub classifier: GradientBoostedClassifier,
}

fn default_separator() -> u8 {
    DEFAULT_SEPARATOR
}

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error(
        "Model file has format version {found}, but this build reads version {expected}. Retrain the model to produce a compatible artifact."
    )]
    IncompatibleVersion { found: i64, expected: u32 },
    #[error(
        "Model file is inconsistent: the preprocessor produces {outputs} features but the classifier expects {features}."
    )]
    InconsistentLayout { outputs: usize, features: usize },
}

impl TrainedPipeline {
    pub fn schema(&self) -> &Schema {
        &self.preprocessor.schema
    }

    /// Positive-class probability for one record.
    pub fn predict_proba(&self, record: &Record) -> Result<f64, SchemaMismatch> {
        let row = self.preprocessor.transform_record(record)?;
        Ok(self.classifier.predict_proba(row.view()))
    }

    /// Exact attribution of one record's prediction over the transformed features.
    pub fn explain(&self, record: &Record) -> Result<Explanation, SchemaMismatch> {
        let row = self.preprocessor.transform_record(record)?;
        let names = self.preprocessor.feature_names();
        Ok(shap::explain_row(&self.classifier, &names, row.view()))
    }

    /// Probabilities for the given rows of a dataset, in `rows` order.
    pub fn score_rows(&self, dataset: &Dataset, rows: &[usize]) -> Result<Array1<f64>, SchemaMismatch> {
        let x = self.preprocessor.transform_rows(dataset, rows)?;
        Ok(self.classifier.predict_proba_batch(x.view()))
    }

    /// Saves the pipeline to a file in a human-readable TOML format.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path.as_ref())?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        log::info!(
            "Saved pipeline with {} trees to {}",
            self.classifier.trees.len(),
            path.as_ref().display()
        );
        Ok(())
    }

    /// Loads a pipeline from a TOML file, refusing other format versions.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let toml_string = fs::read_to_string(path.as_ref())?;
        let table: toml::Table = toml_string.parse()?;

        // Checked before the full decode so an old layout reports its version
        // rather than whichever field happened to change.
        let found = table
            .get("format_version")
            .and_then(toml::Value::as_integer)
            .unwrap_or(0);
        if found != i64::from(FORMAT_VERSION) {
            return Err(ModelError::IncompatibleVersion {
                found,
                expected: FORMAT_VERSION,
            });
        }

        let pipeline: TrainedPipeline = toml::Value::Table(table).try_into()?;
        let outputs = pipeline.preprocessor.n_outputs();
        let features = pipeline.classifier.n_features;
        if outputs != features {
            return Err(ModelError::InconsistentLayout { outputs, features });
        }
        log::debug!(
            "Loaded pipeline from {} ({} features, {} trees)",
            path.as_ref().display(),
            features,
            pipeline.classifier.trees.len()
        );
        Ok(pipeline)
    }
}
