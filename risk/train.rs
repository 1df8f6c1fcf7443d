//! # Training
//!
//! Fits the full pipeline on a labeled dataset:
//!
//! 1. partition the feature columns by kind and report the partition;
//! 2. stratified train/validation split with a fixed seed;
//! 3. fit the preprocessor and the boosted classifier on the training rows only;
//! 4. score the validation rows and record ROC-AUC and accuracy.
//!
//! The result is a [`TrainedPipeline`] ready to be saved.

use crate::data::{ColumnKind, Dataset, SchemaMismatch};
use crate::gbdt::{BoosterConfig, BoosterError, GradientBoostedClassifier};
use crate::metrics::{self, ValidationMetrics};
use crate::model::{FORMAT_VERSION, TrainedPipeline};
use crate::preprocess::{FittedPreprocessor, PreprocessError};
use crate::split::stratified_split;
use itertools::Itertools;
use ndarray::Array1;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Everything that controls a training run. Embedded in the artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Fraction of rows held out for validation.
    pub validation_fraction: f64,
    /// Seed of the train/validation split.
    pub seed: u64,
    /// Probability at or above which a row is predicted positive for accuracy.
    pub decision_threshold: f64,
    pub booster: BoosterConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            validation_fraction: 0.2,
            seed: 42,
            decision_threshold: 0.5,
            booster: BoosterConfig::default(),
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), TrainError> {
        if !(self.validation_fraction > 0.0 && self.validation_fraction < 1.0) {
            return Err(TrainError::InvalidConfig(format!(
                "validation_fraction must be strictly between 0 and 1, got {}",
                self.validation_fraction
            )));
        }
        if !(0.0..=1.0).contains(&self.decision_threshold) {
            return Err(TrainError::InvalidConfig(format!(
                "decision_threshold must be in [0, 1], got {}",
                self.decision_threshold
            )));
        }
        self.booster.validate()?;
        Ok(())
    }
}

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("Invalid training configuration: {0}")]
    InvalidConfig(String),

    #[error("Preprocessing could not be fitted: {0}")]
    Preprocess(#[from] PreprocessError),

    #[error("Classifier training failed: {0}")]
    Booster(#[from] BoosterError),

    #[error("Training rows do not fit the learned feature schema: {0}")]
    Schema(#[from] SchemaMismatch),

    #[error(
        "The dataset has {rows} rows, which is too few for a {train}/{validation} train/validation split. Provide more data."
    )]
    SplitTooSmall {
        rows: usize,
        train: usize,
        validation: usize,
    },

    #[error(
        "The {split} split only contains label {label}. Both classes must be present in the training and validation rows; provide more examples of the rarer class."
    )]
    SingleClassSplit { split: &'static str, label: f64 },
}

/// Trains, validates and packages a pipeline. Prints the feature partition
/// and the validation metrics.
pub fn train_pipeline(dataset: &Dataset, config: &TrainingConfig) -> Result<TrainedPipeline, TrainError> {
    config.validate()?;

    let schema = dataset.schema();
    let numeric: Vec<&str> = schema
        .columns_of_kind(ColumnKind::Numeric)
        .map(|c| c.name.as_str())
        .collect();
    let categorical: Vec<&str> = schema
        .columns_of_kind(ColumnKind::Categorical)
        .map(|c| c.name.as_str())
        .collect();
    println!("Numeric features ({}): {}", numeric.len(), numeric.iter().join(", "));
    println!(
        "Categorical features ({}): {}",
        categorical.len(),
        categorical.iter().join(", ")
    );

    let labels = dataset.target().to_vec();
    let split = stratified_split(&labels, config.validation_fraction, config.seed);
    if split.train.is_empty() || split.validation.is_empty() {
        return Err(TrainError::SplitTooSmall {
            rows: dataset.len(),
            train: split.train.len(),
            validation: split.validation.len(),
        });
    }
    ensure_both_classes("training", &split.train, &labels)?;
    ensure_both_classes("validation", &split.validation, &labels)?;
    println!(
        "Training on {} rows, validating on {} rows",
        split.train.len(),
        split.validation.len()
    );

    let preprocessor = FittedPreprocessor::fit(dataset, &split.train)?;
    log::info!(
        "Preprocessor expands {} columns into {} features",
        schema.len(),
        preprocessor.n_outputs()
    );
    let x_train = preprocessor.transform_rows(dataset, &split.train)?;
    let y_train: Array1<f64> = split.train.iter().map(|&i| labels[i]).collect();
    let classifier = GradientBoostedClassifier::fit(x_train.view(), y_train.view(), &config.booster)?;

    let x_validation = preprocessor.transform_rows(dataset, &split.validation)?;
    let scores = classifier.predict_proba_batch(x_validation.view()).to_vec();
    let y_validation: Vec<f64> = split.validation.iter().map(|&i| labels[i]).collect();
    let auc = metrics::roc_auc(&y_validation, &scores).ok_or(TrainError::SingleClassSplit {
        split: "validation",
        label: y_validation[0],
    })?;
    let validation_metrics = ValidationMetrics {
        auc,
        accuracy: metrics::accuracy(&y_validation, &scores, config.decision_threshold),
        n_train: split.train.len(),
        n_validation: split.validation.len(),
    };
    println!("Validation ROC-AUC: {:.4}", validation_metrics.auc);
    println!("Validation accuracy: {:.4}", validation_metrics.accuracy);

    Ok(TrainedPipeline {
        format_version: FORMAT_VERSION,
        target_column: dataset.target_name().to_string(),
        separator: dataset.separator(),
        config: config.clone(),
        metrics: validation_metrics,
        preprocessor,
        classifier,
    })
}

fn ensure_both_classes(split: &'static str, rows: &[usize], labels: &[f64]) -> Result<(), TrainError> {
    let positives = rows.iter().filter(|&&i| labels[i] == 1.0).count();
    if positives == 0 || positives == rows.len() {
        return Err(TrainError::SingleClassSplit {
            split,
            label: labels[rows[0]],
        });
    }
    Ok(())
}
