//! Test fixtures and builders for glycorisk tests.
//!
//! Synthetic patient cohorts with a known monotonic risk signal, plus helpers
//! for writing them to disk and a training configuration small enough to fit
//! in a unit test.

use crate::data::{Dataset, FeatureColumn};
use crate::gbdt::{BoosterConfig, sigmoid};
use crate::train::TrainingConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;
use std::io::Write;
use tempfile::NamedTempFile;

/// Builder for a synthetic cohort with columns
/// `bmi, glucose, age, sex, smoker, outcome`.
///
/// Risk rises with bmi, glucose, age and smoking. `age` and `smoker` have a
/// configurable fraction of missing cells; `sex` is always present.
pub struct CohortBuilder {
    n_samples: usize,
    seed: u64,
    missing_fraction: f64,
    signal_strength: f64,
}

impl CohortBuilder {
    /// Create a new builder with defaults.
    pub fn new(n_samples: usize) -> Self {
        Self {
            n_samples,
            seed: 42,
            missing_fraction: 0.05,
            signal_strength: 1.0,
        }
    }

    /// Set the random seed for reproducibility.
    pub fn seed(mut self, s: u64) -> Self {
        self.seed = s;
        self
    }

    /// Set the fraction of missing `age` and `smoker` cells.
    pub fn with_missing_fraction(mut self, f: f64) -> Self {
        self.missing_fraction = f.clamp(0.0, 1.0);
        self
    }

    /// Scale the effect of every risk factor.
    pub fn with_signal_strength(mut self, s: f64) -> Self {
        self.signal_strength = s;
        self
    }

    pub fn build(self) -> Dataset {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let bmi_dist = Normal::new(28.0, 5.0).unwrap();
        let glucose_dist = Normal::new(110.0, 25.0).unwrap();

        let n = self.n_samples;
        let mut bmi = Vec::with_capacity(n);
        let mut glucose = Vec::with_capacity(n);
        let mut age = Vec::with_capacity(n);
        let mut sex = Vec::with_capacity(n);
        let mut smoker = Vec::with_capacity(n);
        let mut outcome = Vec::with_capacity(n);

        for _ in 0..n {
            let b: f64 = rng.sample(bmi_dist);
            let g: f64 = rng.sample(glucose_dist);
            let a = rng.gen_range(20..80) as f64;
            let is_female = rng.gen_bool(0.5);
            let smokes = rng.gen_bool(0.3);

            let z = self.signal_strength
                * (0.15 * (b - 28.0) + 0.04 * (g - 110.0) + 0.02 * (a - 50.0)
                    + if smokes { 0.5 } else { 0.0 });
            outcome.push(if rng.gen_bool(sigmoid(z)) { 1.0 } else { 0.0 });

            bmi.push(Some(b));
            glucose.push(Some(g));
            age.push((!rng.gen_bool(self.missing_fraction)).then_some(a));
            sex.push(Some(if is_female { "F" } else { "M" }.to_string()));
            let smoker_label = if smokes { "yes" } else { "no" };
            smoker.push((!rng.gen_bool(self.missing_fraction)).then(|| smoker_label.to_string()));
        }

        Dataset::from_columns(
            vec![
                FeatureColumn::numeric("bmi", bmi),
                FeatureColumn::numeric("glucose", glucose),
                FeatureColumn::numeric("age", age),
                FeatureColumn::categorical("sex", sex),
                FeatureColumn::categorical("smoker", smoker),
            ],
            "outcome",
            outcome,
        )
        .expect("synthetic cohort is valid")
    }
}

/// Writes a dataset to a temporary CSV file with the target as the last
/// column and missing cells as `NA`.
pub fn write_dataset_csv(dataset: &Dataset) -> NamedTempFile {
    write_dataset_delimited(dataset, b',')
}

/// Like [`write_dataset_csv`], with an arbitrary single-byte separator.
pub fn write_dataset_delimited(dataset: &Dataset, separator: u8) -> NamedTempFile {
    let separator = char::from(separator).to_string();
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    let header: Vec<&str> = dataset
        .schema()
        .names()
        .chain(std::iter::once(dataset.target_name()))
        .collect();
    writeln!(file, "{}", header.join(&separator)).unwrap();
    for i in 0..dataset.len() {
        let record = dataset.record(i).unwrap();
        let mut cells: Vec<String> = record.fields().iter().map(|(_, v)| v.to_string()).collect();
        cells.push(format!("{}", dataset.target()[i]));
        writeln!(file, "{}", cells.join(&separator)).unwrap();
    }
    file.flush().unwrap();
    file
}

/// A configuration that trains in a fraction of a second.
pub fn small_training_config() -> TrainingConfig {
    TrainingConfig {
        booster: BoosterConfig {
            n_estimators: 40,
            learning_rate: 0.2,
            max_depth: 3,
            ..BoosterConfig::default()
        },
        ..TrainingConfig::default()
    }
}
