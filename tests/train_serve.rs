//! End-to-end: train on a file, save the artifact, reopen it in a service and
//! query it.

mod common;

use approx::assert_abs_diff_eq;
use glycorisk::data::{DatasetOptions, Record, SchemaMismatch, TargetColumn, Value, load_dataset};
use glycorisk::model::TrainedPipeline;
use glycorisk::service::{Override, RiskService, ServiceError};
use glycorisk::train::{TrainingConfig, train_pipeline};
use std::path::PathBuf;
use tempfile::{TempDir, tempdir};

struct Trained {
    dir: TempDir,
    model: PathBuf,
    data: PathBuf,
    pipeline: TrainedPipeline,
}

fn train_on_cohort(n: usize, with_sex: bool, balanced: bool) -> Trained {
    let dir = tempdir().expect("temporary directory");
    let data = dir.path().join("train.csv");
    let model = dir.path().join("diabetes_pipeline.toml");
    common::write_cohort(&data, n, 42, with_sex, balanced);

    let dataset = load_dataset(&data, &DatasetOptions::default()).unwrap();
    let pipeline = train_pipeline(&dataset, &TrainingConfig::default()).unwrap();
    pipeline.save(&model).unwrap();
    Trained {
        dir,
        model,
        data,
        pipeline,
    }
}

#[test]
fn balanced_two_feature_cohort_beats_chance() {
    let trained = train_on_cohort(500, false, true);
    let metrics = &trained.pipeline.metrics;
    assert_eq!(metrics.n_validation, 100);
    assert!(metrics.auc > 0.5, "validation AUC was {}", metrics.auc);
    assert_eq!(trained.pipeline.target_column, "outcome");
    assert!(trained.dir.path().join("diabetes_pipeline.toml").exists());
}

#[test]
fn reopened_artifact_scores_identically() {
    let trained = train_on_cohort(300, true, false);
    let service = RiskService::open(&trained.model, &trained.data).unwrap();
    let dataset = load_dataset(
        &trained.data,
        &DatasetOptions {
            target: TargetColumn::Named("outcome".into()),
            ..DatasetOptions::default()
        },
    )
    .unwrap();

    for i in 0..dataset.len() {
        let record = dataset.record(i).unwrap();
        let original = trained.pipeline.predict_proba(&record).unwrap();
        let reopened = service.predict(&record).unwrap();
        assert_abs_diff_eq!(original, reopened, epsilon = 1e-9);
        assert!((0.0..=1.0).contains(&reopened));
        assert_eq!(reopened, service.predict(&record).unwrap());
    }
}

#[test]
fn what_if_worse_measurements_do_not_lower_risk() {
    let trained = train_on_cohort(500, false, true);
    let service = RiskService::open(&trained.model, &trained.data).unwrap();
    let scores = service.reference_scores();
    let lowest = (0..service.len())
        .min_by(|&a, &b| scores[a].total_cmp(&scores[b]))
        .unwrap();
    let before = service.record(lowest).unwrap();

    let outcome = service
        .what_if(
            lowest,
            &[Override::exact("bmi", 40.0), Override::exact("glucose", 200.0)],
        )
        .unwrap();
    assert!(
        outcome.modified >= outcome.original,
        "risk fell from {} to {}",
        outcome.original,
        outcome.modified
    );
    assert_eq!(service.record(lowest).unwrap(), before);
}

#[test]
fn record_missing_a_column_is_a_schema_mismatch() {
    let trained = train_on_cohort(200, true, false);
    let service = RiskService::open(&trained.model, &trained.data).unwrap();
    let record = Record::new().with("bmi", 31.0).with("sex", "F");

    match service.predict(&record) {
        Err(ServiceError::SchemaMismatch(SchemaMismatch::MissingColumn { column, .. })) => {
            assert_eq!(column, "glucose")
        }
        other => panic!("Expected MissingColumn, got {:?}", other),
    }

    let extra = service.record(0).unwrap().with("zip_code", "02139");
    assert!(matches!(
        service.predict(&extra),
        Err(ServiceError::SchemaMismatch(SchemaMismatch::UnexpectedColumn { .. }))
    ));
}

#[test]
fn explanations_add_up_to_predictions() {
    let trained = train_on_cohort(300, true, false);
    let service = RiskService::open(&trained.model, &trained.data).unwrap();
    for i in [0, 42, 299] {
        let explanation = service.explain(i).unwrap();
        assert_abs_diff_eq!(
            explanation.probability(),
            service.predict(&service.record(i).unwrap()).unwrap(),
            epsilon = 1e-9
        );
        assert!(explanation.top(10).len() <= 10);
    }
}

#[test]
fn fairness_breakdown_only_for_low_cardinality_columns() {
    let trained = train_on_cohort(300, true, false);
    let service = RiskService::open(&trained.model, &trained.data).unwrap();

    assert!(matches!(
        service.fairness_breakdown("glucose"),
        Err(ServiceError::CardinalityTooHigh { .. })
    ));
    let breakdown = service.fairness_breakdown("sex").unwrap();
    assert_eq!(breakdown.groups.len(), 2);
    assert_eq!(breakdown.groups[0].value, Value::Text("F".into()));
    assert_eq!(
        breakdown.groups.iter().map(|g| g.count).sum::<usize>(),
        service.len()
    );
    assert_eq!(service.sensitive_columns(), vec!["sex"]);
}

#[test]
fn corrupt_artifact_fails_to_load() {
    let dir = tempdir().unwrap();
    let model = dir.path().join("diabetes_pipeline.toml");
    let data = dir.path().join("train.csv");
    std::fs::write(&model, "not = [valid").unwrap();
    common::write_cohort(&data, 20, 1, false, true);

    match RiskService::open(&model, &data) {
        Err(ServiceError::ArtifactLoadFailure { path, reason }) => {
            assert!(path.ends_with("diabetes_pipeline.toml"));
            assert!(reason.contains("TOML"), "unexpected reason: {reason}");
        }
        Err(other) => panic!("Expected ArtifactLoadFailure, got {:?}", other),
        Ok(_) => panic!("Expected ArtifactLoadFailure, got a service"),
    }
}
