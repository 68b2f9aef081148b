//! Checks through the compiled binary: the `predict` subcommand's profile
//! handling, end to end over a persisted bundle.

use ndarray::{Array1, Array2};
use std::collections::BTreeMap;
use std::fs;
use std::process::Command;
use tempfile::tempdir;
use tensio::artifact::{ArtifactBundle, ArtifactMetadata, ModelArtifact, ThresholdEntry};
use tensio::data::CANONICAL_FEATURES;
use tensio::models::{DEFAULT_SEED, ModelKind};

fn trained_bundle(thresholds: BTreeMap<String, ThresholdEntry>) -> ArtifactBundle {
    let p = CANONICAL_FEATURES.len();
    let n = 80;
    let mut x = Array2::zeros((n, p));
    let mut y = Array1::zeros(n);
    for i in 0..n {
        let positive = i % 2 == 0;
        y[i] = positive as u8 as f64;
        x[[i, 1]] = if positive { 64.0 } else { 36.0 } + (i % 7) as f64;
        x[[i, 7]] = if positive { 155.0 } else { 110.0 } + (i % 7) as f64;
    }
    let estimator = ModelKind::LogisticRegression
        .fit(x.view(), y.view(), DEFAULT_SEED)
        .unwrap();
    let imputation_means = (0..p).map(|j| x.column(j).sum() / n as f64).collect();
    ArtifactBundle {
        model: ModelArtifact {
            estimator,
            feature_names: CANONICAL_FEATURES.iter().map(|s| s.to_string()).collect(),
            imputation_means,
        },
        features: CANONICAL_FEATURES.iter().map(|s| s.to_string()).collect(),
        thresholds: Some(thresholds),
        metadata: Some(ArtifactMetadata {
            model: Some("LR".to_string()),
            model_version: Some("test".to_string()),
        }),
    }
}

fn run_predict(args: &[&str]) -> serde_json::Value {
    let output = Command::new(env!("CARGO_BIN_EXE_tensio"))
        .args(args)
        .output()
        .expect("binary should run");
    assert!(
        output.status.success(),
        "predict failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    serde_json::from_slice(&output.stdout).expect("stdout should be one JSON object")
}

#[test]
fn predict_defaults_to_the_balanced_profile() {
    let dir = tempdir().unwrap();
    let mut thresholds = BTreeMap::new();
    thresholds.insert("balanced".to_string(), ThresholdEntry { threshold: 0.42 });
    trained_bundle(thresholds).save(dir.path()).unwrap();

    let request_path = dir.path().join("request.json");
    fs::write(&request_path, r#"{"age": 64.0, "systolic_bp": 158.0}"#).unwrap();

    // No --profile flag: the persisted balanced threshold must decide.
    let response = run_predict(&[
        "predict",
        request_path.to_str().unwrap(),
        "--artifact-dir",
        dir.path().to_str().unwrap(),
    ]);
    assert_eq!(response["threshold_profile"], "balanced");
    assert_eq!(response["threshold"], 0.42);
}

#[test]
fn predict_reports_the_fallback_for_an_unknown_profile() {
    let dir = tempdir().unwrap();
    let mut thresholds = BTreeMap::new();
    thresholds.insert("balanced".to_string(), ThresholdEntry { threshold: 0.42 });
    trained_bundle(thresholds).save(dir.path()).unwrap();

    let request_path = dir.path().join("request.json");
    fs::write(&request_path, r#"{"age": 40.0, "systolic_bp": 118.0}"#).unwrap();

    let response = run_predict(&[
        "predict",
        request_path.to_str().unwrap(),
        "--artifact-dir",
        dir.path().to_str().unwrap(),
        "--profile",
        "no_such_profile",
    ]);
    assert_eq!(response["threshold_profile"], "default");
    assert_eq!(response["threshold"], 0.5);
}
