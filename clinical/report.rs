//! # Report Writers
//!
//! Persists optimization and validation results in two forms: a full JSON
//! document for downstream tooling and flat CSV summaries for spreadsheet
//! review. The validator additionally gets a plain-text report intended for
//! clinical reviewers who will never open the JSON.

use crate::proportion::ProportionOptimization;
use crate::threshold::ThresholdOptimization;
use crate::validate::MedicalValidation;
use std::fs;
use std::io::Write;
use std::path::Path;
use thiserror::Error;

pub const THRESHOLD_JSON: &str = "threshold_optimization_results.json";
pub const THRESHOLD_DETAILED_CSV: &str = "threshold_optimization_detailed.csv";
pub const THRESHOLD_SUMMARY_CSV: &str = "best_thresholds_summary.csv";

pub const PROPORTION_JSON: &str = "proportion_optimization_results.json";
pub const PROPORTION_DETAILED_CSV: &str = "proportion_optimization_detailed.csv";
pub const PROPORTION_SUMMARY_CSV: &str = "best_proportions_summary.csv";

pub const VALIDATION_JSON: &str = "medical_validation_report.json";
pub const VALIDATION_TEXT: &str = "medical_validation_report.txt";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write report file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to serialize report to JSON: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Failed to write CSV report: {0}")]
    CsvError(#[from] csv::Error),
}

/// Write the threshold optimization JSON plus its two CSV views into `dir`.
pub fn save_threshold_results(
    dir: &Path,
    results: &ThresholdOptimization,
) -> Result<(), ReportError> {
    fs::create_dir_all(dir)?;

    let json = serde_json::to_vec_pretty(results)?;
    fs::write(dir.join(THRESHOLD_JSON), json)?;

    let mut detailed = csv::Writer::from_path(dir.join(THRESHOLD_DETAILED_CSV))?;
    detailed.write_record([
        "threshold",
        "accuracy",
        "precision",
        "recall",
        "f1_score",
        "sensitivity",
        "specificity",
        "ppv",
        "npv",
        "false_positive_rate",
        "false_negative_rate",
        "tp",
        "fp",
        "tn",
        "fn",
    ])?;
    for snap in &results.detailed_results {
        detailed.write_record([
            format!("{:.2}", snap.threshold),
            format!("{:.6}", snap.accuracy),
            format!("{:.6}", snap.precision),
            format!("{:.6}", snap.recall),
            format!("{:.6}", snap.f1_score),
            format!("{:.6}", snap.sensitivity),
            format!("{:.6}", snap.specificity),
            format!("{:.6}", snap.ppv),
            format!("{:.6}", snap.npv),
            format!("{:.6}", snap.false_positive_rate),
            format!("{:.6}", snap.false_negative_rate),
            snap.confusion.tp.to_string(),
            snap.confusion.fp.to_string(),
            snap.confusion.tn.to_string(),
            snap.confusion.fn_.to_string(),
        ])?;
    }
    detailed.flush()?;

    let mut summary = csv::Writer::from_path(dir.join(THRESHOLD_SUMMARY_CSV))?;
    summary.write_record([
        "scenario",
        "threshold",
        "sensitivity",
        "specificity",
        "ppv",
        "npv",
        "f1_score",
        "accuracy",
        "meets_criteria",
    ])?;
    for selection in &results.selections {
        let m = &selection.metrics;
        summary.write_record([
            selection.scenario.clone(),
            format!("{:.2}", m.threshold),
            format!("{:.6}", m.sensitivity),
            format!("{:.6}", m.specificity),
            format!("{:.6}", m.ppv),
            format!("{:.6}", m.npv),
            format!("{:.6}", m.f1_score),
            format!("{:.6}", m.accuracy),
            selection.meets_criteria.to_string(),
        ])?;
    }
    summary.flush()?;

    log::info!(
        "Threshold reports written to '{}' ({} scenarios)",
        dir.display(),
        results.selections.len()
    );
    Ok(())
}

/// Write the proportion optimization JSON plus its two CSV views into `dir`.
pub fn save_proportion_results(
    dir: &Path,
    results: &ProportionOptimization,
) -> Result<(), ReportError> {
    fs::create_dir_all(dir)?;

    let json = serde_json::to_vec_pretty(results)?;
    fs::write(dir.join(PROPORTION_JSON), json)?;

    let mut summary = csv::Writer::from_path(dir.join(PROPORTION_SUMMARY_CSV))?;
    summary.write_record([
        "scenario",
        "optimal_proportion",
        "actual_proportion",
        "best_model",
        "weighted_score",
        "dataset_size",
        "recommendation",
    ])?;
    for best in &results.best_configurations {
        summary.write_record([
            best.scenario.clone(),
            format!("{:.4}", best.optimal_proportion),
            format!("{:.4}", best.actual_proportion),
            best.best_model.clone(),
            format!("{:.6}", best.weighted_score),
            best.dataset_size.to_string(),
            best.recommendation.clone(),
        ])?;
    }
    summary.flush()?;

    let mut detailed = csv::Writer::from_path(dir.join(PROPORTION_DETAILED_CSV))?;
    detailed.write_record([
        "scenario",
        "target_proportion",
        "actual_proportion",
        "dataset_size",
        "model",
        "accuracy",
        "precision",
        "recall",
        "f1",
        "roc_auc",
        "weighted_score",
    ])?;
    for scenario in &results.scenario_results {
        for result in &scenario.detailed_results {
            for model in &result.model_results {
                detailed.write_record([
                    scenario.scenario.clone(),
                    format!("{:.4}", result.target_proportion),
                    format!("{:.4}", result.actual_proportion),
                    result.dataset_size.to_string(),
                    model.model.clone(),
                    format!("{:.6}", model.scores.accuracy),
                    format!("{:.6}", model.scores.precision),
                    format!("{:.6}", model.scores.recall),
                    format!("{:.6}", model.scores.f1),
                    format!("{:.6}", model.scores.roc_auc),
                    format!("{:.6}", model.weighted_score),
                ])?;
            }
        }
    }
    detailed.flush()?;

    log::info!(
        "Proportion reports written to '{}' ({} scenarios)",
        dir.display(),
        results.scenario_results.len()
    );
    Ok(())
}

/// Write the medical validation report as JSON and as plain text into `dir`.
pub fn save_validation_report(
    dir: &Path,
    validation: &MedicalValidation,
) -> Result<(), ReportError> {
    fs::create_dir_all(dir)?;

    let json = serde_json::to_vec_pretty(validation)?;
    fs::write(dir.join(VALIDATION_JSON), json)?;

    let mut file = fs::File::create(dir.join(VALIDATION_TEXT))?;
    write_validation_text(&mut file, validation)?;

    log::info!("Validation report written to '{}'", dir.display());
    Ok(())
}

fn write_validation_text<W: Write>(
    out: &mut W,
    validation: &MedicalValidation,
) -> std::io::Result<()> {
    writeln!(out, "MEDICAL VALIDATION REPORT")?;
    writeln!(out, "=========================")?;
    writeln!(out)?;
    writeln!(
        out,
        "Overall consistency score: {:.3}",
        validation.overall_consistency_score
    )?;
    writeln!(out, "Interpretation: {}", validation.interpretation)?;
    writeln!(out)?;

    let fv = &validation.feature_validation;
    writeln!(out, "Feature importance")?;
    writeln!(out, "------------------")?;
    writeln!(out, "Medical logic score: {:.3}", fv.medical_logic_score)?;
    writeln!(out, "Top features: {}", fv.top_features.join(", "))?;
    writeln!(out, "Matched expected: {}", fv.matched_features.join(", "))?;
    if !fv.missing_important_features.is_empty() {
        writeln!(
            out,
            "Missing important: {}",
            fv.missing_important_features.join(", ")
        )?;
    }
    writeln!(out)?;

    let cl = &validation.clinical_logic;
    writeln!(out, "Clinical logic")?;
    writeln!(out, "--------------")?;
    writeln!(out, "Overall logic score: {:.3}", cl.overall_logic_score)?;
    for (name, value) in [
        ("Age correlation", cl.age_correlation),
        ("Blood pressure correlation", cl.bp_correlation),
        ("Diabetes correlation", cl.diabetes_correlation),
    ] {
        match value {
            Some(r) => writeln!(out, "{name}: {r:.3}")?,
            None => writeln!(out, "{name}: not available")?,
        }
    }
    writeln!(out)?;

    let rs = &validation.risk_stratification;
    writeln!(out, "Risk stratification")?;
    writeln!(out, "-------------------")?;
    for (label, band) in [
        ("Low risk   (p <= 0.3)", &rs.low_risk),
        ("Medium risk (0.3 < p <= 0.7)", &rs.medium_risk),
        ("High risk  (p > 0.7)", &rs.high_risk),
    ] {
        let age = band
            .avg_age
            .map_or("n/a".to_string(), |v| format!("{v:.1}"));
        let sbp = band
            .avg_systolic
            .map_or("n/a".to_string(), |v| format!("{v:.1}"));
        writeln!(
            out,
            "{label}: {} patients ({:.1}%), avg age {age}, avg systolic {sbp}",
            band.count, band.percentage
        )?;
    }
    match rs.stratification_quality {
        Some(q) => writeln!(out, "Stratification quality: {q:.3}")?,
        None => writeln!(out, "Stratification quality: not computable")?,
    }
    writeln!(out)?;

    writeln!(out, "Recommendations")?;
    writeln!(out, "---------------")?;
    for recommendation in &validation.recommendations {
        writeln!(out, "- {recommendation}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::default_threshold_scenarios;
    use crate::threshold::optimize_thresholds;
    use ndarray::Array1;
    use tempfile::TempDir;

    fn sample_optimization() -> ThresholdOptimization {
        let mut y_true = Vec::new();
        let mut y_prob = Vec::new();
        for i in 0..40 {
            y_true.push(1.0);
            y_prob.push(0.5 + 0.45 * (i as f64 / 40.0));
            y_true.push(0.0);
            y_prob.push(0.05 + 0.45 * (i as f64 / 40.0));
        }
        optimize_thresholds(
            Array1::from_vec(y_true).view(),
            Array1::from_vec(y_prob).view(),
            &default_threshold_scenarios(),
        )
    }

    #[test]
    fn threshold_reports_are_written_and_parse() {
        let dir = TempDir::new().unwrap();
        let results = sample_optimization();
        save_threshold_results(dir.path(), &results).unwrap();

        let json = fs::read_to_string(dir.path().join(THRESHOLD_JSON)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["thresholds_tested"], 17);
        assert_eq!(parsed["selections"].as_array().unwrap().len(), 3);

        let mut detailed = csv::Reader::from_path(dir.path().join(THRESHOLD_DETAILED_CSV)).unwrap();
        assert_eq!(detailed.records().count(), 17);

        let mut summary = csv::Reader::from_path(dir.path().join(THRESHOLD_SUMMARY_CSV)).unwrap();
        let rows: Vec<csv::StringRecord> = summary.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(&rows[0][0], "screening");
    }

    #[test]
    fn proportion_reports_are_written_and_parse() {
        use crate::models::CvScores;
        use crate::proportion::{
            BestConfiguration, ComparativeAnalysis, DatasetInfo, ModelAggregate, ModelResult,
            ProportionResult, ScenarioProportionResult, Variability,
        };

        let scores = CvScores {
            accuracy: 0.82,
            precision: 0.75,
            recall: 0.8,
            f1: 0.77,
            roc_auc: 0.88,
        };
        let model_results = vec![
            ModelResult {
                model: "LR".to_string(),
                scores,
                weighted_score: 0.78,
            },
            ModelResult {
                model: "RF".to_string(),
                scores,
                weighted_score: 0.74,
            },
        ];
        let proportion_result = ProportionResult {
            target_proportion: 0.31,
            actual_proportion: 0.31,
            dataset_size: 320,
            best_model: "LR".to_string(),
            best_weighted_score: 0.78,
            model_results,
            variability: Variability {
                mean_score: 0.76,
                std_score: 0.02,
                min_score: 0.74,
                max_score: 0.78,
                score_range: 0.04,
            },
        };
        let best = BestConfiguration {
            scenario: "general_population".to_string(),
            optimal_proportion: 0.31,
            actual_proportion: 0.31,
            best_model: "LR".to_string(),
            weighted_score: 0.78,
            dataset_size: 320,
            recommendation: "Good configuration for clinical use".to_string(),
        };
        let results = ProportionOptimization {
            dataset_info: DatasetInfo {
                total_samples: 400,
                positive_samples: 124,
                negative_samples: 276,
                original_prevalence: 0.31,
            },
            cv_folds: 5,
            models_tested: vec!["LR".to_string(), "RF".to_string(), "GB".to_string()],
            scenario_results: vec![ScenarioProportionResult {
                scenario: "general_population".to_string(),
                proportions_tested: vec![0.155, 0.2325, 0.31, 0.3875, 0.465],
                detailed_results: vec![proportion_result],
                best: Some(best.clone()),
            }],
            best_configurations: vec![best],
            comparative_analysis: ComparativeAnalysis {
                proportion_range: None,
                model_performance: vec![ModelAggregate {
                    model: "LR".to_string(),
                    mean_score: 0.78,
                    std_score: 0.0,
                    scenarios_won: 1,
                }],
            },
        };

        let dir = TempDir::new().unwrap();
        save_proportion_results(dir.path(), &results).unwrap();

        let json = fs::read_to_string(dir.path().join(PROPORTION_JSON)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["cv_folds"], 5);

        let mut summary = csv::Reader::from_path(dir.path().join(PROPORTION_SUMMARY_CSV)).unwrap();
        let rows: Vec<csv::StringRecord> = summary.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][3], "LR");

        // One detailed row per (proportion, model) pair.
        let mut detailed =
            csv::Reader::from_path(dir.path().join(PROPORTION_DETAILED_CSV)).unwrap();
        assert_eq!(detailed.records().count(), 2);
    }

    #[test]
    fn validation_report_writes_json_and_text() {
        use crate::validate::{
            ClinicalLogic, FeatureValidation, MedicalValidation, RiskBand, RiskStratification,
        };
        let validation = MedicalValidation {
            feature_validation: FeatureValidation {
                top_features: vec!["systolic_bp".to_string(), "age".to_string()],
                matched_features: vec!["systolic_bp".to_string(), "age".to_string()],
                missing_important_features: vec!["diabetes".to_string()],
                medical_logic_score: 0.72,
            },
            clinical_logic: ClinicalLogic {
                age_correlation: Some(0.41),
                bp_correlation: Some(0.63),
                diabetes_correlation: None,
                overall_logic_score: 0.52,
            },
            risk_stratification: RiskStratification {
                low_risk: RiskBand {
                    count: 60,
                    percentage: 60.0,
                    avg_age: Some(42.0),
                    avg_systolic: Some(118.0),
                },
                medium_risk: RiskBand {
                    count: 25,
                    percentage: 25.0,
                    avg_age: Some(51.0),
                    avg_systolic: Some(134.0),
                },
                high_risk: RiskBand {
                    count: 15,
                    percentage: 15.0,
                    avg_age: Some(63.0),
                    avg_systolic: Some(155.0),
                },
                stratification_quality: Some(0.9),
            },
            overall_consistency_score: 0.71,
            interpretation: "Good medical consistency".to_string(),
            recommendations: vec!["Model aligns with established risk factors".to_string()],
        };

        let dir = TempDir::new().unwrap();
        save_validation_report(dir.path(), &validation).unwrap();

        let json = fs::read_to_string(dir.path().join(VALIDATION_JSON)).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["overall_consistency_score"], 0.71);

        let text = fs::read_to_string(dir.path().join(VALIDATION_TEXT)).unwrap();
        assert!(text.contains("MEDICAL VALIDATION REPORT"));
        assert!(text.contains("Diabetes correlation: not available"));
        assert!(text.contains("High risk"));
    }
}
