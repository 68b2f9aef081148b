//! # Medical Knowledge Validation
//!
//! Sanity-checks a trained model's behavior against established clinical
//! expectations, independent of raw accuracy. Three read-only diagnostics:
//!
//! 1. Feature priority: are the medically expected risk factors (blood
//!    pressure, age, diabetes, BMI, cholesterol, smoking) among the model's
//!    top-ranked features?
//! 2. Clinical logic: do predicted probabilities correlate positively with
//!    known risk factors?
//! 3. Risk stratification: do the low/medium/high probability bands actually
//!    separate by age and systolic pressure?
//!
//! Sub-computations fail soft: a correlation over a zero-variance column or a
//! band with no members skips that component instead of aborting the
//! validation. The composite score averages whatever components remain.

use crate::data::CohortData;
use ndarray::ArrayView1;
use serde::Serialize;

const TOP_N_FEATURES: usize = 10;

/// Band boundaries on the predicted probability. 0.3 itself is low risk.
const LOW_RISK_CUTOFF: f64 = 0.3;
const HIGH_RISK_CUTOFF: f64 = 0.7;

/// Age separation (in years) between the high and low bands that earns a
/// perfect stratification score.
const FULL_SEPARATION_YEARS: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FeaturePriority {
    High,
    Medium,
    Low,
}

impl FeaturePriority {
    fn weight(self) -> f64 {
        match self {
            FeaturePriority::High => 3.0,
            FeaturePriority::Medium => 2.0,
            FeaturePriority::Low => 1.0,
        }
    }
}

/// Features a hypertension model is medically expected to rank highly.
const EXPECTED_MEDICAL_FEATURES: [(&str, FeaturePriority); 7] = [
    ("systolic_bp", FeaturePriority::High),
    ("diastolic_bp", FeaturePriority::High),
    ("age", FeaturePriority::High),
    ("diabetes", FeaturePriority::High),
    ("bmi", FeaturePriority::Medium),
    ("total_cholesterol", FeaturePriority::Medium),
    ("current_smoker", FeaturePriority::Medium),
];

/// Outcome of the feature-priority check.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureValidation {
    pub top_features: Vec<String>,
    pub matched_features: Vec<String>,
    pub missing_important_features: Vec<String>,
    /// Weighted hit rate: matched priority weight over total priority weight.
    pub medical_logic_score: f64,
}

/// Outcome of the risk-factor correlation check. `None` marks a component
/// that was skipped (feature absent or zero variance).
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ClinicalLogic {
    pub age_correlation: Option<f64>,
    pub bp_correlation: Option<f64>,
    pub diabetes_correlation: Option<f64>,
    pub overall_logic_score: f64,
}

/// One probability band of the stratification check.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RiskBand {
    pub count: usize,
    pub percentage: f64,
    pub avg_age: Option<f64>,
    pub avg_systolic: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RiskStratification {
    pub low_risk: RiskBand,
    pub medium_risk: RiskBand,
    pub high_risk: RiskBand,
    /// `None` when the low or high band is empty or lacks age data.
    pub stratification_quality: Option<f64>,
}

/// The complete validation report.
#[derive(Debug, Clone, Serialize)]
pub struct MedicalValidation {
    pub feature_validation: FeatureValidation,
    pub clinical_logic: ClinicalLogic,
    pub risk_stratification: RiskStratification,
    pub overall_consistency_score: f64,
    pub interpretation: String,
    pub recommendations: Vec<String>,
}

/// Pearson correlation, or `None` when either side is (near) constant or too
/// short to correlate.
pub fn pearson_correlation(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> Option<f64> {
    let n = a.len().min(b.len());
    if n < 2 {
        return None;
    }
    let n_f = n as f64;
    let mean_a = a.iter().take(n).sum::<f64>() / n_f;
    let mean_b = b.iter().take(n).sum::<f64>() / n_f;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a < 1e-12 || var_b < 1e-12 {
        return None;
    }
    Some(cov / (var_a.sqrt() * var_b.sqrt()))
}

/// Run all three diagnostics and compose the report.
///
/// `feature_importance` is a ranked (descending) list of (name, importance)
/// pairs, e.g. from [`crate::models::TrainedEstimator::feature_importance`]
/// zipped with the cohort's feature names.
pub fn validate_against_medical_knowledge(
    cohort: &CohortData,
    predictions: ArrayView1<'_, f64>,
    feature_importance: &[(String, f64)],
) -> MedicalValidation {
    let feature_validation = validate_features(feature_importance);
    let clinical_logic = validate_clinical_logic(cohort, predictions);
    let risk_stratification = validate_risk_stratification(cohort, predictions);

    let mut component_scores = vec![
        feature_validation.medical_logic_score,
        clinical_logic.overall_logic_score,
    ];
    if let Some(quality) = risk_stratification.stratification_quality {
        component_scores.push(quality);
    }
    let overall_consistency_score =
        component_scores.iter().sum::<f64>() / component_scores.len() as f64;

    let interpretation = interpret_score(overall_consistency_score).to_string();
    let recommendations = recommendations(
        overall_consistency_score,
        &feature_validation.missing_important_features,
    );

    log::info!(
        "Medical validation: consistency {:.3} ({})",
        overall_consistency_score,
        interpretation
    );

    MedicalValidation {
        feature_validation,
        clinical_logic,
        risk_stratification,
        overall_consistency_score,
        interpretation,
        recommendations,
    }
}

fn validate_features(feature_importance: &[(String, f64)]) -> FeatureValidation {
    let top_features: Vec<String> = feature_importance
        .iter()
        .take(TOP_N_FEATURES)
        .map(|(name, _)| name.clone())
        .collect();

    let mut matched_features = Vec::new();
    let mut missing = Vec::new();
    let mut matched_weight = 0.0;
    let mut total_weight = 0.0;
    for (expected, priority) in EXPECTED_MEDICAL_FEATURES {
        total_weight += priority.weight();
        let found = top_features
            .iter()
            .any(|f| f.to_lowercase().contains(expected));
        if found {
            matched_weight += priority.weight();
            matched_features.push(expected.to_string());
        } else {
            missing.push(expected.to_string());
        }
    }

    FeatureValidation {
        top_features,
        matched_features,
        missing_important_features: missing,
        medical_logic_score: if total_weight > 0.0 {
            matched_weight / total_weight
        } else {
            0.0
        },
    }
}

/// Correlate known risk factors with the predicted probability. Negative
/// correlations are clamped to 0: the clinical assumption is that these
/// factors never reduce predicted risk.
fn validate_clinical_logic(
    cohort: &CohortData,
    predictions: ArrayView1<'_, f64>,
) -> ClinicalLogic {
    let correlate = |feature: &str| -> Option<f64> {
        let index = cohort.feature_index(feature)?;
        let column = cohort.feature_column(index);
        pearson_correlation(column.view(), predictions).map(|r| r.max(0.0))
    };

    let age_correlation = correlate("age");
    // First blood-pressure column in schema order.
    let bp_correlation = cohort
        .feature_names
        .iter()
        .find(|name| name.contains("_bp"))
        .and_then(|name| correlate(name));
    let diabetes_correlation = correlate("diabetes");

    let non_zero: Vec<f64> = [age_correlation, bp_correlation, diabetes_correlation]
        .into_iter()
        .flatten()
        .filter(|&r| r != 0.0)
        .collect();
    let overall_logic_score = if non_zero.is_empty() {
        0.0
    } else {
        non_zero.iter().sum::<f64>() / non_zero.len() as f64
    };

    ClinicalLogic {
        age_correlation,
        bp_correlation,
        diabetes_correlation,
        overall_logic_score,
    }
}

fn validate_risk_stratification(
    cohort: &CohortData,
    predictions: ArrayView1<'_, f64>,
) -> RiskStratification {
    let n = predictions.len();
    let age_index = cohort.feature_index("age");
    let systolic_index = cohort.feature_index("systolic_bp");

    let band_of = |p: f64| -> usize {
        if p <= LOW_RISK_CUTOFF {
            0
        } else if p <= HIGH_RISK_CUTOFF {
            1
        } else {
            2
        }
    };

    let mut counts = [0usize; 3];
    let mut age_sums = [0.0f64; 3];
    let mut systolic_sums = [0.0f64; 3];
    for (i, &p) in predictions.iter().enumerate() {
        let band = band_of(p);
        counts[band] += 1;
        if let Some(j) = age_index {
            age_sums[band] += cohort.x[[i, j]];
        }
        if let Some(j) = systolic_index {
            systolic_sums[band] += cohort.x[[i, j]];
        }
    }

    let band = |index: usize| -> RiskBand {
        let count = counts[index];
        RiskBand {
            count,
            percentage: if n > 0 {
                count as f64 / n as f64 * 100.0
            } else {
                0.0
            },
            avg_age: (count > 0 && age_index.is_some())
                .then(|| age_sums[index] / count as f64),
            avg_systolic: (count > 0 && systolic_index.is_some())
                .then(|| systolic_sums[index] / count as f64),
        }
    };
    let low_risk = band(0);
    let medium_risk = band(1);
    let high_risk = band(2);

    let stratification_quality = match (high_risk.avg_age, low_risk.avg_age) {
        (Some(high_age), Some(low_age)) => {
            Some(((high_age - low_age) / FULL_SEPARATION_YEARS).clamp(0.0, 1.0))
        }
        _ => None,
    };

    RiskStratification {
        low_risk,
        medium_risk,
        high_risk,
        stratification_quality,
    }
}

fn interpret_score(score: f64) -> &'static str {
    if score >= 0.8 {
        "Excellent consistency with medical knowledge"
    } else if score >= 0.6 {
        "Good medical consistency"
    } else if score >= 0.4 {
        "Moderate medical consistency"
    } else {
        "Low medical consistency - review required"
    }
}

fn recommendations(score: f64, missing_features: &[String]) -> Vec<String> {
    let mut recommendations = Vec::new();
    if score < 0.6 {
        recommendations
            .push("Review feature engineering for better medical alignment".to_string());
        recommendations.push("Consult medical specialists for validation".to_string());
    }
    if !missing_features.is_empty() {
        recommendations.push(format!(
            "Consider strengthening undetected medical features: {}",
            missing_features.join(", ")
        ));
    }
    recommendations.push("Validate against external cohorts from other populations".to_string());
    recommendations.push("Monitor medical consistency continuously in production".to_string());
    recommendations
}
