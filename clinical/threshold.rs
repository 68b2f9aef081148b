//! # Decision Threshold Optimization
//!
//! Sweeps a fixed grid of decision thresholds over a model's held-out
//! predicted probabilities and selects, per clinical scenario, the threshold
//! that best satisfies that scenario's objective.
//!
//! Selection is deterministic: candidates are scanned in ascending threshold
//! order and a new candidate must be strictly better to displace the current
//! one, so ties resolve to the lowest threshold. When no candidate satisfies
//! a scenario's hard constraints the optimizer falls back to the global best
//! by the scenario's primary metric; the fallback is observable through the
//! `meets_criteria` flag, which is always recomputed against the selected
//! snapshot.

use crate::metrics::{self, MetricSnapshot};
use crate::scenario::{Criteria, Scenario};
use ndarray::ArrayView1;
use serde::Serialize;

/// Grid bounds in integer 0.05 steps: 0.10, 0.15, ..., 0.90.
const GRID_STEP: f64 = 0.05;
const GRID_FIRST_STEP: usize = 2;
const GRID_LAST_STEP: usize = 18;

/// The inclusive threshold grid. Built from integer steps so the grid is
/// exactly reproducible and free of accumulation drift.
pub fn threshold_grid() -> Vec<f64> {
    (GRID_FIRST_STEP..=GRID_LAST_STEP)
        .map(|step| step as f64 * GRID_STEP)
        .collect()
}

/// Sample composition of the optimization input.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SampleInfo {
    pub total_samples: usize,
    pub positive_samples: usize,
    pub negative_samples: usize,
    pub prevalence: f64,
}

/// The per-scenario outcome: the chosen snapshot and whether it actually
/// satisfies the scenario's hard constraints (as opposed to being the best
/// available fallback).
#[derive(Debug, Clone, Serialize)]
pub struct ThresholdSelection {
    pub scenario: String,
    pub description: String,
    pub metrics: MetricSnapshot,
    pub meets_criteria: bool,
}

/// Sensitivity/specificity trade-off summary for one selected threshold.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TradeOff {
    pub sensitivity: f64,
    pub specificity: f64,
    /// Harmonic mean of sensitivity and specificity.
    pub balance_score: f64,
    pub ppv: f64,
    pub npv: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ThresholdRange {
    pub min: f64,
    pub max: f64,
    pub spread: f64,
}

/// Per-scenario recommendation line for the human-readable report.
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub scenario: String,
    pub recommendation: String,
    pub use_case: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparativeAnalysis {
    pub threshold_range: ThresholdRange,
    pub tradeoffs: Vec<(String, TradeOff)>,
    pub recommendations: Vec<Recommendation>,
}

/// The full result of one threshold optimization run: audit table plus one
/// selection per scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ThresholdOptimization {
    pub sample_info: SampleInfo,
    pub thresholds_tested: usize,
    /// One snapshot per grid point, in ascending threshold order.
    pub detailed_results: Vec<MetricSnapshot>,
    pub selections: Vec<ThresholdSelection>,
    pub comparative_analysis: ComparativeAnalysis,
}

impl ThresholdOptimization {
    pub fn selection(&self, scenario: &str) -> Option<&ThresholdSelection> {
        self.selections.iter().find(|s| s.scenario == scenario)
    }
}

/// Run the grid sweep and per-scenario selection.
///
/// Never fails: degenerate probability arrays saturate the metrics through
/// the zero-denominator rule and selection falls back to the best available
/// candidate.
pub fn optimize_thresholds(
    y_true: ArrayView1<'_, f64>,
    y_prob: ArrayView1<'_, f64>,
    scenarios: &[Scenario],
) -> ThresholdOptimization {
    let positive_samples = y_true.iter().filter(|&&y| y >= 0.5).count();
    let sample_info = SampleInfo {
        total_samples: y_true.len(),
        positive_samples,
        negative_samples: y_true.len() - positive_samples,
        prevalence: if y_true.is_empty() {
            0.0
        } else {
            positive_samples as f64 / y_true.len() as f64
        },
    };

    let grid = threshold_grid();
    let detailed_results: Vec<MetricSnapshot> = grid
        .iter()
        .map(|&t| metrics::evaluate_at_threshold(y_true, y_prob, t))
        .collect();

    log::info!(
        "Threshold sweep: {} grid points over {} samples (prevalence {:.3})",
        grid.len(),
        sample_info.total_samples,
        sample_info.prevalence
    );

    let selections: Vec<ThresholdSelection> = scenarios
        .iter()
        .map(|scenario| select_for_scenario(&detailed_results, scenario))
        .collect();

    for selection in &selections {
        log::info!(
            "Scenario '{}': threshold {:.2} (meets criteria: {})",
            selection.scenario,
            selection.metrics.threshold,
            selection.meets_criteria
        );
    }

    let comparative_analysis = comparative_analysis(&selections);

    ThresholdOptimization {
        sample_info,
        thresholds_tested: grid.len(),
        detailed_results,
        selections,
        comparative_analysis,
    }
}

/// Scan candidates in grid order keeping the strictly best value of `key`,
/// so equal candidates resolve to the lowest threshold.
fn argmax_by_key<'a, F>(candidates: &[&'a MetricSnapshot], key: F) -> Option<&'a MetricSnapshot>
where
    F: Fn(&MetricSnapshot) -> f64,
{
    let mut best: Option<&MetricSnapshot> = None;
    for &snap in candidates {
        let better = match best {
            None => true,
            Some(current) => key(snap) > key(current),
        };
        if better {
            best = Some(snap);
        }
    }
    best
}

fn select_for_scenario(table: &[MetricSnapshot], scenario: &Scenario) -> ThresholdSelection {
    let all: Vec<&MetricSnapshot> = table.iter().collect();
    let survivors: Vec<&MetricSnapshot> = table
        .iter()
        .filter(|snap| scenario.criteria.meets_floor(snap))
        .collect();

    // Survivors are ranked by the metric the floor did not already demand
    // (for balanced operation, F1 over the accuracy survivors); the fallback
    // ranks everything by the primary.
    let selected = match scenario.criteria {
        Criteria::HighSensitivity { .. } => argmax_by_key(&survivors, |s| s.specificity)
            .or_else(|| argmax_by_key(&all, |s| s.sensitivity)),
        Criteria::HighSpecificity { .. } => argmax_by_key(&survivors, |s| s.sensitivity)
            .or_else(|| argmax_by_key(&all, |s| s.specificity)),
        Criteria::Balanced { .. } => argmax_by_key(&survivors, |s| s.f1_score)
            .or_else(|| argmax_by_key(&all, |s| s.f1_score)),
    };
    // The grid is never empty, so a selection always exists.
    let metrics = *selected.expect("threshold grid is non-empty");

    ThresholdSelection {
        scenario: scenario.name.clone(),
        description: scenario.description.clone(),
        meets_criteria: scenario.criteria.is_satisfied_by(&metrics),
        metrics,
    }
}

fn comparative_analysis(selections: &[ThresholdSelection]) -> ComparativeAnalysis {
    let thresholds: Vec<f64> = selections.iter().map(|s| s.metrics.threshold).collect();
    let min = thresholds.iter().copied().fold(f64::INFINITY, f64::min);
    let max = thresholds.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let threshold_range = if thresholds.is_empty() {
        ThresholdRange {
            min: 0.0,
            max: 0.0,
            spread: 0.0,
        }
    } else {
        ThresholdRange {
            min,
            max,
            spread: max - min,
        }
    };

    let tradeoffs = selections
        .iter()
        .map(|s| {
            let sens = s.metrics.sensitivity;
            let spec = s.metrics.specificity;
            let balance_score = if sens + spec > 0.0 {
                2.0 * sens * spec / (sens + spec)
            } else {
                0.0
            };
            (
                s.scenario.clone(),
                TradeOff {
                    sensitivity: sens,
                    specificity: spec,
                    balance_score,
                    ppv: s.metrics.ppv,
                    npv: s.metrics.npv,
                },
            )
        })
        .collect();

    let recommendations = selections
        .iter()
        .map(|s| {
            let recommendation = if s.meets_criteria {
                format!(
                    "Threshold {:.3} satisfies the clinical criteria",
                    s.metrics.threshold
                )
            } else {
                format!(
                    "Threshold {:.3} is the best available but does not satisfy all criteria",
                    s.metrics.threshold
                )
            };
            Recommendation {
                scenario: s.scenario.clone(),
                recommendation,
                use_case: s.description.clone(),
            }
        })
        .collect();

    ComparativeAnalysis {
        threshold_range,
        tradeoffs,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::default_threshold_scenarios;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, array};

    #[test]
    fn grid_spans_ten_to_ninety_in_five_steps() {
        let grid = threshold_grid();
        assert_eq!(grid.len(), 17);
        assert_abs_diff_eq!(grid[0], 0.10, epsilon = 1e-12);
        assert_abs_diff_eq!(grid[16], 0.90, epsilon = 1e-12);
        for pair in grid.windows(2) {
            assert_abs_diff_eq!(pair[1] - pair[0], 0.05, epsilon = 1e-12);
        }
    }

    /// A well-calibrated synthetic cohort: positives cluster at high
    /// probability, negatives at low, with some overlap.
    fn overlapping_cohort() -> (Array1<f64>, Array1<f64>) {
        let mut y_true = Vec::new();
        let mut y_prob = Vec::new();
        for i in 0..50 {
            y_true.push(1.0);
            y_prob.push(0.55 + 0.4 * (i as f64 / 50.0) * 0.9);
            y_true.push(0.0);
            y_prob.push(0.05 + 0.5 * (i as f64 / 50.0));
        }
        (Array1::from_vec(y_true), Array1::from_vec(y_prob))
    }

    #[test]
    fn monotonic_sensitivity_and_specificity_across_grid() {
        let (y_true, y_prob) = overlapping_cohort();
        let result = optimize_thresholds(y_true.view(), y_prob.view(), &[]);
        for pair in result.detailed_results.windows(2) {
            assert!(pair[1].sensitivity <= pair[0].sensitivity + 1e-12);
            assert!(pair[1].specificity + 1e-12 >= pair[0].specificity);
        }
    }

    #[test]
    fn optimizer_is_idempotent() {
        let (y_true, y_prob) = overlapping_cohort();
        let scenarios = default_threshold_scenarios();
        let a = optimize_thresholds(y_true.view(), y_prob.view(), &scenarios);
        let b = optimize_thresholds(y_true.view(), y_prob.view(), &scenarios);
        for (sa, sb) in a.selections.iter().zip(b.selections.iter()) {
            assert_eq!(sa.metrics.threshold, sb.metrics.threshold);
            assert_eq!(sa.metrics, sb.metrics);
            assert_eq!(sa.meets_criteria, sb.meets_criteria);
        }
    }

    #[test]
    fn unattainable_sensitivity_falls_back_flagged() {
        // No threshold reaches 0.90 sensitivity with 0.70 specificity here:
        // probabilities are anti-correlated with the labels.
        let y_true = array![1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        let y_prob = array![0.2, 0.25, 0.3, 0.35, 0.6, 0.7, 0.8, 0.9];
        let scenarios = default_threshold_scenarios();
        let result = optimize_thresholds(y_true.view(), y_prob.view(), &scenarios);

        let screening = result.selection("screening").unwrap();
        assert!(!screening.meets_criteria);
        // Fallback is the globally highest sensitivity; the lowest grid
        // threshold (0.10) captures every positive.
        let best_sensitivity = result
            .detailed_results
            .iter()
            .map(|s| s.sensitivity)
            .fold(f64::NEG_INFINITY, f64::max);
        assert_abs_diff_eq!(
            screening.metrics.sensitivity,
            best_sensitivity,
            epsilon = 1e-12
        );
    }

    #[test]
    fn ties_resolve_to_lowest_threshold() {
        // Probabilities far from every grid point: many thresholds yield
        // identical confusion matrices, so the tie-break must pick the lowest.
        let y_true = array![1.0, 1.0, 0.0, 0.0];
        let y_prob = array![0.95, 0.93, 0.02, 0.01];
        let scenarios = default_threshold_scenarios();
        let result = optimize_thresholds(y_true.view(), y_prob.view(), &scenarios);
        let screening = result.selection("screening").unwrap();
        assert!(screening.meets_criteria);
        assert_abs_diff_eq!(screening.metrics.threshold, 0.10, epsilon = 1e-12);
    }

    #[test]
    fn balanced_selection_honors_accuracy_floor_over_f1() {
        // Nine clear positives, plus a mixed block of five positives and six
        // negatives at probability 0.12. Threshold 0.10 captures the mixed
        // block and maximizes F1 (~0.82) but sinks accuracy to 0.70; the
        // accuracy floor (0.75) must keep it out of the candidate pool even
        // though no surviving candidate reaches the F1 target.
        let mut y_true = vec![1.0; 9];
        let mut y_prob = vec![0.92; 9];
        y_true.extend(std::iter::repeat(1.0).take(5));
        y_prob.extend(std::iter::repeat(0.12).take(5));
        y_true.extend(std::iter::repeat(0.0).take(6));
        y_prob.extend(std::iter::repeat(0.12).take(6));
        let y_true = Array1::from_vec(y_true);
        let y_prob = Array1::from_vec(y_prob);

        let scenarios = default_threshold_scenarios();
        let result = optimize_thresholds(y_true.view(), y_prob.view(), &scenarios);
        let diagnosis = result.selection("diagnosis").unwrap();

        // Every threshold from 0.15 up yields the same confusion matrix
        // (tp=9, fn=5, tn=6), so the tie-break picks 0.15.
        assert_abs_diff_eq!(diagnosis.metrics.threshold, 0.15, epsilon = 1e-12);
        assert!(diagnosis.metrics.accuracy >= 0.75);
        assert_abs_diff_eq!(diagnosis.metrics.f1_score, 18.0 / 23.0, epsilon = 1e-12);
        // The F1 target (0.80) is out of reach within the floor.
        assert!(!diagnosis.meets_criteria);
    }

    #[test]
    fn degenerate_single_class_input_still_selects() {
        let y_true = array![0.0, 0.0, 0.0, 0.0];
        let y_prob = array![0.4, 0.5, 0.6, 0.7];
        let scenarios = default_threshold_scenarios();
        let result = optimize_thresholds(y_true.view(), y_prob.view(), &scenarios);
        assert_eq!(result.selections.len(), 3);
        for selection in &result.selections {
            assert!(selection.metrics.threshold >= 0.10);
        }
    }

    #[test]
    fn comparative_analysis_reports_threshold_range() {
        let (y_true, y_prob) = overlapping_cohort();
        let scenarios = default_threshold_scenarios();
        let result = optimize_thresholds(y_true.view(), y_prob.view(), &scenarios);
        let range = result.comparative_analysis.threshold_range;
        assert!(range.min <= range.max);
        assert_abs_diff_eq!(range.spread, range.max - range.min, epsilon = 1e-12);
        assert_eq!(result.comparative_analysis.recommendations.len(), 3);
    }
}
