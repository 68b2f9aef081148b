//! # Binary Classification Metric Evaluation
//!
//! Converts (true labels, predicted probabilities, decision threshold) into a
//! complete, immutable [`MetricSnapshot`]. Every derived rate is total: a zero
//! denominator yields 0.0, never NaN and never a panic, so downstream
//! optimizers can scan degenerate configurations (all-one-class folds,
//! saturating thresholds) without special-casing.
//!
//! The decision boundary is inclusive: a probability exactly equal to the
//! threshold counts as a positive call.

use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

/// Raw confusion-matrix counts for one (labels, probabilities, threshold) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub tp: usize,
    pub fp: usize,
    pub tn: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
}

/// A complete metric record for one decision threshold.
///
/// Created once by [`evaluate_at_threshold`] and never mutated afterwards;
/// optimizers copy it into their selections and reports serialize it verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub threshold: f64,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub sensitivity: f64,
    pub specificity: f64,
    pub ppv: f64,
    pub npv: f64,
    pub false_positive_rate: f64,
    pub false_negative_rate: f64,
    pub confusion: ConfusionCounts,
}

/// Division that defines 0/0 (and anything/0) as 0.
fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Tally the confusion matrix at `threshold` using the inclusive boundary
/// (probability >= threshold predicts positive).
pub fn confusion_counts(
    y_true: ArrayView1<'_, f64>,
    y_prob: ArrayView1<'_, f64>,
    threshold: f64,
) -> ConfusionCounts {
    let mut counts = ConfusionCounts {
        tp: 0,
        fp: 0,
        tn: 0,
        fn_: 0,
    };
    for (&truth, &prob) in y_true.iter().zip(y_prob.iter()) {
        let predicted_positive = prob >= threshold;
        let actual_positive = truth >= 0.5;
        match (actual_positive, predicted_positive) {
            (true, true) => counts.tp += 1,
            (true, false) => counts.fn_ += 1,
            (false, true) => counts.fp += 1,
            (false, false) => counts.tn += 1,
        }
    }
    counts
}

/// Derive the full metric set from raw counts.
pub fn snapshot_from_counts(counts: ConfusionCounts, threshold: f64) -> MetricSnapshot {
    let tp = counts.tp as f64;
    let fp = counts.fp as f64;
    let tn = counts.tn as f64;
    let fn_ = counts.fn_ as f64;

    let sensitivity = safe_ratio(tp, tp + fn_);
    let specificity = safe_ratio(tn, tn + fp);
    let precision = safe_ratio(tp, tp + fp);
    let npv = safe_ratio(tn, tn + fn_);
    let f1_score = safe_ratio(2.0 * precision * sensitivity, precision + sensitivity);

    MetricSnapshot {
        threshold,
        accuracy: safe_ratio(tp + tn, tp + fp + tn + fn_),
        precision,
        recall: sensitivity,
        f1_score,
        sensitivity,
        specificity,
        ppv: precision,
        npv,
        false_positive_rate: safe_ratio(fp, fp + tn),
        false_negative_rate: safe_ratio(fn_, fn_ + tp),
        confusion: counts,
    }
}

/// Evaluate the complete metric snapshot at one threshold.
pub fn evaluate_at_threshold(
    y_true: ArrayView1<'_, f64>,
    y_prob: ArrayView1<'_, f64>,
    threshold: f64,
) -> MetricSnapshot {
    snapshot_from_counts(confusion_counts(y_true, y_prob, threshold), threshold)
}

/// F-beta score from precision and recall. `beta > 1` favors recall,
/// `beta < 1` favors precision. Zero denominator yields 0.
pub fn f_beta(precision: f64, recall: f64, beta: f64) -> f64 {
    let beta_sq = beta * beta;
    safe_ratio(
        (1.0 + beta_sq) * precision * recall,
        beta_sq * precision + recall,
    )
}

/// Area under the ROC curve via the rank statistic (Mann-Whitney U), with the
/// midrank correction for tied probabilities.
///
/// A degenerate input where one class is absent carries no ranking
/// information; it evaluates to 0.5 rather than erroring so that
/// cross-validation over small resampled cohorts stays total.
pub fn roc_auc(y_true: ArrayView1<'_, f64>, y_prob: ArrayView1<'_, f64>) -> f64 {
    let n = y_true.len();
    let n_pos = y_true.iter().filter(|&&y| y >= 0.5).count();
    let n_neg = n - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return 0.5;
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        y_prob[a]
            .partial_cmp(&y_prob[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    // Midranks over ties, then the positive-class rank sum.
    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && y_prob[order[j + 1]] == y_prob[order[i]] {
            j += 1;
        }
        // ranks are 1-based; all of [i, j] share the midrank
        let midrank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if y_true[idx] >= 0.5 {
                rank_sum_pos += midrank;
            }
        }
        i = j + 1;
    }

    let n_pos_f = n_pos as f64;
    let n_neg_f = n_neg as f64;
    (rank_sum_pos - n_pos_f * (n_pos_f + 1.0) / 2.0) / (n_pos_f * n_neg_f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn worked_example_at_half_threshold() {
        let y_true = array![1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let y_prob = array![0.9, 0.8, 0.3, 0.2, 0.1, 0.6, 0.05, 0.4, 0.15, 0.25];

        let snap = evaluate_at_threshold(y_true.view(), y_prob.view(), 0.5);

        assert_eq!(snap.confusion.tp, 2);
        assert_eq!(snap.confusion.fn_, 1);
        assert_eq!(snap.confusion.fp, 1);
        assert_eq!(snap.confusion.tn, 6);
        assert_abs_diff_eq!(snap.sensitivity, 2.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(snap.specificity, 6.0 / 7.0, epsilon = 1e-12);
        assert_abs_diff_eq!(snap.precision, 2.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(snap.accuracy, 0.8, epsilon = 1e-12);
    }

    #[test]
    fn threshold_boundary_is_inclusive() {
        let y_true = array![1.0, 0.0];
        let y_prob = array![0.5, 0.49];
        let counts = confusion_counts(y_true.view(), y_prob.view(), 0.5);
        assert_eq!(counts.tp, 1);
        assert_eq!(counts.tn, 1);
    }

    #[test]
    fn degenerate_inputs_never_produce_nan() {
        // All negative: sensitivity/precision denominators vanish.
        let y_true = array![0.0, 0.0, 0.0];
        let y_prob = array![0.9, 0.9, 0.9];
        let snap = evaluate_at_threshold(y_true.view(), y_prob.view(), 0.5);
        assert_eq!(snap.sensitivity, 0.0);
        assert_eq!(snap.precision, 0.0);
        assert_eq!(snap.npv, 0.0);
        assert_eq!(snap.false_negative_rate, 0.0);
        assert!(snap.accuracy.is_finite());

        // Empty input.
        let empty = ndarray::Array1::<f64>::zeros(0);
        let snap = evaluate_at_threshold(empty.view(), empty.view(), 0.5);
        assert_eq!(snap.accuracy, 0.0);
        assert_eq!(snap.f1_score, 0.0);
    }

    #[test]
    fn perfect_rates_at_zero_error() {
        let y_true = array![1.0, 1.0, 0.0, 0.0];
        let y_prob = array![0.9, 0.8, 0.1, 0.2];
        let snap = evaluate_at_threshold(y_true.view(), y_prob.view(), 0.5);
        assert_eq!(snap.sensitivity, 1.0);
        assert_eq!(snap.specificity, 1.0);
        assert_eq!(snap.f1_score, 1.0);
    }

    #[test]
    fn f_beta_reduces_to_f1_at_beta_one() {
        let f1 = f_beta(0.6, 0.8, 1.0);
        assert_abs_diff_eq!(f1, 2.0 * 0.6 * 0.8 / (0.6 + 0.8), epsilon = 1e-12);
        assert_eq!(f_beta(0.0, 0.0, 2.0), 0.0);
    }

    #[test]
    fn roc_auc_separable_and_degenerate() {
        let y_true = array![0.0, 0.0, 1.0, 1.0];
        let y_prob = array![0.1, 0.2, 0.8, 0.9];
        assert_abs_diff_eq!(roc_auc(y_true.view(), y_prob.view()), 1.0, epsilon = 1e-12);

        let y_rev = array![1.0, 1.0, 0.0, 0.0];
        assert_abs_diff_eq!(roc_auc(y_rev.view(), y_prob.view()), 0.0, epsilon = 1e-12);

        let one_class = array![1.0, 1.0];
        let probs = array![0.3, 0.7];
        assert_abs_diff_eq!(roc_auc(one_class.view(), probs.view()), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn roc_auc_handles_ties_with_midranks() {
        // One positive and one negative share the same probability: they
        // contribute half a concordant pair.
        let y_true = array![1.0, 0.0];
        let y_prob = array![0.5, 0.5];
        assert_abs_diff_eq!(roc_auc(y_true.view(), y_prob.view()), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn confusion_counts_serialize_without_the_underscore() {
        let counts = ConfusionCounts {
            tp: 2,
            fp: 1,
            tn: 6,
            fn_: 1,
        };
        let json = serde_json::to_value(counts).unwrap();
        assert_eq!(json["fn"], 1);
        assert!(json.get("fn_").is_none());

        let back: ConfusionCounts = serde_json::from_value(json).unwrap();
        assert_eq!(back, counts);
    }

    #[test]
    fn rates_bounded_for_random_counts() {
        for (tp, fp, tn, fn_) in [(3, 1, 5, 2), (0, 4, 4, 0), (10, 0, 0, 10), (1, 1, 1, 1)] {
            let counts = ConfusionCounts { tp, fp, tn, fn_ };
            let snap = snapshot_from_counts(counts, 0.5);
            for rate in [
                snap.sensitivity,
                snap.specificity,
                snap.precision,
                snap.npv,
                snap.accuracy,
                snap.f1_score,
                snap.false_positive_rate,
                snap.false_negative_rate,
            ] {
                assert!((0.0..=1.0).contains(&rate), "rate {rate} out of bounds");
            }
            if fn_ == 0 && tp > 0 {
                assert_eq!(snap.sensitivity, 1.0);
            }
            if fp == 0 && tn > 0 {
                assert_eq!(snap.specificity, 1.0);
            }
        }
    }
}
