//! # Candidate Estimator Pool
//!
//! The three classifier families the proportion optimizer ranks: logistic
//! regression fit by iteratively reweighted least squares, a random forest of
//! depth-limited CART trees, and Newton-step gradient boosting over stumps.
//! All three are implemented directly on `ndarray` and are deterministic for
//! a fixed seed, so optimization runs are reproducible.
//!
//! The IRLS loop follows the classic GLM recipe: form the working response
//! `z = eta + (y - mu) / w` with weights `w = mu (1 - mu)`, solve the weighted
//! normal equations by Cholesky, and iterate until the deviance stabilizes. A
//! small ridge term keeps the system positive definite on separable cohorts.

use crate::metrics::{self, MetricSnapshot};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Seed used by every stochastic component so repeated runs agree.
pub const DEFAULT_SEED: u64 = 42;

const IRLS_MAX_ITERATIONS: usize = 100;
const IRLS_TOLERANCE: f64 = 1e-8;
const IRLS_RIDGE: f64 = 1e-6;
const PROB_CLAMP: f64 = 1e-9;

const FOREST_TREES: usize = 25;
const FOREST_MAX_DEPTH: usize = 8;
const FOREST_MIN_LEAF: usize = 5;

const BOOST_ROUNDS: usize = 60;
const BOOST_LEARNING_RATE: f64 = 0.1;
const BOOST_LAMBDA: f64 = 1.0;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Training set is empty.")]
    EmptyTrainingSet,
    #[error("Training set has {found} samples but at least {required} are required.")]
    TooFewSamples { found: usize, required: usize },
    #[error("Feature matrix has {x_rows} rows but the label vector has {y_len} entries.")]
    ShapeMismatch { x_rows: usize, y_len: usize },
    #[error("The weighted normal equations were singular even after ridging.")]
    SingularSystem,
    #[error("Cross-validation needs at least 2 folds, got {0}.")]
    TooFewFolds(usize),
}

/// The fixed candidate pool, in deterministic tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelKind {
    LogisticRegression,
    RandomForest,
    GradientBoosting,
}

impl ModelKind {
    pub fn all() -> [ModelKind; 3] {
        [
            ModelKind::LogisticRegression,
            ModelKind::RandomForest,
            ModelKind::GradientBoosting,
        ]
    }

    /// Short report/artifact name.
    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::LogisticRegression => "LR",
            ModelKind::RandomForest => "RF",
            ModelKind::GradientBoosting => "GB",
        }
    }

    /// Fit this candidate on a cohort.
    pub fn fit(
        &self,
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
        seed: u64,
    ) -> Result<TrainedEstimator, ModelError> {
        check_shapes(x, y)?;
        match self {
            ModelKind::LogisticRegression => {
                Ok(TrainedEstimator::LogisticRegression(fit_logistic(x, y)?))
            }
            ModelKind::RandomForest => Ok(TrainedEstimator::RandomForest(fit_forest(x, y, seed))),
            ModelKind::GradientBoosting => {
                Ok(TrainedEstimator::GradientBoosting(fit_boosted(x, y)))
            }
        }
    }
}

fn check_shapes(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> Result<(), ModelError> {
    if y.is_empty() {
        return Err(ModelError::EmptyTrainingSet);
    }
    if x.nrows() != y.len() {
        return Err(ModelError::ShapeMismatch {
            x_rows: x.nrows(),
            y_len: y.len(),
        });
    }
    Ok(())
}

/// A fitted classifier, serializable for artifact persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrainedEstimator {
    LogisticRegression(LogisticModel),
    RandomForest(ForestModel),
    GradientBoosting(BoostedModel),
}

impl TrainedEstimator {
    pub fn kind(&self) -> ModelKind {
        match self {
            TrainedEstimator::LogisticRegression(_) => ModelKind::LogisticRegression,
            TrainedEstimator::RandomForest(_) => ModelKind::RandomForest,
            TrainedEstimator::GradientBoosting(_) => ModelKind::GradientBoosting,
        }
    }

    /// Predicted positive-class probabilities, one per row of `x`.
    pub fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        match self {
            TrainedEstimator::LogisticRegression(model) => model.predict_proba(x),
            TrainedEstimator::RandomForest(model) => model.predict_proba(x),
            TrainedEstimator::GradientBoosting(model) => model.predict_proba(x),
        }
    }

    /// Relative feature importances, normalized to sum to 1. For logistic
    /// regression this is the absolute standardized coefficient; for the tree
    /// ensembles it is the split frequency per feature.
    pub fn feature_importance(&self, n_features: usize) -> Vec<f64> {
        let mut raw = vec![0.0; n_features];
        match self {
            TrainedEstimator::LogisticRegression(model) => {
                for (j, &coef) in model.coefficients.iter().enumerate() {
                    if j < n_features {
                        raw[j] = coef.abs();
                    }
                }
            }
            TrainedEstimator::RandomForest(model) => {
                for tree in &model.trees {
                    for node in &tree.nodes {
                        if let TreeNode::Split { feature, .. } = node
                            && *feature < n_features
                        {
                            raw[*feature] += 1.0;
                        }
                    }
                }
            }
            TrainedEstimator::GradientBoosting(model) => {
                for stump in &model.stumps {
                    if stump.feature < n_features {
                        raw[stump.feature] += 1.0;
                    }
                }
            }
        }
        let total: f64 = raw.iter().sum();
        if total > 0.0 {
            for value in &mut raw {
                *value /= total;
            }
        }
        raw
    }
}

fn sigmoid(eta: f64) -> f64 {
    1.0 / (1.0 + (-eta).exp())
}

// ---------------------------------------------------------------------------
// Logistic regression (IRLS)
// ---------------------------------------------------------------------------

/// Logistic regression coefficients on standardized features. The
/// standardization parameters are part of the model so prediction reproduces
/// the training-time transform exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    pub intercept: f64,
    pub coefficients: Array1<f64>,
    pub feature_means: Array1<f64>,
    pub feature_scales: Array1<f64>,
}

impl LogisticModel {
    pub fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        let mut probs = Array1::zeros(x.nrows());
        for (i, row) in x.axis_iter(Axis(0)).enumerate() {
            let mut eta = self.intercept;
            for (j, &value) in row.iter().enumerate() {
                let standardized = (value - self.feature_means[j]) / self.feature_scales[j];
                eta += self.coefficients[j] * standardized;
            }
            probs[i] = sigmoid(eta);
        }
        probs
    }
}

fn fit_logistic(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
) -> Result<LogisticModel, ModelError> {
    let n = x.nrows();
    let p = x.ncols();

    // Standardize columns; a constant column gets unit scale so it simply
    // contributes nothing after centering.
    let means = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(p));
    let mut scales = Array1::ones(p);
    for j in 0..p {
        let var = x
            .column(j)
            .iter()
            .map(|&v| (v - means[j]).powi(2))
            .sum::<f64>()
            / n as f64;
        let sd = var.sqrt();
        if sd > 1e-12 {
            scales[j] = sd;
        }
    }
    let mut design = Array2::zeros((n, p + 1));
    for i in 0..n {
        design[[i, 0]] = 1.0;
        for j in 0..p {
            design[[i, j + 1]] = (x[[i, j]] - means[j]) / scales[j];
        }
    }

    let mut beta = Array1::<f64>::zeros(p + 1);
    let mut last_deviance = f64::INFINITY;

    for iteration in 0..IRLS_MAX_ITERATIONS {
        let eta = design.dot(&beta);
        let mu = eta.mapv(|e| sigmoid(e).clamp(PROB_CLAMP, 1.0 - PROB_CLAMP));
        let w = mu.mapv(|m| m * (1.0 - m));
        let z = &eta + &((&y.to_owned() - &mu) / &w);

        // Weighted normal equations: (X^T W X + ridge I) beta = X^T W z.
        let mut xtwx = Array2::<f64>::zeros((p + 1, p + 1));
        let mut xtwz = Array1::<f64>::zeros(p + 1);
        for i in 0..n {
            let wi = w[i];
            let row = design.row(i);
            for a in 0..=p {
                let wa = wi * row[a];
                xtwz[a] += wa * z[i];
                for b in a..=p {
                    xtwx[[a, b]] += wa * row[b];
                }
            }
        }
        for a in 0..=p {
            xtwx[[a, a]] += IRLS_RIDGE;
            for b in 0..a {
                xtwx[[a, b]] = xtwx[[b, a]];
            }
        }

        beta = solve_spd(&xtwx, &xtwz).ok_or(ModelError::SingularSystem)?;

        let deviance: f64 = y
            .iter()
            .zip(mu.iter())
            .map(|(&yi, &mi)| {
                -2.0 * (yi * mi.ln() + (1.0 - yi) * (1.0 - mi).ln())
            })
            .sum();
        if (last_deviance - deviance).abs() < IRLS_TOLERANCE * (deviance.abs() + 1.0) {
            log::debug!("IRLS converged after {} iterations", iteration + 1);
            break;
        }
        last_deviance = deviance;
    }

    Ok(LogisticModel {
        intercept: beta[0],
        coefficients: beta.slice(ndarray::s![1..]).to_owned(),
        feature_means: means,
        feature_scales: scales,
    })
}

/// Cholesky solve of a symmetric positive-definite system. Returns `None`
/// when the factorization breaks down.
fn solve_spd(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= 0.0 {
                    return None;
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    // Forward then backward substitution.
    let mut v = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * v[k];
        }
        v[i] = sum / l[[i, i]];
    }
    let mut solution = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = v[i];
        for k in (i + 1)..n {
            sum -= l[[k, i]] * solution[k];
        }
        solution[i] = sum / l[[i, i]];
    }
    Some(solution)
}

// ---------------------------------------------------------------------------
// CART trees and the random forest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    Leaf {
        probability: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// One CART tree stored as a node arena rooted at index 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<TreeNode>,
}

impl Tree {
    fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut index = 0;
        loop {
            match self.nodes[index] {
                TreeNode::Leaf { probability } => return probability,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if row[feature] <= threshold { left } else { right };
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestModel {
    pub trees: Vec<Tree>,
}

impl ForestModel {
    pub fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        let mut probs = Array1::zeros(x.nrows());
        for (i, row) in x.axis_iter(Axis(0)).enumerate() {
            let total: f64 = self.trees.iter().map(|t| t.predict_row(row)).sum();
            probs[i] = total / self.trees.len() as f64;
        }
        probs
    }
}

struct TreeBuilder<'a> {
    x: ArrayView2<'a, f64>,
    y: ArrayView1<'a, f64>,
    mtry: usize,
    max_depth: usize,
    min_leaf: usize,
    nodes: Vec<TreeNode>,
}

impl<'a> TreeBuilder<'a> {
    fn build(&mut self, indices: &mut [usize], depth: usize, rng: &mut StdRng) -> usize {
        let n_pos: usize = indices.iter().filter(|&&i| self.y[i] >= 0.5).count();
        let probability = n_pos as f64 / indices.len() as f64;

        let pure = n_pos == 0 || n_pos == indices.len();
        if depth >= self.max_depth || indices.len() < 2 * self.min_leaf || pure {
            self.nodes.push(TreeNode::Leaf { probability });
            return self.nodes.len() - 1;
        }

        let split = self.best_split(indices, rng);
        let Some((feature, threshold)) = split else {
            self.nodes.push(TreeNode::Leaf { probability });
            return self.nodes.len() - 1;
        };

        // Partition in place around the chosen threshold.
        let mid = itertools::partition(indices.iter_mut(), |&i| {
            self.x[[i, feature]] <= threshold
        });
        if mid == 0 || mid == indices.len() {
            self.nodes.push(TreeNode::Leaf { probability });
            return self.nodes.len() - 1;
        }

        // Reserve the split slot before recursing so child indices are stable.
        let node_index = self.nodes.len();
        self.nodes.push(TreeNode::Leaf { probability });
        let (left_slice, right_slice) = indices.split_at_mut(mid);
        let left = self.build(left_slice, depth + 1, rng);
        let right = self.build(right_slice, depth + 1, rng);
        self.nodes[node_index] = TreeNode::Split {
            feature,
            threshold,
            left,
            right,
        };
        node_index
    }

    /// Best (feature, threshold) by Gini gain over a random feature subset.
    fn best_split(&self, indices: &[usize], rng: &mut StdRng) -> Option<(usize, f64)> {
        let n_features = self.x.ncols();
        let mut features: Vec<usize> = (0..n_features).collect();
        features.shuffle(rng);
        features.truncate(self.mtry.max(1));

        let total = indices.len() as f64;
        let total_pos = indices.iter().filter(|&&i| self.y[i] >= 0.5).count() as f64;

        let mut best: Option<(usize, f64, f64)> = None; // (feature, threshold, impurity)
        for &feature in &features {
            let mut sorted: Vec<usize> = indices.to_vec();
            sorted.sort_by(|&a, &b| {
                self.x[[a, feature]]
                    .partial_cmp(&self.x[[b, feature]])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            let mut left_n = 0.0;
            let mut left_pos = 0.0;
            for window in 0..sorted.len() - 1 {
                let i = sorted[window];
                left_n += 1.0;
                if self.y[i] >= 0.5 {
                    left_pos += 1.0;
                }
                let value = self.x[[i, feature]];
                let next_value = self.x[[sorted[window + 1], feature]];
                if next_value <= value {
                    continue; // no boundary between equal values
                }
                if (left_n as usize) < self.min_leaf
                    || (indices.len() - left_n as usize) < self.min_leaf
                {
                    continue;
                }
                let right_n = total - left_n;
                let right_pos = total_pos - left_pos;
                let gini = |pos: f64, n: f64| {
                    if n == 0.0 {
                        0.0
                    } else {
                        let p = pos / n;
                        2.0 * p * (1.0 - p)
                    }
                };
                let impurity =
                    (left_n * gini(left_pos, left_n) + right_n * gini(right_pos, right_n)) / total;
                let threshold = 0.5 * (value + next_value);
                let better = match best {
                    None => true,
                    Some((_, _, best_impurity)) => impurity < best_impurity,
                };
                if better {
                    best = Some((feature, threshold, impurity));
                }
            }
        }
        best.map(|(feature, threshold, _)| (feature, threshold))
    }
}

fn fit_forest(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>, seed: u64) -> ForestModel {
    let n = x.nrows();
    let mtry = (x.ncols() as f64).sqrt().round().max(1.0) as usize;
    let mut rng = StdRng::seed_from_u64(seed);

    let mut trees = Vec::with_capacity(FOREST_TREES);
    for _ in 0..FOREST_TREES {
        // Bootstrap sample of row indices.
        let mut indices: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
        // Reborrow so both views share one lifetime inside the builder.
        let mut builder = TreeBuilder {
            x: x.view(),
            y: y.view(),
            mtry,
            max_depth: FOREST_MAX_DEPTH,
            min_leaf: FOREST_MIN_LEAF,
            nodes: Vec::new(),
        };
        builder.build(&mut indices, 0, &mut rng);
        trees.push(Tree {
            nodes: builder.nodes,
        });
    }
    ForestModel { trees }
}

// ---------------------------------------------------------------------------
// Gradient boosting over stumps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stump {
    pub feature: usize,
    pub threshold: f64,
    pub left_value: f64,
    pub right_value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostedModel {
    pub base_score: f64,
    pub learning_rate: f64,
    pub stumps: Vec<Stump>,
}

impl BoostedModel {
    pub fn predict_proba(&self, x: ArrayView2<'_, f64>) -> Array1<f64> {
        let mut probs = Array1::zeros(x.nrows());
        for (i, row) in x.axis_iter(Axis(0)).enumerate() {
            let mut score = self.base_score;
            for stump in &self.stumps {
                let value = if row[stump.feature] <= stump.threshold {
                    stump.left_value
                } else {
                    stump.right_value
                };
                score += self.learning_rate * value;
            }
            probs[i] = sigmoid(score);
        }
        probs
    }
}

fn fit_boosted(x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>) -> BoostedModel {
    let n = x.nrows();
    let prevalence = (y.sum() / n as f64).clamp(PROB_CLAMP, 1.0 - PROB_CLAMP);
    let base_score = (prevalence / (1.0 - prevalence)).ln();

    // Pre-sort each feature once; every round reuses the order.
    let sorted_by_feature: Vec<Vec<usize>> = (0..x.ncols())
        .map(|j| {
            let mut order: Vec<usize> = (0..n).collect();
            order.sort_by(|&a, &b| {
                x[[a, j]]
                    .partial_cmp(&x[[b, j]])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            order
        })
        .collect();

    let mut scores = Array1::from_elem(n, base_score);
    let mut stumps = Vec::with_capacity(BOOST_ROUNDS);

    for _ in 0..BOOST_ROUNDS {
        let probs = scores.mapv(|s| sigmoid(s).clamp(PROB_CLAMP, 1.0 - PROB_CLAMP));
        let gradients: Array1<f64> = &y.to_owned() - &probs;
        let hessians: Array1<f64> = probs.mapv(|p| p * (1.0 - p));
        let total_grad: f64 = gradients.sum();
        let total_hess: f64 = hessians.sum();

        // Newton gain for each boundary between distinct feature values.
        let mut best: Option<(usize, f64, f64)> = None; // (feature, threshold, gain)
        for (feature, order) in sorted_by_feature.iter().enumerate() {
            let mut left_grad = 0.0;
            let mut left_hess = 0.0;
            for window in 0..n - 1 {
                let i = order[window];
                left_grad += gradients[i];
                left_hess += hessians[i];
                let value = x[[i, feature]];
                let next_value = x[[order[window + 1], feature]];
                if next_value <= value {
                    continue;
                }
                let right_grad = total_grad - left_grad;
                let right_hess = total_hess - left_hess;
                let gain = left_grad * left_grad / (left_hess + BOOST_LAMBDA)
                    + right_grad * right_grad / (right_hess + BOOST_LAMBDA)
                    - total_grad * total_grad / (total_hess + BOOST_LAMBDA);
                let threshold = 0.5 * (value + next_value);
                let better = match best {
                    None => gain > 0.0,
                    Some((_, _, best_gain)) => gain > best_gain,
                };
                if better {
                    best = Some((feature, threshold, gain));
                }
            }
        }
        let Some((feature, threshold, _)) = best else {
            break; // no informative split left
        };

        let mut left_grad = 0.0;
        let mut left_hess = 0.0;
        let mut right_grad = 0.0;
        let mut right_hess = 0.0;
        for i in 0..n {
            if x[[i, feature]] <= threshold {
                left_grad += gradients[i];
                left_hess += hessians[i];
            } else {
                right_grad += gradients[i];
                right_hess += hessians[i];
            }
        }
        let stump = Stump {
            feature,
            threshold,
            left_value: left_grad / (left_hess + BOOST_LAMBDA),
            right_value: right_grad / (right_hess + BOOST_LAMBDA),
        };
        for i in 0..n {
            let value = if x[[i, feature]] <= stump.threshold {
                stump.left_value
            } else {
                stump.right_value
            };
            scores[i] += BOOST_LEARNING_RATE * value;
        }
        stumps.push(stump);
    }

    BoostedModel {
        base_score,
        learning_rate: BOOST_LEARNING_RATE,
        stumps,
    }
}

// ---------------------------------------------------------------------------
// Stratified k-fold cross-validation
// ---------------------------------------------------------------------------

/// Mean cross-validated scores for one candidate model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CvScores {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub roc_auc: f64,
}

/// Stratified fold assignment: each class is shuffled independently and dealt
/// round-robin, so every fold preserves the cohort prevalence as closely as
/// the counts allow.
fn stratified_folds(y: ArrayView1<'_, f64>, folds: usize, seed: u64) -> Vec<Vec<usize>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut positives: Vec<usize> = (0..y.len()).filter(|&i| y[i] >= 0.5).collect();
    let mut negatives: Vec<usize> = (0..y.len()).filter(|&i| y[i] < 0.5).collect();
    positives.shuffle(&mut rng);
    negatives.shuffle(&mut rng);

    let mut assignments = vec![Vec::new(); folds];
    for (offset, &i) in positives.iter().enumerate() {
        assignments[offset % folds].push(i);
    }
    for (offset, &i) in negatives.iter().enumerate() {
        assignments[offset % folds].push(i);
    }
    assignments
}

/// Evaluate one candidate with stratified k-fold cross-validation, returning
/// metric means over folds. Fold evaluation runs in parallel.
pub fn cross_validate(
    x: ArrayView2<'_, f64>,
    y: ArrayView1<'_, f64>,
    kind: ModelKind,
    folds: usize,
    seed: u64,
) -> Result<CvScores, ModelError> {
    check_shapes(x, y)?;
    if folds < 2 {
        return Err(ModelError::TooFewFolds(folds));
    }
    if y.len() < folds {
        return Err(ModelError::TooFewSamples {
            found: y.len(),
            required: folds,
        });
    }

    let assignments = stratified_folds(y, folds, seed);
    let per_fold: Vec<(MetricSnapshot, f64)> = assignments
        .par_iter()
        .enumerate()
        .map(|(fold, test_indices)| -> Result<(MetricSnapshot, f64), ModelError> {
            let test_set: std::collections::HashSet<usize> =
                test_indices.iter().copied().collect();
            let train_indices: Vec<usize> =
                (0..y.len()).filter(|i| !test_set.contains(i)).collect();

            let x_train = x.select(Axis(0), &train_indices);
            let y_train = y.select(Axis(0), &train_indices);
            let x_test = x.select(Axis(0), test_indices);
            let y_test = y.select(Axis(0), test_indices);

            let fitted = kind.fit(x_train.view(), y_train.view(), seed.wrapping_add(fold as u64))?;
            let probs = fitted.predict_proba(x_test.view());
            let snapshot = metrics::evaluate_at_threshold(y_test.view(), probs.view(), 0.5);
            let auc = metrics::roc_auc(y_test.view(), probs.view());
            Ok((snapshot, auc))
        })
        .collect::<Result<Vec<_>, ModelError>>()?;

    let k = per_fold.len() as f64;
    let mut scores = CvScores {
        accuracy: 0.0,
        precision: 0.0,
        recall: 0.0,
        f1: 0.0,
        roc_auc: 0.0,
    };
    for (snapshot, auc) in &per_fold {
        scores.accuracy += snapshot.accuracy / k;
        scores.precision += snapshot.precision / k;
        scores.recall += snapshot.recall / k;
        scores.f1 += snapshot.f1_score / k;
        scores.roc_auc += auc / k;
    }
    Ok(scores)
}
