//! # Inference Wrapper
//!
//! A thin, stateless serving contract over a persisted [`ArtifactBundle`]:
//! load once at startup, then map each request's partial feature set through
//! the trained estimator and the named threshold profile.
//!
//! Missing request features are a recoverable degradation: they are imputed
//! from the training-cohort means stored in the model artifact and echoed
//! back in `missing_features`. A request missing every feature carries no
//! signal at all and is rejected as a client error. Artifact-loading failure
//! is fatal: a process without a model must not serve predictions.

use crate::artifact::{ArtifactBundle, ArtifactError};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Fallback when the requested threshold profile is not persisted.
const DEFAULT_THRESHOLD: f64 = 0.5;
const DEFAULT_PROFILE: &str = "default";

/// Profile pair that defines the low/high risk cuts.
const LOW_CUT_PROFILE: &str = "screening";
const HIGH_CUT_PROFILE: &str = "confirmation";

#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("No features provided: every field of the request is missing.")]
    NoFeaturesProvided,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskCategory {
    Low,
    Medium,
    High,
}

/// One prediction, shaped for JSON serialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub probability: f64,
    pub threshold: f64,
    pub prediction: u8,
    pub threshold_profile: String,
    pub risk_category: RiskCategory,
    pub missing_features: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

/// Immutable serving state: one loaded bundle for the process lifetime.
#[derive(Debug, Clone)]
pub struct InferenceEngine {
    bundle: ArtifactBundle,
}

impl InferenceEngine {
    /// Load all artifacts from `dir`. Failure here should abort startup.
    pub fn load(dir: &Path) -> Result<Self, ArtifactError> {
        let bundle = ArtifactBundle::load(dir)?;
        log::info!(
            "Inference engine ready: {} features, thresholds {}",
            bundle.features.len(),
            if bundle.thresholds.is_some() {
                "loaded"
            } else {
                "absent (default 0.5)"
            }
        );
        Ok(Self { bundle })
    }

    pub fn feature_count(&self) -> usize {
        self.bundle.features.len()
    }

    pub fn model_name(&self) -> Option<&str> {
        self.bundle
            .metadata
            .as_ref()
            .and_then(|m| m.model.as_deref())
    }

    /// Score one request. `features` maps canonical feature names to values;
    /// absent keys and explicit nulls both count as missing.
    pub fn predict(
        &self,
        features: &HashMap<String, Option<f64>>,
        profile: &str,
    ) -> Result<PredictionResponse, InferenceError> {
        let names = &self.bundle.model.feature_names;
        let mut row = Array2::zeros((1, names.len()));
        let mut missing_features = Vec::new();
        for (j, name) in names.iter().enumerate() {
            match features.get(name).copied().flatten() {
                Some(value) => row[[0, j]] = value,
                None => {
                    row[[0, j]] = self.bundle.model.imputation_means[j];
                    missing_features.push(name.clone());
                }
            }
        }
        if missing_features.len() == names.len() {
            return Err(InferenceError::NoFeaturesProvided);
        }

        let probability = self.bundle.model.estimator.predict_proba(row.view())[0];

        let (threshold, threshold_profile) = match self
            .bundle
            .thresholds
            .as_ref()
            .and_then(|t| t.get(profile))
        {
            Some(entry) => (entry.threshold, profile.to_string()),
            None => (DEFAULT_THRESHOLD, DEFAULT_PROFILE.to_string()),
        };

        let prediction = u8::from(probability >= threshold);
        let risk_category = self.risk_category(probability);

        let (model, model_version) = match &self.bundle.metadata {
            Some(metadata) => (metadata.model.clone(), metadata.model_version.clone()),
            None => (None, None),
        };

        Ok(PredictionResponse {
            probability,
            threshold,
            prediction,
            threshold_profile,
            risk_category,
            missing_features,
            model,
            model_version,
        })
    }

    /// Three-level risk bucket from the screening/confirmation threshold
    /// pair. Without both cut points every probability is medium risk.
    fn risk_category(&self, probability: f64) -> RiskCategory {
        let Some(thresholds) = &self.bundle.thresholds else {
            return RiskCategory::Medium;
        };
        let (Some(low_cut), Some(high_cut)) = (
            thresholds.get(LOW_CUT_PROFILE),
            thresholds.get(HIGH_CUT_PROFILE),
        ) else {
            return RiskCategory::Medium;
        };
        if probability < low_cut.threshold {
            RiskCategory::Low
        } else if probability >= high_cut.threshold {
            RiskCategory::High
        } else {
            RiskCategory::Medium
        }
    }
}
