//! # Clinical Scenario Definitions
//!
//! One validated schema for every clinical use case the optimizers serve.
//! A [`Scenario`] couples a named use case (screening, diagnosis, ...) with
//! its priority mode, the hard metric constraints threshold selection must
//! honor, and - for proportion optimization - a target prevalence plus a
//! weighted scoring rule over recall/precision/F1.
//!
//! Scenario tables are declared exactly once: either the built-in defaults
//! below or a user-provided TOML file, validated on load. Score weights are
//! normalized to sum to 1.0 so the weighted score is always a convex
//! combination of its inputs.

use crate::metrics::MetricSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("Failed to read scenario file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse scenario TOML: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Scenario '{scenario}': {field} = {value} is outside [0, 1].")]
    OutOfRange {
        scenario: String,
        field: &'static str,
        value: f64,
    },
    #[error("Scenario '{scenario}': target prevalence {value} must lie strictly inside (0, 1).")]
    InvalidPrevalence { scenario: String, value: f64 },
    #[error("Scenario '{scenario}': score weights must be non-negative.")]
    NegativeWeight { scenario: String },
    #[error("Scenario '{scenario}': score weights are all zero and cannot be normalized.")]
    ZeroWeights { scenario: String },
    #[error("Duplicate scenario name '{0}'.")]
    DuplicateName(String),
    #[error("Scenario file defines no scenarios.")]
    Empty,
}

/// The clinical objective a scenario optimizes for, together with its hard
/// constraints. Serialized with an internal `priority` tag so a TOML scenario
/// reads as `priority = "high_sensitivity"` plus the matching fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "priority", rename_all = "snake_case")]
pub enum Criteria {
    /// Minimize false negatives: demand sensitivity, keep specificity viable.
    HighSensitivity {
        target_sensitivity: f64,
        min_specificity: f64,
    },
    /// Minimize false positives: demand specificity, keep sensitivity viable.
    HighSpecificity {
        target_specificity: f64,
        min_sensitivity: f64,
    },
    /// Balanced operation: optimize F1 subject to an accuracy floor.
    Balanced { target_f1: f64, min_accuracy: f64 },
}

impl Criteria {
    /// Whether a metric snapshot satisfies this scenario's hard constraints.
    pub fn is_satisfied_by(&self, snap: &MetricSnapshot) -> bool {
        match *self {
            Criteria::HighSensitivity {
                target_sensitivity,
                min_specificity,
            } => snap.sensitivity >= target_sensitivity && snap.specificity >= min_specificity,
            Criteria::HighSpecificity {
                target_specificity,
                min_sensitivity,
            } => snap.specificity >= target_specificity && snap.sensitivity >= min_sensitivity,
            Criteria::Balanced {
                target_f1,
                min_accuracy,
            } => snap.f1_score >= target_f1 && snap.accuracy >= min_accuracy,
        }
    }

    /// Whether a snapshot survives the hard candidate filter during
    /// threshold selection. For balanced operation only the accuracy floor
    /// is hard; the F1 target is an aspiration, reported through
    /// [`Criteria::is_satisfied_by`] after selection.
    pub fn meets_floor(&self, snap: &MetricSnapshot) -> bool {
        match *self {
            Criteria::Balanced { min_accuracy, .. } => snap.accuracy >= min_accuracy,
            _ => self.is_satisfied_by(snap),
        }
    }

    fn bounds(&self) -> [(&'static str, f64); 2] {
        match *self {
            Criteria::HighSensitivity {
                target_sensitivity,
                min_specificity,
            } => [
                ("target_sensitivity", target_sensitivity),
                ("min_specificity", min_specificity),
            ],
            Criteria::HighSpecificity {
                target_specificity,
                min_sensitivity,
            } => [
                ("target_specificity", target_specificity),
                ("min_sensitivity", min_sensitivity),
            ],
            Criteria::Balanced {
                target_f1,
                min_accuracy,
            } => [("target_f1", target_f1), ("min_accuracy", min_accuracy)],
        }
    }
}

/// Normalized weights over {recall, precision, f1}. Always sums to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub recall: f64,
    pub precision: f64,
    pub f1: f64,
}

impl ScoreWeights {
    /// Validate and normalize raw weights so they sum to 1.0.
    pub fn normalized(
        scenario: &str,
        recall: f64,
        precision: f64,
        f1: f64,
    ) -> Result<Self, ScenarioError> {
        if recall < 0.0 || precision < 0.0 || f1 < 0.0 {
            return Err(ScenarioError::NegativeWeight {
                scenario: scenario.to_string(),
            });
        }
        let total = recall + precision + f1;
        if total <= 0.0 {
            return Err(ScenarioError::ZeroWeights {
                scenario: scenario.to_string(),
            });
        }
        Ok(Self {
            recall: recall / total,
            precision: precision / total,
            f1: f1 / total,
        })
    }

    /// The scenario-weighted score. With normalized weights this is a convex
    /// combination, bounded by min and max of the three inputs.
    pub fn score(&self, recall: f64, precision: f64, f1: f64) -> f64 {
        self.recall * recall + self.precision * precision + self.f1 * f1
    }
}

/// A named clinical use case: constraints for threshold selection and,
/// optionally, a prevalence target plus scoring weights for proportion
/// optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    pub description: String,
    #[serde(flatten)]
    pub criteria: Criteria,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_prevalence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<ScoreWeights>,
}

impl Scenario {
    /// Range-check constraints and prevalence, and re-normalize weights.
    pub fn validate(mut self) -> Result<Self, ScenarioError> {
        for (field, value) in self.criteria.bounds() {
            if !(0.0..=1.0).contains(&value) {
                return Err(ScenarioError::OutOfRange {
                    scenario: self.name.clone(),
                    field,
                    value,
                });
            }
        }
        if let Some(p) = self.target_prevalence
            && !(p > 0.0 && p < 1.0)
        {
            return Err(ScenarioError::InvalidPrevalence {
                scenario: self.name.clone(),
                value: p,
            });
        }
        if let Some(w) = self.weights {
            self.weights = Some(ScoreWeights::normalized(
                &self.name, w.recall, w.precision, w.f1,
            )?);
        }
        Ok(self)
    }
}

#[derive(Deserialize)]
struct ScenarioFile {
    #[serde(rename = "scenario")]
    scenarios: Vec<Scenario>,
}

/// Load scenarios from a TOML file of `[[scenario]]` tables, validating each.
pub fn load_scenarios(path: &Path) -> Result<Vec<Scenario>, ScenarioError> {
    let text = std::fs::read_to_string(path)?;
    let file: ScenarioFile = toml::from_str(&text)?;
    if file.scenarios.is_empty() {
        return Err(ScenarioError::Empty);
    }
    let mut seen = HashSet::new();
    let mut validated = Vec::with_capacity(file.scenarios.len());
    for scenario in file.scenarios {
        if !seen.insert(scenario.name.clone()) {
            return Err(ScenarioError::DuplicateName(scenario.name));
        }
        validated.push(scenario.validate()?);
    }
    Ok(validated)
}

/// Built-in scenarios for threshold optimization: triage, balanced diagnosis,
/// and diagnostic confirmation.
pub fn default_threshold_scenarios() -> Vec<Scenario> {
    vec![
        Scenario {
            name: "screening".to_string(),
            description: "Initial triage - minimize false negatives".to_string(),
            criteria: Criteria::HighSensitivity {
                target_sensitivity: 0.90,
                min_specificity: 0.70,
            },
            target_prevalence: None,
            weights: None,
        },
        Scenario {
            name: "diagnosis".to_string(),
            description: "Balanced diagnosis - optimize F1".to_string(),
            criteria: Criteria::Balanced {
                target_f1: 0.80,
                min_accuracy: 0.75,
            },
            target_prevalence: None,
            weights: None,
        },
        Scenario {
            name: "confirmation".to_string(),
            description: "Diagnostic confirmation - minimize false positives".to_string(),
            criteria: Criteria::HighSpecificity {
                target_specificity: 0.95,
                min_sensitivity: 0.60,
            },
            target_prevalence: None,
            weights: None,
        },
    ]
}

/// Built-in scenarios for proportion optimization. Weights are stored
/// normalized; the raw tables already sum to 1.0.
pub fn default_proportion_scenarios() -> Vec<Scenario> {
    vec![
        Scenario {
            name: "screening".to_string(),
            description: "Screening population - low expected prevalence".to_string(),
            criteria: Criteria::HighSensitivity {
                target_sensitivity: 0.90,
                min_specificity: 0.70,
            },
            target_prevalence: Some(0.05),
            weights: Some(ScoreWeights {
                recall: 0.6,
                precision: 0.2,
                f1: 0.2,
            }),
        },
        Scenario {
            name: "general_population".to_string(),
            description: "General population - natural prevalence".to_string(),
            criteria: Criteria::Balanced {
                target_f1: 0.80,
                min_accuracy: 0.75,
            },
            target_prevalence: Some(0.31),
            weights: Some(ScoreWeights {
                recall: 0.4,
                precision: 0.4,
                f1: 0.2,
            }),
        },
        Scenario {
            name: "high_risk_cohort".to_string(),
            description: "High-risk cohort - elevated prevalence".to_string(),
            criteria: Criteria::HighSpecificity {
                target_specificity: 0.95,
                min_sensitivity: 0.60,
            },
            target_prevalence: Some(0.60),
            weights: Some(ScoreWeights {
                recall: 0.2,
                precision: 0.6,
                f1: 0.2,
            }),
        },
    ]
}
