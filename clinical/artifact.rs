//! # Persisted Artifact Bundle
//!
//! The on-disk contract between an offline optimization/training run and the
//! inference wrapper. A bundle directory contains:
//!
//! - `model.toml` - the trained estimator, its ordered feature list, and the
//!   per-feature imputation means (human-readable TOML).
//! - `features.json` - the ordered feature-name list, the required input
//!   schema for inference.
//! - `thresholds.json` (optional) - scenario name to `{threshold}` mapping.
//! - `metadata.json` (optional) - model name/version identity.
//!
//! Artifacts are produced once by a non-concurrent run and read immutably at
//! serving startup; there is no in-place mutation.

use crate::models::TrainedEstimator;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MODEL_FILE: &str = "model.toml";
pub const FEATURES_FILE: &str = "features.json";
pub const THRESHOLDS_FILE: &str = "thresholds.json";
pub const METADATA_FILE: &str = "metadata.json";

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Failed to read or write artifact file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Failed to read or write JSON artifact: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Required artifact file not found: {0}")]
    FileMissing(PathBuf),
    #[error(
        "Model artifact lists {model_features} features but features.json lists {schema_features}."
    )]
    FeatureCountMismatch {
        model_features: usize,
        schema_features: usize,
    },
}

/// The self-contained trained model artifact persisted as `model.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub estimator: TrainedEstimator,
    /// Canonical input order for the estimator's feature matrix.
    pub feature_names: Vec<String>,
    /// Training-cohort column means, used to impute missing request features.
    pub imputation_means: Vec<f64>,
}

/// One scenario's persisted decision threshold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ThresholdEntry {
    pub threshold: f64,
}

/// Optional model identity carried in `metadata.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct FeaturesFile {
    features: Vec<String>,
}

/// Everything a serving process loads at startup.
#[derive(Debug, Clone)]
pub struct ArtifactBundle {
    pub model: ModelArtifact,
    pub features: Vec<String>,
    pub thresholds: Option<BTreeMap<String, ThresholdEntry>>,
    pub metadata: Option<ArtifactMetadata>,
}

impl ArtifactBundle {
    /// Persist the bundle into `dir`, creating it if needed.
    pub fn save(&self, dir: &Path) -> Result<(), ArtifactError> {
        fs::create_dir_all(dir)?;

        let model_toml = toml::to_string_pretty(&self.model)?;
        write_atomic(&dir.join(MODEL_FILE), model_toml.as_bytes())?;

        let features_json = serde_json::to_vec_pretty(&FeaturesFile {
            features: self.features.clone(),
        })?;
        write_atomic(&dir.join(FEATURES_FILE), &features_json)?;

        if let Some(thresholds) = &self.thresholds {
            let json = serde_json::to_vec_pretty(thresholds)?;
            write_atomic(&dir.join(THRESHOLDS_FILE), &json)?;
        }
        if let Some(metadata) = &self.metadata {
            let json = serde_json::to_vec_pretty(metadata)?;
            write_atomic(&dir.join(METADATA_FILE), &json)?;
        }

        log::info!("Artifact bundle saved to '{}'", dir.display());
        Ok(())
    }

    /// Load a bundle from `dir`. The model and feature files are required;
    /// thresholds and metadata are optional.
    pub fn load(dir: &Path) -> Result<Self, ArtifactError> {
        let model_path = dir.join(MODEL_FILE);
        if !model_path.exists() {
            return Err(ArtifactError::FileMissing(model_path));
        }
        let features_path = dir.join(FEATURES_FILE);
        if !features_path.exists() {
            return Err(ArtifactError::FileMissing(features_path));
        }

        let model: ModelArtifact = toml::from_str(&fs::read_to_string(&model_path)?)?;
        let features_file: FeaturesFile =
            serde_json::from_str(&fs::read_to_string(&features_path)?)?;

        if model.feature_names.len() != features_file.features.len() {
            return Err(ArtifactError::FeatureCountMismatch {
                model_features: model.feature_names.len(),
                schema_features: features_file.features.len(),
            });
        }

        let thresholds_path = dir.join(THRESHOLDS_FILE);
        let thresholds = if thresholds_path.exists() {
            Some(serde_json::from_str(&fs::read_to_string(
                &thresholds_path,
            )?)?)
        } else {
            None
        };

        let metadata_path = dir.join(METADATA_FILE);
        let metadata = if metadata_path.exists() {
            Some(serde_json::from_str(&fs::read_to_string(&metadata_path)?)?)
        } else {
            None
        };

        Ok(ArtifactBundle {
            model,
            features: features_file.features,
            thresholds,
            metadata,
        })
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
    let mut writer = BufWriter::new(fs::File::create(path)?);
    writer.write_all(bytes)?;
    writer.flush()?;
    Ok(())
}
