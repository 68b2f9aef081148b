//! # Cohort Loading and Validation
//!
//! The exclusive entry point for patient data. Reads a CSV cohort, validates
//! it against the canonical feature schema, and produces the `ndarray`
//! structures the optimizers operate on.
//!
//! - Strict schema: column names are not configurable. The canonical feature
//!   list in [`CANONICAL_FEATURES`] doubles as the inference input schema, so
//!   enforcing it here eliminates a class of train/serve skew.
//! - User-centric errors: failures are assumed to be user-input errors and
//!   the `DataError` variants name the offending column and expectation.
//! - Physiological validation: the outcome label must be binary and
//!   measurements that cannot be negative (age, pressures, BMI, cholesterol,
//!   glucose, heart rate) are rejected when they are.

use ndarray::{Array1, Array2, ShapeBuilder};
use polars::prelude::*;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// The canonical, ordered feature schema shared by training, optimization,
/// and inference.
pub const CANONICAL_FEATURES: [&str; 12] = [
    "sex",
    "age",
    "current_smoker",
    "cigarettes_per_day",
    "bp_medication",
    "diabetes",
    "total_cholesterol",
    "systolic_bp",
    "diastolic_bp",
    "bmi",
    "heart_rate",
    "glucose",
];

/// The binary outcome column.
pub const LABEL_COLUMN: &str = "hypertension";

/// Features that are physiologically non-negative.
const NON_NEGATIVE_FEATURES: [&str; 8] = [
    "age",
    "cigarettes_per_day",
    "total_cholesterol",
    "systolic_bp",
    "diastolic_bp",
    "bmi",
    "heart_rate",
    "glucose",
];

/// Features that must be 0/1 flags.
const BINARY_FEATURES: [&str; 4] = ["sex", "current_smoker", "bp_medication", "diabetes"];

const MINIMUM_ROWS: usize = 50;

/// A validated cohort ready for optimization and training.
#[derive(Debug, Clone)]
pub struct CohortData {
    /// Feature matrix, shape `[n_samples, n_features]`, column order matching
    /// `feature_names`.
    pub x: Array2<f64>,
    /// Binary outcome labels as 0.0/1.0.
    pub y: Array1<f64>,
    /// Canonical feature names, in matrix column order.
    pub feature_names: Vec<String>,
}

impl CohortData {
    pub fn n_samples(&self) -> usize {
        self.y.len()
    }

    /// Fraction of positive cases.
    pub fn prevalence(&self) -> f64 {
        if self.y.is_empty() {
            0.0
        } else {
            self.y.sum() / self.y.len() as f64
        }
    }

    /// Column index of a canonical feature, if present.
    pub fn feature_index(&self, name: &str) -> Option<usize> {
        self.feature_names.iter().position(|f| f == name)
    }

    /// One feature column as an owned vector.
    pub fn feature_column(&self, index: usize) -> Array1<f64> {
        self.x.column(index).to_owned()
    }
}

/// Held-out scores for threshold optimization: true labels paired with a
/// model's predicted probabilities.
#[derive(Debug, Clone)]
pub struct ScoredLabels {
    pub y_true: Array1<f64>,
    pub y_prob: Array1<f64>,
}

/// All cohort loading and validation failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input file. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error(
        "The required column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing or null values were found in the required column '{0}'. Impute or drop incomplete rows before optimization."
    )]
    MissingValuesFound(String),
    #[error("Non-finite values (NaN or Infinity) were found in the required column '{0}'.")]
    NonFiniteValuesFound(String),
    #[error("Column '{column}' must be a 0/1 value, but row {row} holds {value}.")]
    NonBinaryValue {
        column: String,
        row: usize,
        value: f64,
    },
    #[error(
        "Column '{column}' is physiologically non-negative, but row {row} holds {value}."
    )]
    NegativeValue {
        column: String,
        row: usize,
        value: f64,
    },
    #[error("Column '{column}' must hold probabilities in [0, 1], but row {row} holds {value}.")]
    ProbabilityOutOfRange {
        column: String,
        row: usize,
        value: f64,
    },
    #[error(
        "Input file contains only {found} data rows, but at least {required} are required for a stable optimization."
    )]
    InsufficientRows { found: usize, required: usize },
}

/// Load and validate a full training cohort (canonical features + label).
pub fn load_cohort(path: &Path) -> Result<CohortData, DataError> {
    let df = read_csv(path)?;
    require_rows(&df)?;

    let columns_present: HashSet<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();
    for name in CANONICAL_FEATURES.iter().chain(std::iter::once(&LABEL_COLUMN)) {
        if !columns_present.contains(*name) {
            return Err(DataError::ColumnNotFound(name.to_string()));
        }
    }

    let y_vec = extract_numeric_column(&df, LABEL_COLUMN)?;
    validate_binary(LABEL_COLUMN, &y_vec)?;

    let n = y_vec.len();
    let mut buffer = Vec::with_capacity(n * CANONICAL_FEATURES.len());
    for name in CANONICAL_FEATURES {
        let column = extract_numeric_column(&df, name)?;
        if BINARY_FEATURES.contains(&name) {
            validate_binary(name, &column)?;
        }
        if NON_NEGATIVE_FEATURES.contains(&name) {
            validate_non_negative(name, &column)?;
        }
        buffer.extend_from_slice(&column);
    }
    let x = Array2::from_shape_vec((n, CANONICAL_FEATURES.len()).f(), buffer)
        .expect("feature columns share the label's length");

    log::info!(
        "Loaded cohort: {} samples, {} features, prevalence {:.3}",
        n,
        CANONICAL_FEATURES.len(),
        y_vec.iter().sum::<f64>() / n as f64
    );

    Ok(CohortData {
        x,
        y: Array1::from_vec(y_vec),
        feature_names: CANONICAL_FEATURES.iter().map(|s| s.to_string()).collect(),
    })
}

/// Load held-out (label, probability) pairs for threshold optimization.
/// Expects a `hypertension` label column and a `probability` column.
pub fn load_scored_labels(path: &Path) -> Result<ScoredLabels, DataError> {
    let df = read_csv(path)?;

    let columns_present: HashSet<String> = df
        .get_column_names()
        .into_iter()
        .map(|s| s.to_string())
        .collect();
    for name in [LABEL_COLUMN, "probability"] {
        if !columns_present.contains(name) {
            return Err(DataError::ColumnNotFound(name.to_string()));
        }
    }

    let y_vec = extract_numeric_column(&df, LABEL_COLUMN)?;
    validate_binary(LABEL_COLUMN, &y_vec)?;

    let prob_vec = extract_numeric_column(&df, "probability")?;
    for (row, &value) in prob_vec.iter().enumerate() {
        if !(0.0..=1.0).contains(&value) {
            return Err(DataError::ProbabilityOutOfRange {
                column: "probability".to_string(),
                row: row + 1,
                value,
            });
        }
    }

    Ok(ScoredLabels {
        y_true: Array1::from_vec(y_vec),
        y_prob: Array1::from_vec(prob_vec),
    })
}

fn read_csv(path: &Path) -> Result<DataFrame, DataError> {
    log::info!("Loading data from '{}'", path.display());
    let df = CsvReader::new(File::open(path)?)
        .with_options(CsvReadOptions::default().with_has_header(true))
        .finish()?;
    Ok(df)
}

fn require_rows(df: &DataFrame) -> Result<(), DataError> {
    if df.height() < MINIMUM_ROWS {
        return Err(DataError::InsufficientRows {
            found: df.height(),
            required: MINIMUM_ROWS,
        });
    }
    Ok(())
}

fn extract_numeric_column(df: &DataFrame, column_name: &str) -> Result<Vec<f64>, DataError> {
    let series = df.column(column_name)?;
    if series.null_count() > 0 {
        return Err(DataError::MissingValuesFound(column_name.to_string()));
    }

    let casted = match series.cast(&DataType::Float64) {
        Ok(casted) => casted,
        Err(_) => {
            return Err(DataError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type: "f64 (numeric)",
                found_type: format!("{:?}", series.dtype()),
            });
        }
    };
    if casted.null_count() > 0 {
        return Err(DataError::ColumnWrongType {
            column_name: column_name.to_string(),
            expected_type: "f64 (numeric)",
            found_type: format!("{:?}", series.dtype()),
        });
    }

    let chunked = casted.f64()?.rechunk();
    let values: Vec<f64> = chunked.into_no_null_iter().collect();
    if values.iter().any(|v| !v.is_finite()) {
        return Err(DataError::NonFiniteValuesFound(column_name.to_string()));
    }
    Ok(values)
}

fn validate_binary(column: &str, values: &[f64]) -> Result<(), DataError> {
    for (row, &value) in values.iter().enumerate() {
        if value != 0.0 && value != 1.0 {
            return Err(DataError::NonBinaryValue {
                column: column.to_string(),
                row: row + 1,
                value,
            });
        }
    }
    Ok(())
}

fn validate_non_negative(column: &str, values: &[f64]) -> Result<(), DataError> {
    for (row, &value) in values.iter().enumerate() {
        if value < 0.0 {
            return Err(DataError::NegativeValue {
                column: column.to_string(),
                row: row + 1,
                value,
            });
        }
    }
    Ok(())
}
