// ========================================================================================
//
//                         THE CLINICAL ORCHESTRATOR: TENSIO
//
// ========================================================================================
//
// This binary is the conductor of the optimization engine. It owns argument
// parsing, file I/O at the edges, and the lifecycle of each run; the library
// modules stay pure and testable. Each subcommand is one complete pipeline:
// load input, run the optimizer or validator, persist the reports/artifacts.

use clap::{Parser, Subcommand};
use ndarray::Axis;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Instant;
use tensio::artifact::{
    ArtifactBundle, ArtifactMetadata, ModelArtifact, THRESHOLDS_FILE, ThresholdEntry,
};
use tensio::data;
use tensio::infer::InferenceEngine;
use tensio::models::{DEFAULT_SEED, ModelKind};
use tensio::proportion;
use tensio::report;
use tensio::scenario::{self, Scenario};
use tensio::threshold;
use tensio::validate;

/// Stratified cross-validation folds used by the proportion optimizer.
const CV_FOLDS: usize = 5;

// ========================================================================================
//                         COMMAND-LINE INTERFACE DEFINITION
// ========================================================================================

#[derive(Parser, Debug)]
#[clap(
    name = "tensio",
    version,
    about = "An optimization and validation engine for hypertension risk models."
)]
struct Args {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Select per-scenario decision thresholds from held-out scored labels.
    Thresholds {
        /// CSV with `hypertension` and `probability` columns.
        input: PathBuf,

        /// Optional TOML file of custom scenarios; defaults are built in.
        #[clap(long)]
        scenarios: Option<PathBuf>,

        /// Directory for the JSON/CSV reports.
        #[clap(long, default_value = "results")]
        out_dir: PathBuf,

        /// Also write `thresholds.json` into this artifact directory.
        #[clap(long)]
        artifact_dir: Option<PathBuf>,
    },

    /// Find the best training prevalence and model per deployment scenario.
    Proportions {
        /// Cohort CSV with the canonical feature columns and `hypertension`.
        input: PathBuf,

        /// Optional TOML file of custom scenarios; defaults are built in.
        #[clap(long)]
        scenarios: Option<PathBuf>,

        /// Directory for the JSON/CSV reports.
        #[clap(long, default_value = "results")]
        out_dir: PathBuf,

        /// Train the winning configuration and persist the model bundle here.
        #[clap(long)]
        artifact_dir: Option<PathBuf>,

        /// Seed for resampling, fold assignment, and tree training.
        #[clap(long, default_value_t = DEFAULT_SEED)]
        seed: u64,
    },

    /// Check a trained model's behavior against established medical knowledge.
    Validate {
        /// Cohort CSV with the canonical feature columns and `hypertension`.
        input: PathBuf,

        /// Directory holding the persisted model bundle.
        #[clap(long)]
        artifact_dir: PathBuf,

        /// Directory for the validation report.
        #[clap(long, default_value = "results")]
        out_dir: PathBuf,
    },

    /// Score one patient request through a persisted model bundle.
    Predict {
        /// JSON object mapping feature names to values (null allowed).
        input: PathBuf,

        /// Directory holding the persisted model bundle.
        #[clap(long)]
        artifact_dir: PathBuf,

        /// Threshold profile to decide with.
        #[clap(long, default_value = "balanced")]
        profile: String,
    },
}

// ========================================================================================
//                           THE MAIN ORCHESTRATION LOGIC
// ========================================================================================

fn main() {
    env_logger::init();
    let start_time = Instant::now();
    let args = Args::parse();

    let result = match args.command {
        Command::Thresholds {
            input,
            scenarios,
            out_dir,
            artifact_dir,
        } => run_thresholds(&input, scenarios.as_deref(), &out_dir, artifact_dir.as_deref()),
        Command::Proportions {
            input,
            scenarios,
            out_dir,
            artifact_dir,
            seed,
        } => run_proportions(
            &input,
            scenarios.as_deref(),
            &out_dir,
            artifact_dir.as_deref(),
            seed,
        ),
        Command::Validate {
            input,
            artifact_dir,
            out_dir,
        } => run_validate(&input, &artifact_dir, &out_dir),
        Command::Predict {
            input,
            artifact_dir,
            profile,
        } => run_predict(&input, &artifact_dir, &profile),
    };

    if let Err(e) = result {
        eprintln!("Fatal error: {e}");
        process::exit(1);
    }
    eprintln!(
        "\nSuccess! Total execution time: {:.2?}",
        start_time.elapsed()
    );
}

// ========================================================================================
//                                SUBCOMMAND PIPELINES
// ========================================================================================

fn load_scenarios_or(
    path: Option<&Path>,
    defaults: fn() -> Vec<Scenario>,
) -> Result<Vec<Scenario>, Box<dyn Error>> {
    match path {
        Some(path) => {
            eprintln!("> Loading scenarios from {}", path.display());
            Ok(scenario::load_scenarios(path)?)
        }
        None => Ok(defaults()),
    }
}

fn run_thresholds(
    input: &Path,
    scenarios: Option<&Path>,
    out_dir: &Path,
    artifact_dir: Option<&Path>,
) -> Result<(), Box<dyn Error>> {
    let scored = data::load_scored_labels(input)?;
    eprintln!(
        "> Loaded {} scored samples from {}",
        scored.y_true.len(),
        input.display()
    );

    let scenarios = load_scenarios_or(scenarios, scenario::default_threshold_scenarios)?;
    let results = threshold::optimize_thresholds(
        scored.y_true.view(),
        scored.y_prob.view(),
        &scenarios,
    );

    for selection in &results.selections {
        eprintln!(
            "> Scenario '{}': threshold {:.2} (sensitivity {:.3}, specificity {:.3}, criteria {})",
            selection.scenario,
            selection.metrics.threshold,
            selection.metrics.sensitivity,
            selection.metrics.specificity,
            if selection.meets_criteria { "met" } else { "NOT met" }
        );
    }

    report::save_threshold_results(out_dir, &results)?;
    eprintln!("> Reports written to {}", out_dir.display());

    if let Some(dir) = artifact_dir {
        let thresholds: std::collections::BTreeMap<String, ThresholdEntry> = results
            .selections
            .iter()
            .map(|s| {
                (
                    s.scenario.clone(),
                    ThresholdEntry {
                        threshold: s.metrics.threshold,
                    },
                )
            })
            .collect();
        fs::create_dir_all(dir)?;
        let path = dir.join(THRESHOLDS_FILE);
        fs::write(&path, serde_json::to_vec_pretty(&thresholds)?)?;
        eprintln!("> Thresholds written to {}", path.display());
    }
    Ok(())
}

fn run_proportions(
    input: &Path,
    scenarios: Option<&Path>,
    out_dir: &Path,
    artifact_dir: Option<&Path>,
    seed: u64,
) -> Result<(), Box<dyn Error>> {
    let cohort = data::load_cohort(input)?;
    eprintln!(
        "> Loaded {} samples ({} features, prevalence {:.3}) from {}",
        cohort.n_samples(),
        cohort.feature_names.len(),
        cohort.prevalence(),
        input.display()
    );

    let scenarios = load_scenarios_or(scenarios, scenario::default_proportion_scenarios)?;
    let results = proportion::optimize_proportions(&cohort, &scenarios, CV_FOLDS, seed)?;

    for best in &results.best_configurations {
        eprintln!(
            "> Scenario '{}': proportion {:.3} with {} (weighted score {:.3})",
            best.scenario, best.optimal_proportion, best.best_model, best.weighted_score
        );
    }

    report::save_proportion_results(out_dir, &results)?;
    eprintln!("> Reports written to {}", out_dir.display());

    if let Some(dir) = artifact_dir {
        let Some(winner) = results
            .best_configurations
            .iter()
            .fold(None::<&proportion::BestConfiguration>, |best, candidate| {
                match best {
                    Some(current) if candidate.weighted_score <= current.weighted_score => best,
                    _ => Some(candidate),
                }
            })
            .cloned()
        else {
            return Err("no viable configuration found; nothing to train".into());
        };

        eprintln!(
            "> Training final {} model at proportion {:.3}",
            winner.best_model, winner.optimal_proportion
        );
        let kind = model_kind_by_name(&winner.best_model)?;
        let mut rng = StdRng::seed_from_u64(seed);
        let resampled = proportion::resample_to_proportion(
            &cohort,
            winner.optimal_proportion,
            &mut rng,
        )
        .ok_or("winning proportion is no longer resamplable")?;
        let estimator = kind.fit(resampled.x.view(), resampled.y.view(), seed)?;

        // Imputation means come from the full cohort, not the resample.
        let imputation_means = cohort
            .x
            .mean_axis(Axis(0))
            .ok_or("cohort is empty")?
            .to_vec();

        let bundle = ArtifactBundle {
            model: ModelArtifact {
                estimator,
                feature_names: cohort.feature_names.clone(),
                imputation_means,
            },
            features: cohort.feature_names.clone(),
            thresholds: None,
            metadata: Some(ArtifactMetadata {
                model: Some(winner.best_model.clone()),
                model_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
        };
        bundle.save(dir)?;
        eprintln!("> Model bundle saved to {}", dir.display());
    }
    Ok(())
}

fn run_validate(input: &Path, artifact_dir: &Path, out_dir: &Path) -> Result<(), Box<dyn Error>> {
    let cohort = data::load_cohort(input)?;
    let bundle = ArtifactBundle::load(artifact_dir)?;
    eprintln!(
        "> Validating {} on {} samples",
        bundle
            .metadata
            .as_ref()
            .and_then(|m| m.model.as_deref())
            .unwrap_or("model"),
        cohort.n_samples()
    );

    let predictions = bundle.model.estimator.predict_proba(cohort.x.view());
    let importances = bundle
        .model
        .estimator
        .feature_importance(bundle.model.feature_names.len());
    let mut ranked: Vec<(String, f64)> = bundle
        .model
        .feature_names
        .iter()
        .cloned()
        .zip(importances)
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let validation =
        validate::validate_against_medical_knowledge(&cohort, predictions.view(), &ranked);

    eprintln!(
        "> Consistency score {:.3}: {}",
        validation.overall_consistency_score, validation.interpretation
    );
    report::save_validation_report(out_dir, &validation)?;
    eprintln!("> Report written to {}", out_dir.display());
    Ok(())
}

fn run_predict(input: &Path, artifact_dir: &Path, profile: &str) -> Result<(), Box<dyn Error>> {
    let engine = InferenceEngine::load(artifact_dir)?;
    let request: HashMap<String, Option<f64>> = serde_json::from_str(&fs::read_to_string(input)?)?;
    let response = engine.predict(&request, profile)?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn model_kind_by_name(name: &str) -> Result<ModelKind, Box<dyn Error>> {
    ModelKind::all()
        .into_iter()
        .find(|kind| kind.name() == name)
        .ok_or_else(|| format!("unknown model name '{name}'").into())
}
