//! MHC Ensemble CLI
//!
//! The `mhc-ensemble` command trains, inspects and queries a persisted
//! ensemble directory.
//!
//! ## Commands
//!
//! - `train`: Fit allele-specific models from a measurements CSV
//! - `inspect`: Summarize the models in an ensemble directory
//! - `predict`: Predict affinities for peptides against one allele

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, Level};

use mhc_ensemble::{
    Ensemble, FitOptions, Hyperparameters, ParallelFitConfig, PositionalMeanPredictor,
    PredictOptions, PredictionTable, MANIFEST_FILE, METRICS,
};

type BaselineEnsemble = Ensemble<PositionalMeanPredictor>;

#[derive(Parser)]
#[command(name = "mhc-ensemble")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Peptide/MHC affinity predictor ensembles", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fit allele-specific models from a CSV of measurements
    Train {
        /// CSV with columns allele, peptide, measurement_value
        #[arg(long)]
        data: PathBuf,

        /// Ensemble directory (created or extended)
        #[arg(long, env = "MHC_ENSEMBLE_MODELS_DIR")]
        models_dir: PathBuf,

        /// Models to fit per allele
        #[arg(short, long, default_value = "1")]
        n_models: usize,

        /// Hyperparameters as a JSON object
        #[arg(long)]
        hyperparameters: Option<String>,

        /// Maximum concurrent fits (default: MHC_ENSEMBLE_MAX_CONCURRENT or CPU count)
        #[arg(long)]
        max_concurrent: Option<usize>,
    },

    /// Summarize the models in an ensemble directory
    Inspect {
        /// Ensemble directory
        #[arg(long, env = "MHC_ENSEMBLE_MODELS_DIR")]
        models_dir: PathBuf,

        /// Only load the first N manifest rows
        #[arg(long)]
        max_models: Option<usize>,

        /// Output format (csv prints the manifest)
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Predict affinities (nM) for peptides against one allele
    Predict {
        /// Ensemble directory
        #[arg(long, env = "MHC_ENSEMBLE_MODELS_DIR")]
        models_dir: PathBuf,

        /// Allele, e.g. HLA-A*02:01
        #[arg(short, long)]
        allele: String,

        /// Peptides to score
        #[arg(required = true)]
        peptides: Vec<String>,

        /// Omit the ensemble mean column
        #[arg(long)]
        no_mean: bool,

        /// Only load the first N manifest rows
        #[arg(long)]
        max_models: Option<usize>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Csv,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    mhc_ensemble::init_tracing(cli.json, level);

    match cli.command {
        Commands::Train {
            data,
            models_dir,
            n_models,
            hyperparameters,
            max_concurrent,
        } => {
            cmd_train(
                &data,
                &models_dir,
                n_models,
                hyperparameters.as_deref(),
                max_concurrent,
            )
            .await
        }
        Commands::Inspect {
            models_dir,
            max_models,
            output,
        } => cmd_inspect(&models_dir, max_models, output),
        Commands::Predict {
            models_dir,
            allele,
            peptides,
            no_mean,
            max_models,
            output,
        } => cmd_predict(&models_dir, &allele, &peptides, no_mean, max_models, output),
    }
}

#[derive(Debug, Deserialize)]
struct TrainingRow {
    allele: String,
    peptide: String,
    measurement_value: f64,
}

/// Rows of one allele, in file order.
#[derive(Debug, Default, PartialEq)]
struct AlleleTrainingSet {
    allele: String,
    peptides: Vec<String>,
    affinities: Vec<f64>,
}

fn read_training_sets(path: &Path) -> Result<Vec<AlleleTrainingSet>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open training data: {:?}", path))?;
    let mut sets: Vec<AlleleTrainingSet> = Vec::new();
    let mut slots: HashMap<String, usize> = HashMap::new();
    for (line, row) in reader.deserialize::<TrainingRow>().enumerate() {
        let row = row.with_context(|| format!("Invalid training row {} in {:?}", line + 1, path))?;
        let slot = *slots.entry(row.allele.clone()).or_insert_with(|| {
            sets.push(AlleleTrainingSet {
                allele: row.allele.clone(),
                ..Default::default()
            });
            sets.len() - 1
        });
        sets[slot].peptides.push(row.peptide);
        sets[slot].affinities.push(row.measurement_value);
    }
    Ok(sets)
}

async fn cmd_train(
    data: &Path,
    models_dir: &Path,
    n_models: usize,
    hyperparameters: Option<&str>,
    max_concurrent: Option<usize>,
) -> Result<()> {
    let hyperparameters = match hyperparameters {
        Some(raw) => Hyperparameters::from_json(raw).context("Invalid --hyperparameters")?,
        None => Hyperparameters::new(),
    };
    let mut config = ParallelFitConfig::from_env()?;
    if let Some(n) = max_concurrent {
        if n == 0 {
            bail!("--max-concurrent must be at least 1");
        }
        config = config.with_max_concurrent(n);
    }

    let sets = read_training_sets(data)?;
    if sets.is_empty() {
        bail!("No training rows in {:?}", data);
    }

    let mut ensemble = if models_dir.join(MANIFEST_FILE).is_file() {
        BaselineEnsemble::load(models_dir, None)
            .with_context(|| format!("Failed to load existing ensemble from {:?}", models_dir))?
    } else {
        BaselineEnsemble::new()
    };

    let source = data
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    for set in &sets {
        info!(allele = %set.allele, rows = set.peptides.len(), "fitting allele");
        let names = ensemble
            .fit_allele_specific_parallel(
                n_models,
                &hyperparameters,
                &set.allele,
                &set.peptides,
                &set.affinities,
                FitOptions::new()
                    .with_persist_dir(models_dir)
                    .with_sources(source.clone()),
                &config,
            )
            .await
            .with_context(|| format!("Training failed for allele {}", set.allele))?;
        println!(
            "Trained {} model(s) for {} on {} measurements",
            names.len(),
            set.allele,
            set.peptides.len()
        );
    }

    println!("{}", ensemble.describe());
    METRICS.flush();
    Ok(())
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct ModelSummary {
    name: String,
    allele: String,
    num_measurements: usize,
    fit_seconds: f64,
    trained_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
struct InspectOutput {
    summary: String,
    num_models: usize,
    pan_allele_models: usize,
    pseudosequences: usize,
    supported_alleles: Vec<String>,
    models: Vec<ModelSummary>,
}

fn build_inspect_output(ensemble: &BaselineEnsemble) -> InspectOutput {
    InspectOutput {
        summary: ensemble.describe(),
        num_models: ensemble.num_models(),
        pan_allele_models: ensemble.pan_allele_models().len(),
        pseudosequences: ensemble.pseudosequences().len(),
        supported_alleles: ensemble
            .supported_alleles()
            .iter()
            .map(|a| a.to_string())
            .collect(),
        models: ensemble
            .manifest()
            .iter()
            .map(|r| ModelSummary {
                name: r.name.to_string(),
                allele: r.scope.label().to_string(),
                num_measurements: r.num_measurements,
                fit_seconds: r.fit_seconds,
                trained_at: r.trained_at.map(|t| t.to_rfc3339()),
            })
            .collect(),
    }
}

fn render_inspect_text(output: &InspectOutput) -> String {
    let mut lines = vec![output.summary.clone()];
    for model in &output.models {
        lines.push(format!(
            "  {}  {}  n={}  {:.2}s",
            model.name, model.allele, model.num_measurements, model.fit_seconds
        ));
    }
    lines.join("\n")
}

fn cmd_inspect(models_dir: &Path, max_models: Option<usize>, output: OutputFormat) -> Result<()> {
    let ensemble = BaselineEnsemble::load(models_dir, max_models)
        .with_context(|| format!("Failed to load ensemble from {:?}", models_dir))?;

    match output {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&build_inspect_output(&ensemble))?
            );
        }
        OutputFormat::Csv => {
            let bytes = ensemble.manifest().to_csv_bytes()?;
            print!("{}", String::from_utf8_lossy(&bytes));
        }
        OutputFormat::Table => println!("{}", render_inspect_text(&build_inspect_output(&ensemble))),
    }
    Ok(())
}

fn render_prediction_text(table: &PredictionTable) -> String {
    let header = table.column_names();
    let mut rows: Vec<Vec<String>> = Vec::with_capacity(table.len());
    for row in 0..table.len() {
        let mut cells = Vec::with_capacity(header.len());
        if let Some(mean) = table.mean() {
            cells.push(format_affinity(mean[row]));
        }
        if let (Some(alleles), Some(peptides)) = (table.alleles(), table.peptides()) {
            cells.push(alleles[row].to_string());
            cells.push(peptides[row].clone());
        }
        cells.extend(
            table
                .model_columns()
                .iter()
                .map(|c| format_affinity(c.values[row])),
        );
        rows.push(cells);
    }

    let widths: Vec<usize> = header
        .iter()
        .enumerate()
        .map(|(i, h)| rows.iter().map(|r| r[i].len()).fold(h.len(), usize::max))
        .collect();
    let render = |cells: &[String]| {
        cells
            .iter()
            .zip(&widths)
            .map(|(c, &w)| format!("{c:<w$}"))
            .collect::<Vec<_>>()
            .join("  ")
            .trim_end()
            .to_string()
    };

    let mut lines = vec![render(&header)];
    lines.extend(rows.iter().map(|r| render(r)));
    lines.join("\n")
}

fn format_affinity(value: Option<f64>) -> String {
    value.map(|v| format!("{v:.2}")).unwrap_or_else(|| "-".to_string())
}

fn cmd_predict(
    models_dir: &Path,
    allele: &str,
    peptides: &[String],
    no_mean: bool,
    max_models: Option<usize>,
    output: OutputFormat,
) -> Result<()> {
    let ensemble = BaselineEnsemble::load(models_dir, max_models)
        .with_context(|| format!("Failed to load ensemble from {:?}", models_dir))?;
    let alleles = vec![allele; peptides.len()];
    let table = ensemble
        .predict(
            peptides,
            &alleles,
            PredictOptions {
                include_mean: !no_mean,
                include_peptides_and_alleles: true,
            },
        )
        .context("Prediction failed")?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&table)?),
        OutputFormat::Csv => table.write_csv(std::io::stdout().lock())?,
        OutputFormat::Table => println!("{}", render_prediction_text(&table)),
    }
    Ok(())
}
