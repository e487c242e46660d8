//! Loopgate CLI - validate evaluation configuration and render gate
//! verdicts over collected variant metrics.
//!
//! The process exits non-zero only on configuration-time failure or, with
//! `--enforce`, when the gate rejects; everything else completes and
//! prints a full report.

use std::collections::HashMap;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use loopgate::gate::{evaluate_gate, BenchmarkBaselines, GateStatus, GateThresholds};
use loopgate::pipeline::VariantMetrics;
use loopgate::profiles::build_variants_capped;
use loopgate::spec::{Stage, TaskSpecFile};

#[derive(Parser)]
#[command(name = "loopgate")]
#[command(version)]
#[command(about = "Reliability evaluation and gating for coding agents", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a task spec (and optionally a baselines file) up front
    Validate {
        /// Path to the task spec JSON
        #[arg(long, env = "LOOPGATE_SPEC")]
        spec: String,

        /// Path to the benchmark baselines JSON
        #[arg(long, env = "LOOPGATE_BASELINES")]
        baselines: Option<String>,

        /// Cap the variant population (waives the population floor)
        #[arg(long)]
        cap: Option<usize>,
    },

    /// Evaluate the gate over collected per-variant metrics
    Gate {
        /// Path to a JSON map of variant id to metrics
        #[arg(long)]
        metrics: String,

        /// Path to the benchmark baselines JSON
        #[arg(long, env = "LOOPGATE_BASELINES")]
        baselines: String,

        /// Externally-nominated best variant; defaults to the highest
        /// average overall in the metrics file
        #[arg(long)]
        recommended: Option<String>,

        #[arg(long, default_value_t = GateThresholds::default().min_pass_rate)]
        min_pass_rate: f64,

        #[arg(long, default_value_t = GateThresholds::default().min_loop_safety_rate)]
        min_loop_safety_rate: f64,

        #[arg(long, default_value_t = GateThresholds::default().min_fallback_free_rate)]
        min_fallback_free_rate: f64,

        #[arg(long, default_value_t = GateThresholds::default().min_average_accuracy)]
        min_average_accuracy: f64,

        /// Exit non-zero when the gate rejects
        #[arg(long)]
        enforce: bool,
    },
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();
}

fn run_validate(spec: &str, baselines: Option<&str>, cap: Option<usize>) -> Result<()> {
    let spec = TaskSpecFile::load(spec)?;
    let screen = spec.tasks_for_stage(Stage::Screen).len();
    let deep = spec.tasks_for_stage(Stage::Deep).len();
    let variants = build_variants_capped(cap)?;
    if let Some(path) = baselines {
        let baselines = BenchmarkBaselines::load(path)?;
        println!("baselines: {} sources", baselines.sources.len());
    }
    println!(
        "spec ok: {} tasks ({} screen, {} deep), {} variants",
        spec.tasks.len(),
        screen,
        deep,
        variants.len()
    );
    Ok(())
}

fn run_gate(
    metrics_path: &str,
    baselines_path: &str,
    recommended: Option<String>,
    thresholds: GateThresholds,
    enforce: bool,
) -> Result<ExitCode> {
    let content = std::fs::read_to_string(metrics_path)
        .with_context(|| format!("failed to read {}", metrics_path))?;
    let metrics: HashMap<String, VariantMetrics> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", metrics_path))?;
    let baselines = BenchmarkBaselines::load(baselines_path)?;

    let mut variant_ids: Vec<String> = metrics.keys().cloned().collect();
    variant_ids.sort();

    let recommended = recommended.unwrap_or_else(|| {
        metrics
            .iter()
            .max_by(|a, b| {
                a.1.average_overall
                    .partial_cmp(&b.1.average_overall)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.0.cmp(a.0))
            })
            .map(|(id, _)| id.clone())
            .unwrap_or_default()
    });

    let report = evaluate_gate(&variant_ids, &metrics, &baselines, &thresholds, &recommended);
    println!("{}", serde_json::to_string_pretty(&report)?);

    if enforce && report.status == GateStatus::Reject {
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Validate {
            spec,
            baselines,
            cap,
        } => {
            run_validate(&spec, baselines.as_deref(), cap)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Gate {
            metrics,
            baselines,
            recommended,
            min_pass_rate,
            min_loop_safety_rate,
            min_fallback_free_rate,
            min_average_accuracy,
            enforce,
        } => run_gate(
            &metrics,
            &baselines,
            recommended,
            GateThresholds {
                min_pass_rate,
                min_loop_safety_rate,
                min_fallback_free_rate,
                min_average_accuracy,
            },
            enforce,
        ),
    }
}
