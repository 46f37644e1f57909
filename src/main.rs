//! Reliability engine CLI
//!
//! Runs project files, combines design points and clusters sample sets.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use serde::Serialize;

use reliability_engine::clustering::{ClusterSettings, KMeans};
use reliability_engine::combine::{CombineSettings, CombineType, DesignPointCombiner, SelfCorrelation};
use reliability_engine::model::{DesignPoint, Sample};
use reliability_engine::project::Project;
use reliability_engine::reliability::ValidationReport;
use reliability_engine::statistics::RandomGenerator;

/// Structural reliability analysis
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reliability method of a project file
    Run {
        /// Project file (JSON)
        project: PathBuf,

        /// Write the design point as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the alphas as CSV
        #[arg(short, long)]
        alphas: Option<PathBuf>,
    },

    /// Combine design points (JSON files written by `run`)
    Combine {
        /// Design point files, combined from left to right
        #[arg(required = true, num_args = 2..)]
        points: Vec<PathBuf>,

        /// Series system (OR) instead of a parallel system (AND)
        #[arg(long)]
        or: bool,

        /// Correlation of stochasts shared by the design points
        #[arg(long, default_value_t = 1.0)]
        self_correlation: f64,

        /// Write the combined design point as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Cluster the samples of a CSV file with K-Means++
    Cluster {
        /// One column per coordinate, an optional `weight` column
        samples: PathBuf,

        /// Maximum number of clusters
        #[arg(short, long, default_value_t = 3)]
        max_clusters: usize,

        /// Use exactly `max_clusters` clusters instead of selecting the count
        #[arg(long)]
        fixed: bool,

        /// Seed of the initialization
        #[arg(long, default_value_t = 0)]
        seed: i64,
    },
}

/// Row of the alphas CSV
#[derive(Serialize)]
struct AlphaRow<'a> {
    stochast: &'a str,
    alpha: f64,
    influence_factor: f64,
    u: f64,
    x: f64,
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { project, output, alphas } => run(&project, output.as_deref(), alphas.as_deref()),
        Commands::Combine { points, or, self_correlation, output } => {
            combine(&points, or, self_correlation, output.as_deref())
        }
        Commands::Cluster { samples, max_clusters, fixed, seed } => cluster(&samples, max_clusters, fixed, seed),
    }
}

fn run(path: &Path, output: Option<&Path>, alphas: Option<&Path>) -> Result<()> {
    let project = Project::load(path).with_context(|| format!("Failed to load project {}", path.display()))?;
    info!("running {} on {}", project.method.name(), path.display());

    let point = project.run().context("Reliability run failed")?;
    print_design_point(&point);

    if let Some(output) = output {
        write_json(&point, output)?;
    }
    if let Some(alphas) = alphas {
        let mut writer =
            csv::Writer::from_path(alphas).with_context(|| format!("Failed to create {}", alphas.display()))?;
        for alpha in &point.alphas {
            writer.serialize(AlphaRow {
                stochast: &alpha.stochast.name,
                alpha: alpha.alpha,
                influence_factor: alpha.influence_factor,
                u: alpha.u,
                x: alpha.x,
            })?;
        }
        writer.flush()?;
        println!("\nAlphas written to: {}", alphas.display());
    }
    Ok(())
}

fn combine(paths: &[PathBuf], or: bool, self_correlation: f64, output: Option<&Path>) -> Result<()> {
    let points = paths
        .iter()
        .map(|path| {
            let json = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str::<DesignPoint>(&json).with_context(|| format!("Failed to parse {}", path.display()))
        })
        .collect::<Result<Vec<_>>>()?;

    let settings = CombineSettings {
        combine_type: if or { CombineType::Or } else { CombineType::And },
        self_correlation: SelfCorrelation::uniform(self_correlation),
        ..Default::default()
    };
    let mut report = ValidationReport::default();
    settings.validate(&mut report);
    if !report.is_valid() {
        bail!("Invalid combination settings:\n{}", report);
    }

    let Some(combined) = DesignPointCombiner::new(settings).combine_multiple(&points) else {
        bail!("No design points to combine");
    };
    print_design_point(&combined);

    if let Some(output) = output {
        write_json(&combined, output)?;
    }
    Ok(())
}

fn cluster(path: &Path, max_clusters: usize, fixed: bool, seed: i64) -> Result<()> {
    let samples = read_samples(path)?;
    if samples.is_empty() {
        bail!("No samples in {}", path.display());
    }

    let settings = ClusterSettings {
        max_clusters,
        optimize_number_of_clusters: !fixed,
        ..Default::default()
    };
    let mut report = ValidationReport::default();
    settings.validate(&mut report);
    if !report.is_valid() {
        bail!("Invalid cluster settings:\n{}", report);
    }

    let mut random = RandomGenerator::seeded(seed)?;
    let kmeans = KMeans::new(settings);
    let clusters = if fixed {
        kmeans.cluster_fixed(&samples, max_clusters, &mut random)
    } else {
        kmeans.cluster(&samples, &mut random)
    };

    println!("{} samples, {} clusters", samples.len(), clusters.len());
    if clusters.len() > 1 {
        println!("Silhouette: {:.4}", KMeans::silhouette(&samples, &clusters));
    }
    println!("{:>7} {:>8} {:>12}  Center", "Cluster", "Members", "Weight");
    println!("{}", "-".repeat(60));
    for (i, cluster) in clusters.iter().enumerate() {
        let center: Vec<String> = cluster.center.values.iter().map(|v| format!("{:.4}", v)).collect();
        println!("{:>7} {:>8} {:>12.4}  [{}]", i + 1, cluster.len(), cluster.weight, center.join(", "));
    }
    Ok(())
}

/// Samples from a CSV file with a header row
fn read_samples(path: &Path) -> Result<Vec<Sample>> {
    let mut reader = csv::Reader::from_path(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let headers = reader.headers()?.clone();
    let weight_column = headers.iter().position(|h| h.eq_ignore_ascii_case("weight"));

    let mut samples = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let mut values = Vec::with_capacity(record.len());
        let mut weight = 1.0;
        for (column, field) in record.iter().enumerate() {
            let value: f64 = field
                .trim()
                .parse()
                .with_context(|| format!("Row {}, column {}: not a number: {:?}", line + 1, column + 1, field))?;
            if Some(column) == weight_column {
                weight = value;
            } else {
                values.push(value);
            }
        }
        samples.push(Sample::new(values).with_weight(weight));
    }
    Ok(samples)
}

fn write_json(point: &DesignPoint, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(point)?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("\nDesign point written to: {}", path.display());
    Ok(())
}

fn print_design_point(point: &DesignPoint) {
    let report = &point.convergence_report;
    println!("{}", point.identifier);
    println!("{}", "=".repeat(point.identifier.len().max(20)));
    println!("  Beta:            {:.6}", point.beta);
    println!("  Pf:              {:.6e}", point.probability_of_failure());
    println!("  Return period:   {:.4e}", point.return_period());
    println!("  Converged:       {} ({:?})", report.is_converged, report.stop_reason);
    println!("  Convergence:     {:.4e}", report.convergence);
    println!("  Model runs:      {}", report.total_model_runs);
    println!();
    println!("{:<20} {:>10} {:>10} {:>10} {:>14}", "Stochast", "Alpha", "Influence", "U", "X");
    println!("{}", "-".repeat(68));
    for alpha in &point.alphas {
        println!(
            "{:<20} {:>10.4} {:>10.4} {:>10.4} {:>14.6}",
            alpha.stochast.name, alpha.alpha, alpha.influence_factor, alpha.u, alpha.x
        );
    }
}
