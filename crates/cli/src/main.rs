use anyhow::Result;
use clap::{Parser, Subcommand};
use cli::commands::{self, Overrides};
use sift_core::config;
use sift_core::config::AppConfig;
use sift_core::pipeline;
use sift_core::pipeline::PipelineMode;
use sift_core::revision::Revision;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = config::load(cli.config.as_deref())?;
    let mut overrides = Overrides {
        revision: cli.revision,
        ..Overrides::default()
    };

    match cli.command {
        Commands::Scan { dir, report, json } => {
            overrides.report = report;
            commands::apply_overrides(&mut cfg, &overrides);
            run_pipeline(&cfg, dir, PipelineMode::Scan, json)
        }
        Commands::Select {
            dir,
            dest,
            min_met,
            criteria,
            dry_run,
            report,
            json,
        } => {
            overrides.report = report;
            overrides.min_met = min_met;
            overrides.criteria = criteria;
            overrides.dry_run = dry_run;
            commands::apply_overrides(&mut cfg, &overrides);
            run_pipeline(&cfg, dir, PipelineMode::Select { dest }, json)
        }
        Commands::Classify { path, json } => {
            commands::apply_overrides(&mut cfg, &overrides);
            let rows = commands::classify(&path, &cfg)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                for row in &rows {
                    println!("{}: {:?}", row.path.display(), row.kind);
                }
            }
            Ok(())
        }
        Commands::Curvature { file, json } => {
            commands::apply_overrides(&mut cfg, &overrides);
            let registry = pipeline::build_registry(&cfg);
            let profile = commands::curvature(&file, &cfg, &registry)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&profile)?);
            } else {
                for face in &profile {
                    println!(
                        "{} {:?}: mean {:.6}, gaussian {:.6}",
                        face.face, face.surface, face.mean, face.gaussian
                    );
                }
                println!("faces with defined curvature: {}", profile.len());
            }
            Ok(())
        }
    }
}

#[derive(Parser)]
#[command(name = "stepsift")]
#[command(about = "Feature extraction and dataset selection for STEP models", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Threshold revision: r1 or r2
    #[arg(long, global = true)]
    revision: Option<Revision>,

    /// Debug logging unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze every model file in a directory
    Scan {
        dir: PathBuf,
        /// Write the feature table to this CSV file
        #[arg(long)]
        report: Option<PathBuf>,
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Analyze, score against the criteria and copy matching files
    Select {
        dir: PathBuf,
        /// Directory receiving the selected files
        #[arg(long)]
        dest: PathBuf,
        /// Minimum number of criteria a file must meet
        #[arg(long)]
        min_met: Option<usize>,
        /// TOML file with a custom criterion set
        #[arg(long)]
        criteria: Option<PathBuf>,
        /// Report what would be copied without copying
        #[arg(long)]
        dry_run: bool,
        /// Write the scored feature table to this CSV file
        #[arg(long)]
        report: Option<PathBuf>,
        /// Output JSON summary
        #[arg(long)]
        json: bool,
    },
    /// Report assembly or single part for a file or directory
    Classify {
        path: PathBuf,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
    /// Per-face curvature at the parametric midpoint
    Curvature {
        file: PathBuf,
        /// Output JSON
        #[arg(long)]
        json: bool,
    },
}

fn run_pipeline(cfg: &AppConfig, dir: PathBuf, mode: PipelineMode, json: bool) -> Result<()> {
    let mode_label = match mode {
        PipelineMode::Scan => "scan",
        PipelineMode::Select { .. } => "select",
    };
    let summary = pipeline::run_with_mode_summary(cfg, &dir, mode)?;
    if json {
        let mut summary_json = serde_json::to_value(&summary)?;
        if let Some(obj) = summary_json.as_object_mut() {
            obj.insert("status".into(), "ok".into());
            obj.insert("mode".into(), mode_label.into());
        }
        println!("{}", serde_json::to_string_pretty(&summary_json)?);
    } else {
        let mut line = format!(
            "{}: analyzed {}, skipped {}",
            mode_label,
            summary.analyzed,
            summary.skipped.len()
        );
        if let (Some(selected), Some(copied)) = (summary.selected, summary.copied) {
            let verb = if summary.dry_run { "would copy" } else { "copied" };
            line.push_str(&format!(
                ", selected {}, {} {}, copy failures {}",
                selected,
                verb,
                copied,
                summary.copy_failures.len()
            ));
        }
        if let Some(report) = &summary.report {
            line.push_str(&format!(", report {}", report.display()));
        }
        println!("{line}");
    }
    Ok(())
}
