use crate::config::AppConfig;
use crate::models::CorpusTable;
use crate::scanner::{self, SkippedFile};
use crate::{report, selection};
use anyhow::Context;
use kernel::step::{StepKernel, StepOptions};
use kernel::KernelRegistry;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub enum PipelineMode {
    Scan,
    Select { dest: PathBuf },
}

#[derive(Debug, Default, Serialize)]
pub struct PipelineSummary {
    pub analyzed: usize,
    pub skipped: Vec<SkippedFile>,
    pub selected: Option<usize>,
    pub copied: Option<usize>,
    pub copy_failures: Vec<String>,
    pub dry_run: bool,
    pub report: Option<PathBuf>,
    #[serde(skip)]
    pub table: CorpusTable,
}

pub fn run_with_mode_summary(
    config: &AppConfig,
    source: &Path,
    mode: PipelineMode,
) -> anyhow::Result<PipelineSummary> {
    let registry = build_registry(config);
    run_with_registry(config, &registry, source, mode)
}

pub fn run_with_registry(
    config: &AppConfig,
    registry: &KernelRegistry,
    source: &Path,
    mode: PipelineMode,
) -> anyhow::Result<PipelineSummary> {
    let kernel = registry
        .kernel(Some(&config.kernel.name))
        .context("resolving CAD kernel")?;
    let mut summary = PipelineSummary::default();

    info!("Starting scan phase...");
    let outcome = scanner::scan_corpus(source, &config.scan_options(), kernel.as_ref())
        .with_context(|| format!("scanning {}", source.display()))?;
    let mut table = outcome.table;
    summary.analyzed = table.len();
    summary.skipped = outcome.skipped;
    info!(
        "Scan complete. Analyzed {} files, skipped {}.",
        summary.analyzed,
        summary.skipped.len()
    );

    if let PipelineMode::Select { dest } = mode {
        info!("Starting selection phase...");
        let profile = config.selection_profile()?;
        let options = config.copy_options();
        let result =
            selection::run_selection(&mut table, &profile, source, &dest, &options)?;
        for failure in &result.failures {
            warn!(error = %failure, "copy failure");
        }
        summary.selected = Some(result.selected.len());
        summary.copied = Some(result.copied.len());
        summary.copy_failures = result.failures.iter().map(ToString::to_string).collect();
        summary.dry_run = options.dry_run;
        info!("Selection complete. Selected {} files.", result.selected.len());
    }

    if let Some(path) = &config.report.path {
        let path = PathBuf::from(path);
        report::write_table(&path, &table)?;
        summary.report = Some(path);
    }

    summary.table = table;
    Ok(summary)
}

pub fn build_registry(config: &AppConfig) -> KernelRegistry {
    let step = StepKernel::new(StepOptions {
        curve_samples: config.kernel.curve_samples,
        grid: config.kernel.grid,
    });
    KernelRegistry::new()
        .with_kernel("step", Arc::new(step))
        .set_preferred("step")
}
