use anyhow::{bail, Context, Result};
use kernel::KernelRegistry;
use serde::Serialize;
use sift_core::assembly;
use sift_core::config::AppConfig;
use sift_core::extractor::{self, FaceCurvature};
use sift_core::models::AssemblyKind;
use sift_core::revision::Revision;
use sift_core::scanner;
use std::path::{Path, PathBuf};

/// Command-line values that take precedence over the loaded configuration.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub revision: Option<Revision>,
    pub report: Option<PathBuf>,
    pub min_met: Option<usize>,
    pub criteria: Option<PathBuf>,
    pub dry_run: bool,
}

pub fn apply_overrides(cfg: &mut AppConfig, overrides: &Overrides) {
    if let Some(revision) = overrides.revision {
        cfg.revision = revision;
    }
    if let Some(report) = &overrides.report {
        cfg.report.path = Some(report.to_string_lossy().into_owned());
    }
    if let Some(min) = overrides.min_met {
        cfg.selection.min_met = Some(min);
    }
    if let Some(criteria) = &overrides.criteria {
        cfg.selection.criteria = Some(criteria.to_string_lossy().into_owned());
    }
    if overrides.dry_run {
        cfg.selection.dry_run = true;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassifiedFile {
    pub path: PathBuf,
    pub kind: AssemblyKind,
}

/// Assembly check for one file, or for every model file in a directory.
pub fn classify(path: &Path, cfg: &AppConfig) -> Result<Vec<ClassifiedFile>> {
    let method = cfg.scan.assembly_method;
    let files = if path.is_dir() {
        scanner::model_files(path, &cfg.scan_options())?
    } else if path.is_file() {
        vec![path.to_path_buf()]
    } else {
        bail!("{} does not exist", path.display());
    };
    Ok(files
        .into_iter()
        .map(|p| {
            let kind = assembly::classify_file(&p, method);
            ClassifiedFile { path: p, kind }
        })
        .collect())
}

pub fn curvature(
    path: &Path,
    cfg: &AppConfig,
    registry: &KernelRegistry,
) -> Result<Vec<FaceCurvature>> {
    let kernel = registry.kernel(Some(&cfg.kernel.name))?;
    let solid = kernel
        .load(path)
        .with_context(|| format!("loading {}", path.display()))?;
    Ok(extractor::curvature_profile(solid.as_ref())?)
}
