//! Walks a model directory in file-name order and analyzes each STEP file.

use crate::assembly::{self, AssemblyMethod};
use crate::classifier::{self, CurvatureThresholds, TopologyThresholds};
use crate::error::AnalysisError;
use crate::extractor;
use crate::models::{CorpusTable, FeatureRecord};
use anyhow::Context;
use globset::{Glob, GlobSet, GlobSetBuilder};
use kernel::CadKernel;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Lower-case extensions without the dot.
    pub extensions: Vec<String>,
    pub exclude: Vec<String>,
    pub recursive: bool,
    pub include_hidden: bool,
    /// Files strictly larger than this are skipped unread.
    pub max_file_size_kb: Option<u64>,
    pub assembly_method: AssemblyMethod,
    pub topology: TopologyThresholds,
    pub curvature: CurvatureThresholds,
}

impl Default for ScanOptions {
    fn default() -> Self {
        let revision = crate::revision::Revision::default();
        Self {
            extensions: vec!["step".to_string(), "stp".to_string()],
            exclude: Vec::new(),
            recursive: false,
            include_hidden: false,
            max_file_size_kb: Some(5120),
            assembly_method: AssemblyMethod::default(),
            topology: revision.topology(),
            curvature: revision.curvature(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub table: CorpusTable,
    pub skipped: Vec<SkippedFile>,
}

pub fn scan_corpus(
    dir: &Path,
    options: &ScanOptions,
    kernel: &dyn CadKernel,
) -> anyhow::Result<ScanOutcome> {
    let files = model_files(dir, options)?;
    info!(dir = %dir.display(), files = files.len(), "Scanning model files");
    Ok(scan_files(dir, files, options, kernel))
}

/// Analyzes an already listed set of files below `root`.
fn scan_files(
    root: &Path,
    files: Vec<PathBuf>,
    options: &ScanOptions,
    kernel: &dyn CadKernel,
) -> ScanOutcome {
    let mut outcome = ScanOutcome::default();
    for path in files {
        let size = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cannot read metadata, skipping");
                outcome.skipped.push(SkippedFile {
                    path,
                    reason: format!("cannot read metadata: {err}"),
                });
                continue;
            }
        };
        let size_kb = size as f64 / 1024.0;
        if let Some(limit) = options.max_file_size_kb {
            if size_kb > limit as f64 {
                warn!(path = %path.display(), size_kb, limit, "file too large, skipping");
                outcome.skipped.push(SkippedFile {
                    path,
                    reason: format!("size {size_kb:.1} KiB exceeds {limit} KiB"),
                });
                continue;
            }
        }

        match analyze(root, &path, size_kb, options, kernel) {
            Ok(record) => outcome.table.push(record),
            Err(err) => {
                warn!(error = %err, "skipping file");
                outcome.skipped.push(SkippedFile {
                    path,
                    reason: err.to_string(),
                });
            }
        }
    }
    outcome
}

fn analyze(
    root: &Path,
    path: &Path,
    size_kb: f64,
    options: &ScanOptions,
    kernel: &dyn CadKernel,
) -> Result<FeatureRecord, AnalysisError> {
    let solid = kernel.load(path).map_err(|source| AnalysisError::Load {
        path: path.to_path_buf(),
        source,
    })?;
    let features = extractor::extract(solid.as_ref())
        .map_err(|err| AnalysisError::from_feature(path.to_path_buf(), err))?;
    drop(solid);

    let assembly = assembly::classify_file(path, options.assembly_method);
    let record = FeatureRecord {
        file_name: relative_name(root, path),
        faces: features.faces,
        curved_faces: features.curved_faces,
        edges: features.edges,
        vertices: features.vertices,
        bbox_volume: features.bbox_volume,
        mean_curvature: features.mean_curvature,
        curvature_std_dev: features.curvature_std_dev,
        volume: features.volume,
        hole_count: features.hole_count,
        size_kb,
        is_part: assembly.is_part(),
        topology_complexity: classifier::topology_label(&features, &options.topology),
        curvature_complexity: classifier::curvature_label(&features, &options.curvature),
        criteria_met: None,
    };
    debug!(file = %record.file_name, faces = record.faces, "analyzed");
    Ok(record)
}

/// Path below the scan root joined with `/`; the bare file name for flat scans.
fn relative_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Candidate model files under `dir`, sorted by file name.
pub fn model_files(dir: &Path, options: &ScanOptions) -> anyhow::Result<Vec<PathBuf>> {
    let exclude_set = build_globset(&options.exclude)?;
    let mut walker = WalkDir::new(dir).min_depth(1).sort_by_file_name();
    if !options.recursive {
        walker = walker.max_depth(1);
    }

    let mut files = Vec::new();
    for entry in walker
        .into_iter()
        .filter_entry(|e| should_descend(e.path(), options.include_hidden, &exclude_set))
    {
        let entry = entry.with_context(|| format!("walking {}", dir.display()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || !has_model_extension(path, &options.extensions) {
            continue;
        }
        files.push(path.to_path_buf());
    }
    if options.recursive {
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()).then_with(|| a.cmp(b)));
    }
    Ok(files)
}

fn has_model_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).with_context(|| format!("invalid exclude pattern {pat}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

fn should_descend(path: &Path, include_hidden: bool, excludes: &GlobSet) -> bool {
    if is_excluded(path, excludes) {
        return false;
    }
    if !include_hidden && is_hidden(path) {
        return false;
    }
    true
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn is_excluded(path: &Path, excludes: &GlobSet) -> bool {
    excludes.is_match(path)
        || path
            .file_name()
            .map(|n| excludes.is_match(Path::new(n)))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel::memory::{MemoryFace, MemoryKernel, MemorySolid};
    use tempfile::tempdir;

    fn file_name(path: &Path) -> String {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn block() -> MemorySolid {
        MemorySolid::new(vec![MemoryFace::planar(); 6], 12, 8)
    }

    #[test]
    fn lists_model_files_in_name_order() {
        let dir = tempdir().unwrap();
        for name in ["b.STEP", "a.stp", "c.txt", ".hidden.step", "10.step"] {
            fs::write(dir.path().join(name), "x").unwrap();
        }
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("d.step"), "x").unwrap();

        let files = model_files(dir.path(), &ScanOptions::default()).unwrap();
        let names: Vec<String> = files.iter().map(|p| file_name(p)).collect();
        assert_eq!(names, vec!["10.step", "a.stp", "b.STEP"]);

        let options = ScanOptions {
            recursive: true,
            exclude: vec!["a.*".to_string()],
            ..ScanOptions::default()
        };
        let names: Vec<String> = model_files(dir.path(), &options)
            .unwrap()
            .iter()
            .map(|p| file_name(p))
            .collect();
        assert_eq!(names, vec!["10.step", "b.STEP", "d.step"]);
    }

    #[test]
    fn oversized_file_is_skipped_before_loading() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("big.step"), vec![b'x'; 3 * 1024]).unwrap();
        fs::write(dir.path().join("small.step"), "ISO-10303-21;").unwrap();
        // big.step is not registered: loading it would fail with a different reason
        let kernel = MemoryKernel::new().with_solid("small.step", block());
        let options = ScanOptions {
            max_file_size_kb: Some(2),
            ..ScanOptions::default()
        };

        let outcome = scan_corpus(dir.path(), &options, &kernel).unwrap();
        assert_eq!(outcome.table.len(), 1);
        assert_eq!(outcome.table[0].file_name, "small.step");
        assert_eq!(outcome.skipped.len(), 1);
        assert!(outcome.skipped[0].reason.contains("exceeds"));
    }

    #[test]
    fn failures_are_recorded_and_scan_continues() {
        let dir = tempdir().unwrap();
        for name in ["a.step", "empty.step", "ok.step"] {
            fs::write(dir.path().join(name), "#1=PRODUCT('p','p','',(#2));").unwrap();
        }
        let kernel = MemoryKernel::new()
            .with_solid("empty.step", MemorySolid::new(vec![], 0, 0))
            .with_solid("ok.step", block());

        let outcome = scan_corpus(dir.path(), &ScanOptions::default(), &kernel).unwrap();
        assert_eq!(outcome.table.len(), 1);
        let record = &outcome.table[0];
        assert_eq!(record.file_name, "ok.step");
        assert_eq!(record.is_part, Some(true));
        assert_eq!(record.faces, 6);
        assert_eq!(record.criteria_met, None);
        let reasons: Vec<&str> = outcome.skipped.iter().map(|s| s.reason.as_str()).collect();
        assert!(reasons[0].starts_with("failed to load"));
        assert!(reasons[1].ends_with("has no faces"));
    }

    #[test]
    fn nested_files_keep_their_relative_path() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("top.step"), "x").unwrap();
        fs::write(dir.path().join("sub").join("deep.step"), "x").unwrap();
        let kernel = MemoryKernel::new()
            .with_solid("top.step", block())
            .with_solid("deep.step", block());
        let options = ScanOptions {
            recursive: true,
            ..ScanOptions::default()
        };

        let outcome = scan_corpus(dir.path(), &options, &kernel).unwrap();
        let names: Vec<&str> = outcome.table.iter().map(|r| r.file_name.as_str()).collect();
        assert_eq!(names, vec!["sub/deep.step", "top.step"]);
    }

    #[test]
    fn file_vanishing_after_listing_is_skipped() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.step"), "x").unwrap();
        let kernel = MemoryKernel::new().with_solid("b.step", block());
        let files = vec![dir.path().join("a.step"), dir.path().join("b.step")];

        let outcome = scan_files(dir.path(), files, &ScanOptions::default(), &kernel);
        assert_eq!(outcome.table.len(), 1);
        assert_eq!(outcome.table[0].file_name, "b.step");
        assert_eq!(outcome.skipped.len(), 1);
        assert!(outcome.skipped[0].reason.starts_with("cannot read metadata"));
    }

    #[test]
    fn missing_directory_is_an_error() {
        let dir = tempdir().unwrap();
        let kernel = MemoryKernel::new();
        assert!(scan_corpus(&dir.path().join("nope"), &ScanOptions::default(), &kernel).is_err());
    }
}
