//! Criterion scoring over the corpus table and copying of the matched files.

use crate::criteria::CriterionSet;
use crate::error::AnalysisError;
use crate::models::{CorpusTable, FeatureRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionProfile {
    pub criteria: CriterionSet,
    pub min_met: usize,
}

/// What to do when the destination already has a file of the same name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    #[default]
    Overwrite,
    Skip,
    Rename,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CopyOptions {
    pub dry_run: bool,
    pub conflict: ConflictPolicy,
}

#[derive(Debug, Default)]
pub struct SelectionOutcome {
    /// File names of selected rows, in table order.
    pub selected: Vec<String>,
    /// Destination paths written (or that would be written on a dry run).
    pub copied: Vec<PathBuf>,
    pub failures: Vec<AnalysisError>,
}

pub fn score(record: &FeatureRecord, criteria: &CriterionSet) -> usize {
    criteria
        .criteria
        .iter()
        .filter(|c| c.is_met(record))
        .count()
}

/// Scores every row in place and returns the indices of rows meeting the cutoff.
pub fn select(table: &mut CorpusTable, profile: &SelectionProfile) -> Vec<usize> {
    let mut selected = Vec::new();
    for (i, record) in table.iter_mut().enumerate() {
        let met = score(record, &profile.criteria);
        record.criteria_met = Some(met);
        if met >= profile.min_met {
            selected.push(i);
        }
    }
    selected
}

pub fn run_selection(
    table: &mut CorpusTable,
    profile: &SelectionProfile,
    source_dir: &Path,
    dest: &Path,
    options: &CopyOptions,
) -> Result<SelectionOutcome, AnalysisError> {
    fs::create_dir_all(dest).map_err(|source| AnalysisError::Destination {
        path: dest.to_path_buf(),
        source,
    })?;
    if same_file(dest, source_dir) {
        return Err(AnalysisError::Destination {
            path: dest.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                "destination is the source directory",
            ),
        });
    }

    let indices = select(table, profile);
    info!(
        selected = indices.len(),
        total = table.len(),
        min_met = profile.min_met,
        criteria = profile.criteria.len(),
        "Selection scored"
    );

    let mut outcome = SelectionOutcome::default();
    let mut taken = HashSet::new();
    for i in indices {
        let name = table[i].file_name.clone();
        let from = source_path(source_dir, &name);
        let bare = name.rsplit('/').next().unwrap_or(name.as_str());
        let Some(to) = destination_for(&dest.join(bare), options.conflict, &taken) else {
            debug!(file = %name, "destination exists, skipping");
            outcome.selected.push(name);
            continue;
        };
        if same_file(&from, &to) {
            let err = AnalysisError::Copy {
                from,
                to,
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "source and destination are the same file",
                ),
            };
            warn!(error = %err, "copy refused");
            outcome.failures.push(err);
            outcome.selected.push(name);
            continue;
        }
        if options.dry_run {
            info!(from = %from.display(), to = %to.display(), "dry run: would copy");
            taken.insert(to.clone());
            outcome.copied.push(to);
        } else {
            match fs::copy(&from, &to) {
                Ok(_) => {
                    debug!(file = %name, "copied");
                    taken.insert(to.clone());
                    outcome.copied.push(to);
                }
                Err(source) => {
                    let err = AnalysisError::Copy { from, to, source };
                    warn!(error = %err, "copy failed");
                    outcome.failures.push(err);
                }
            }
        }
        outcome.selected.push(name);
    }
    Ok(outcome)
}

/// Table names are `/`-separated paths below the scan root.
fn source_path(source_dir: &Path, name: &str) -> PathBuf {
    name.split('/').fold(source_dir.to_path_buf(), |p, part| p.join(part))
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Files written earlier in the same run are never replaced; a later file with
/// the same name is renamed whatever the policy.
fn destination_for(
    target: &Path,
    policy: ConflictPolicy,
    taken: &HashSet<PathBuf>,
) -> Option<PathBuf> {
    if taken.contains(target) {
        return Some(resolve_conflict(target, taken));
    }
    if !target.exists() {
        return Some(target.to_path_buf());
    }
    match policy {
        ConflictPolicy::Overwrite => Some(target.to_path_buf()),
        ConflictPolicy::Skip => None,
        ConflictPolicy::Rename => Some(resolve_conflict(target, taken)),
    }
}

fn resolve_conflict(dest: &Path, taken: &HashSet<PathBuf>) -> PathBuf {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    let stem = dest
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("model")
        .to_string();
    let ext = dest
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_string();
    let mut counter = 1;
    loop {
        let name = if ext.is_empty() {
            format!("{}_{}", stem, counter)
        } else {
            format!("{}_{}.{}", stem, counter, ext)
        };
        let candidate = parent.join(name);
        if !candidate.exists() && !taken.contains(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}
