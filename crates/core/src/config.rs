use crate::assembly::AssemblyMethod;
use crate::classifier::{CurvatureThresholds, TopologyThresholds};
use crate::criteria;
use crate::revision::Revision;
use crate::scanner::ScanOptions;
use crate::selection::{ConflictPolicy, CopyOptions, SelectionProfile};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub revision: Revision,
    pub kernel: KernelConfig,
    pub scan: ScanConfig,
    pub complexity: ComplexityConfig,
    pub selection: SelectionConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub name: String,
    pub curve_samples: usize,
    pub grid: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            name: "step".to_string(),
            curve_samples: 32,
            grid: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub extensions: Vec<String>,
    pub exclude: Vec<String>,
    pub recursive: bool,
    pub include_hidden: bool,
    pub max_file_size_kb: Option<u64>,
    pub assembly_method: AssemblyMethod,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: vec!["step".to_string(), "stp".to_string()],
            exclude: Vec::new(),
            recursive: false,
            include_hidden: false,
            max_file_size_kb: Some(5120),
            assembly_method: AssemblyMethod::default(),
        }
    }
}

/// Per-field overrides of the revision's thresholds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplexityConfig {
    pub max_faces: Option<usize>,
    pub max_curved_faces: Option<usize>,
    pub max_vertices: Option<usize>,
    pub max_std_dev: Option<f64>,
    pub max_bbox_volume: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    pub min_met: Option<usize>,
    /// TOML file replacing the standard criteria.
    pub criteria: Option<String>,
    pub dry_run: bool,
    pub conflict: ConflictPolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub path: Option<String>,
}

impl AppConfig {
    pub fn topology_thresholds(&self) -> TopologyThresholds {
        let mut t = self.revision.topology();
        let c = &self.complexity;
        if let Some(v) = c.max_faces {
            t.max_faces = v;
        }
        if let Some(v) = c.max_curved_faces {
            t.max_curved_faces = v;
        }
        if c.max_vertices.is_some() {
            t.max_vertices = c.max_vertices;
        }
        t
    }

    pub fn curvature_thresholds(&self) -> CurvatureThresholds {
        let mut t = self.revision.curvature();
        if let Some(v) = self.complexity.max_std_dev {
            t.max_std_dev = v;
        }
        if let Some(v) = self.complexity.max_bbox_volume {
            t.max_bbox_volume = v;
        }
        t
    }

    /// Revision profile, replaced by the criteria file and `min_met` when set.
    /// An explicit `min_met` wins over one given in the criteria file.
    pub fn selection_profile(&self) -> anyhow::Result<SelectionProfile> {
        let mut profile = self.revision.profile();
        if let Some(path) = &self.selection.criteria {
            let file = criteria::load_criteria(Path::new(path))?;
            profile.criteria.criteria = file.criteria;
            if let Some(min) = file.min_met {
                profile.min_met = min;
            }
        }
        if let Some(min) = self.selection.min_met {
            profile.min_met = min;
        }
        Ok(profile)
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            extensions: self
                .scan
                .extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            exclude: self.scan.exclude.clone(),
            recursive: self.scan.recursive,
            include_hidden: self.scan.include_hidden,
            max_file_size_kb: self.scan.max_file_size_kb,
            assembly_method: self.scan.assembly_method,
            topology: self.topology_thresholds(),
            curvature: self.curvature_thresholds(),
        }
    }

    pub fn copy_options(&self) -> CopyOptions {
        CopyOptions {
            dry_run: self.selection.dry_run,
            conflict: self.selection.conflict,
        }
    }
}

pub fn load(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let mut settings = config::Config::builder();
    if let Some(p) = path {
        settings = settings.add_source(config::File::with_name(p));
    } else {
        settings = settings.add_source(config::File::with_name("config/default").required(false));
    }
    settings = settings.add_source(config::Environment::with_prefix("STEPSIFT").separator("__"));
    let cfg = settings.build()?;
    Ok(cfg.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn defaults_follow_latest_revision() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.revision, Revision::R2);
        assert_eq!(cfg.topology_thresholds().max_vertices, Some(60));
        assert_eq!(cfg.selection_profile().unwrap().min_met, 8);
        assert_eq!(cfg.scan_options().max_file_size_kb, Some(5120));
        assert_eq!(cfg.kernel.name, "step");
    }

    #[test]
    fn loads_partial_file_with_overrides() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sift.toml");
        fs::write(
            &path,
            r#"
            revision = "r1"

            [scan]
            extensions = [".STEP"]
            max_file_size_kb = 100

            [complexity]
            max_curved_faces = 3

            [selection]
            min_met = 6
            "#,
        )
        .unwrap();
        let cfg = load(path.to_str()).unwrap();
        assert_eq!(cfg.revision, Revision::R1);
        assert_eq!(cfg.topology_thresholds().max_curved_faces, 3);
        assert_eq!(cfg.topology_thresholds().max_vertices, None);
        assert_eq!(cfg.selection_profile().unwrap().min_met, 6);
        let scan = cfg.scan_options();
        assert_eq!(scan.extensions, vec!["step".to_string()]);
        assert_eq!(scan.max_file_size_kb, Some(100));
        assert!(!scan.recursive);
    }

    #[test]
    fn criteria_file_replaces_standard_set() {
        let dir = tempdir().unwrap();
        let criteria = dir.path().join("criteria.toml");
        fs::write(
            &criteria,
            "min_met = 1\n\
             [[criteria]]\n\
             type = \"range\"\n\
             name = \"small\"\n\
             field = \"size_kb\"\n\
             max = 10\n",
        )
        .unwrap();
        let mut cfg = AppConfig::default();
        cfg.selection.criteria = Some(criteria.to_string_lossy().into_owned());
        let profile = cfg.selection_profile().unwrap();
        assert_eq!(profile.criteria.len(), 1);
        assert_eq!(profile.min_met, 1);
    }
}
