use crate::models::FeatureRecord;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Record column a criterion reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Faces,
    CurvedFaces,
    Edges,
    Vertices,
    BboxVolume,
    MeanCurvature,
    CurvatureStdDev,
    Volume,
    HoleCount,
    SizeKb,
    IsPart,
}

impl Field {
    fn number(self, r: &FeatureRecord) -> Option<f64> {
        let value = match self {
            Field::Faces => r.faces as f64,
            Field::CurvedFaces => r.curved_faces as f64,
            Field::Edges => r.edges as f64,
            Field::Vertices => r.vertices as f64,
            Field::BboxVolume => r.bbox_volume,
            Field::MeanCurvature => r.mean_curvature,
            Field::CurvatureStdDev => r.curvature_std_dev,
            Field::Volume => r.volume,
            Field::HoleCount => r.hole_count as f64,
            Field::SizeKb => r.size_kb,
            Field::IsPart => f64::from(u8::from(r.is_part?)),
        };
        (!value.is_nan()).then_some(value)
    }

    fn flag(self, r: &FeatureRecord) -> Option<bool> {
        match self {
            Field::IsPart => r.is_part,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Criterion {
    /// Inclusive range; an omitted bound is open.
    Range {
        name: String,
        field: Field,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    Flag {
        name: String,
        field: Field,
        #[serde(default = "default_true")]
        equals: bool,
    },
}

fn default_true() -> bool {
    true
}

impl Criterion {
    pub fn range(name: &str, field: Field, min: f64, max: f64) -> Self {
        Criterion::Range {
            name: name.to_string(),
            field,
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Criterion::Range { name, .. } | Criterion::Flag { name, .. } => name,
        }
    }

    /// Missing values (NaN, undetermined part flag) never satisfy a criterion.
    pub fn is_met(&self, record: &FeatureRecord) -> bool {
        match self {
            Criterion::Range {
                field, min, max, ..
            } => field.number(record).is_some_and(|v| {
                min.map_or(true, |lo| v >= lo) && max.map_or(true, |hi| v <= hi)
            }),
            Criterion::Flag { field, equals, .. } => field.flag(record) == Some(*equals),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionSet {
    pub criteria: Vec<Criterion>,
}

impl CriterionSet {
    /// The eight thresholds used for dataset selection.
    pub fn standard() -> Self {
        Self {
            criteria: vec![
                Criterion::range("faces", Field::Faces, 20.0, 120.0),
                Criterion::range("curved_faces", Field::CurvedFaces, 5.0, 50.0),
                Criterion::range("edges", Field::Edges, 100.0, 700.0),
                Criterion::range("vertices", Field::Vertices, 200.0, 1500.0),
                Criterion::range("volume", Field::Volume, 1e3, 1.5e5),
                Criterion::range("hole_count", Field::HoleCount, 5.0, 50.0),
                Criterion::range("size", Field::SizeKb, 25.0, 500.0),
                Criterion::Flag {
                    name: "is_part".to_string(),
                    field: Field::IsPart,
                    equals: true,
                },
            ],
        }
    }

    pub fn len(&self) -> usize {
        self.criteria.len()
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }
}

/// Contents of a criteria TOML file.
#[derive(Debug, Clone, Deserialize)]
pub struct CriteriaFile {
    #[serde(default)]
    pub min_met: Option<usize>,
    pub criteria: Vec<Criterion>,
}

pub fn load_criteria(path: &Path) -> anyhow::Result<CriteriaFile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading criteria file {}", path.display()))?;
    let file: CriteriaFile = toml::from_str(&content)
        .with_context(|| format!("parsing criteria file {}", path.display()))?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::tests::record;
    use tempfile::tempdir;

    #[test]
    fn ranges_are_inclusive() {
        let c = Criterion::range("faces", Field::Faces, 20.0, 120.0);
        let mut r = record("a.step");
        r.faces = 20;
        assert!(c.is_met(&r));
        r.faces = 120;
        assert!(c.is_met(&r));
        r.faces = 121;
        assert!(!c.is_met(&r));
    }

    #[test]
    fn nan_and_undetermined_never_match() {
        let mut r = record("a.step");
        r.mean_curvature = f64::NAN;
        r.is_part = None;
        let open = Criterion::Range {
            name: "any".into(),
            field: Field::MeanCurvature,
            min: None,
            max: None,
        };
        assert!(!open.is_met(&r));
        let part = Criterion::Flag {
            name: "part".into(),
            field: Field::IsPart,
            equals: true,
        };
        assert!(!part.is_met(&r));
        let assembly = Criterion::Flag {
            name: "assembly".into(),
            field: Field::IsPart,
            equals: false,
        };
        assert!(!assembly.is_met(&r));
    }

    #[test]
    fn standard_set_matches_reference_record() {
        let set = CriterionSet::standard();
        assert_eq!(set.len(), 8);
        let r = record("a.step");
        assert!(set.criteria.iter().all(|c| c.is_met(&r)));
    }

    #[test]
    fn loads_criteria_from_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("small.toml");
        fs::write(
            &path,
            r#"
            min_met = 2

            [[criteria]]
            type = "range"
            name = "few faces"
            field = "faces"
            max = 30

            [[criteria]]
            type = "flag"
            name = "single part"
            field = "is_part"
            "#,
        )
        .unwrap();
        let file = load_criteria(&path).unwrap();
        assert_eq!(file.min_met, Some(2));
        assert_eq!(file.criteria.len(), 2);
        assert_eq!(file.criteria[0].name(), "few faces");
        let mut r = record("a.step");
        r.faces = 12;
        assert!(file.criteria.iter().all(|c| c.is_met(&r)));
    }

    #[test]
    fn malformed_criteria_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[[criteria]]\ntype = \"between\"\nname = \"x\"\n").unwrap();
        assert!(load_criteria(&path).is_err());
    }
}
