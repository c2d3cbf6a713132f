use crate::extractor::ShapeFeatures;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Complexity {
    Simple,
    Complex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssemblyKind {
    Assembly,
    Part,
    Undetermined,
}

impl AssemblyKind {
    /// `Some(true)` for a single part, `None` when the file could not be classified.
    pub fn is_part(self) -> Option<bool> {
        match self {
            AssemblyKind::Assembly => Some(false),
            AssemblyKind::Part => Some(true),
            AssemblyKind::Undetermined => None,
        }
    }
}

/// One row of the corpus report. Field order is the column order of the CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    #[serde(rename = "File Name")]
    pub file_name: String,
    #[serde(rename = "Total Faces")]
    pub faces: usize,
    #[serde(rename = "Curved Faces")]
    pub curved_faces: usize,
    #[serde(rename = "Total Edges")]
    pub edges: usize,
    #[serde(rename = "Vertices")]
    pub vertices: usize,
    #[serde(rename = "Bounding Box Volume")]
    pub bbox_volume: f64,
    #[serde(rename = "Mean Curvature")]
    pub mean_curvature: f64,
    #[serde(rename = "Curvature Std Dev")]
    pub curvature_std_dev: f64,
    #[serde(rename = "Volume")]
    pub volume: f64,
    #[serde(rename = "Hole Count")]
    pub hole_count: usize,
    /// File size in KiB.
    #[serde(rename = "size")]
    pub size_kb: f64,
    #[serde(rename = "ispart", with = "part_flag")]
    pub is_part: Option<bool>,
    #[serde(rename = "Complexity (Face/Edge)")]
    pub topology_complexity: Complexity,
    #[serde(rename = "Complexity (Curvature)")]
    pub curvature_complexity: Complexity,
    #[serde(rename = "Criteria Met")]
    pub criteria_met: Option<usize>,
}

impl FeatureRecord {
    pub fn features(&self) -> ShapeFeatures {
        ShapeFeatures {
            faces: self.faces,
            curved_faces: self.curved_faces,
            edges: self.edges,
            vertices: self.vertices,
            hole_count: self.hole_count,
            bbox_volume: self.bbox_volume,
            mean_curvature: self.mean_curvature,
            curvature_std_dev: self.curvature_std_dev,
            volume: self.volume,
        }
    }
}

/// CSV column names, in [`FeatureRecord`] field order.
pub const REPORT_COLUMNS: [&str; 15] = [
    "File Name",
    "Total Faces",
    "Curved Faces",
    "Total Edges",
    "Vertices",
    "Bounding Box Volume",
    "Mean Curvature",
    "Curvature Std Dev",
    "Volume",
    "Hole Count",
    "size",
    "ispart",
    "Complexity (Face/Edge)",
    "Complexity (Curvature)",
    "Criteria Met",
];

/// Rows in lexicographic file-name order.
pub type CorpusTable = Vec<FeatureRecord>;

/// `ispart` column: 1, 0, or empty when undetermined.
mod part_flag {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<bool>, s: S) -> Result<S::Ok, S::Error> {
        value.map(u8::from).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
        Ok(Option::<u8>::deserialize(d)?.map(|n| n != 0))
    }
}
