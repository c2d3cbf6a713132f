use crate::classifier::{CurvatureThresholds, TopologyThresholds};
use crate::criteria::CriterionSet;
use crate::selection::SelectionProfile;
use serde::{Deserialize, Serialize};

/// Named historical threshold sets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Revision {
    R1,
    #[default]
    R2,
}

impl Revision {
    pub fn topology(self) -> TopologyThresholds {
        match self {
            Revision::R1 => TopologyThresholds {
                max_faces: 20,
                max_curved_faces: 5,
                max_vertices: None,
            },
            Revision::R2 => TopologyThresholds {
                max_faces: 20,
                max_curved_faces: 9,
                max_vertices: Some(60),
            },
        }
    }

    pub fn curvature(self) -> CurvatureThresholds {
        CurvatureThresholds::default()
    }

    pub fn profile(self) -> SelectionProfile {
        let min_met = match self {
            Revision::R1 => 7,
            Revision::R2 => 8,
        };
        SelectionProfile {
            criteria: CriterionSet::standard(),
            min_met,
        }
    }
}

impl std::str::FromStr for Revision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "r1" => Ok(Revision::R1),
            "r2" => Ok(Revision::R2),
            other => Err(format!("unknown revision '{other}', expected r1 or r2")),
        }
    }
}
