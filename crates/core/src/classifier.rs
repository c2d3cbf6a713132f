//! Simple/complex labelling from topology and from curvature.

use crate::extractor::ShapeFeatures;
use crate::models::Complexity;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TopologyThresholds {
    pub max_faces: usize,
    pub max_curved_faces: usize,
    pub max_vertices: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvatureThresholds {
    pub max_std_dev: f64,
    pub max_bbox_volume: f64,
}

impl Default for CurvatureThresholds {
    fn default() -> Self {
        Self {
            max_std_dev: 0.1,
            max_bbox_volume: 1.0,
        }
    }
}

/// All bounds are strict upper bounds.
pub fn topology_label(features: &ShapeFeatures, t: &TopologyThresholds) -> Complexity {
    let simple = features.faces < t.max_faces
        && features.curved_faces < t.max_curved_faces
        && t.max_vertices.map_or(true, |max| features.vertices < max);
    if simple {
        Complexity::Simple
    } else {
        Complexity::Complex
    }
}

/// NaN statistics compare false, so they always label `Complex`.
pub fn curvature_label(features: &ShapeFeatures, t: &CurvatureThresholds) -> Complexity {
    if features.curvature_std_dev < t.max_std_dev && features.bbox_volume < t.max_bbox_volume {
        Complexity::Simple
    } else {
        Complexity::Complex
    }
}
