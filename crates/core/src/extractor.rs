//! Feature extraction from a loaded solid: topology counts, curvature
//! statistics, bounding-box and solid volume, cylindrical hole count.

use crate::error::FeatureError;
use kernel::{EntityId, EntityKind, Solid, SurfaceType};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeFeatures {
    pub faces: usize,
    pub curved_faces: usize,
    pub edges: usize,
    pub vertices: usize,
    /// Cylindrical faces. Bosses and fillets count too.
    pub hole_count: usize,
    pub bbox_volume: f64,
    /// NaN when no face has a defined curvature.
    pub mean_curvature: f64,
    /// Population standard deviation; NaN alongside `mean_curvature`.
    pub curvature_std_dev: f64,
    pub volume: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceCurvature {
    pub face: EntityId,
    pub surface: SurfaceType,
    pub u: f64,
    pub v: f64,
    pub mean: f64,
    pub gaussian: f64,
}

pub fn extract(solid: &dyn Solid) -> Result<ShapeFeatures, FeatureError> {
    let faces = solid.entities(EntityKind::Face);
    if faces.is_empty() {
        return Err(FeatureError::EmptyGeometry);
    }

    let mut curved_faces = 0;
    let mut hole_count = 0;
    for face in &faces {
        let surface = solid.surface_type(*face)?;
        if surface.is_curved() {
            curved_faces += 1;
            if surface == SurfaceType::Cylindrical {
                hole_count += 1;
            }
        }
    }

    let samples: Vec<f64> = curvature_profile(solid)?.iter().map(|c| c.mean).collect();
    let (mean_curvature, curvature_std_dev) = mean_and_std_dev(&samples);

    let bbox_volume = solid.bounding_box()?.volume();
    let volume = solid.volume_properties()?.volume;

    let features = ShapeFeatures {
        faces: faces.len(),
        curved_faces,
        edges: solid.entities(EntityKind::Edge).len(),
        vertices: solid.entities(EntityKind::Vertex).len(),
        hole_count,
        bbox_volume,
        mean_curvature,
        curvature_std_dev,
        volume,
    };
    debug!(?features, "extracted features");
    Ok(features)
}

/// Curvature at the parametric midpoint of every face where it is defined.
pub fn curvature_profile(solid: &dyn Solid) -> Result<Vec<FaceCurvature>, FeatureError> {
    let mut profile = Vec::new();
    for face in solid.entities(EntityKind::Face) {
        let domain = solid.parametric_domain(face)?;
        if !domain.is_finite() {
            debug!(%face, "face without a bounded parameter domain");
            continue;
        }
        let (u, v) = domain.midpoint();
        let curvature = solid.curvature_at(face, u, v)?;
        if !curvature.defined || !curvature.mean.is_finite() {
            continue;
        }
        profile.push(FaceCurvature {
            face,
            surface: solid.surface_type(face)?,
            u,
            v,
            mean: curvature.mean,
            gaussian: curvature.gaussian,
        });
    }
    Ok(profile)
}

fn mean_and_std_dev(samples: &[f64]) -> (f64, f64) {
    if samples.is_empty() {
        return (f64::NAN, f64::NAN);
    }
    let n = samples.len() as f64;
    let mean = samples.iter().sum::<f64>() / n;
    let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel::memory::{MemoryFace, MemorySolid};

    #[test]
    fn counts_curved_faces_and_cylindrical_holes() {
        let solid = MemorySolid::new(
            vec![
                MemoryFace::planar(),
                MemoryFace::planar(),
                MemoryFace::cylindrical(2.0),
                MemoryFace::cylindrical(4.0),
                MemoryFace::curved(SurfaceType::BSpline, 0.3),
            ],
            14,
            9,
        )
        .with_bounding_box([0.0, 0.0, 0.0], [2.0, 3.0, 4.0])
        .with_volume(17.5);

        let f = extract(&solid).unwrap();
        assert_eq!(f.faces, 5);
        assert_eq!(f.curved_faces, 3);
        assert_eq!(f.hole_count, 2);
        assert_eq!(f.edges, 14);
        assert_eq!(f.vertices, 9);
        assert_eq!(f.bbox_volume, 24.0);
        assert_eq!(f.volume, 17.5);
        assert!(f.hole_count <= f.curved_faces && f.curved_faces <= f.faces);
    }

    #[test]
    fn curvature_statistics_use_population_std_dev() {
        let solid = MemorySolid::new(
            vec![
                MemoryFace::curved(SurfaceType::Spherical, 1.0),
                MemoryFace::curved(SurfaceType::Spherical, 3.0),
            ],
            1,
            2,
        );
        let f = extract(&solid).unwrap();
        assert_eq!(f.mean_curvature, 2.0);
        assert_eq!(f.curvature_std_dev, 1.0);
    }

    #[test]
    fn undefined_curvature_is_skipped() {
        let solid = MemorySolid::new(
            vec![
                MemoryFace::planar(),
                MemoryFace::curved(SurfaceType::Offset, 9.0).with_undefined_curvature(),
            ],
            4,
            4,
        );
        let f = extract(&solid).unwrap();
        assert_eq!(f.mean_curvature, 0.0);
        assert_eq!(f.curvature_std_dev, 0.0);
        assert_eq!(curvature_profile(&solid).unwrap().len(), 1);
    }

    #[test]
    fn no_defined_curvature_yields_nan() {
        let solid = MemorySolid::new(
            vec![MemoryFace::curved(SurfaceType::Offset, 1.0).with_undefined_curvature()],
            1,
            1,
        );
        let f = extract(&solid).unwrap();
        assert!(f.mean_curvature.is_nan());
        assert!(f.curvature_std_dev.is_nan());
    }

    #[test]
    fn zero_face_solid_is_empty_geometry() {
        let solid = MemorySolid::new(vec![], 0, 0);
        assert!(matches!(extract(&solid), Err(FeatureError::EmptyGeometry)));
    }

    #[test]
    fn extraction_is_repeatable() {
        let solid = MemorySolid::new(
            vec![MemoryFace::cylindrical(1.5), MemoryFace::planar()],
            3,
            2,
        );
        let a = extract(&solid).unwrap();
        let b = extract(&solid).unwrap();
        assert_eq!(a, b);
    }
}
