//! In-memory kernel: solids are described up front and looked up by file name.

use crate::{
    BoundingBox, CadKernel, Curvature, EntityId, EntityKind, KernelError, ParamDomain, Solid,
    SurfaceType, VolumeProperties,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone)]
pub struct MemoryFace {
    pub surface: SurfaceType,
    pub domain: ParamDomain,
    pub curvature: Curvature,
}

impl MemoryFace {
    pub fn planar() -> Self {
        Self {
            surface: SurfaceType::Planar,
            domain: ParamDomain::new(0.0, 1.0, 0.0, 1.0),
            curvature: Curvature {
                defined: true,
                mean: 0.0,
                gaussian: 0.0,
            },
        }
    }

    pub fn cylindrical(radius: f64) -> Self {
        Self {
            surface: SurfaceType::Cylindrical,
            domain: ParamDomain::new(0.0, std::f64::consts::TAU, 0.0, 1.0),
            curvature: Curvature {
                defined: true,
                mean: -1.0 / (2.0 * radius),
                gaussian: 0.0,
            },
        }
    }

    pub fn curved(surface: SurfaceType, mean: f64) -> Self {
        Self {
            surface,
            domain: ParamDomain::new(0.0, 1.0, 0.0, 1.0),
            curvature: Curvature {
                defined: true,
                mean,
                gaussian: 0.0,
            },
        }
    }

    pub fn with_undefined_curvature(mut self) -> Self {
        self.curvature = Curvature::undefined();
        self
    }
}

#[derive(Debug, Clone)]
pub struct MemorySolid {
    pub faces: Vec<MemoryFace>,
    pub edges: usize,
    pub vertices: usize,
    pub bounding_box: BoundingBox,
    pub volume: f64,
}

impl MemorySolid {
    pub fn new(faces: Vec<MemoryFace>, edges: usize, vertices: usize) -> Self {
        Self {
            faces,
            edges,
            vertices,
            bounding_box: BoundingBox {
                min: [0.0; 3],
                max: [1.0; 3],
            },
            volume: 1.0,
        }
    }

    pub fn with_bounding_box(mut self, min: [f64; 3], max: [f64; 3]) -> Self {
        self.bounding_box = BoundingBox { min, max };
        self
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = volume;
        self
    }

    fn face(&self, face: EntityId) -> Result<&MemoryFace, KernelError> {
        usize::try_from(face.0)
            .ok()
            .and_then(|i| self.faces.get(i))
            .ok_or(KernelError::NoSuchFace(face))
    }
}

impl Solid for MemorySolid {
    fn entities(&self, kind: EntityKind) -> Vec<EntityId> {
        let n = match kind {
            EntityKind::Vertex => self.vertices,
            EntityKind::Edge => self.edges,
            EntityKind::Face => self.faces.len(),
        };
        (0..n as u64).map(EntityId).collect()
    }

    fn surface_type(&self, face: EntityId) -> Result<SurfaceType, KernelError> {
        Ok(self.face(face)?.surface)
    }

    fn parametric_domain(&self, face: EntityId) -> Result<ParamDomain, KernelError> {
        Ok(self.face(face)?.domain)
    }

    fn curvature_at(&self, face: EntityId, _u: f64, _v: f64) -> Result<Curvature, KernelError> {
        Ok(self.face(face)?.curvature)
    }

    fn bounding_box(&self) -> Result<BoundingBox, KernelError> {
        if self.faces.is_empty() {
            return Err(KernelError::EmptyBounds);
        }
        Ok(self.bounding_box)
    }

    fn volume_properties(&self) -> Result<VolumeProperties, KernelError> {
        Ok(VolumeProperties {
            volume: self.volume,
        })
    }
}

/// Kernel serving pre-registered solids keyed by file name.
#[derive(Debug, Default, Clone)]
pub struct MemoryKernel {
    solids: Arc<RwLock<HashMap<String, MemorySolid>>>,
}

impl MemoryKernel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_solid(self, file_name: &str, solid: MemorySolid) -> Self {
        self.insert(file_name, solid);
        self
    }

    pub fn insert(&self, file_name: &str, solid: MemorySolid) {
        if let Ok(mut solids) = self.solids.write() {
            solids.insert(file_name.to_string(), solid);
        }
    }
}

impl CadKernel for MemoryKernel {
    fn load(&self, path: &Path) -> Result<Box<dyn Solid>, KernelError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let solids = self
            .solids
            .read()
            .map_err(|_| KernelError::Io(std::io::Error::other("kernel state poisoned")))?;
        solids
            .get(name)
            .cloned()
            .map(|s| Box::new(s) as Box<dyn Solid>)
            .ok_or_else(|| {
                KernelError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no solid registered for {name}"),
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn loads_registered_solid_by_file_name() {
        let kernel = MemoryKernel::new().with_solid(
            "block.step",
            MemorySolid::new(vec![MemoryFace::planar(); 6], 12, 8),
        );
        let solid = kernel
            .load(&PathBuf::from("/some/dir/block.step"))
            .unwrap();
        assert_eq!(solid.entities(EntityKind::Face).len(), 6);
        assert_eq!(solid.entities(EntityKind::Edge).len(), 12);
        assert_eq!(solid.entities(EntityKind::Vertex).len(), 8);
        assert!(kernel.load(&PathBuf::from("other.step")).is_err());
    }

    #[test]
    fn out_of_range_face_is_an_error() {
        let solid = MemorySolid::new(vec![MemoryFace::planar()], 0, 0);
        assert!(matches!(
            solid.surface_type(EntityId(3)),
            Err(KernelError::NoSuchFace(EntityId(3)))
        ));
    }
}
