//! CAD kernel abstractions: solid traversal, surface queries and whole-body metrics.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub mod geometry;
pub mod memory;
pub mod part21;
pub mod step;

#[derive(Debug, Error)]
pub enum KernelError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error at byte {offset}: {message}")]
    Parse { offset: usize, message: String },
    #[error("entity #{0} is referenced but not defined")]
    UnknownEntity(u64),
    #[error("malformed entity #{id}: {message}")]
    Malformed { id: u64, message: String },
    #[error("no such face: {0}")]
    NoSuchFace(EntityId),
    #[error("solid has no geometry to bound")]
    EmptyBounds,
    #[error("unknown kernel: {0}")]
    UnknownKernel(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Vertex,
    Edge,
    Face,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceType {
    Planar,
    Cylindrical,
    Conical,
    Spherical,
    Toroidal,
    BSpline,
    Revolution,
    Extrusion,
    Offset,
    Other,
}

impl SurfaceType {
    pub fn is_curved(self) -> bool {
        self != SurfaceType::Planar
    }
}

/// Parameter-space bounds of a face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamDomain {
    pub u_min: f64,
    pub u_max: f64,
    pub v_min: f64,
    pub v_max: f64,
}

impl ParamDomain {
    pub fn new(u_min: f64, u_max: f64, v_min: f64, v_max: f64) -> Self {
        Self {
            u_min,
            u_max,
            v_min,
            v_max,
        }
    }

    pub fn midpoint(&self) -> (f64, f64) {
        (
            (self.u_min + self.u_max) / 2.0,
            (self.v_min + self.v_max) / 2.0,
        )
    }

    pub fn is_finite(&self) -> bool {
        self.u_min.is_finite()
            && self.u_max.is_finite()
            && self.v_min.is_finite()
            && self.v_max.is_finite()
    }
}

/// Local curvature at a parameter point. `mean` and `gaussian` are only
/// meaningful when `defined` is true.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Curvature {
    pub defined: bool,
    pub mean: f64,
    pub gaussian: f64,
}

impl Curvature {
    pub fn undefined() -> Self {
        Self {
            defined: false,
            mean: f64::NAN,
            gaussian: f64::NAN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl BoundingBox {
    pub fn volume(&self) -> f64 {
        (self.max[0] - self.min[0]) * (self.max[1] - self.min[1]) * (self.max[2] - self.min[2])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeProperties {
    pub volume: f64,
}

/// A loaded boundary representation. One instance per analyzed file.
pub trait Solid {
    /// Distinct entities of the given kind, in a stable order.
    fn entities(&self, kind: EntityKind) -> Vec<EntityId>;
    fn surface_type(&self, face: EntityId) -> Result<SurfaceType, KernelError>;
    fn parametric_domain(&self, face: EntityId) -> Result<ParamDomain, KernelError>;
    fn curvature_at(&self, face: EntityId, u: f64, v: f64) -> Result<Curvature, KernelError>;
    fn bounding_box(&self) -> Result<BoundingBox, KernelError>;
    fn volume_properties(&self) -> Result<VolumeProperties, KernelError>;
}

pub trait CadKernel: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn Solid>, KernelError>;
}

#[derive(Default, Clone)]
pub struct KernelRegistry {
    kernels: HashMap<String, Arc<dyn CadKernel>>,
    pub preferred: Option<String>,
}

impl KernelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kernel(mut self, name: &str, kernel: Arc<dyn CadKernel>) -> Self {
        self.kernels.insert(name.to_string(), kernel);
        self
    }

    pub fn set_preferred(mut self, name: &str) -> Self {
        self.preferred = Some(name.to_string());
        self
    }

    pub fn kernel(&self, name: Option<&str>) -> Result<Arc<dyn CadKernel>, KernelError> {
        let key = name
            .map(str::to_string)
            .or_else(|| self.preferred.clone())
            .ok_or_else(|| KernelError::UnknownKernel("no kernel configured".into()))?;
        self.kernels
            .get(&key)
            .cloned()
            .ok_or(KernelError::UnknownKernel(key))
    }
}
