//! STEP backend: builds a boundary representation from a Part 21 instance graph.

use crate::geometry::{
    angular_range, expand_knots, BSplineCurve, BSplineSurface, Curve, Frame, Surface, Vec3,
};
use crate::part21::{self, Exchange, Instance, Param};
use crate::{
    BoundingBox, CadKernel, Curvature, EntityId, EntityKind, KernelError, ParamDomain, Solid,
    SurfaceType, VolumeProperties,
};
use std::collections::{BTreeMap, BTreeSet};
use std::f64::consts::TAU;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

const POINT_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Copy)]
pub struct StepOptions {
    /// Segments used for a full turn of a circle or a whole B-spline edge.
    pub curve_samples: usize,
    /// Grid resolution per parameter direction when tessellating curved faces.
    pub grid: usize,
}

impl Default for StepOptions {
    fn default() -> Self {
        Self {
            curve_samples: 32,
            grid: 32,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct StepKernel {
    pub options: StepOptions,
}

impl StepKernel {
    pub fn new(options: StepOptions) -> Self {
        Self { options }
    }
}

impl CadKernel for StepKernel {
    fn load(&self, path: &Path) -> Result<Box<dyn Solid>, KernelError> {
        let bytes = fs::read(path)?;
        // string literals in exports are often Latin-1
        let text = String::from_utf8_lossy(&bytes);
        let exchange = part21::parse(&text)?;
        let solid = StepSolid::build(&exchange, self.options)?;
        debug!(
            path = %path.display(),
            faces = solid.faces.len(),
            edges = solid.edges.len(),
            vertices = solid.vertices.len(),
            "loaded STEP solid"
        );
        Ok(Box::new(solid))
    }
}

#[derive(Debug, Clone)]
struct FaceData {
    surface_type: SurfaceType,
    surface: Option<Surface>,
    same_sense: bool,
    /// Boundary samples, each loop oriented counter-clockwise about the surface normal.
    loops: Vec<Vec<Vec3>>,
    domain: ParamDomain,
}

#[derive(Debug, Clone)]
pub struct StepSolid {
    faces: BTreeMap<u64, FaceData>,
    edges: BTreeSet<u64>,
    vertices: BTreeSet<u64>,
    bounds: Option<BoundingBox>,
    volume: f64,
}

impl StepSolid {
    pub fn build(ex: &Exchange, options: StepOptions) -> Result<Self, KernelError> {
        let reader = Reader {
            ex,
            angle_scale: angle_scale(ex),
            options,
        };

        let mut faces = BTreeMap::new();
        let mut edges = BTreeSet::new();
        let mut vertices = BTreeSet::new();
        let mut groups: Vec<Vec<(u64, f64)>> = Vec::new();

        for shells in reader.shell_groups()? {
            let mut group = Vec::new();
            for (shell, sign) in shells {
                for face_id in reader.shell_faces(shell)? {
                    if !faces.contains_key(&face_id) {
                        let face = reader.face(face_id, &mut edges, &mut vertices)?;
                        faces.insert(face_id, face);
                    }
                    group.push((face_id, sign));
                }
            }
            groups.push(group);
        }

        let mut bounds = Bounds::default();
        for vid in &vertices {
            if let Ok(p) = reader.vertex_point(*vid) {
                bounds.add(&p);
            }
        }

        let mut volume = 0.0;
        let mut skipped = 0usize;
        for group in &groups {
            let mut signed = 0.0;
            for (face_id, shell_sign) in group {
                let Some(face) = faces.get(face_id) else {
                    continue;
                };
                let sign = if face.same_sense { *shell_sign } else { -*shell_sign };
                match face_flux(face, options.grid, &mut bounds) {
                    Some(flux) => signed += sign * flux,
                    None => skipped += 1,
                }
            }
            volume += signed.abs() / 6.0;
        }
        if skipped > 0 {
            warn!(faces = skipped, "faces without evaluable geometry left out of volume");
        }

        Ok(Self {
            faces,
            edges,
            vertices,
            bounds: bounds.finish(),
            volume,
        })
    }

    fn face(&self, face: EntityId) -> Result<&FaceData, KernelError> {
        self.faces.get(&face.0).ok_or(KernelError::NoSuchFace(face))
    }
}

impl Solid for StepSolid {
    fn entities(&self, kind: EntityKind) -> Vec<EntityId> {
        match kind {
            EntityKind::Vertex => self.vertices.iter().copied().map(EntityId).collect(),
            EntityKind::Edge => self.edges.iter().copied().map(EntityId).collect(),
            EntityKind::Face => self.faces.keys().copied().map(EntityId).collect(),
        }
    }

    fn surface_type(&self, face: EntityId) -> Result<SurfaceType, KernelError> {
        Ok(self.face(face)?.surface_type)
    }

    fn parametric_domain(&self, face: EntityId) -> Result<ParamDomain, KernelError> {
        Ok(self.face(face)?.domain)
    }

    fn curvature_at(&self, face: EntityId, u: f64, v: f64) -> Result<Curvature, KernelError> {
        let data = self.face(face)?;
        let Some(surface) = &data.surface else {
            return Ok(Curvature::undefined());
        };
        if matches!(surface, Surface::Plane(_)) {
            return Ok(Curvature {
                defined: true,
                mean: 0.0,
                gaussian: 0.0,
            });
        }
        let d = data.domain;
        let step = if d.is_finite() {
            (
                ((d.u_max - d.u_min).abs() * 1e-4).max(1e-7),
                ((d.v_max - d.v_min).abs() * 1e-4).max(1e-7),
            )
        } else {
            (1e-5, 1e-5)
        };
        Ok(surface.curvature(u, v, step))
    }

    fn bounding_box(&self) -> Result<BoundingBox, KernelError> {
        self.bounds.ok_or(KernelError::EmptyBounds)
    }

    fn volume_properties(&self) -> Result<VolumeProperties, KernelError> {
        Ok(VolumeProperties {
            volume: self.volume,
        })
    }
}

/// Six times the signed flux of `x / 3` through the face, oriented along the
/// surface normal. Planar faces use their boundary loops, curved faces a grid
/// over the parametric domain.
fn face_flux(face: &FaceData, grid: usize, bounds: &mut Bounds) -> Option<f64> {
    for lp in &face.loops {
        for p in lp {
            bounds.add(p);
        }
    }
    match &face.surface {
        Some(Surface::Plane(_)) => Some(
            face.loops
                .iter()
                .filter(|lp| lp.len() >= 3)
                .map(|lp| {
                    let apex = lp[0];
                    lp.windows(2)
                        .skip(1)
                        .map(|w| apex.dot(&w[0].cross(&w[1])))
                        .sum::<f64>()
                })
                .sum(),
        ),
        Some(surface) if face.domain.is_finite() => {
            let d = face.domain;
            let n = grid.max(2);
            let mut rows = Vec::with_capacity(n + 1);
            for i in 0..=n {
                let u = d.u_min + (d.u_max - d.u_min) * i as f64 / n as f64;
                let row: Vec<Vec3> = (0..=n)
                    .map(|j| surface.point(u, d.v_min + (d.v_max - d.v_min) * j as f64 / n as f64))
                    .collect();
                for p in &row {
                    bounds.add(p);
                }
                rows.push(row);
            }
            let mut flux = 0.0;
            for i in 0..n {
                for j in 0..n {
                    let (p00, p10) = (rows[i][j], rows[i + 1][j]);
                    let (p11, p01) = (rows[i + 1][j + 1], rows[i][j + 1]);
                    flux += p00.dot(&p10.cross(&p11)) + p00.dot(&p11.cross(&p01));
                }
            }
            flux.is_finite().then_some(flux)
        }
        _ => None,
    }
}

#[derive(Debug, Default)]
struct Bounds {
    min: Option<Vec3>,
    max: Option<Vec3>,
}

impl Bounds {
    fn add(&mut self, p: &Vec3) {
        if !p.iter().all(|c| c.is_finite()) {
            return;
        }
        self.min = Some(self.min.map_or(*p, |m| m.inf(p)));
        self.max = Some(self.max.map_or(*p, |m| m.sup(p)));
    }

    fn finish(&self) -> Option<BoundingBox> {
        let (min, max) = (self.min?, self.max?);
        Some(BoundingBox {
            min: [min.x, min.y, min.z],
            max: [max.x, max.y, max.z],
        })
    }
}

/// Radians per unit of plane angle declared in the file.
fn angle_scale(ex: &Exchange) -> f64 {
    let degrees = ex.instances.values().any(|inst| {
        inst.has("PLANE_ANGLE_UNIT")
            && inst
                .record("CONVERSION_BASED_UNIT")
                .and_then(|r| r.params.first())
                .is_some_and(|p| matches!(p, Param::Str(s) if s.eq_ignore_ascii_case("DEGREE")))
    });
    if degrees {
        TAU / 360.0
    } else {
        1.0
    }
}

struct Reader<'a> {
    ex: &'a Exchange,
    angle_scale: f64,
    options: StepOptions,
}

impl<'a> Reader<'a> {
    fn malformed(id: u64, message: &str) -> KernelError {
        KernelError::Malformed {
            id,
            message: message.to_string(),
        }
    }

    /// Parameters of a simple instance, checked against the accepted entity names.
    fn params(&self, id: u64, names: &[&str]) -> Result<(&'a str, &'a [Param]), KernelError> {
        let inst = self.ex.get(id)?;
        match inst.records.as_slice() {
            [rec] if names.contains(&rec.name.as_str()) => {
                Ok((rec.name.as_str(), rec.params.as_slice()))
            }
            _ => Err(Self::malformed(id, &format!("expected one of {names:?}"))),
        }
    }

    fn reference(id: u64, params: &[Param], i: usize) -> Result<u64, KernelError> {
        params
            .get(i)
            .and_then(Param::as_ref_id)
            .ok_or_else(|| Self::malformed(id, &format!("parameter {i} is not a reference")))
    }

    fn number(id: u64, params: &[Param], i: usize) -> Result<f64, KernelError> {
        params
            .get(i)
            .and_then(Param::as_f64)
            .ok_or_else(|| Self::malformed(id, &format!("parameter {i} is not a number")))
    }

    fn flag(params: &[Param], i: usize) -> bool {
        params.get(i).and_then(Param::as_bool).unwrap_or(true)
    }

    fn list<'p>(id: u64, params: &'p [Param], i: usize) -> Result<&'p [Param], KernelError> {
        params
            .get(i)
            .and_then(Param::as_list)
            .ok_or_else(|| Self::malformed(id, &format!("parameter {i} is not a list")))
    }

    fn refs(id: u64, params: &[Param], i: usize) -> Result<Vec<u64>, KernelError> {
        Self::list(id, params, i)?
            .iter()
            .map(|p| {
                p.as_ref_id()
                    .ok_or_else(|| Self::malformed(id, "list item is not a reference"))
            })
            .collect()
    }

    fn numbers(id: u64, params: &[Param], i: usize) -> Result<Vec<f64>, KernelError> {
        Self::list(id, params, i)?
            .iter()
            .map(|p| {
                p.as_f64()
                    .ok_or_else(|| Self::malformed(id, "list item is not a number"))
            })
            .collect()
    }

    /// Groups of `(shell, orientation sign)`, one group per solid.
    fn shell_groups(&self) -> Result<Vec<Vec<(u64, f64)>>, KernelError> {
        let mut groups = Vec::new();
        for id in self.ex.ids_of("MANIFOLD_SOLID_BREP") {
            let (_, p) = self.params(id, &["MANIFOLD_SOLID_BREP"])?;
            groups.push(vec![(self.closed_shell(Self::reference(id, p, 1)?)?, 1.0)]);
        }
        for id in self.ex.ids_of("BREP_WITH_VOIDS") {
            let (_, p) = self.params(id, &["BREP_WITH_VOIDS"])?;
            let mut group = vec![(self.closed_shell(Self::reference(id, p, 1)?)?, 1.0)];
            for void in Self::refs(id, p, 2)? {
                let (_, vp) = self.params(void, &["ORIENTED_CLOSED_SHELL"])?;
                let sign = if Self::flag(vp, 3) { 1.0 } else { -1.0 };
                group.push((Self::reference(void, vp, 2)?, sign));
            }
            groups.push(group);
        }
        if groups.is_empty() {
            let mut shells = self.ex.ids_of("CLOSED_SHELL");
            shells.extend(self.ex.ids_of("OPEN_SHELL"));
            shells.sort_unstable();
            groups.extend(shells.into_iter().map(|s| vec![(s, 1.0)]));
        }
        Ok(groups)
    }

    fn closed_shell(&self, id: u64) -> Result<u64, KernelError> {
        let (name, p) = self.params(id, &["CLOSED_SHELL", "ORIENTED_CLOSED_SHELL"])?;
        if name == "ORIENTED_CLOSED_SHELL" {
            Self::reference(id, p, 2)
        } else {
            Ok(id)
        }
    }

    fn shell_faces(&self, shell: u64) -> Result<Vec<u64>, KernelError> {
        let (_, p) = self.params(shell, &["CLOSED_SHELL", "OPEN_SHELL"])?;
        Self::refs(shell, p, 1)
    }

    fn face(
        &self,
        id: u64,
        edges: &mut BTreeSet<u64>,
        vertices: &mut BTreeSet<u64>,
    ) -> Result<FaceData, KernelError> {
        let (_, p) = self.params(id, &["ADVANCED_FACE", "FACE_SURFACE"])?;
        let surface_id = Self::reference(id, p, 2)?;
        let same_sense = Self::flag(p, 3);

        let mut loops = Vec::new();
        let mut seams: Vec<Vec<Vec3>> = Vec::new();
        for bound in Self::refs(id, p, 1)? {
            let (_, bp) = self.params(bound, &["FACE_OUTER_BOUND", "FACE_BOUND"])?;
            let loop_id = Self::reference(bound, bp, 1)?;
            let mut samples = self.face_loop(loop_id, edges, vertices, &mut seams)?;
            if !Self::flag(bp, 2) {
                samples.reverse();
            }
            loops.push(samples);
        }

        let (surface_type, surface) = match self.surface(surface_id) {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!(face = id, error = %err, "unreadable surface geometry");
                (SurfaceType::Other, None)
            }
        };
        let domain = surface
            .as_ref()
            .map(|s| face_domain(s, &loops, &seams, self.options.curve_samples))
            .unwrap_or_else(|| ParamDomain::new(f64::NAN, f64::NAN, f64::NAN, f64::NAN));

        Ok(FaceData {
            surface_type,
            surface,
            same_sense,
            loops,
            domain,
        })
    }

    fn face_loop(
        &self,
        id: u64,
        edges: &mut BTreeSet<u64>,
        vertices: &mut BTreeSet<u64>,
        seams: &mut Vec<Vec<Vec3>>,
    ) -> Result<Vec<Vec3>, KernelError> {
        let (name, p) = self.params(id, &["EDGE_LOOP", "VERTEX_LOOP", "POLY_LOOP"])?;
        match name {
            "VERTEX_LOOP" => {
                let vid = Self::reference(id, p, 1)?;
                vertices.insert(vid);
                Ok(vec![self.vertex_point(vid)?])
            }
            "POLY_LOOP" => Self::refs(id, p, 1)?
                .into_iter()
                .map(|pid| self.cartesian_point(pid))
                .collect(),
            _ => {
                let oriented = Self::refs(id, p, 1)?;
                let mut uses: BTreeMap<u64, usize> = BTreeMap::new();
                let mut out: Vec<Vec3> = Vec::new();
                let mut per_edge = Vec::new();
                for oe in oriented {
                    let (_, op) = self.params(oe, &["ORIENTED_EDGE"])?;
                    let edge = Self::reference(oe, op, 3)?;
                    let mut samples = self.edge_samples(edge, vertices)?;
                    edges.insert(edge);
                    *uses.entry(edge).or_default() += 1;
                    if !Self::flag(op, 4) {
                        samples.reverse();
                    }
                    per_edge.push((edge, samples.clone()));
                    for s in samples {
                        if out
                            .last()
                            .is_some_and(|last: &Vec3| (last - s).norm() <= POINT_TOLERANCE)
                        {
                            continue;
                        }
                        out.push(s);
                    }
                }
                for (edge, samples) in per_edge {
                    if uses.get(&edge).copied().unwrap_or(0) > 1 {
                        seams.push(samples);
                    }
                }
                if out.len() > 1 && (out[0] - out[out.len() - 1]).norm() <= POINT_TOLERANCE {
                    out.pop();
                }
                Ok(out)
            }
        }
    }

    fn edge_samples(
        &self,
        id: u64,
        vertices: &mut BTreeSet<u64>,
    ) -> Result<Vec<Vec3>, KernelError> {
        let (_, p) = self.params(id, &["EDGE_CURVE"])?;
        let (v1, v2) = (Self::reference(id, p, 1)?, Self::reference(id, p, 2)?);
        vertices.insert(v1);
        vertices.insert(v2);
        let (start, end) = (self.vertex_point(v1)?, self.vertex_point(v2)?);
        let same_sense = Self::flag(p, 4);
        let curve = match Self::reference(id, p, 3).and_then(|c| self.curve(c)) {
            Ok(curve) => curve,
            Err(err) => {
                debug!(edge = id, error = %err, "edge curve not evaluable, using chord");
                None
            }
        };
        let n = self.options.curve_samples.max(4);

        let samples = match curve {
            Some(c) if c.is_periodic() => {
                let (Some(t1), Some(t2)) = (c.invert(&start), c.invert(&end)) else {
                    return Ok(vec![start, end]);
                };
                let closed = v1 == v2 || (start - end).norm() <= POINT_TOLERANCE;
                let sweep = if same_sense {
                    let d = (t2 - t1).rem_euclid(TAU);
                    if closed || d < 1e-12 {
                        TAU
                    } else {
                        d
                    }
                } else {
                    let d = (t1 - t2).rem_euclid(TAU);
                    if closed || d < 1e-12 {
                        -TAU
                    } else {
                        -d
                    }
                };
                let k = ((n as f64 * sweep.abs() / TAU).ceil() as usize).max(1);
                let mut pts: Vec<Vec3> = (0..=k)
                    .map(|i| c.point(t1 + sweep * i as f64 / k as f64))
                    .collect();
                pts[0] = start;
                pts[k] = end;
                pts
            }
            Some(Curve::BSpline(b)) => {
                let (a, z) = b.domain();
                let mut pts: Vec<Vec3> = (0..=n)
                    .map(|i| b.point(a + (z - a) * i as f64 / n as f64))
                    .collect();
                if !same_sense {
                    pts.reverse();
                }
                pts[0] = start;
                pts[n] = end;
                pts
            }
            _ => vec![start, end],
        };
        Ok(samples)
    }

    fn vertex_point(&self, id: u64) -> Result<Vec3, KernelError> {
        let (_, p) = self.params(id, &["VERTEX_POINT"])?;
        self.cartesian_point(Self::reference(id, p, 1)?)
    }

    fn cartesian_point(&self, id: u64) -> Result<Vec3, KernelError> {
        let (_, p) = self.params(id, &["CARTESIAN_POINT"])?;
        let c = Self::numbers(id, p, 1)?;
        Ok(Vec3::new(
            c.first().copied().unwrap_or(0.0),
            c.get(1).copied().unwrap_or(0.0),
            c.get(2).copied().unwrap_or(0.0),
        ))
    }

    fn direction(&self, id: u64) -> Result<Vec3, KernelError> {
        let (_, p) = self.params(id, &["DIRECTION"])?;
        let c = Self::numbers(id, p, 1)?;
        Ok(Vec3::new(
            c.first().copied().unwrap_or(0.0),
            c.get(1).copied().unwrap_or(0.0),
            c.get(2).copied().unwrap_or(0.0),
        ))
    }

    fn optional_direction(&self, params: &[Param], i: usize) -> Result<Option<Vec3>, KernelError> {
        match params.get(i).and_then(Param::as_ref_id) {
            Some(d) => self.direction(d).map(Some),
            None => Ok(None),
        }
    }

    fn placement(&self, id: u64) -> Result<Frame, KernelError> {
        let (_, p) = self.params(id, &["AXIS2_PLACEMENT_3D"])?;
        let origin = self.cartesian_point(Self::reference(id, p, 1)?)?;
        Ok(Frame::new(
            origin,
            self.optional_direction(p, 2)?,
            self.optional_direction(p, 3)?,
        ))
    }

    fn vector(&self, id: u64) -> Result<Vec3, KernelError> {
        let (_, p) = self.params(id, &["VECTOR"])?;
        let dir = self.direction(Self::reference(id, p, 1)?)?;
        let magnitude = Self::number(id, p, 2)?;
        Ok(dir.try_normalize(f64::EPSILON).unwrap_or(dir) * magnitude)
    }

    fn curve(&self, id: u64) -> Result<Option<Curve>, KernelError> {
        let inst = self.ex.get(id)?;
        if inst.is_complex() {
            return self.bspline_curve(id, inst).map(|b| b.map(Curve::BSpline));
        }
        let Some(rec) = inst.records.first() else {
            return Ok(None);
        };
        let p = &rec.params[..];
        let curve = match rec.name.as_str() {
            "LINE" => Some(Curve::Line {
                origin: self.cartesian_point(Self::reference(id, p, 1)?)?,
                direction: self.vector(Self::reference(id, p, 2)?)?,
            }),
            "CIRCLE" => Some(Curve::Circle {
                frame: self.placement(Self::reference(id, p, 1)?)?,
                radius: Self::number(id, p, 2)?,
            }),
            "ELLIPSE" => Some(Curve::Ellipse {
                frame: self.placement(Self::reference(id, p, 1)?)?,
                semi_axis_1: Self::number(id, p, 2)?,
                semi_axis_2: Self::number(id, p, 3)?,
            }),
            "B_SPLINE_CURVE_WITH_KNOTS" => self.bspline_curve(id, inst)?.map(Curve::BSpline),
            "SURFACE_CURVE" | "SEAM_CURVE" | "INTERSECTION_CURVE" | "TRIMMED_CURVE" => {
                self.curve(Self::reference(id, p, 1)?)?
            }
            _ => None,
        };
        Ok(curve)
    }

    fn bspline_curve(
        &self,
        id: u64,
        inst: &Instance,
    ) -> Result<Option<BSplineCurve>, KernelError> {
        let (head, knots, weights) = if inst.is_complex() {
            let (Some(head), Some(knots)) = (
                inst.record("B_SPLINE_CURVE"),
                inst.record("B_SPLINE_CURVE_WITH_KNOTS"),
            ) else {
                return Ok(None);
            };
            let weights = match inst.record("RATIONAL_B_SPLINE_CURVE") {
                Some(r) => Some(Self::numbers(id, &r.params, 0)?),
                None => None,
            };
            (&head.params[..], &knots.params[..], weights)
        } else {
            let p = inst.records.first().map_or(&[][..], |r| &r.params[..]);
            if p.len() < 9 {
                return Err(Self::malformed(id, "truncated B-spline curve"));
            }
            (&p[1..6], &p[6..9], None)
        };
        let degree = Self::number(id, head, 0)? as usize;
        let points = Self::refs(id, head, 1)?
            .into_iter()
            .map(|pid| self.cartesian_point(pid))
            .collect::<Result<Vec<_>, _>>()?;
        let mults: Vec<usize> = Self::numbers(id, knots, 0)?.iter().map(|m| *m as usize).collect();
        let knots = expand_knots(&Self::numbers(id, knots, 1)?, &mults);
        let consistent = degree >= 1
            && points.len() > degree
            && knots.len() == points.len() + degree + 1
            && weights.as_ref().map_or(true, |w| w.len() == points.len());
        if !consistent {
            debug!(curve = id, "inconsistent B-spline curve definition");
            return Ok(None);
        }
        Ok(Some(BSplineCurve {
            degree,
            knots,
            points,
            weights,
        }))
    }

    fn surface(&self, id: u64) -> Result<(SurfaceType, Option<Surface>), KernelError> {
        let inst = self.ex.get(id)?;
        if inst.is_complex() {
            if inst.has("B_SPLINE_SURFACE") {
                return Ok((
                    SurfaceType::BSpline,
                    self.bspline_surface(id, inst)?.map(Surface::BSpline),
                ));
            }
            return Ok((SurfaceType::Other, None));
        }
        let Some(rec) = inst.records.first() else {
            return Ok((SurfaceType::Other, None));
        };
        let p = &rec.params[..];
        let resolved = match rec.name.as_str() {
            "PLANE" => (
                SurfaceType::Planar,
                Some(Surface::Plane(self.placement(Self::reference(id, p, 1)?)?)),
            ),
            "CYLINDRICAL_SURFACE" => (
                SurfaceType::Cylindrical,
                Some(Surface::Cylinder {
                    frame: self.placement(Self::reference(id, p, 1)?)?,
                    radius: Self::number(id, p, 2)?,
                }),
            ),
            "CONICAL_SURFACE" => (
                SurfaceType::Conical,
                Some(Surface::Cone {
                    frame: self.placement(Self::reference(id, p, 1)?)?,
                    radius: Self::number(id, p, 2)?,
                    semi_angle: Self::number(id, p, 3)? * self.angle_scale,
                }),
            ),
            "SPHERICAL_SURFACE" => (
                SurfaceType::Spherical,
                Some(Surface::Sphere {
                    frame: self.placement(Self::reference(id, p, 1)?)?,
                    radius: Self::number(id, p, 2)?,
                }),
            ),
            "TOROIDAL_SURFACE" | "DEGENERATE_TOROIDAL_SURFACE" => (
                SurfaceType::Toroidal,
                Some(Surface::Torus {
                    frame: self.placement(Self::reference(id, p, 1)?)?,
                    major: Self::number(id, p, 2)?,
                    minor: Self::number(id, p, 3)?,
                }),
            ),
            "B_SPLINE_SURFACE_WITH_KNOTS" => (
                SurfaceType::BSpline,
                self.bspline_surface(id, inst)?.map(Surface::BSpline),
            ),
            "SURFACE_OF_REVOLUTION" => {
                let curve = self.curve(Self::reference(id, p, 1)?)?;
                let axis_id = Self::reference(id, p, 2)?;
                let (_, ap) = self.params(axis_id, &["AXIS1_PLACEMENT"])?;
                let origin = self.cartesian_point(Self::reference(axis_id, ap, 1)?)?;
                let frame = Frame::new(origin, self.optional_direction(ap, 2)?, None);
                (
                    SurfaceType::Revolution,
                    curve.map(|curve| Surface::Revolution { curve, frame }),
                )
            }
            "SURFACE_OF_LINEAR_EXTRUSION" => {
                let curve = self.curve(Self::reference(id, p, 1)?)?;
                let direction = self.vector(Self::reference(id, p, 2)?)?;
                (
                    SurfaceType::Extrusion,
                    curve.map(|curve| Surface::Extrusion { curve, direction }),
                )
            }
            "RECTANGULAR_TRIMMED_SURFACE" => self.surface(Self::reference(id, p, 1)?)?,
            "OFFSET_SURFACE" => (SurfaceType::Offset, None),
            name if name.starts_with("B_SPLINE_SURFACE")
                || name.ends_with("UNIFORM_SURFACE")
                || name == "BEZIER_SURFACE" =>
            {
                (SurfaceType::BSpline, None)
            }
            _ => (SurfaceType::Other, None),
        };
        Ok(resolved)
    }

    fn bspline_surface(
        &self,
        id: u64,
        inst: &Instance,
    ) -> Result<Option<BSplineSurface>, KernelError> {
        let (head, knots, weights) = if inst.is_complex() {
            let (Some(head), Some(knots)) = (
                inst.record("B_SPLINE_SURFACE"),
                inst.record("B_SPLINE_SURFACE_WITH_KNOTS"),
            ) else {
                return Ok(None);
            };
            let not_number = || Self::malformed(id, "weight is not a number");
            let weights = match inst.record("RATIONAL_B_SPLINE_SURFACE") {
                Some(r) => Some(
                    Self::list(id, &r.params, 0)?
                        .iter()
                        .map(|row| {
                            row.as_list()
                                .ok_or_else(|| Self::malformed(id, "weight row is not a list"))?
                                .iter()
                                .map(|w| w.as_f64().ok_or_else(not_number))
                                .collect::<Result<Vec<f64>, _>>()
                        })
                        .collect::<Result<Vec<_>, _>>()?,
                ),
                None => None,
            };
            (&head.params[..], &knots.params[..], weights)
        } else {
            let p = inst.records.first().map_or(&[][..], |r| &r.params[..]);
            if p.len() < 13 {
                return Err(Self::malformed(id, "truncated B-spline surface"));
            }
            (&p[1..8], &p[8..13], None)
        };
        let u_degree = Self::number(id, head, 0)? as usize;
        let v_degree = Self::number(id, head, 1)? as usize;
        let points = Self::list(id, head, 2)?
            .iter()
            .map(|row| {
                row.as_list()
                    .ok_or_else(|| Self::malformed(id, "control row is not a list"))?
                    .iter()
                    .map(|r| {
                        r.as_ref_id()
                            .ok_or_else(|| Self::malformed(id, "control point is not a reference"))
                            .and_then(|pid| self.cartesian_point(pid))
                    })
                    .collect::<Result<Vec<Vec3>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mults = |i| -> Result<Vec<usize>, KernelError> {
            Ok(Self::numbers(id, knots, i)?.iter().map(|m| *m as usize).collect())
        };
        let (u_mults, v_mults) = (mults(0)?, mults(1)?);
        let u_knots = expand_knots(&Self::numbers(id, knots, 2)?, &u_mults);
        let v_knots = expand_knots(&Self::numbers(id, knots, 3)?, &v_mults);

        let nu = points.len();
        let nv = points.first().map_or(0, Vec::len);
        let consistent = u_degree >= 1
            && v_degree >= 1
            && nu > u_degree
            && nv > v_degree
            && points.iter().all(|row| row.len() == nv)
            && u_knots.len() == nu + u_degree + 1
            && v_knots.len() == nv + v_degree + 1
            && weights
                .as_ref()
                .map_or(true, |w| w.len() == nu && w.iter().all(|row| row.len() == nv));
        if !consistent {
            debug!(surface = id, "inconsistent B-spline surface definition");
            return Ok(None);
        }
        Ok(Some(BSplineSurface {
            u_degree,
            v_degree,
            u_knots,
            v_knots,
            points,
            weights,
        }))
    }
}

/// Parameter bounds of a face: inverse image of its boundary for analytic
/// surfaces, the natural range otherwise.
fn face_domain(
    surface: &Surface,
    loops: &[Vec<Vec3>],
    seams: &[Vec<Vec3>],
    samples: usize,
) -> ParamDomain {
    let undefined = ParamDomain::new(f64::NAN, f64::NAN, f64::NAN, f64::NAN);
    let points: Vec<&Vec3> = loops.iter().flatten().collect();
    let params: Option<Vec<(f64, f64)>> = points.iter().map(|p| surface.invert(p)).collect();

    let params = match params {
        Some(params) if !params.is_empty() => params,
        _ => {
            return surface
                .natural_domain()
                .map(|(a, b, c, d)| ParamDomain::new(a, b, c, d))
                .unwrap_or(undefined);
        }
    };

    // a gap wider than a few boundary segments is a real opening
    let full_gap = 2.5 * TAU / samples.max(4) as f64;
    let (u_periodic, v_periodic) = surface.periodic();
    let seam_params: Vec<Vec<(f64, f64)>> = seams
        .iter()
        .filter_map(|s| s.iter().map(|p| surface.invert(p)).collect())
        .collect();
    let seam_constant = |pick: fn(&(f64, f64)) -> f64| {
        seam_params.iter().any(|s| {
            let (lo, hi) = s
                .iter()
                .map(pick)
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| {
                    (lo.min(x), hi.max(x))
                });
            s.len() > 1 && (hi - lo) < 1e-6
        })
    };

    let range = |values: Vec<f64>, periodic: bool, seam: bool| -> (f64, f64) {
        if periodic {
            if seam {
                return (0.0, TAU);
            }
            return angular_range(&values, full_gap).unwrap_or((f64::NAN, f64::NAN));
        }
        values
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| (lo.min(*x), hi.max(*x)))
    };

    let (u_min, u_max) = range(
        params.iter().map(|p| p.0).collect(),
        u_periodic,
        u_periodic && seam_constant(|p| p.0),
    );
    let (v_min, v_max) = range(
        params.iter().map(|p| p.1).collect(),
        v_periodic,
        v_periodic && seam_constant(|p| p.1),
    );
    ParamDomain::new(u_min, u_max, v_min, v_max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::fmt::Write as _;

    /// Writes a closed polyhedron; faces list vertex indices counter-clockwise
    /// seen from outside.
    fn polyhedron_step(points: &[[f64; 3]], faces: &[&[usize]]) -> String {
        let mut out = String::from(
            "ISO-10303-21;\nHEADER;\nFILE_SCHEMA(('CONFIG_CONTROL_DESIGN'));\nENDSEC;\nDATA;\n",
        );
        let mut next = 1u64;
        let mut id = || {
            let current = next;
            next += 1;
            current
        };
        let mut vertex_ids = Vec::new();
        for p in points {
            let cp = id();
            let vp = id();
            let _ = writeln!(out, "#{cp}=CARTESIAN_POINT('',({:?},{:?},{:?}));", p[0], p[1], p[2]);
            let _ = writeln!(out, "#{vp}=VERTEX_POINT('',#{cp});");
            vertex_ids.push(vp);
        }
        let mut edges: BTreeMap<(usize, usize), u64> = BTreeMap::new();
        let mut face_ids = Vec::new();
        for face in faces {
            let mut oriented = Vec::new();
            for k in 0..face.len() {
                let (a, b) = (face[k], face[(k + 1) % face.len()]);
                let key = (a.min(b), a.max(b));
                let edge = match edges.get(&key) {
                    Some(e) => *e,
                    None => {
                        let (s, e) = (points[key.0], points[key.1]);
                        let (cp, dir, vec, line, ec) = (id(), id(), id(), id(), id());
                        let d = [e[0] - s[0], e[1] - s[1], e[2] - s[2]];
                        let len = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();
                        let _ = writeln!(
                            out,
                            "#{cp}=CARTESIAN_POINT('',({:?},{:?},{:?}));",
                            s[0], s[1], s[2]
                        );
                        let _ = writeln!(
                            out,
                            "#{dir}=DIRECTION('',({:?},{:?},{:?}));",
                            d[0] / len,
                            d[1] / len,
                            d[2] / len
                        );
                        let _ = writeln!(out, "#{vec}=VECTOR('',#{dir},{len:?});");
                        let _ = writeln!(out, "#{line}=LINE('',#{cp},#{vec});");
                        let _ = writeln!(
                            out,
                            "#{ec}=EDGE_CURVE('',#{},#{},#{line},.T.);",
                            vertex_ids[key.0], vertex_ids[key.1]
                        );
                        edges.insert(key, ec);
                        ec
                    }
                };
                let oe = id();
                let orientation = if a < b { ".T." } else { ".F." };
                let _ = writeln!(out, "#{oe}=ORIENTED_EDGE('',*,*,#{edge},{orientation});");
                oriented.push(format!("#{oe}"));
            }
            let (p0, p1, p2) = (points[face[0]], points[face[1]], points[face[2]]);
            let u = Vec3::new(p1[0] - p0[0], p1[1] - p0[1], p1[2] - p0[2]);
            let w = Vec3::new(p2[0] - p0[0], p2[1] - p0[1], p2[2] - p0[2]);
            let n = u.cross(&w).normalize();
            let u = u.normalize();
            let (lp, bound, origin, axis) = (id(), id(), id(), id());
            let (refd, plane, face_id, place) = (id(), id(), id(), id());
            let _ = writeln!(out, "#{lp}=EDGE_LOOP('',({}));", oriented.join(","));
            let _ = writeln!(out, "#{bound}=FACE_OUTER_BOUND('',#{lp},.T.);");
            let _ = writeln!(
                out,
                "#{origin}=CARTESIAN_POINT('',({:?},{:?},{:?}));",
                p0[0], p0[1], p0[2]
            );
            let _ = writeln!(out, "#{axis}=DIRECTION('',({:?},{:?},{:?}));", n.x, n.y, n.z);
            let _ = writeln!(out, "#{refd}=DIRECTION('',({:?},{:?},{:?}));", u.x, u.y, u.z);
            let _ = writeln!(out, "#{place}=AXIS2_PLACEMENT_3D('',#{origin},#{axis},#{refd});");
            let _ = writeln!(out, "#{plane}=PLANE('',#{place});");
            let _ = writeln!(out, "#{face_id}=ADVANCED_FACE('',(#{bound}),#{plane},.T.);");
            face_ids.push(format!("#{face_id}"));
        }
        let (shell, solid) = (id(), id());
        let _ = writeln!(out, "#{shell}=CLOSED_SHELL('',({}));", face_ids.join(","));
        let _ = writeln!(out, "#{solid}=MANIFOLD_SOLID_BREP('block',#{shell});");
        out.push_str("ENDSEC;\nEND-ISO-10303-21;\n");
        out
    }

    fn unit_cube() -> String {
        let points = [
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
            [0.0, 0.0, 1.0],
            [1.0, 0.0, 1.0],
            [1.0, 1.0, 1.0],
            [0.0, 1.0, 1.0],
        ];
        let faces: [&[usize]; 6] = [
            &[0, 3, 2, 1],
            &[4, 5, 6, 7],
            &[0, 1, 5, 4],
            &[3, 7, 6, 2],
            &[0, 4, 7, 3],
            &[1, 2, 6, 5],
        ];
        polyhedron_step(&points, &faces)
    }

    const CYLINDER: &str = "ISO-10303-21;
HEADER;
FILE_SCHEMA(('AUTOMOTIVE_DESIGN'));
ENDSEC;
DATA;
#1=CARTESIAN_POINT('',(0.,0.,0.));
#2=CARTESIAN_POINT('',(0.,0.,4.));
#3=DIRECTION('',(0.,0.,1.));
#4=DIRECTION('',(1.,0.,0.));
#5=DIRECTION('',(0.,0.,-1.));
#6=AXIS2_PLACEMENT_3D('',#1,#3,#4);
#7=AXIS2_PLACEMENT_3D('',#2,#3,#4);
#8=AXIS2_PLACEMENT_3D('',#1,#5,#4);
#10=CARTESIAN_POINT('',(2.,0.,0.));
#11=CARTESIAN_POINT('',(2.,0.,4.));
#12=VERTEX_POINT('',#10);
#13=VERTEX_POINT('',#11);
#20=CIRCLE('',#6,2.);
#21=CIRCLE('',#7,2.);
#22=VECTOR('',#3,4.);
#23=LINE('',#10,#22);
#30=EDGE_CURVE('',#12,#12,#20,.T.);
#31=EDGE_CURVE('',#13,#13,#21,.T.);
#32=EDGE_CURVE('',#12,#13,#23,.T.);
#40=ORIENTED_EDGE('',*,*,#30,.T.);
#41=ORIENTED_EDGE('',*,*,#32,.T.);
#42=ORIENTED_EDGE('',*,*,#31,.F.);
#43=ORIENTED_EDGE('',*,*,#32,.F.);
#44=ORIENTED_EDGE('',*,*,#30,.F.);
#45=ORIENTED_EDGE('',*,*,#31,.T.);
#50=EDGE_LOOP('',(#40,#41,#42,#43));
#51=EDGE_LOOP('',(#44));
#52=EDGE_LOOP('',(#45));
#60=FACE_OUTER_BOUND('',#50,.T.);
#61=FACE_OUTER_BOUND('',#51,.T.);
#62=FACE_OUTER_BOUND('',#52,.T.);
#70=CYLINDRICAL_SURFACE('',#6,2.);
#71=PLANE('',#8);
#72=PLANE('',#7);
#80=ADVANCED_FACE('',(#60),#70,.T.);
#81=ADVANCED_FACE('',(#61),#71,.T.);
#82=ADVANCED_FACE('',(#62),#72,.T.);
#90=CLOSED_SHELL('',(#80,#81,#82));
#91=MANIFOLD_SOLID_BREP('pin',#90);
ENDSEC;
END-ISO-10303-21;
";

    fn build(text: &str) -> StepSolid {
        let ex = part21::parse(text).unwrap();
        StepSolid::build(&ex, StepOptions::default()).unwrap()
    }

    #[test]
    fn cube_topology_counts_and_metrics() {
        let solid = build(&unit_cube());
        assert_eq!(solid.entities(EntityKind::Face).len(), 6);
        assert_eq!(solid.entities(EntityKind::Edge).len(), 12);
        assert_eq!(solid.entities(EntityKind::Vertex).len(), 8);
        for face in solid.entities(EntityKind::Face) {
            assert_eq!(solid.surface_type(face).unwrap(), SurfaceType::Planar);
            let (u, v) = solid.parametric_domain(face).unwrap().midpoint();
            let c = solid.curvature_at(face, u, v).unwrap();
            assert!(c.defined);
            assert_eq!(c.mean, 0.0);
        }
        assert_relative_eq!(solid.volume_properties().unwrap().volume, 1.0, epsilon = 1e-12);
        assert_relative_eq!(solid.bounding_box().unwrap().volume(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn cylinder_side_face_is_cylindrical_with_full_domain() {
        let solid = build(CYLINDER);
        assert_eq!(solid.entities(EntityKind::Face).len(), 3);
        assert_eq!(solid.entities(EntityKind::Edge).len(), 3);
        assert_eq!(solid.entities(EntityKind::Vertex).len(), 2);

        let side = EntityId(80);
        assert_eq!(solid.surface_type(side).unwrap(), SurfaceType::Cylindrical);
        let domain = solid.parametric_domain(side).unwrap();
        assert_relative_eq!(domain.u_min, 0.0);
        assert_relative_eq!(domain.u_max, TAU);
        assert_relative_eq!(domain.v_min, 0.0, epsilon = 1e-9);
        assert_relative_eq!(domain.v_max, 4.0, epsilon = 1e-9);

        let (u, v) = domain.midpoint();
        let c = solid.curvature_at(side, u, v).unwrap();
        assert!(c.defined);
        assert_relative_eq!(c.mean.abs(), 0.25, epsilon = 1e-4);

        let exact = std::f64::consts::PI * 4.0 * 4.0;
        let volume = solid.volume_properties().unwrap().volume;
        assert!((volume - exact).abs() / exact < 0.02, "volume {volume}");
        assert_relative_eq!(solid.bounding_box().unwrap().volume(), 64.0, epsilon = 1e-6);
    }

    #[test]
    fn loading_is_deterministic() {
        let a = build(CYLINDER);
        let b = build(CYLINDER);
        assert_eq!(a.entities(EntityKind::Face), b.entities(EntityKind::Face));
        assert_eq!(
            a.volume_properties().unwrap().volume,
            b.volume_properties().unwrap().volume
        );
    }

    #[test]
    fn file_without_solids_has_no_faces() {
        let solid = build(
            "ISO-10303-21;\nHEADER;\nENDSEC;\nDATA;\n\
             #1=PRODUCT('p','p','',(#2));\nENDSEC;\nEND-ISO-10303-21;\n",
        );
        assert!(solid.entities(EntityKind::Face).is_empty());
        assert!(matches!(solid.bounding_box(), Err(KernelError::EmptyBounds)));
    }

    #[test]
    fn kernel_reports_unreadable_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.step");
        fs::write(&path, "not a step file").unwrap();
        let kernel = StepKernel::default();
        assert!(matches!(kernel.load(&path), Err(KernelError::Parse { .. })));
        assert!(matches!(
            kernel.load(&dir.path().join("missing.step")),
            Err(KernelError::Io(_))
        ));
    }

    #[test]
    fn latin1_product_names_still_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wuerfel.step");
        let text = unit_cube();
        let (head, tail) = text.split_at(text.find("DATA;\n").unwrap() + 6);
        let mut bytes = head.as_bytes().to_vec();
        bytes.extend_from_slice(b"#9000=PRODUCT('cube','W\xfcrfel','',(#9001));\n");
        bytes.extend_from_slice(tail.as_bytes());
        fs::write(&path, bytes).unwrap();

        let solid = StepKernel::default().load(&path).unwrap();
        assert_eq!(solid.entities(EntityKind::Face).len(), 6);
        assert_relative_eq!(solid.volume_properties().unwrap().volume, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn degree_angles_are_converted() {
        let text = "ISO-10303-21;\nHEADER;\nENDSEC;\nDATA;\n\
                    #1=(CONVERSION_BASED_UNIT('DEGREE',#2)NAMED_UNIT(#3)PLANE_ANGLE_UNIT());\n\
                    ENDSEC;\nEND-ISO-10303-21;\n";
        let ex = part21::parse(text).unwrap();
        assert_relative_eq!(angle_scale(&ex), std::f64::consts::PI / 180.0);
    }
}
