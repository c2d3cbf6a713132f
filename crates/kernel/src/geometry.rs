//! Curve and surface evaluation for the STEP backend.

use crate::Curvature;
use nalgebra::Vector3;
use std::f64::consts::TAU;

pub type Vec3 = Vector3<f64>;

/// Normals shorter than this make curvature undefined.
pub const NORMAL_RESOLUTION: f64 = 1e-9;

/// Right-handed placement: origin plus orthonormal axes.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub origin: Vec3,
    pub x: Vec3,
    pub y: Vec3,
    pub z: Vec3,
}

impl Frame {
    /// Builds a frame from an axis and an optional reference direction, following
    /// the AXIS2_PLACEMENT_3D rules (reference projected onto the plane normal
    /// to the axis, arbitrary perpendicular when missing or parallel).
    pub fn new(origin: Vec3, axis: Option<Vec3>, ref_dir: Option<Vec3>) -> Self {
        let z = axis
            .and_then(|a| a.try_normalize(f64::EPSILON))
            .unwrap_or_else(Vec3::z);
        let candidate = ref_dir
            .map(|r| r - z * r.dot(&z))
            .and_then(|r| r.try_normalize(1e-12));
        let x = candidate.unwrap_or_else(|| {
            let helper = if z.x.abs() < 0.9 { Vec3::x() } else { Vec3::y() };
            (helper - z * helper.dot(&z)).normalize()
        });
        let y = z.cross(&x);
        Self { origin, x, y, z }
    }

    fn local(&self, p: &Vec3) -> Vec3 {
        let d = p - self.origin;
        Vec3::new(d.dot(&self.x), d.dot(&self.y), d.dot(&self.z))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BSplineCurve {
    pub degree: usize,
    pub knots: Vec<f64>,
    pub points: Vec<Vec3>,
    pub weights: Option<Vec<f64>>,
}

impl BSplineCurve {
    pub fn domain(&self) -> (f64, f64) {
        (self.knots[self.degree], self.knots[self.points.len()])
    }

    pub fn point(&self, t: f64) -> Vec3 {
        let n = self.points.len() - 1;
        let span = find_span(n, self.degree, t, &self.knots);
        let basis = basis_funs(span, t, self.degree, &self.knots);
        let mut acc = Vec3::zeros();
        let mut wsum = 0.0;
        for (j, b) in basis.iter().enumerate() {
            let i = span - self.degree + j;
            let w = self.weights.as_ref().map_or(1.0, |ws| ws[i]);
            acc += self.points[i] * (b * w);
            wsum += b * w;
        }
        if wsum.abs() > f64::EPSILON {
            acc / wsum
        } else {
            acc
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BSplineSurface {
    pub u_degree: usize,
    pub v_degree: usize,
    pub u_knots: Vec<f64>,
    pub v_knots: Vec<f64>,
    /// Control net indexed `[u][v]`.
    pub points: Vec<Vec<Vec3>>,
    pub weights: Option<Vec<Vec<f64>>>,
}

impl BSplineSurface {
    pub fn domain(&self) -> (f64, f64, f64, f64) {
        let nu = self.points.len();
        let nv = self.points.first().map_or(0, Vec::len);
        (
            self.u_knots[self.u_degree],
            self.u_knots[nu],
            self.v_knots[self.v_degree],
            self.v_knots[nv],
        )
    }

    pub fn point(&self, u: f64, v: f64) -> Vec3 {
        let nu = self.points.len() - 1;
        let nv = self.points[0].len() - 1;
        let su = find_span(nu, self.u_degree, u, &self.u_knots);
        let sv = find_span(nv, self.v_degree, v, &self.v_knots);
        let bu = basis_funs(su, u, self.u_degree, &self.u_knots);
        let bv = basis_funs(sv, v, self.v_degree, &self.v_knots);
        let mut acc = Vec3::zeros();
        let mut wsum = 0.0;
        for (a, nu_a) in bu.iter().enumerate() {
            let i = su - self.u_degree + a;
            for (b, nv_b) in bv.iter().enumerate() {
                let j = sv - self.v_degree + b;
                let w = self.weights.as_ref().map_or(1.0, |ws| ws[i][j]);
                let f = nu_a * nv_b * w;
                acc += self.points[i][j] * f;
                wsum += f;
            }
        }
        if wsum.abs() > f64::EPSILON {
            acc / wsum
        } else {
            acc
        }
    }
}

/// Expands STEP knot values and multiplicities into a full knot vector.
pub fn expand_knots(values: &[f64], multiplicities: &[usize]) -> Vec<f64> {
    values
        .iter()
        .zip(multiplicities)
        .flat_map(|(k, m)| std::iter::repeat(*k).take(*m))
        .collect()
}

fn find_span(n: usize, degree: usize, t: f64, knots: &[f64]) -> usize {
    if t >= knots[n + 1] {
        return n;
    }
    if t <= knots[degree] {
        return degree;
    }
    let (mut low, mut high) = (degree, n + 1);
    let mut mid = (low + high) / 2;
    while t < knots[mid] || t >= knots[mid + 1] {
        if t < knots[mid] {
            high = mid;
        } else {
            low = mid;
        }
        mid = (low + high) / 2;
    }
    mid
}

fn basis_funs(span: usize, t: f64, degree: usize, knots: &[f64]) -> Vec<f64> {
    let mut n = vec![0.0; degree + 1];
    let mut left = vec![0.0; degree + 1];
    let mut right = vec![0.0; degree + 1];
    n[0] = 1.0;
    for j in 1..=degree {
        left[j] = t - knots[span + 1 - j];
        right[j] = knots[span + j] - t;
        let mut saved = 0.0;
        for r in 0..j {
            let denom = right[r + 1] + left[j - r];
            let temp = if denom.abs() > f64::EPSILON {
                n[r] / denom
            } else {
                0.0
            };
            n[r] = saved + right[r + 1] * temp;
            saved = left[j - r] * temp;
        }
        n[j] = saved;
    }
    n
}

#[derive(Debug, Clone, PartialEq)]
pub enum Curve {
    Line { origin: Vec3, direction: Vec3 },
    Circle { frame: Frame, radius: f64 },
    Ellipse { frame: Frame, semi_axis_1: f64, semi_axis_2: f64 },
    BSpline(BSplineCurve),
}

impl Curve {
    pub fn point(&self, t: f64) -> Vec3 {
        match self {
            Curve::Line { origin, direction } => origin + direction * t,
            Curve::Circle { frame, radius } => {
                frame.origin + (frame.x * t.cos() + frame.y * t.sin()) * *radius
            }
            Curve::Ellipse {
                frame,
                semi_axis_1,
                semi_axis_2,
            } => {
                frame.origin + frame.x * (semi_axis_1 * t.cos()) + frame.y * (semi_axis_2 * t.sin())
            }
            Curve::BSpline(b) => b.point(t),
        }
    }

    /// Bounded parameter range, `None` for unbounded curves.
    pub fn domain(&self) -> Option<(f64, f64)> {
        match self {
            Curve::Line { .. } => None,
            Curve::Circle { .. } | Curve::Ellipse { .. } => Some((0.0, TAU)),
            Curve::BSpline(b) => Some(b.domain()),
        }
    }

    pub fn is_periodic(&self) -> bool {
        matches!(self, Curve::Circle { .. } | Curve::Ellipse { .. })
    }

    /// Parameter of the point on the curve closest to `p`, for curves with a
    /// closed-form inverse.
    pub fn invert(&self, p: &Vec3) -> Option<f64> {
        match self {
            Curve::Line { origin, direction } => {
                let len2 = direction.norm_squared();
                (len2 > f64::EPSILON).then(|| (p - origin).dot(direction) / len2)
            }
            Curve::Circle { frame, .. } => {
                let l = frame.local(p);
                Some(wrap_angle(l.y.atan2(l.x)))
            }
            Curve::Ellipse {
                frame,
                semi_axis_1,
                semi_axis_2,
            } => {
                let l = frame.local(p);
                Some(wrap_angle((l.y / semi_axis_2).atan2(l.x / semi_axis_1)))
            }
            Curve::BSpline(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Surface {
    Plane(Frame),
    Cylinder { frame: Frame, radius: f64 },
    Cone { frame: Frame, radius: f64, semi_angle: f64 },
    Sphere { frame: Frame, radius: f64 },
    Torus { frame: Frame, major: f64, minor: f64 },
    BSpline(BSplineSurface),
    /// `u` is the rotation angle, `v` the generatrix parameter.
    Revolution { curve: Curve, frame: Frame },
    /// `u` is the swept curve parameter, `v` the distance along `direction`.
    Extrusion { curve: Curve, direction: Vec3 },
}

impl Surface {
    pub fn point(&self, u: f64, v: f64) -> Vec3 {
        match self {
            Surface::Plane(f) => f.origin + f.x * u + f.y * v,
            Surface::Cylinder { frame: f, radius } => {
                f.origin + (f.x * u.cos() + f.y * u.sin()) * *radius + f.z * v
            }
            Surface::Cone {
                frame: f,
                radius,
                semi_angle,
            } => {
                let r = radius + v * semi_angle.sin();
                f.origin + (f.x * u.cos() + f.y * u.sin()) * r + f.z * (v * semi_angle.cos())
            }
            Surface::Sphere { frame: f, radius } => {
                let ring = (f.x * u.cos() + f.y * u.sin()) * (radius * v.cos());
                f.origin + ring + f.z * (radius * v.sin())
            }
            Surface::Torus {
                frame: f,
                major,
                minor,
            } => {
                let r = major + minor * v.cos();
                f.origin + (f.x * u.cos() + f.y * u.sin()) * r + f.z * (minor * v.sin())
            }
            Surface::BSpline(b) => b.point(u, v),
            Surface::Revolution { curve, frame: f } => {
                let l = f.local(&curve.point(v));
                let radial = f.x * l.x + f.y * l.y;
                let rotated = radial * u.cos() + f.z.cross(&radial) * u.sin();
                f.origin + rotated + f.z * l.z
            }
            Surface::Extrusion { curve, direction } => curve.point(u) + direction * v,
        }
    }

    /// Which parameter directions are angular (periodic with period 2pi).
    pub fn periodic(&self) -> (bool, bool) {
        match self {
            Surface::Cylinder { .. } | Surface::Cone { .. } | Surface::Sphere { .. } => {
                (true, false)
            }
            Surface::Torus { .. } => (true, true),
            Surface::Revolution { curve, .. } => (true, curve.is_periodic()),
            Surface::Extrusion { curve, .. } => (curve.is_periodic(), false),
            Surface::Plane(_) | Surface::BSpline(_) => (false, false),
        }
    }

    /// Parameters of a point lying on the surface, where a closed form exists.
    pub fn invert(&self, p: &Vec3) -> Option<(f64, f64)> {
        match self {
            Surface::Plane(f) => {
                let l = f.local(p);
                Some((l.x, l.y))
            }
            Surface::Cylinder { frame: f, .. } => {
                let l = f.local(p);
                Some((wrap_angle(l.y.atan2(l.x)), l.z))
            }
            Surface::Cone {
                frame: f,
                semi_angle,
                ..
            } => {
                let l = f.local(p);
                let c = semi_angle.cos();
                (c.abs() > f64::EPSILON).then(|| (wrap_angle(l.y.atan2(l.x)), l.z / c))
            }
            Surface::Sphere { frame: f, radius } => {
                let l = f.local(p);
                let s = (l.z / radius).clamp(-1.0, 1.0);
                Some((wrap_angle(l.y.atan2(l.x)), s.asin()))
            }
            Surface::Torus { frame: f, major, .. } => {
                let l = f.local(p);
                let radial = (l.x * l.x + l.y * l.y).sqrt() - major;
                Some((wrap_angle(l.y.atan2(l.x)), wrap_angle(l.z.atan2(radial))))
            }
            Surface::Revolution { curve, frame: f } => {
                // angle measured from the generatrix plane
                let l = f.local(p);
                let g = f.local(&curve.point(curve.domain().map_or(0.0, |(a, b)| (a + b) / 2.0)));
                let u = wrap_angle(l.y.atan2(l.x) - g.y.atan2(g.x));
                let v = curve.invert(&reverse_rotate(f, p, u))?;
                Some((u, v))
            }
            Surface::Extrusion { curve, direction } => {
                let len2 = direction.norm_squared();
                if len2 <= f64::EPSILON {
                    return None;
                }
                let base = curve.point(curve.domain().map_or(0.0, |(a, _)| a));
                let v = (p - base).dot(direction) / len2;
                let u = curve.invert(&(p - direction * v))?;
                Some((u, v))
            }
            Surface::BSpline(_) => None,
        }
    }

    /// Natural parameter range for surfaces whose domain does not depend on trimming.
    pub fn natural_domain(&self) -> Option<(f64, f64, f64, f64)> {
        match self {
            Surface::BSpline(b) => Some(b.domain()),
            Surface::Revolution { curve, .. } => curve.domain().map(|(a, b)| (0.0, TAU, a, b)),
            _ => None,
        }
    }

    /// Mean and Gaussian curvature from the fundamental forms, with derivatives
    /// taken by central differences. `step` is the parameter increment.
    pub fn curvature(&self, u: f64, v: f64, step: (f64, f64)) -> Curvature {
        let (hu, hv) = step;
        let p = self.point(u, v);
        let pu_plus = self.point(u + hu, v);
        let pu_minus = self.point(u - hu, v);
        let pv_plus = self.point(u, v + hv);
        let pv_minus = self.point(u, v - hv);

        let su = (pu_plus - pu_minus) / (2.0 * hu);
        let sv = (pv_plus - pv_minus) / (2.0 * hv);
        let suu = (pu_plus - p * 2.0 + pu_minus) / (hu * hu);
        let svv = (pv_plus - p * 2.0 + pv_minus) / (hv * hv);
        let suv = (self.point(u + hu, v + hv) - self.point(u + hu, v - hv)
            - self.point(u - hu, v + hv)
            + self.point(u - hu, v - hv))
            / (4.0 * hu * hv);

        let cross = su.cross(&sv);
        let scale = su.norm() * sv.norm();
        let Some(n) = cross.try_normalize(NORMAL_RESOLUTION * scale.max(1.0)) else {
            return Curvature::undefined();
        };
        if !n.iter().all(|c| c.is_finite()) {
            return Curvature::undefined();
        }

        let (e, f, g) = (su.dot(&su), su.dot(&sv), sv.dot(&sv));
        let (l, m, nn) = (suu.dot(&n), suv.dot(&n), svv.dot(&n));
        let det = e * g - f * f;
        if det.abs() <= f64::EPSILON {
            return Curvature::undefined();
        }
        Curvature {
            defined: true,
            mean: (e * nn - 2.0 * f * m + g * l) / (2.0 * det),
            gaussian: (l * nn - m * m) / det,
        }
    }
}

fn reverse_rotate(f: &Frame, p: &Vec3, angle: f64) -> Vec3 {
    let l = f.local(p);
    let radial = f.x * l.x + f.y * l.y;
    let back = radial * angle.cos() - f.z.cross(&radial) * angle.sin();
    f.origin + back + f.z * l.z
}

/// Maps an angle into `[0, 2pi)`.
pub fn wrap_angle(a: f64) -> f64 {
    let w = a.rem_euclid(TAU);
    if w >= TAU {
        0.0
    } else {
        w
    }
}

/// Smallest interval covering a set of angles: the complement of the widest gap
/// between consecutive samples. Returns the full period when no gap exceeds
/// `full_gap`.
pub fn angular_range(angles: &[f64], full_gap: f64) -> Option<(f64, f64)> {
    let mut sorted: Vec<f64> = angles.iter().map(|a| wrap_angle(*a)).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let mut widest = (TAU - sorted[sorted.len() - 1] + sorted[0], sorted.len() - 1);
    for i in 0..sorted.len() - 1 {
        let gap = sorted[i + 1] - sorted[i];
        if gap > widest.0 {
            widest = (gap, i);
        }
    }
    if widest.0 <= full_gap {
        return Some((0.0, TAU));
    }
    let start = sorted[(widest.1 + 1) % sorted.len()];
    let end = sorted[widest.1];
    let end = if end < start { end + TAU } else { end };
    Some((start, end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn world() -> Frame {
        Frame::new(Vec3::zeros(), Some(Vec3::z()), Some(Vec3::x()))
    }

    #[test]
    fn frame_orthogonalizes_reference_direction() {
        let f = Frame::new(
            Vec3::zeros(),
            Some(Vec3::new(0.0, 0.0, 2.0)),
            Some(Vec3::new(1.0, 0.0, 1.0)),
        );
        assert_relative_eq!(f.x, Vec3::x(), epsilon = 1e-12);
        assert_relative_eq!(f.y, Vec3::y(), epsilon = 1e-12);
    }

    #[test]
    fn plane_has_zero_curvature() {
        let c = Surface::Plane(world()).curvature(0.3, -2.0, (1e-3, 1e-3));
        assert!(c.defined);
        assert_relative_eq!(c.mean, 0.0, epsilon = 1e-9);
        assert_relative_eq!(c.gaussian, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn cylinder_mean_curvature_is_half_inverse_radius() {
        let s = Surface::Cylinder {
            frame: world(),
            radius: 2.0,
        };
        let c = s.curvature(PI / 3.0, 1.0, (1e-4, 1e-4));
        assert!(c.defined);
        assert_relative_eq!(c.mean.abs(), 0.25, epsilon = 1e-5);
        assert_relative_eq!(c.gaussian, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn sphere_gaussian_curvature_is_inverse_radius_squared() {
        let s = Surface::Sphere {
            frame: world(),
            radius: 4.0,
        };
        let c = s.curvature(1.0, 0.2, (1e-4, 1e-4));
        assert!(c.defined);
        assert_relative_eq!(c.mean.abs(), 0.25, epsilon = 1e-5);
        assert_relative_eq!(c.gaussian, 1.0 / 16.0, epsilon = 1e-5);
    }

    #[test]
    fn torus_point_round_trips_through_invert() {
        let s = Surface::Torus {
            frame: world(),
            major: 5.0,
            minor: 1.0,
        };
        let p = s.point(1.2, 2.5);
        let (u, v) = s.invert(&p).unwrap();
        assert_relative_eq!(u, 1.2, epsilon = 1e-9);
        assert_relative_eq!(v, 2.5, epsilon = 1e-9);
    }

    #[test]
    fn clamped_bspline_interpolates_end_points() {
        let curve = BSplineCurve {
            degree: 2,
            knots: expand_knots(&[0.0, 1.0], &[3, 3]),
            points: vec![Vec3::zeros(), Vec3::new(1.0, 2.0, 0.0), Vec3::new(2.0, 0.0, 0.0)],
            weights: None,
        };
        assert_relative_eq!(curve.point(0.0), Vec3::zeros(), epsilon = 1e-12);
        assert_relative_eq!(curve.point(1.0), Vec3::new(2.0, 0.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(curve.point(0.5), Vec3::new(1.0, 1.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn rational_quarter_circle_stays_on_circle() {
        let w = std::f64::consts::FRAC_1_SQRT_2;
        let curve = BSplineCurve {
            degree: 2,
            knots: expand_knots(&[0.0, 1.0], &[3, 3]),
            points: vec![Vec3::x(), Vec3::new(1.0, 1.0, 0.0), Vec3::y()],
            weights: Some(vec![1.0, w, 1.0]),
        };
        for t in [0.1, 0.4, 0.8] {
            assert_relative_eq!(curve.point(t).norm(), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn angular_range_unwraps_across_zero() {
        let (start, end) = angular_range(&[6.0, 6.2, 0.1, 0.3], 0.5).unwrap();
        assert_relative_eq!(start, 6.0, epsilon = 1e-12);
        assert_relative_eq!(end, 0.3 + TAU, epsilon = 1e-12);

        let dense: Vec<f64> = (0..32).map(|i| i as f64 * TAU / 32.0).collect();
        assert_eq!(angular_range(&dense, 0.5), Some((0.0, TAU)));
    }
}
