// Visual geometry descriptions and the polygon helpers shape synthesis relies on

use super::mask::AlphaMask;
use crate::core::math::cross;
use glam::Vec2;

/// Hard cap on Bézier subdivision depth
const MAX_FLATTEN_DEPTH: u32 = 16;

/// One cubic Bézier segment of an outline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CubicBezier {
    pub p0: Vec2,
    pub p1: Vec2,
    pub p2: Vec2,
    pub p3: Vec2,
}

impl CubicBezier {
    pub fn new(p0: Vec2, p1: Vec2, p2: Vec2, p3: Vec2) -> Self {
        Self { p0, p1, p2, p3 }
    }

    /// A straight segment expressed as a cubic
    pub fn line(a: Vec2, b: Vec2) -> Self {
        Self::new(a, a.lerp(b, 1.0 / 3.0), a.lerp(b, 2.0 / 3.0), b)
    }

    pub fn point_at(&self, t: f32) -> Vec2 {
        let u = 1.0 - t;
        self.p0 * (u * u * u)
            + self.p1 * (3.0 * u * u * t)
            + self.p2 * (3.0 * u * t * t)
            + self.p3 * (t * t * t)
    }

    /// De Casteljau split at `t`
    pub fn split(&self, t: f32) -> (CubicBezier, CubicBezier) {
        let p01 = self.p0.lerp(self.p1, t);
        let p12 = self.p1.lerp(self.p2, t);
        let p23 = self.p2.lerp(self.p3, t);
        let p012 = p01.lerp(p12, t);
        let p123 = p12.lerp(p23, t);
        let mid = p012.lerp(p123, t);
        (
            CubicBezier::new(self.p0, p01, p012, mid),
            CubicBezier::new(mid, p123, p23, self.p3),
        )
    }

    /// Upper bound on the distance between the curve and its chord
    pub fn flatness(&self) -> f32 {
        let chord = self.p3 - self.p0;
        let len = chord.length();
        if len <= f32::EPSILON {
            return (self.p1 - self.p0).length().max((self.p2 - self.p0).length());
        }
        let d1 = cross(chord, self.p1 - self.p0).abs() / len;
        let d2 = cross(chord, self.p2 - self.p0).abs() / len;
        d1.max(d2)
    }

    /// Append points approximating the curve within `tolerance`, excluding `p0`.
    ///
    /// Subdivision is adaptive: tightly curved spans are split further than flat ones.
    pub fn flatten_into(&self, tolerance: f32, out: &mut Vec<Vec2>) {
        self.flatten_rec(tolerance.max(1e-6), 0, out);
    }

    fn flatten_rec(&self, tolerance: f32, depth: u32, out: &mut Vec<Vec2>) {
        if depth >= MAX_FLATTEN_DEPTH || self.flatness() <= tolerance {
            out.push(self.p3);
            return;
        }
        let (left, right) = self.split(0.5);
        left.flatten_rec(tolerance, depth + 1, out);
        right.flatten_rec(tolerance, depth + 1, out);
    }
}

/// Geometric description of a visual object, in the object's local frame
#[derive(Debug, Clone)]
pub enum VisualGeometry {
    Circle {
        radius: f32,
        stroke_width: f32,
    },
    Line {
        start: Vec2,
        end: Vec2,
        stroke_width: f32,
    },
    Polygon {
        vertices: Vec<Vec2>,
        stroke_width: f32,
    },
    /// Closed outlines made of cubic Bézier segments, one entry per subpath
    Path {
        subpaths: Vec<Vec<CubicBezier>>,
        stroke_width: f32,
    },
    /// Raster image with its on-screen size
    Image { mask: AlphaMask, size: Vec2 },
}

impl VisualGeometry {
    pub fn circle(radius: f32) -> Self {
        Self::Circle {
            radius,
            stroke_width: 0.0,
        }
    }

    pub fn line(start: Vec2, end: Vec2) -> Self {
        Self::Line {
            start,
            end,
            stroke_width: 0.0,
        }
    }

    pub fn polygon(vertices: Vec<Vec2>) -> Self {
        Self::Polygon {
            vertices,
            stroke_width: 0.0,
        }
    }

    /// Axis-aligned rectangle centred on the origin
    pub fn rectangle(width: f32, height: f32) -> Self {
        let (hw, hh) = (width / 2.0, height / 2.0);
        Self::polygon(vec![
            Vec2::new(-hw, -hh),
            Vec2::new(hw, -hh),
            Vec2::new(hw, hh),
            Vec2::new(-hw, hh),
        ])
    }

    pub fn path(subpaths: Vec<Vec<CubicBezier>>) -> Self {
        Self::Path {
            subpaths,
            stroke_width: 0.0,
        }
    }

    pub fn image(mask: AlphaMask, size: Vec2) -> Self {
        Self::Image { mask, size }
    }

    /// Set the stroke width (ignored for images)
    pub fn with_stroke(mut self, width: f32) -> Self {
        match &mut self {
            Self::Circle { stroke_width, .. }
            | Self::Line { stroke_width, .. }
            | Self::Polygon { stroke_width, .. }
            | Self::Path { stroke_width, .. } => *stroke_width = width,
            Self::Image { .. } => {}
        }
        self
    }

    pub fn stroke_width(&self) -> f32 {
        match self {
            Self::Circle { stroke_width, .. }
            | Self::Line { stroke_width, .. }
            | Self::Polygon { stroke_width, .. }
            | Self::Path { stroke_width, .. } => *stroke_width,
            Self::Image { .. } => 0.0,
        }
    }
}

/// Flatten every subpath of a Bézier outline into a point loop
pub fn flatten_subpaths(subpaths: &[Vec<CubicBezier>], tolerance: f32) -> Vec<Vec<Vec2>> {
    subpaths
        .iter()
        .filter(|segments| !segments.is_empty())
        .map(|segments| {
            let mut points = vec![segments[0].p0];
            for segment in segments {
                segment.flatten_into(tolerance, &mut points);
            }
            points
        })
        .collect()
}

/// Sample a circle so that no chord strays further than `tolerance` from the arc
pub fn flatten_circle(radius: f32, tolerance: f32) -> Vec<Vec2> {
    let tol = tolerance.max(1e-6).min(radius * 0.5);
    let step = 2.0 * (1.0 - tol / radius).acos();
    let count = ((std::f32::consts::TAU / step).ceil() as usize).clamp(8, 1024);
    (0..count)
        .map(|i| {
            let angle = std::f32::consts::TAU * i as f32 / count as f32;
            Vec2::new(angle.cos(), angle.sin()) * radius
        })
        .collect()
}

/// Drop consecutive near-duplicate points and a duplicated closing point
pub fn dedup_points(points: &[Vec2], epsilon: f32) -> Vec<Vec2> {
    let mut out: Vec<Vec2> = Vec::with_capacity(points.len());
    for &p in points {
        if out.last().map_or(true, |last| last.distance(p) > epsilon) {
            out.push(p);
        }
    }
    while out.len() > 1 && out[0].distance(out[out.len() - 1]) <= epsilon {
        out.pop();
    }
    out
}

/// Shoelace signed area, positive for counter-clockwise loops.
///
/// Accumulates in f64 so partitions of the same vertices compare exactly.
pub fn signed_area(points: &[Vec2]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let mut sum = 0.0f64;
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        sum += a.x as f64 * b.y as f64 - b.x as f64 * a.y as f64;
    }
    sum * 0.5
}

pub fn polygon_area(points: &[Vec2]) -> f64 {
    signed_area(points).abs()
}

/// Reorder a loop counter-clockwise in place
pub fn ensure_ccw(points: &mut [Vec2]) {
    if signed_area(points) < 0.0 {
        points.reverse();
    }
}

/// Convexity test for a counter-clockwise loop, tolerating collinear vertices
pub fn is_convex(points: &[Vec2], tolerance: f32) -> bool {
    let n = points.len();
    if n < 3 {
        return false;
    }
    let mut winding = 0.0f32;
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        let c = points[(i + 2) % n];
        let e1 = b - a;
        let e2 = c - b;
        let scale = e1.length() * e2.length();
        if cross(e1, e2) < -tolerance * scale.max(f32::EPSILON) {
            return false;
        }
        if scale > 0.0 {
            winding += cross(e1, e2).atan2(e1.dot(e2));
        }
    }
    // A pentagram turns the same way at every vertex but winds twice
    (winding - std::f32::consts::TAU).abs() < 1e-2
}

/// Check that no two non-adjacent edges of a loop intersect
pub fn is_simple(points: &[Vec2]) -> bool {
    let n = points.len();
    if n < 3 {
        return false;
    }
    for i in 0..n {
        let a1 = points[i];
        let a2 = points[(i + 1) % n];
        for j in (i + 1)..n {
            // Adjacent edges share a vertex
            if j == i + 1 || (i == 0 && j == n - 1) {
                continue;
            }
            let b1 = points[j];
            let b2 = points[(j + 1) % n];
            if segments_intersect(a1, a2, b1, b2) {
                return false;
            }
        }
    }
    true
}

/// Closed-segment intersection test
pub fn segments_intersect(a1: Vec2, a2: Vec2, b1: Vec2, b2: Vec2) -> bool {
    let d1 = cross(a2 - a1, b1 - a1);
    let d2 = cross(a2 - a1, b2 - a1);
    let d3 = cross(b2 - b1, a1 - b1);
    let d4 = cross(b2 - b1, a2 - b1);

    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }

    (d1 == 0.0 && on_segment(a1, a2, b1))
        || (d2 == 0.0 && on_segment(a1, a2, b2))
        || (d3 == 0.0 && on_segment(b1, b2, a1))
        || (d4 == 0.0 && on_segment(b1, b2, a2))
}

fn on_segment(a: Vec2, b: Vec2, p: Vec2) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

/// Even-odd point in polygon test
pub fn point_in_polygon(point: Vec2, polygon: &[Vec2]) -> bool {
    let n = polygon.len();
    let mut inside = false;
    let mut j = n.wrapping_sub(1);
    for i in 0..n {
        let (pi, pj) = (polygon[i], polygon[j]);
        if (pi.y > point.y) != (pj.y > point.y)
            && point.x < (pj.x - pi.x) * (point.y - pi.y) / (pj.y - pi.y) + pi.x
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

pub fn centroid(points: &[Vec2]) -> Vec2 {
    if points.is_empty() {
        return Vec2::ZERO;
    }
    points.iter().copied().sum::<Vec2>() / points.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::{FRAC_PI_2, PI};

    fn unit_square() -> Vec<Vec2> {
        vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(0.0, 1.0),
        ]
    }

    #[test]
    fn test_signed_area_orientation() {
        let mut square = unit_square();
        assert_relative_eq!(signed_area(&square), 1.0);
        square.reverse();
        assert_relative_eq!(signed_area(&square), -1.0);
        ensure_ccw(&mut square);
        assert_relative_eq!(signed_area(&square), 1.0);
    }

    #[test]
    fn test_convexity() {
        assert!(is_convex(&unit_square(), 1e-6));

        let notch = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(2.0, 0.0),
            Vec2::new(2.0, 2.0),
            Vec2::new(1.0, 0.5),
            Vec2::new(0.0, 2.0),
        ];
        assert!(!is_convex(&notch, 1e-6));
    }

    #[test]
    fn test_pentagram_is_not_convex() {
        let star: Vec<Vec2> = (0..5)
            .map(|i| {
                let angle = FRAC_PI_2 + i as f32 * 4.0 * PI / 5.0;
                Vec2::new(angle.cos(), angle.sin())
            })
            .collect();
        assert!(!is_convex(&star, 1e-6));
        assert!(!is_simple(&star));
    }

    #[test]
    fn test_bowtie_not_simple() {
        let bowtie = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(0.0, 1.0),
        ];
        assert!(!is_simple(&bowtie));
        assert!(is_simple(&unit_square()));
    }

    #[test]
    fn test_dedup_points_removes_closing_duplicate() {
        let pts = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(0.0, 0.0001),
            Vec2::new(1.0, 0.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(0.0, 0.0),
        ];
        let deduped = dedup_points(&pts, 1e-3);
        assert_eq!(deduped.len(), 3);
    }

    #[test]
    fn test_straight_bezier_flattens_to_endpoint() {
        let segment = CubicBezier::line(Vec2::ZERO, Vec2::new(4.0, 0.0));
        let mut out = Vec::new();
        segment.flatten_into(0.01, &mut out);
        assert_eq!(out, vec![Vec2::new(4.0, 0.0)]);
    }

    #[test]
    fn test_flatten_adapts_to_curvature() {
        let gentle = CubicBezier::new(
            Vec2::ZERO,
            Vec2::new(1.0, 0.05),
            Vec2::new(2.0, 0.05),
            Vec2::new(3.0, 0.0),
        );
        let sharp = CubicBezier::new(
            Vec2::ZERO,
            Vec2::new(0.0, 3.0),
            Vec2::new(3.0, 3.0),
            Vec2::new(3.0, 0.0),
        );
        let (mut a, mut b) = (Vec::new(), Vec::new());
        gentle.flatten_into(0.01, &mut a);
        sharp.flatten_into(0.01, &mut b);
        assert!(b.len() > a.len());

        // Every sampled point lies on the curve's hull band
        for p in &b {
            assert!(p.y >= -1e-4 && p.y <= 3.0);
        }
    }

    #[test]
    fn test_flatten_circle_error_bound() {
        let radius = 2.0;
        let tolerance = 0.01;
        let pts = flatten_circle(radius, tolerance);
        for i in 0..pts.len() {
            let mid = (pts[i] + pts[(i + 1) % pts.len()]) * 0.5;
            assert!(radius - mid.length() <= tolerance + 1e-4);
        }
    }

    #[test]
    fn test_point_in_polygon() {
        let square = unit_square();
        assert!(point_in_polygon(Vec2::new(0.5, 0.5), &square));
        assert!(!point_in_polygon(Vec2::new(1.5, 0.5), &square));
    }

    #[test]
    fn test_with_stroke() {
        let geometry = VisualGeometry::circle(1.0).with_stroke(0.2);
        assert_relative_eq!(geometry.stroke_width(), 0.2);
    }
}
