// Convex decomposition of simple polygons
//
// Ear clipping produces a triangulation that uses only the input vertices, then
// Hertel-Mehlhorn merging removes diagonals while the merged piece stays convex.
// Pieces partition the input exactly: no new vertices, no gaps, no overlaps.

use super::geometry::{is_convex, signed_area};
use crate::core::math::cross;
use glam::Vec2;

/// Triangulate a counter-clockwise simple polygon.
///
/// Returns `None` if no ear can be found, which only happens for
/// self-intersecting or numerically degenerate input.
pub fn triangulate(points: &[Vec2]) -> Option<Vec<[usize; 3]>> {
    let n = points.len();
    if n < 3 {
        return None;
    }

    let scale = bounding_scale(points);
    let collinear_eps = 1e-7 * scale * scale;

    let mut remaining: Vec<usize> = (0..n).collect();
    let mut triangles = Vec::with_capacity(n - 2);
    let mut i = 0;
    let mut misses = 0;

    while remaining.len() > 3 {
        let m = remaining.len();
        i %= m;
        let ia = remaining[(i + m - 1) % m];
        let ib = remaining[i];
        let ic = remaining[(i + 1) % m];
        let (a, b, c) = (points[ia], points[ib], points[ic]);
        let turn = cross(b - a, c - b);

        if turn.abs() <= collinear_eps {
            // Zero-area corner, dropping it loses no area
            remaining.remove(i);
            misses = 0;
            continue;
        }

        let is_ear = turn > 0.0
            && !remaining.iter().any(|&j| {
                j != ia
                    && j != ib
                    && j != ic
                    && points[j] != a
                    && points[j] != b
                    && points[j] != c
                    && point_in_triangle(points[j], a, b, c)
            });

        if is_ear {
            triangles.push([ia, ib, ic]);
            remaining.remove(i);
            misses = 0;
        } else {
            i += 1;
            misses += 1;
            if misses > m {
                return None;
            }
        }
    }

    let (ia, ib, ic) = (remaining[0], remaining[1], remaining[2]);
    if cross(points[ib] - points[ia], points[ic] - points[ib]) > collinear_eps {
        triangles.push([ia, ib, ic]);
    }
    Some(triangles)
}

/// Split a counter-clockwise simple polygon into convex pieces.
///
/// `tolerance` is the relative slack allowed when deciding that a merged
/// piece is still convex (collinear edges are always accepted).
pub fn decompose_convex(points: &[Vec2], tolerance: f32) -> Option<Vec<Vec<Vec2>>> {
    let triangles = triangulate(points)?;
    let mut pieces: Vec<Vec<usize>> = triangles.iter().map(|t| t.to_vec()).collect();

    loop {
        let mut merged = None;
        'search: for p in 0..pieces.len() {
            for q in (p + 1)..pieces.len() {
                if let Some(candidate) = try_merge(&pieces[p], &pieces[q], points, tolerance) {
                    merged = Some((p, q, candidate));
                    break 'search;
                }
            }
        }

        match merged {
            Some((p, q, candidate)) => {
                pieces[p] = candidate;
                pieces.swap_remove(q);
            }
            None => break,
        }
    }

    Some(
        pieces
            .into_iter()
            .map(|piece| piece.into_iter().map(|i| points[i]).collect::<Vec<_>>())
            .filter(|piece| signed_area(piece) > 0.0)
            .collect(),
    )
}

/// Merge two pieces across a shared diagonal if the result is convex
fn try_merge(p: &[usize], q: &[usize], points: &[Vec2], tolerance: f32) -> Option<Vec<usize>> {
    let (np, nq) = (p.len(), q.len());
    for i in 0..np {
        let a = p[i];
        let b = p[(i + 1) % np];
        // Counter-clockwise neighbours traverse a shared edge in opposite directions
        let Some(j) = (0..nq).find(|&j| q[j] == b && q[(j + 1) % nq] == a) else {
            continue;
        };

        // Walk p from b around to a, then q's vertices strictly between a and b
        let mut merged = Vec::with_capacity(np + nq - 2);
        for k in 0..np {
            merged.push(p[(i + 1 + k) % np]);
        }
        for k in 2..nq {
            merged.push(q[(j + k) % nq]);
        }

        let loop_points: Vec<Vec2> = merged.iter().map(|&k| points[k]).collect();
        if is_convex(&loop_points, tolerance) {
            return Some(merged);
        }
        return None;
    }
    None
}

fn point_in_triangle(p: Vec2, a: Vec2, b: Vec2, c: Vec2) -> bool {
    cross(b - a, p - a) >= 0.0 && cross(c - b, p - b) >= 0.0 && cross(a - c, p - c) >= 0.0
}

fn bounding_scale(points: &[Vec2]) -> f32 {
    let (min, max) = points.iter().fold(
        (Vec2::splat(f32::MAX), Vec2::splat(f32::MIN)),
        |(lo, hi), &p| (lo.min(p), hi.max(p)),
    );
    (max - min).max_element().max(f32::EPSILON)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::shapes::geometry::{centroid, point_in_polygon, polygon_area};
    use approx::assert_abs_diff_eq;

    fn star(points: usize, outer: f32, inner: f32) -> Vec<Vec2> {
        (0..points * 2)
            .map(|i| {
                let r = if i % 2 == 0 { outer } else { inner };
                let angle = std::f32::consts::FRAC_PI_2
                    + i as f32 * std::f32::consts::PI / points as f32;
                Vec2::new(angle.cos(), angle.sin()) * r
            })
            .collect()
    }

    fn l_shape() -> Vec<Vec2> {
        vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(2.0, 0.0),
            Vec2::new(2.0, 1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(1.0, 2.0),
            Vec2::new(0.0, 2.0),
        ]
    }

    fn assert_partition(original: &[Vec2], pieces: &[Vec<Vec2>]) {
        let total: f64 = pieces.iter().map(|p| polygon_area(p)).sum();
        assert_abs_diff_eq!(total, polygon_area(original), epsilon = 1e-6);

        for piece in pieces {
            assert!(is_convex(piece, 1e-4), "piece is not convex: {:?}", piece);
        }

        // Centroids of convex pieces are interior, so one piece containing
        // another's centroid means they overlap
        for (i, a) in pieces.iter().enumerate() {
            for (j, b) in pieces.iter().enumerate() {
                if i != j {
                    assert!(!point_in_polygon(centroid(a), b));
                }
            }
        }
    }

    #[test]
    fn test_triangulate_square() {
        let square = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(0.0, 1.0),
        ];
        let tris = triangulate(&square).unwrap();
        assert_eq!(tris.len(), 2);
    }

    #[test]
    fn test_l_shape_partition() {
        let shape = l_shape();
        let pieces = decompose_convex(&shape, 1e-6).unwrap();
        assert_eq!(pieces.len(), 2);
        assert_partition(&shape, &pieces);
    }

    #[test]
    fn test_star_partition() {
        let shape = star(5, 1.0, 0.4);
        let pieces = decompose_convex(&shape, 1e-6).unwrap();
        assert!(pieces.len() >= 2);
        assert_partition(&shape, &pieces);
    }

    #[test]
    fn test_comb_partition() {
        // Teeth pointing up from a base bar
        let mut comb = vec![Vec2::new(0.0, 0.0), Vec2::new(5.0, 0.0)];
        for k in (0..5).rev() {
            let x = k as f32;
            comb.push(Vec2::new(x + 1.0, 1.0));
            comb.push(Vec2::new(x + 0.75, 3.0));
            comb.push(Vec2::new(x + 0.25, 3.0));
            comb.push(Vec2::new(x, 1.0));
        }
        comb.dedup();
        let pieces = decompose_convex(&comb, 1e-6).unwrap();
        assert_partition(&comb, &pieces);
    }

    #[test]
    fn test_collinear_vertices_are_tolerated() {
        let shape = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(2.0, 0.0),
            Vec2::new(2.0, 2.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(0.0, 2.0),
        ];
        let pieces = decompose_convex(&shape, 1e-6).unwrap();
        assert_partition(&shape, &pieces);
    }

    #[test]
    fn test_degenerate_input() {
        assert!(triangulate(&[Vec2::ZERO, Vec2::X]).is_none());
    }
}
