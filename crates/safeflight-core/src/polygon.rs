//! Planar polygon helpers and the vertical prism used for fence geometry.
//!
//! All coordinates are local meters (x = east, y = north) in whatever
//! projection the caller chose.

use crate::spatial::{closest_point_on_segment, segments_intersect_2d, EPS_M};
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Miter length cap, as a multiple of the offset distance.
const MITER_LIMIT: f64 = 4.0;

/// Signed area, positive for counter-clockwise winding.
pub fn signed_area(vertices: &[Vector2<f64>]) -> f64 {
    let n = vertices.len();
    if n < 3 {
        return 0.0;
    }
    let mut sum = 0.0;
    for i in 0..n {
        let a = vertices[i];
        let b = vertices[(i + 1) % n];
        sum += a.x * b.y - b.x * a.y;
    }
    sum / 2.0
}

/// Ray casting point-in-polygon test.
pub fn contains_point(vertices: &[Vector2<f64>], p: Vector2<f64>) -> bool {
    let n = vertices.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let vi = vertices[i];
        let vj = vertices[j];
        if ((vi.y > p.y) != (vj.y > p.y)) && (p.x < (vj.x - vi.x) * (p.y - vi.y) / (vj.y - vi.y) + vi.x)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Inside and not on the boundary.
pub fn contains_strict(vertices: &[Vector2<f64>], p: Vector2<f64>) -> bool {
    contains_point(vertices, p) && distance_to_boundary(vertices, p) > EPS_M
}

/// Closest boundary point and the index of the edge (i -> i + 1) it lies on.
pub fn closest_boundary_point(vertices: &[Vector2<f64>], p: Vector2<f64>) -> Option<(usize, Vector2<f64>)> {
    let n = vertices.len();
    let mut best: Option<(usize, Vector2<f64>, f64)> = None;
    for i in 0..n {
        let candidate = closest_point_on_segment(p, vertices[i], vertices[(i + 1) % n]);
        let dist = (candidate - p).norm();
        if best.map_or(true, |(_, _, d)| dist < d) {
            best = Some((i, candidate, dist));
        }
    }
    best.map(|(i, point, _)| (i, point))
}

/// Closest point to `p` on edge i (i -> i + 1).
pub fn closest_point_on_edge(vertices: &[Vector2<f64>], i: usize, p: Vector2<f64>) -> Vector2<f64> {
    closest_point_on_segment(p, vertices[i], vertices[(i + 1) % vertices.len()])
}

pub fn distance_to_boundary(vertices: &[Vector2<f64>], p: Vector2<f64>) -> f64 {
    closest_boundary_point(vertices, p)
        .map(|(_, q)| (q - p).norm())
        .unwrap_or(f64::INFINITY)
}

/// Outward unit normal of edge i for a counter-clockwise polygon.
pub fn outward_normal(vertices: &[Vector2<f64>], i: usize) -> Vector2<f64> {
    let a = vertices[i];
    let b = vertices[(i + 1) % vertices.len()];
    let edge = b - a;
    let len = edge.norm();
    if len < EPS_M {
        return Vector2::zeros();
    }
    Vector2::new(edge.y / len, -edge.x / len)
}

/// Offset a counter-clockwise polygon by `distance` (positive expands,
/// negative contracts) with mitered corners.
pub fn offset_polygon(vertices: &[Vector2<f64>], distance: f64) -> Vec<Vector2<f64>> {
    let n = vertices.len();
    if n < 3 || distance.abs() < EPS_M {
        return vertices.to_vec();
    }

    (0..n)
        .map(|i| {
            let prev = (i + n - 1) % n;
            let n0 = outward_normal(vertices, prev);
            let n1 = outward_normal(vertices, i);
            let bisector = n0 + n1;
            if bisector.norm() < EPS_M {
                return vertices[i] + n1 * distance;
            }
            let dir = bisector.normalize();
            let cos_half = dir.dot(&n1).max(1.0 / MITER_LIMIT);
            vertices[i] + dir * (distance / cos_half)
        })
        .collect()
}

/// True when any two non-adjacent edges touch.
pub fn self_intersects(vertices: &[Vector2<f64>]) -> bool {
    let n = vertices.len();
    if n < 4 {
        return false;
    }
    for i in 0..n {
        let a1 = vertices[i];
        let a2 = vertices[(i + 1) % n];
        for j in (i + 1)..n {
            let adjacent = j == i + 1 || (i == 0 && j == n - 1);
            if adjacent {
                continue;
            }
            if segments_intersect_2d(a1, a2, vertices[j], vertices[(j + 1) % n]) {
                return true;
            }
        }
    }
    false
}

/// Axis-aligned bounding rectangle as (min, max).
pub fn bounding_box(vertices: &[Vector2<f64>]) -> Option<(Vector2<f64>, Vector2<f64>)> {
    let first = vertices.first()?;
    let mut min = *first;
    let mut max = *first;
    for v in vertices.iter().skip(1) {
        min.x = min.x.min(v.x);
        min.y = min.y.min(v.y);
        max.x = max.x.max(v.x);
        max.y = max.y.max(v.y);
    }
    Some((min, max))
}

/// Polygon extruded vertically between floor and ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prism {
    /// Counter-clockwise vertices.
    pub vertices: Vec<Vector2<f64>>,
    pub floor_m: f64,
    pub ceiling_m: f64,
}

impl Prism {
    pub fn new(vertices: Vec<Vector2<f64>>, floor_m: f64, ceiling_m: f64) -> Self {
        let vertices = if signed_area(&vertices) < 0.0 {
            vertices.into_iter().rev().collect()
        } else {
            vertices
        };
        Self {
            vertices,
            floor_m,
            ceiling_m,
        }
    }

    pub fn altitude_within(&self, z: f64) -> bool {
        z >= self.floor_m && z <= self.ceiling_m
    }

    /// Strictly inside horizontally and within [floor, ceiling].
    pub fn contains(&self, p: &Vector3<f64>) -> bool {
        self.altitude_within(p.z) && contains_strict(&self.vertices, p.xy())
    }

    pub fn bounding_box(&self) -> Option<(Vector2<f64>, Vector2<f64>)> {
        bounding_box(&self.vertices)
    }

    /// Segment a-b pierces one of the vertical walls between floor and ceiling.
    ///
    /// Each edge spans a vertical plane with horizontal normal; the crossing
    /// point must lie within the edge and within the altitude band.
    pub fn segment_crosses_wall(&self, a: &Vector3<f64>, b: &Vector3<f64>) -> bool {
        let n = self.vertices.len();
        let l = b - a;
        for i in 0..n {
            let e0 = self.vertices[i];
            let e1 = self.vertices[(i + 1) % n];
            let edge = e1 - e0;
            let edge_len_sq = edge.norm_squared();
            if edge_len_sq < EPS_M {
                continue;
            }
            let normal = Vector3::new(-edge.y, edge.x, 0.0);
            let denom = l.dot(&normal);
            if denom.abs() < 1e-12 {
                continue;
            }
            let p0 = Vector3::new(e0.x, e0.y, 0.0);
            let d = (p0 - a).dot(&normal) / denom;
            if !(0.0..=1.0).contains(&d) {
                continue;
            }
            let hit = a + l * d;
            let along = (hit.xy() - e0).dot(&edge) / edge_len_sq;
            if (0.0..=1.0).contains(&along) && self.altitude_within(hit.z) {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(size: f64) -> Vec<Vector2<f64>> {
        vec![
            Vector2::new(0.0, 0.0),
            Vector2::new(size, 0.0),
            Vector2::new(size, size),
            Vector2::new(0.0, size),
        ]
    }

    #[test]
    fn test_signed_area_orientation() {
        let sq = square(10.0);
        assert!((signed_area(&sq) - 100.0).abs() < 1e-9);
        let rev: Vec<_> = sq.iter().rev().copied().collect();
        assert!(signed_area(&rev) < 0.0);
    }

    #[test]
    fn test_contains_strict_excludes_boundary() {
        let sq = square(10.0);
        assert!(contains_strict(&sq, Vector2::new(5.0, 5.0)));
        assert!(!contains_strict(&sq, Vector2::new(10.0, 5.0)));
        assert!(!contains_strict(&sq, Vector2::new(15.0, 5.0)));
    }

    #[test]
    fn test_offset_expands_and_contracts() {
        let sq = square(10.0);
        let grown = offset_polygon(&sq, 2.0);
        assert!((grown[0] - Vector2::new(-2.0, -2.0)).norm() < 1e-9);
        let shrunk = offset_polygon(&sq, -2.0);
        assert!((shrunk[2] - Vector2::new(8.0, 8.0)).norm() < 1e-9);
    }

    #[test]
    fn test_self_intersection_detects_bowtie() {
        let bowtie = vec![
            Vector2::new(0.0, 0.0),
            Vector2::new(10.0, 10.0),
            Vector2::new(10.0, 0.0),
            Vector2::new(0.0, 10.0),
        ];
        assert!(self_intersects(&bowtie));
        assert!(!self_intersects(&square(10.0)));
    }

    #[test]
    fn test_prism_wall_crossing_respects_altitude() {
        let prism = Prism::new(square(10.0), 0.0, 50.0);
        let a = Vector3::new(-5.0, 5.0, 20.0);
        let b = Vector3::new(15.0, 5.0, 20.0);
        assert!(prism.segment_crosses_wall(&a, &b));

        let over_a = Vector3::new(-5.0, 5.0, 60.0);
        let over_b = Vector3::new(15.0, 5.0, 60.0);
        assert!(!prism.segment_crosses_wall(&over_a, &over_b));

        let inside_a = Vector3::new(2.0, 2.0, 20.0);
        let inside_b = Vector3::new(8.0, 8.0, 20.0);
        assert!(!prism.segment_crosses_wall(&inside_a, &inside_b));
    }

    #[test]
    fn test_prism_normalizes_clockwise_input() {
        let cw: Vec<_> = square(10.0).into_iter().rev().collect();
        let prism = Prism::new(cw, 0.0, 10.0);
        assert!(signed_area(&prism.vertices) > 0.0);
    }
}
