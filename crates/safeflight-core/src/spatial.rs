//! Spatial math: geodesy, local tangent-plane projection and segment geometry.

use crate::models::Position;
use nalgebra::{Vector2, Vector3};

/// Mean Earth radius used by the great-circle helpers.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Tolerance in meters for locally projected coordinates.
pub const EPS_M: f64 = 1e-6;

/// Calculate distance between two points in meters using Haversine formula.
///
/// # Arguments
/// * `lat1`, `lon1` - First point coordinates in decimal degrees
/// * `lat2`, `lon2` - Second point coordinates in decimal degrees
///
/// # Returns
/// Distance in meters
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Calculate bearing from point 1 to point 2 in radians.
/// Returns bearing in radians, 0 = north, π/2 = east.
pub fn bearing(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let delta_lambda = (lon2 - lon1).to_radians();

    let x = delta_lambda.sin() * phi2.cos();
    let y = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * delta_lambda.cos();

    x.atan2(y)
}

/// Offset a position by distance and bearing.
///
/// # Arguments
/// * `lat`, `lon` - Starting position in degrees
/// * `distance_m` - Distance in meters
/// * `bearing_rad` - Bearing in radians (0 = north, π/2 = east)
///
/// # Returns
/// (new_lat, new_lon) in degrees
pub fn offset_by_bearing(lat: f64, lon: f64, distance_m: f64, bearing_rad: f64) -> (f64, f64) {
    if distance_m.abs() <= f64::EPSILON {
        return (lat, lon);
    }

    let lat1 = lat.to_radians();
    let lon1 = lon.to_radians();
    let angular_distance = distance_m / EARTH_RADIUS_M;

    let sin_lat1 = lat1.sin();
    let cos_lat1 = lat1.cos();
    let sin_ad = angular_distance.sin();
    let cos_ad = angular_distance.cos();

    let sin_lat2 = sin_lat1 * cos_ad + cos_lat1 * sin_ad * bearing_rad.cos();
    let lat2 = sin_lat2.clamp(-1.0, 1.0).asin();

    let y = bearing_rad.sin() * sin_ad * cos_lat1;
    let x = cos_ad - sin_lat1 * sin_lat2;
    let mut lon2 = lon1 + y.atan2(x);
    lon2 =
        (lon2 + std::f64::consts::PI).rem_euclid(2.0 * std::f64::consts::PI) - std::f64::consts::PI;

    (lat2.to_degrees(), lon2.to_degrees())
}

// ==== ENU (East-North-Up) Coordinate Conversion ====

/// Meters per degree of latitude at a given latitude (WGS84 approximation).
pub fn meters_per_deg_lat(lat_deg: f64) -> f64 {
    let lat_rad = lat_deg.to_radians();
    111_132.954 - 559.822 * (2.0 * lat_rad).cos() + 1.175 * (4.0 * lat_rad).cos()
        - 0.0023 * (6.0 * lat_rad).cos()
}

/// Meters per degree of longitude at a given latitude (WGS84 approximation).
pub fn meters_per_deg_lon(lat_deg: f64) -> f64 {
    let lat_rad = lat_deg.to_radians();
    111_412.84 * lat_rad.cos() - 93.5 * (3.0 * lat_rad).cos() + 0.118 * (5.0 * lat_rad).cos()
}

/// Tangent-plane projection around a fixed origin.
///
/// x = east, y = north, z = up (altitude is carried through unchanged).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalProjection {
    origin_lat: f64,
    origin_lon: f64,
    m_per_deg_lat: f64,
    m_per_deg_lon: f64,
}

impl LocalProjection {
    pub fn new(origin_lat: f64, origin_lon: f64) -> Self {
        Self {
            origin_lat,
            origin_lon,
            m_per_deg_lat: meters_per_deg_lat(origin_lat).max(1e-9),
            m_per_deg_lon: meters_per_deg_lon(origin_lat).max(1e-9),
        }
    }

    pub fn at(origin: &Position) -> Self {
        Self::new(origin.lat, origin.lon)
    }

    pub fn origin(&self) -> (f64, f64) {
        (self.origin_lat, self.origin_lon)
    }

    pub fn project(&self, position: &Position) -> Vector3<f64> {
        Vector3::new(
            (position.lon - self.origin_lon) * self.m_per_deg_lon,
            (position.lat - self.origin_lat) * self.m_per_deg_lat,
            position.altitude_m,
        )
    }

    pub fn project_2d(&self, lat: f64, lon: f64) -> Vector2<f64> {
        Vector2::new(
            (lon - self.origin_lon) * self.m_per_deg_lon,
            (lat - self.origin_lat) * self.m_per_deg_lat,
        )
    }

    pub fn inverse(&self, local: &Vector3<f64>) -> Position {
        Position::new(
            self.origin_lat + local.y / self.m_per_deg_lat,
            self.origin_lon + local.x / self.m_per_deg_lon,
            local.z,
        )
    }
}

// ==== Leg geometry ====

/// Signed cross-track and along-track offsets of `pos` relative to the leg
/// `from -> to`, in meters. Cross-track is positive to the right of track.
pub fn cross_track_offsets(from: &Position, to: &Position, pos: &Position) -> (f64, f64) {
    let dist = haversine_distance(from.lat, from.lon, pos.lat, pos.lon);
    if dist <= f64::EPSILON {
        return (0.0, 0.0);
    }
    let track = bearing(from.lat, from.lon, to.lat, to.lon);
    let to_pos = bearing(from.lat, from.lon, pos.lat, pos.lon);
    let diff = to_pos - track;
    (dist * diff.sin(), dist * diff.cos())
}

/// Point `along_m` meters down the leg `from -> to`; altitude is
/// interpolated over the leg length.
pub fn point_on_leg(from: &Position, to: &Position, along_m: f64) -> Position {
    let leg_len = haversine_distance(from.lat, from.lon, to.lat, to.lon);
    let track = bearing(from.lat, from.lon, to.lat, to.lon);
    let (lat, lon) = offset_by_bearing(from.lat, from.lon, along_m, track);
    let frac = if leg_len > f64::EPSILON {
        (along_m / leg_len).clamp(0.0, 1.0)
    } else {
        1.0
    };
    Position::new(lat, lon, from.altitude_m + (to.altitude_m - from.altitude_m) * frac)
}

// ==== Angles ====

/// Normalize an angle in degrees into [0, 360).
pub fn normalize_deg(angle_deg: f64) -> f64 {
    let wrapped = angle_deg.rem_euclid(360.0);
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Signed shortest rotation from `from_deg` to `to_deg`, in (-180, 180].
pub fn angle_diff_deg(to_deg: f64, from_deg: f64) -> f64 {
    let diff = normalize_deg(to_deg - from_deg);
    if diff > 180.0 {
        diff - 360.0
    } else {
        diff
    }
}

/// Compass track (degrees, clockwise from north) of a local ENU vector.
pub fn track_of(east: f64, north: f64) -> f64 {
    normalize_deg(east.atan2(north).to_degrees())
}

// ==== Local 2-D segment geometry ====

fn orient(p: Vector2<f64>, q: Vector2<f64>, r: Vector2<f64>) -> f64 {
    (q.x - p.x) * (r.y - p.y) - (q.y - p.y) * (r.x - p.x)
}

/// True when segments a1-a2 and b1-b2 intersect (touches and overlaps included).
pub fn segments_intersect_2d(
    a1: Vector2<f64>,
    a2: Vector2<f64>,
    b1: Vector2<f64>,
    b2: Vector2<f64>,
) -> bool {
    fn within(a: f64, b: f64, value: f64) -> bool {
        let min = a.min(b) - EPS_M;
        let max = a.max(b) + EPS_M;
        value >= min && value <= max
    }

    fn on_segment(p: Vector2<f64>, q: Vector2<f64>, r: Vector2<f64>) -> bool {
        within(p.x, q.x, r.x) && within(p.y, q.y, r.y)
    }

    let o1 = orient(a1, a2, b1);
    let o2 = orient(a1, a2, b2);
    let o3 = orient(b1, b2, a1);
    let o4 = orient(b1, b2, a2);

    if o1.abs() <= EPS_M && on_segment(a1, a2, b1) {
        return true;
    }
    if o2.abs() <= EPS_M && on_segment(a1, a2, b2) {
        return true;
    }
    if o3.abs() <= EPS_M && on_segment(b1, b2, a1) {
        return true;
    }
    if o4.abs() <= EPS_M && on_segment(b1, b2, a2) {
        return true;
    }

    let a_crosses = (o1 > EPS_M && o2 < -EPS_M) || (o1 < -EPS_M && o2 > EPS_M);
    let b_crosses = (o3 > EPS_M && o4 < -EPS_M) || (o3 < -EPS_M && o4 > EPS_M);
    a_crosses && b_crosses
}

/// Parameter along a-b (0..=1) where it crosses the line through c-d, if the
/// two segments properly intersect.
pub fn segment_crossing_param(
    a: Vector2<f64>,
    b: Vector2<f64>,
    c: Vector2<f64>,
    d: Vector2<f64>,
) -> Option<f64> {
    let r = b - a;
    let s = d - c;
    let denom = r.perp(&s);
    if denom.abs() <= f64::EPSILON {
        return None;
    }
    let qp = c - a;
    let t = qp.perp(&s) / denom;
    let u = qp.perp(&r) / denom;
    if (-EPS_M..=1.0 + EPS_M).contains(&t) && (-EPS_M..=1.0 + EPS_M).contains(&u) {
        Some(t.clamp(0.0, 1.0))
    } else {
        None
    }
}

/// Closest point to `p` on segment a-b.
pub fn closest_point_on_segment(
    p: Vector2<f64>,
    a: Vector2<f64>,
    b: Vector2<f64>,
) -> Vector2<f64> {
    let ab = b - a;
    let len_sq = ab.norm_squared();
    if len_sq < 1e-8 {
        return a;
    }
    let t = ((p - a).dot(&ab) / len_sq).clamp(0.0, 1.0);
    a + ab * t
}

/// Minimum distance from a point to a segment, in local meters.
pub fn distance_to_segment(p: Vector2<f64>, a: Vector2<f64>, b: Vector2<f64>) -> f64 {
    (p - closest_point_on_segment(p, a, b)).norm()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_projection_roundtrip_is_stable() {
        let proj = LocalProjection::new(37.1021, -76.3872);
        let pos = Position::new(37.1030, -76.3860, 12.0);
        let local = proj.project(&pos);
        let back = proj.inverse(&local);
        assert!((back.lat - pos.lat).abs() < 1e-9);
        assert!((back.lon - pos.lon).abs() < 1e-9);
        assert!((back.altitude_m - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_projection_matches_haversine_at_short_range() {
        let proj = LocalProjection::new(37.1021, -76.3872);
        let pos = Position::new(37.1031, -76.3862, 0.0);
        let local = proj.project(&pos);
        let haversine = haversine_distance(37.1021, -76.3872, pos.lat, pos.lon);
        assert!((local.xy().norm() - haversine).abs() < 1.0);
    }

    #[test]
    fn test_bearing_east() {
        let b = bearing(0.0, 0.0, 0.0, 0.01).to_degrees();
        assert!((b - 90.0).abs() < 1e-6);
    }

    #[test]
    fn test_angle_diff_wraps() {
        assert!((angle_diff_deg(10.0, 350.0) - 20.0).abs() < 1e-9);
        assert!((angle_diff_deg(350.0, 10.0) + 20.0).abs() < 1e-9);
        assert!((angle_diff_deg(180.0, 0.0) - 180.0).abs() < 1e-9);
        assert!((normalize_deg(-90.0) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn test_cross_track_sign_is_right_positive() {
        let from = Position::new(0.0, 0.0, 10.0);
        let to = Position::new(0.01, 0.0, 10.0);
        let right = Position::new(0.005, 0.0001, 10.0);
        let left = Position::new(0.005, -0.0001, 10.0);
        let (xtrk_r, along_r) = cross_track_offsets(&from, &to, &right);
        let (xtrk_l, _) = cross_track_offsets(&from, &to, &left);
        assert!(xtrk_r > 10.0);
        assert!(xtrk_l < -10.0);
        assert!((along_r - 556.0).abs() < 5.0);
    }

    #[test]
    fn test_point_on_leg_interpolates_altitude() {
        let from = Position::new(0.0, 0.0, 10.0);
        let to = Position::new(0.0, 0.001, 30.0);
        let leg = haversine_distance(0.0, 0.0, 0.0, 0.001);
        let mid = point_on_leg(&from, &to, leg / 2.0);
        assert!((mid.altitude_m - 20.0).abs() < 1e-6);
        assert!((mid.lon - 0.0005).abs() < 1e-7);
    }

    #[test]
    fn test_segments_intersect_detects_crossing() {
        let a1 = Vector2::new(0.0, 0.0);
        let a2 = Vector2::new(10.0, 10.0);
        let b1 = Vector2::new(0.0, 10.0);
        let b2 = Vector2::new(10.0, 0.0);
        assert!(segments_intersect_2d(a1, a2, b1, b2));
        let t = segment_crossing_param(a1, a2, b1, b2).unwrap();
        assert!((t - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_parallel_segments_do_not_cross() {
        let a1 = Vector2::new(0.0, 0.0);
        let a2 = Vector2::new(10.0, 0.0);
        let b1 = Vector2::new(0.0, 1.0);
        let b2 = Vector2::new(10.0, 1.0);
        assert!(!segments_intersect_2d(a1, a2, b1, b2));
        assert!(segment_crossing_param(a1, a2, b1, b2).is_none());
    }

    #[test]
    fn test_distance_to_segment() {
        let d = distance_to_segment(
            Vector2::new(5.0, 3.0),
            Vector2::new(0.0, 0.0),
            Vector2::new(10.0, 0.0),
        );
        assert!((d - 3.0).abs() < 1e-9);
    }
}
