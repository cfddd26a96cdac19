//! Data models for ownship, traffic and flight plans.

use crate::error::PlanError;
use crate::spatial::{
    bearing, cross_track_offsets, haversine_distance, normalize_deg, offset_by_bearing, track_of,
};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

// ========== POSITION / VELOCITY ==========

/// Geodetic position (degrees, meters).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    pub altitude_m: f64,
}

impl Position {
    pub fn new(lat: f64, lon: f64, altitude_m: f64) -> Self {
        Self {
            lat,
            lon,
            altitude_m,
        }
    }

    /// Great-circle distance ignoring altitude.
    pub fn distance_h(&self, other: &Position) -> f64 {
        haversine_distance(self.lat, self.lon, other.lat, other.lon)
    }

    pub fn distance_v(&self, other: &Position) -> f64 {
        (self.altitude_m - other.altitude_m).abs()
    }

    pub fn distance_3d(&self, other: &Position) -> f64 {
        self.distance_h(other).hypot(self.distance_v(other))
    }

    /// Initial bearing to `other` in degrees [0, 360).
    pub fn track_to(&self, other: &Position) -> f64 {
        normalize_deg(bearing(self.lat, self.lon, other.lat, other.lon).to_degrees())
    }

    pub fn offset(&self, distance_m: f64, track_deg: f64) -> Position {
        let (lat, lon) = offset_by_bearing(self.lat, self.lon, distance_m, track_deg.to_radians());
        Position::new(lat, lon, self.altitude_m)
    }

    pub fn with_altitude(&self, altitude_m: f64) -> Position {
        Position::new(self.lat, self.lon, altitude_m)
    }

    /// Constant-velocity extrapolation.
    pub fn extrapolate(&self, velocity: &Velocity, dt_s: f64) -> Position {
        let moved = self.offset(velocity.ground_speed_mps * dt_s, velocity.track_deg);
        moved.with_altitude(self.altitude_m + velocity.vertical_speed_mps * dt_s)
    }
}

/// Track/ground-speed/vertical-speed velocity.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Velocity {
    /// Degrees clockwise from north
    pub track_deg: f64,
    pub ground_speed_mps: f64,
    /// Positive up
    pub vertical_speed_mps: f64,
}

impl Velocity {
    pub fn new(track_deg: f64, ground_speed_mps: f64, vertical_speed_mps: f64) -> Self {
        Self {
            track_deg: normalize_deg(track_deg),
            ground_speed_mps,
            vertical_speed_mps,
        }
    }

    /// Build from east/north/up components.
    pub fn from_enu(east: f64, north: f64, up: f64) -> Self {
        let gs = east.hypot(north);
        let track = if gs > 1e-9 { track_of(east, north) } else { 0.0 };
        Self::new(track, gs, up)
    }

    pub fn to_enu(&self) -> Vector3<f64> {
        let trk = self.track_deg.to_radians();
        Vector3::new(
            self.ground_speed_mps * trk.sin(),
            self.ground_speed_mps * trk.cos(),
            self.vertical_speed_mps,
        )
    }
}

// ========== FLIGHT PLAN ==========

/// A plan waypoint with its scheduled time (seconds).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NavPoint {
    pub position: Position,
    pub time_s: f64,
}

impl NavPoint {
    pub fn new(position: Position, time_s: f64) -> Self {
        Self { position, time_s }
    }
}

/// Ordered waypoints with strictly increasing times.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(default)]
    pub id: String,
    points: Vec<NavPoint>,
}

impl Plan {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            points: Vec::new(),
        }
    }

    pub fn from_points(id: impl Into<String>, points: Vec<NavPoint>) -> Result<Self, PlanError> {
        let mut plan = Self::new(id);
        for point in points {
            plan.add(point.position, point.time_s)?;
        }
        Ok(plan)
    }

    /// Build a plan that flies `positions` in order at a constant speed.
    pub fn timed_at_speed(
        id: impl Into<String>,
        positions: &[Position],
        start_time_s: f64,
        speed_mps: f64,
    ) -> Result<Self, PlanError> {
        let speed = speed_mps.max(0.1);
        let mut plan = Self::new(id);
        let mut time = start_time_s;
        let mut previous: Option<&Position> = None;
        for pos in positions {
            if let Some(prev) = previous {
                // Zero-length legs still need distinct times.
                time += (prev.distance_3d(pos) / speed).max(1e-3);
            }
            plan.add(*pos, time)?;
            previous = Some(pos);
        }
        Ok(plan)
    }

    pub fn add(&mut self, position: Position, time_s: f64) -> Result<(), PlanError> {
        if let Some(last) = self.points.last() {
            if time_s <= last.time_s {
                return Err(PlanError::NonIncreasingTime {
                    time_s,
                    previous_s: last.time_s,
                });
            }
        }
        self.points.push(NavPoint::new(position, time_s));
        Ok(())
    }

    pub fn points(&self) -> &[NavPoint] {
        &self.points
    }

    pub fn point(&self, index: usize) -> Option<&NavPoint> {
        self.points.get(index)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    pub fn first_time(&self) -> Option<f64> {
        self.points.first().map(|p| p.time_s)
    }

    pub fn last_time(&self) -> Option<f64> {
        self.points.last().map(|p| p.time_s)
    }

    /// Index of the leg (i -> i + 1) active at `time_s`, clamped to the plan.
    pub fn segment_at(&self, time_s: f64) -> Option<usize> {
        if self.points.len() < 2 {
            return None;
        }
        let last_leg = self.points.len() - 2;
        let idx = self
            .points
            .windows(2)
            .position(|w| time_s < w[1].time_s)
            .unwrap_or(last_leg);
        Some(idx)
    }

    /// Interpolated position at `time_s`, clamped to the plan endpoints.
    pub fn position_at(&self, time_s: f64) -> Option<Position> {
        let first = self.points.first()?;
        if self.points.len() == 1 || time_s <= first.time_s {
            return Some(first.position);
        }
        let leg = self.segment_at(time_s)?;
        let a = &self.points[leg];
        let b = &self.points[leg + 1];
        if time_s >= b.time_s {
            return Some(b.position);
        }
        let ratio = ((time_s - a.time_s) / (b.time_s - a.time_s)).clamp(0.0, 1.0);
        Some(Position::new(
            a.position.lat + (b.position.lat - a.position.lat) * ratio,
            a.position.lon + (b.position.lon - a.position.lon) * ratio,
            a.position.altitude_m + (b.position.altitude_m - a.position.altitude_m) * ratio,
        ))
    }

    /// Sub-plan between `t0` and `t1` with interpolated endpoints.
    pub fn cut_down(&self, t0: f64, t1: f64) -> Result<Plan, PlanError> {
        let (Some(first), Some(last)) = (self.first_time(), self.last_time()) else {
            return Err(PlanError::Empty);
        };
        let start = t0.clamp(first, last);
        let end = t1.clamp(first, last);
        let mut cut = Plan::new(self.id.clone());
        if let Some(pos) = self.position_at(start) {
            cut.add(pos, start)?;
        }
        for point in self.points.iter().filter(|p| p.time_s > start && p.time_s < end) {
            cut.add(point.position, point.time_s)?;
        }
        if end > start {
            if let Some(pos) = self.position_at(end) {
                cut.add(pos, end)?;
            }
        }
        Ok(cut)
    }

    /// Total 3-D path length in meters.
    pub fn path_length_m(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| w[0].position.distance_3d(&w[1].position))
            .sum()
    }

    pub fn horizontal_length_m(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| w[0].position.distance_h(&w[1].position))
            .sum()
    }

    /// Plan time at `pos`, estimated from along-track progress on the leg
    /// ending at `next_wp`.
    pub fn approx_elapsed_time(&self, pos: &Position, next_wp: usize) -> Option<f64> {
        if self.points.is_empty() {
            return None;
        }
        if next_wp == 0 {
            return self.first_time();
        }
        if next_wp >= self.points.len() {
            return self.last_time();
        }
        let a = &self.points[next_wp - 1];
        let b = &self.points[next_wp];
        let leg_len = a.position.distance_h(&b.position);
        if leg_len < 1e-6 {
            return Some(a.time_s);
        }
        let (_, along) = cross_track_offsets(&a.position, &b.position, pos);
        let frac = (along / leg_len).clamp(0.0, 1.0);
        Some(a.time_s + frac * (b.time_s - a.time_s))
    }
}

// ========== VEHICLE STATE ==========

/// Ownship kinematic state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OwnshipState {
    pub position: Position,
    pub velocity: Velocity,
    pub time_s: f64,
}

impl OwnshipState {
    pub fn new(position: Position, velocity: Velocity, time_s: f64) -> Self {
        Self {
            position,
            velocity,
            time_s,
        }
    }
}

/// Intruder reported by surveillance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficTrack {
    pub id: String,
    pub position: Position,
    pub velocity: Velocity,
}

impl TrafficTrack {
    pub fn new(id: impl Into<String>, position: Position, velocity: Velocity) -> Self {
        Self {
            id: id.into(),
            position,
            velocity,
        }
    }
}

/// Autopilot status flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleStatus {
    #[serde(default)]
    pub armed: bool,
    #[serde(default)]
    pub landed: bool,
    #[serde(default)]
    pub battery_pct: Option<f64>,
    #[serde(default)]
    pub mode: String,
}

/// External mission start/stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MissionSignal {
    Start { start_index: usize },
    Stop,
}

/// One consistent read of the shared state, taken at the start of a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSnapshot {
    pub time_s: f64,
    pub ownship: OwnshipState,
    #[serde(default)]
    pub traffic: Vec<TrafficTrack>,
    #[serde(default)]
    pub status: VehicleStatus,
    /// Plan-elapsed time reported by the autopilot, if any.
    #[serde(default)]
    pub plan_elapsed_s: Option<f64>,
    #[serde(default)]
    pub signal: Option<MissionSignal>,
}

impl CycleSnapshot {
    pub fn new(time_s: f64, ownship: OwnshipState) -> Self {
        Self {
            time_s,
            ownship,
            traffic: Vec::new(),
            status: VehicleStatus::default(),
            plan_elapsed_s: None,
            signal: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn straight_plan() -> Plan {
        let mut plan = Plan::new("mission");
        plan.add(Position::new(0.0, 0.0, 10.0), 0.0).unwrap();
        plan.add(Position::new(0.0, 0.001, 10.0), 10.0).unwrap();
        plan.add(Position::new(0.0, 0.002, 20.0), 20.0).unwrap();
        plan
    }

    #[test]
    fn test_plan_rejects_non_increasing_time() {
        let mut plan = straight_plan();
        let err = plan.add(Position::new(0.0, 0.003, 10.0), 20.0).unwrap_err();
        assert!(matches!(err, PlanError::NonIncreasingTime { .. }));
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn test_segment_and_position_at() {
        let plan = straight_plan();
        assert_eq!(plan.segment_at(-5.0), Some(0));
        assert_eq!(plan.segment_at(5.0), Some(0));
        assert_eq!(plan.segment_at(10.0), Some(1));
        assert_eq!(plan.segment_at(99.0), Some(1));

        let mid = plan.position_at(15.0).unwrap();
        assert!((mid.lon - 0.0015).abs() < 1e-9);
        assert!((mid.altitude_m - 15.0).abs() < 1e-9);
    }

    #[test]
    fn test_cut_down_interpolates_endpoints() {
        let plan = straight_plan();
        let cut = plan.cut_down(5.0, 15.0).unwrap();
        assert_eq!(cut.len(), 3);
        assert_eq!(cut.first_time(), Some(5.0));
        assert_eq!(cut.last_time(), Some(15.0));
        assert!((cut.point(0).unwrap().position.lon - 0.0005).abs() < 1e-9);
    }

    #[test]
    fn test_path_length_is_three_dimensional() {
        let plan = straight_plan();
        let horizontal = plan.horizontal_length_m();
        assert!(plan.path_length_m() > horizontal);
        assert!((horizontal - 222.4).abs() < 1.0);
    }

    #[test]
    fn test_approx_elapsed_time_uses_along_track_progress() {
        let plan = straight_plan();
        let pos = Position::new(0.00002, 0.0005, 10.0);
        let t = plan.approx_elapsed_time(&pos, 1).unwrap();
        assert!((t - 5.0).abs() < 0.1);
    }

    #[test]
    fn test_velocity_enu_conversion() {
        let v = Velocity::from_enu(3.0, 4.0, -1.0);
        assert!((v.ground_speed_mps - 5.0).abs() < 1e-9);
        let enu = v.to_enu();
        assert!((enu.x - 3.0).abs() < 1e-9);
        assert!((enu.y - 4.0).abs() < 1e-9);
        assert!((enu.z + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_timed_at_speed_spaces_waypoints() {
        let a = Position::new(0.0, 0.0, 10.0);
        let b = Position::new(0.0, 0.001, 10.0);
        let plan = Plan::timed_at_speed("res", &[a, b], 100.0, 5.0).unwrap();
        let dt = plan.last_time().unwrap() - 100.0;
        assert!((dt - a.distance_h(&b) / 5.0).abs() < 1e-6);
    }
}
