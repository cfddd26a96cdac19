//! Geofence geometry and violation/conflict classification.
//!
//! A fence is a polygon extruded between a floor and a ceiling. Vertices are
//! added one at a time; once the last declared vertex arrives the polygon is
//! projected into a local frame (origin = vertex 0), validated and buffered.

use crate::error::FenceError;
use crate::models::{OwnshipState, Plan, Position};
use crate::params::MonitorParams;
use crate::polygon::{
    closest_point_on_edge, contains_point, contains_strict, distance_to_boundary,
    offset_polygon, outward_normal, self_intersects, signed_area, Prism,
};
use crate::spatial::{segment_crossing_param, LocalProjection};
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

/// Polygons smaller than this are treated as zero-area.
const MIN_AREA_M2: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FenceType {
    /// Vehicle must stay inside
    KeepIn,
    /// Vehicle must stay outside
    KeepOut,
}

/// Complete fence as delivered by the mission source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FenceDefinition {
    pub id: u32,
    pub fence_type: FenceType,
    pub floor_m: f64,
    pub ceiling_m: f64,
    /// Polygon vertices as [lat, lon] pairs (open ring)
    pub vertices: Vec<[f64; 2]>,
}

/// Result of the most recent `check_violation`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FenceStatus {
    pub violation: bool,
    pub conflict: bool,
    pub recovery_point: Option<Position>,
    /// Plan time the remaining plan first enters the fence (keep-out only)
    pub entry_time: Option<f64>,
    /// Plan time the remaining plan leaves the fence again (keep-out only)
    pub exit_time: Option<f64>,
    pub degenerate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct FenceThresholds {
    h_threshold_m: f64,
    v_threshold_m: f64,
    h_stepback_m: f64,
    v_stepback_m: f64,
    lookahead_s: f64,
}

impl From<&MonitorParams> for FenceThresholds {
    fn from(params: &MonitorParams) -> Self {
        Self {
            h_threshold_m: params.h_threshold_m,
            v_threshold_m: params.v_threshold_m,
            h_stepback_m: params.h_stepback_m,
            v_stepback_m: params.v_stepback_m,
            lookahead_s: params.lookahead_s,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct FenceGeometry {
    projection: LocalProjection,
    /// Counter-clockwise polygon in the fence frame.
    polygon: Vec<Vector2<f64>>,
    /// Keep-out expanded / keep-in contracted by the horizontal threshold.
    buffered: Vec<Vector2<f64>>,
}

/// Geofence with cached local geometry and per-cycle derived state.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoFence {
    id: u32,
    fence_type: FenceType,
    floor_m: f64,
    ceiling_m: f64,
    thresholds: FenceThresholds,
    slots: Vec<Option<(f64, f64)>>,
    geometry: Option<FenceGeometry>,
    degenerate: bool,
    status: FenceStatus,
}

impl GeoFence {
    pub fn new(
        id: u32,
        fence_type: FenceType,
        vertex_count: usize,
        floor_m: f64,
        ceiling_m: f64,
        params: &MonitorParams,
    ) -> Self {
        let mut fence = Self {
            id,
            fence_type,
            floor_m,
            ceiling_m,
            thresholds: FenceThresholds::from(params),
            slots: vec![None; vertex_count],
            geometry: None,
            degenerate: false,
            status: FenceStatus::default(),
        };
        if vertex_count < 3 {
            error!(
                "Fence {} declared with {} vertices; treating as degenerate",
                id, vertex_count
            );
            fence.mark_degenerate();
        }
        fence
    }

    /// Build a finalized fence from a complete definition.
    pub fn from_definition(
        definition: &FenceDefinition,
        params: &MonitorParams,
    ) -> Result<Self, FenceError> {
        let mut fence = Self::new(
            definition.id,
            definition.fence_type,
            definition.vertices.len(),
            definition.floor_m,
            definition.ceiling_m,
            params,
        );
        for (index, [lat, lon]) in definition.vertices.iter().enumerate() {
            fence.add_vertex(index, *lat, *lon)?;
        }
        Ok(fence)
    }

    /// Set vertex `index`. The polygon is finalized once every declared
    /// vertex has been supplied.
    pub fn add_vertex(&mut self, index: usize, lat: f64, lon: f64) -> Result<(), FenceError> {
        let declared = self.slots.len();
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(FenceError::VertexIndexOutOfRange {
                fence_id: self.id,
                index,
                declared,
            })?;
        *slot = Some((lat, lon));

        if self.slots.iter().all(Option::is_some) {
            self.finalize();
        }
        Ok(())
    }

    fn finalize(&mut self) {
        let vertices: Vec<(f64, f64)> = self.slots.iter().flatten().copied().collect();
        let Some(&(lat0, lon0)) = vertices.first() else {
            self.mark_degenerate();
            return;
        };
        let projection = LocalProjection::new(lat0, lon0);
        let mut polygon: Vec<Vector2<f64>> = vertices
            .iter()
            .map(|(lat, lon)| projection.project_2d(*lat, *lon))
            .collect();

        if let Err(reason) = self.validate_polygon(&polygon) {
            error!("Fence {} is degenerate: {}", self.id, reason);
            self.mark_degenerate();
            return;
        }

        if signed_area(&polygon) < 0.0 {
            polygon.reverse();
        }

        let offset = match self.fence_type {
            FenceType::KeepOut => self.thresholds.h_threshold_m,
            FenceType::KeepIn => -self.thresholds.h_threshold_m,
        };
        let mut buffered = offset_polygon(&polygon, offset);
        if signed_area(&buffered) <= MIN_AREA_M2 || self_intersects(&buffered) {
            warn!(
                "Fence {}: buffered polygon collapsed, using the raw outline",
                self.id
            );
            buffered = polygon.clone();
        }

        self.degenerate = false;
        self.geometry = Some(FenceGeometry {
            projection,
            polygon,
            buffered,
        });
    }

    fn validate_polygon(&self, polygon: &[Vector2<f64>]) -> Result<(), String> {
        if polygon.len() < 3 {
            return Err("fewer than three vertices".to_string());
        }
        if self.floor_m >= self.ceiling_m {
            return Err(format!(
                "floor {} not below ceiling {}",
                self.floor_m, self.ceiling_m
            ));
        }
        if signed_area(polygon).abs() < MIN_AREA_M2 {
            return Err("zero area".to_string());
        }
        if self_intersects(polygon) {
            return Err("self-intersecting outline".to_string());
        }
        Ok(())
    }

    fn mark_degenerate(&mut self) {
        self.degenerate = true;
        self.geometry = None;
        self.status = FenceStatus {
            conflict: true,
            degenerate: true,
            ..FenceStatus::default()
        };
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn fence_type(&self) -> FenceType {
        self.fence_type
    }

    pub fn floor_m(&self) -> f64 {
        self.floor_m
    }

    pub fn ceiling_m(&self) -> f64 {
        self.ceiling_m
    }

    pub fn is_finalized(&self) -> bool {
        self.geometry.is_some()
    }

    pub fn is_degenerate(&self) -> bool {
        self.degenerate
    }

    pub fn status(&self) -> &FenceStatus {
        &self.status
    }

    /// Error when the fence is incomplete or unusable.
    pub fn ensure_finalized(&self) -> Result<(), FenceError> {
        if self.geometry.is_some() {
            return Ok(());
        }
        if self.degenerate {
            return Err(FenceError::Degenerate {
                fence_id: self.id,
                reason: "failed validation".to_string(),
            });
        }
        Err(FenceError::Incomplete {
            fence_id: self.id,
            missing: self.slots.iter().filter(|s| s.is_none()).count(),
        })
    }

    /// True when `position` is strictly inside the extrusion.
    pub fn contains(&self, position: &Position) -> bool {
        let Some(geom) = &self.geometry else {
            return false;
        };
        let local = geom.projection.project(position);
        self.altitude_within(local.z) && contains_strict(&geom.polygon, local.xy())
    }

    fn altitude_within(&self, z: f64) -> bool {
        z >= self.floor_m && z <= self.ceiling_m
    }

    /// Buffered outline re-projected into another frame.
    pub fn buffered_prism_in(&self, projection: &LocalProjection) -> Option<Prism> {
        let geom = self.geometry.as_ref()?;
        Some(self.reproject(geom, &geom.buffered, projection))
    }

    fn reproject(
        &self,
        geom: &FenceGeometry,
        outline: &[Vector2<f64>],
        projection: &LocalProjection,
    ) -> Prism {
        let vertices = outline
            .iter()
            .map(|v| {
                let pos = geom.projection.inverse(&Vector3::new(v.x, v.y, 0.0));
                projection.project_2d(pos.lat, pos.lon)
            })
            .collect();
        Prism::new(vertices, self.floor_m, self.ceiling_m)
    }

    /// Recompute violation, conflict, recovery point and (keep-out) plan
    /// entry/exit times for the current ownship state.
    pub fn check_violation(
        &mut self,
        ownship: &OwnshipState,
        plan_elapsed_s: f64,
        active_plan: Option<&Plan>,
    ) -> FenceStatus {
        let Some(geom) = self.geometry.as_ref() else {
            // Degenerate fences stay in conflict; incomplete ones are ignored.
            self.status = FenceStatus {
                conflict: self.degenerate,
                degenerate: self.degenerate,
                ..FenceStatus::default()
            };
            return self.status;
        };

        let local = geom.projection.project(&ownship.position);
        let p2 = local.xy();
        let z = local.z;
        let th = self.thresholds;
        let inside_h = contains_strict(&geom.polygon, p2);
        let boundary_dist = distance_to_boundary(&geom.polygon, p2);

        let projected_end = local + ownship.velocity.to_enu() * th.lookahead_s;
        let outline = Prism::new(geom.polygon.clone(), self.floor_m, self.ceiling_m);
        let crosses_wall = outline.segment_crosses_wall(&local, &projected_end);

        let status = match self.fence_type {
            FenceType::KeepIn => {
                let violation = !(inside_h && self.altitude_within(z));
                let near_edge = boundary_dist < th.h_threshold_m
                    || (self.ceiling_m - z) < th.v_threshold_m
                    || (z - self.floor_m) < th.v_threshold_m;
                let projected_exit = crosses_wall
                    || !contains_point(&geom.polygon, projected_end.xy())
                    || !self.altitude_within(projected_end.z);
                let conflict = violation || near_edge || projected_exit;
                let recovery_point = if conflict {
                    Some(self.inside_recovery_point(geom, &local))
                } else {
                    None
                };
                FenceStatus {
                    violation,
                    conflict,
                    recovery_point,
                    entry_time: None,
                    exit_time: None,
                    degenerate: false,
                }
            }
            FenceType::KeepOut => {
                let violation = inside_h && self.altitude_within(z);
                let band_near =
                    z >= self.floor_m - th.v_threshold_m && z <= self.ceiling_m + th.v_threshold_m;
                let near_edge = (boundary_dist < th.h_threshold_m || inside_h) && band_near;
                let projected_entry = crosses_wall || outline.contains(&projected_end);
                let crossing =
                    active_plan.and_then(|plan| self.plan_crossing(geom, plan, plan_elapsed_s));
                let plan_entry_soon = crossing
                    .map(|(entry, _)| entry - plan_elapsed_s <= th.lookahead_s)
                    .unwrap_or(false);
                let conflict = violation || near_edge || projected_entry || plan_entry_soon;
                let recovery_point = if conflict {
                    Some(self.outside_recovery_point(geom, &local))
                } else {
                    None
                };
                FenceStatus {
                    violation,
                    conflict,
                    recovery_point,
                    entry_time: crossing.map(|(entry, _)| entry),
                    exit_time: crossing.map(|(_, exit)| exit),
                    degenerate: false,
                }
            }
        };

        self.status = status;
        status
    }

    /// Nearest point inside the contracted polygon, stepped further inward.
    fn inside_recovery_point(&self, geom: &FenceGeometry, local: &Vector3<f64>) -> Position {
        let p2 = local.xy();
        let step = self.thresholds.h_stepback_m;
        let horizontal = self
            .stepped_candidates(&geom.buffered, p2, -step)
            .into_iter()
            .filter(|c| contains_strict(&geom.polygon, *c) && contains_strict(&geom.buffered, *c))
            .min_by(|a, b| (a - p2).norm().total_cmp(&(b - p2).norm()))
            .or_else(|| {
                if contains_strict(&geom.polygon, p2) && contains_strict(&geom.buffered, p2) {
                    Some(p2)
                } else {
                    None
                }
            })
            .unwrap_or_else(|| centroid(&geom.polygon));

        let th = self.thresholds;
        let z = if local.z > self.ceiling_m - th.v_threshold_m {
            self.ceiling_m - th.v_stepback_m
        } else if local.z < self.floor_m + th.v_threshold_m {
            self.floor_m + th.v_stepback_m
        } else {
            local.z
        };
        geom.projection
            .inverse(&Vector3::new(horizontal.x, horizontal.y, z))
    }

    /// Nearest point outside the expanded polygon, stepped further outward.
    fn outside_recovery_point(&self, geom: &FenceGeometry, local: &Vector3<f64>) -> Position {
        let p2 = local.xy();
        let step = self.thresholds.h_stepback_m.max(f64::EPSILON);
        let horizontal = self
            .stepped_candidates(&geom.buffered, p2, step)
            .into_iter()
            .filter(|c| !contains_point(&geom.buffered, *c) && !contains_point(&geom.polygon, *c))
            .min_by(|a, b| (a - p2).norm().total_cmp(&(b - p2).norm()))
            .unwrap_or_else(|| {
                // Push radially away from the centroid past the farthest vertex.
                let c = centroid(&geom.buffered);
                let dir = (p2 - c).try_normalize(1e-9).unwrap_or(Vector2::new(1.0, 0.0));
                let reach = geom
                    .buffered
                    .iter()
                    .map(|v| (v - c).norm())
                    .fold(0.0, f64::max);
                c + dir * (reach + step)
            });
        geom.projection
            .inverse(&Vector3::new(horizontal.x, horizontal.y, local.z))
    }

    /// Closest point on each edge of `outline`, moved along the edge normal by
    /// `step` (positive = outward).
    fn stepped_candidates(
        &self,
        outline: &[Vector2<f64>],
        p2: Vector2<f64>,
        step: f64,
    ) -> Vec<Vector2<f64>> {
        (0..outline.len())
            .map(|i| {
                let q = closest_point_on_edge(outline, i, p2);
                q + outward_normal(outline, i) * step
            })
            .collect()
    }

    /// First window [entry, exit] during which the remaining plan lies inside
    /// the buffered extrusion.
    fn plan_crossing(
        &self,
        geom: &FenceGeometry,
        plan: &Plan,
        from_time_s: f64,
    ) -> Option<(f64, f64)> {
        let points = plan.points();
        let mut entry: Option<f64> = None;
        let mut exit: Option<f64> = None;

        for leg in points.windows(2) {
            let (a, b) = (&leg[0], &leg[1]);
            if b.time_s <= from_time_s {
                continue;
            }
            let t_start = a.time_s.max(from_time_s);
            let start_pos = plan.position_at(t_start)?;
            let la = geom.projection.project(&start_pos);
            let lb = geom.projection.project(&b.position);

            let mut params = vec![0.0, 1.0];
            let n = geom.buffered.len();
            for i in 0..n {
                if let Some(u) = segment_crossing_param(
                    la.xy(),
                    lb.xy(),
                    geom.buffered[i],
                    geom.buffered[(i + 1) % n],
                ) {
                    params.push(u);
                }
            }
            params.sort_by(f64::total_cmp);
            params.dedup_by(|x, y| (*x - *y).abs() < 1e-9);

            let span = b.time_s - t_start;
            for window in params.windows(2) {
                let (u0, u1) = (window[0], window[1]);
                let mid = la + (lb - la) * ((u0 + u1) / 2.0);
                let inside = contains_point(&geom.buffered, mid.xy()) && self.altitude_within(mid.z);
                if inside {
                    entry.get_or_insert(t_start + u0 * span);
                    exit = Some(t_start + u1 * span);
                } else if entry.is_some() {
                    return entry.zip(exit);
                }
            }
        }
        entry.zip(exit)
    }

    /// False when flying `from -> to` would cross a wall of this fence, or
    /// (keep-in) when `to` lies outside the altitude band.
    pub fn check_waypoint_feasibility(&self, from: &Position, to: &Position) -> bool {
        let Some(geom) = &self.geometry else {
            return true;
        };
        if self.fence_type == FenceType::KeepIn && !self.altitude_within(to.altitude_m) {
            return false;
        }
        let outline = Prism::new(geom.polygon.clone(), self.floor_m, self.ceiling_m);
        let a = geom.projection.project(from);
        let b = geom.projection.project(to);
        if outline.segment_crosses_wall(&a, &b) {
            return false;
        }
        match self.fence_type {
            FenceType::KeepOut => !outline.contains(&b),
            FenceType::KeepIn => contains_point(&geom.polygon, b.xy()),
        }
    }
}

fn centroid(vertices: &[Vector2<f64>]) -> Vector2<f64> {
    if vertices.is_empty() {
        return Vector2::zeros();
    }
    vertices.iter().fold(Vector2::zeros(), |acc, v| acc + v) / vertices.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Velocity;

    const ORIGIN_LAT: f64 = 37.1021;
    const ORIGIN_LON: f64 = -76.3872;

    fn square_fence(
        id: u32,
        fence_type: FenceType,
        center: (f64, f64),
        half_m: f64,
        floor: f64,
        ceiling: f64,
    ) -> GeoFence {
        let params = MonitorParams::default();
        let proj = LocalProjection::new(ORIGIN_LAT, ORIGIN_LON);
        let corners = [
            (center.0 - half_m, center.1 - half_m),
            (center.0 + half_m, center.1 - half_m),
            (center.0 + half_m, center.1 + half_m),
            (center.0 - half_m, center.1 + half_m),
        ];
        let mut fence = GeoFence::new(id, fence_type, 4, floor, ceiling, &params);
        for (i, (x, y)) in corners.iter().enumerate() {
            let p = proj.inverse(&Vector3::new(*x, *y, 0.0));
            fence.add_vertex(i, p.lat, p.lon).unwrap();
        }
        fence
    }

    fn at(x: f64, y: f64, z: f64) -> Position {
        LocalProjection::new(ORIGIN_LAT, ORIGIN_LON).inverse(&Vector3::new(x, y, z))
    }

    fn hovering(pos: Position) -> OwnshipState {
        OwnshipState::new(pos, Velocity::default(), 0.0)
    }

    #[test]
    fn test_add_vertex_rejects_out_of_range_index() {
        let params = MonitorParams::default();
        let mut fence = GeoFence::new(1, FenceType::KeepOut, 3, 0.0, 50.0, &params);
        let err = fence.add_vertex(3, 0.0, 0.0).unwrap_err();
        assert_eq!(
            err,
            FenceError::VertexIndexOutOfRange {
                fence_id: 1,
                index: 3,
                declared: 3
            }
        );
        assert!(!fence.is_finalized());
    }

    #[test]
    fn test_fence_finalizes_on_last_vertex_in_any_order() {
        let params = MonitorParams::default();
        let mut fence = GeoFence::new(2, FenceType::KeepOut, 3, 0.0, 50.0, &params);
        fence.add_vertex(2, 37.1030, -76.3870).unwrap();
        fence.add_vertex(0, 37.1020, -76.3870).unwrap();
        assert!(!fence.is_finalized());
        assert!(matches!(
            fence.ensure_finalized(),
            Err(FenceError::Incomplete { missing: 1, .. })
        ));
        fence.add_vertex(1, 37.1020, -76.3860).unwrap();
        assert!(fence.is_finalized());
    }

    #[test]
    fn test_keep_out_violation_only_inside_extrusion() {
        let mut fence = square_fence(3, FenceType::KeepOut, (100.0, 100.0), 20.0, 0.0, 60.0);

        let inside = fence.check_violation(&hovering(at(100.0, 100.0, 30.0)), 0.0, None);
        assert!(inside.violation);
        assert!(inside.conflict);

        let outside = fence.check_violation(&hovering(at(0.0, 0.0, 30.0)), 0.0, None);
        assert!(!outside.violation);
        assert!(!outside.conflict);

        let above = fence.check_violation(&hovering(at(100.0, 100.0, 80.0)), 0.0, None);
        assert!(!above.violation);
    }

    #[test]
    fn test_keep_in_violation_when_outside() {
        let mut fence = square_fence(4, FenceType::KeepIn, (0.0, 0.0), 200.0, 0.0, 100.0);
        let inside = fence.check_violation(&hovering(at(0.0, 0.0, 30.0)), 0.0, None);
        assert!(!inside.violation);
        assert!(!inside.conflict);

        let outside = fence.check_violation(&hovering(at(250.0, 0.0, 30.0)), 0.0, None);
        assert!(outside.violation);
        assert!(outside.conflict);
    }

    #[test]
    fn test_near_edge_raises_conflict_without_violation() {
        let mut fence = square_fence(5, FenceType::KeepOut, (100.0, 0.0), 20.0, 0.0, 60.0);
        // 3 m outside the west wall, threshold is 5 m.
        let status = fence.check_violation(&hovering(at(77.0, 0.0, 30.0)), 0.0, None);
        assert!(!status.violation);
        assert!(status.conflict);
    }

    #[test]
    fn test_projected_velocity_raises_conflict() {
        let mut fence = square_fence(6, FenceType::KeepOut, (100.0, 0.0), 20.0, 0.0, 60.0);
        let ownship = OwnshipState::new(at(30.0, 0.0, 30.0), Velocity::new(90.0, 5.0, 0.0), 0.0);
        let status = fence.check_violation(&ownship, 0.0, None);
        assert!(!status.violation);
        assert!(status.conflict);
    }

    #[test]
    fn test_keep_out_recovery_point_is_idempotent() {
        let mut fence = square_fence(7, FenceType::KeepOut, (100.0, 100.0), 20.0, 0.0, 60.0);
        let status = fence.check_violation(&hovering(at(110.0, 95.0, 30.0)), 0.0, None);
        let recovery = status.recovery_point.unwrap();

        let again = fence.check_violation(&hovering(recovery), 0.0, None);
        assert!(!again.violation);
        // Outside the raw polygon by at least the step-back.
        let proj = LocalProjection::new(ORIGIN_LAT, ORIGIN_LON);
        let local = proj.project(&recovery);
        assert!(local.x >= 125.0 - 1e-6);
    }

    #[test]
    fn test_keep_in_recovery_point_is_inside() {
        let mut fence = square_fence(8, FenceType::KeepIn, (0.0, 0.0), 100.0, 0.0, 50.0);
        let status = fence.check_violation(&hovering(at(110.0, 0.0, 49.5)), 0.0, None);
        assert!(status.violation);
        let recovery = status.recovery_point.unwrap();
        assert!((recovery.altitude_m - 48.0).abs() < 1e-9);

        let again = fence.check_violation(&hovering(recovery), 0.0, None);
        assert!(!again.violation);
    }

    #[test]
    fn test_plan_entry_and_exit_times() {
        let mut fence = square_fence(9, FenceType::KeepOut, (100.0, 0.0), 20.0, 0.0, 60.0);
        let mut plan = Plan::new("mission");
        plan.add(at(0.0, 0.0, 30.0), 0.0).unwrap();
        plan.add(at(200.0, 0.0, 30.0), 40.0).unwrap();

        let status = fence.check_violation(&hovering(at(0.0, 0.0, 30.0)), 0.0, Some(&plan));
        let entry = status.entry_time.unwrap();
        let exit = status.exit_time.unwrap();
        // Buffered polygon spans x in [75, 125] -> t in [15, 25].
        assert!((entry - 15.0).abs() < 0.2, "entry {entry}");
        assert!((exit - 25.0).abs() < 0.2, "exit {exit}");
        assert!(status.conflict);
    }

    #[test]
    fn test_waypoint_feasibility() {
        let keep_out = square_fence(10, FenceType::KeepOut, (100.0, 0.0), 20.0, 0.0, 60.0);
        assert!(!keep_out.check_waypoint_feasibility(&at(0.0, 0.0, 30.0), &at(200.0, 0.0, 30.0)));
        assert!(keep_out.check_waypoint_feasibility(&at(0.0, 0.0, 70.0), &at(200.0, 0.0, 70.0)));

        let keep_in = square_fence(11, FenceType::KeepIn, (0.0, 0.0), 100.0, 0.0, 50.0);
        assert!(keep_in.check_waypoint_feasibility(&at(0.0, 0.0, 30.0), &at(50.0, 0.0, 30.0)));
        assert!(!keep_in.check_waypoint_feasibility(&at(0.0, 0.0, 30.0), &at(150.0, 0.0, 30.0)));
        assert!(!keep_in.check_waypoint_feasibility(&at(0.0, 0.0, 30.0), &at(50.0, 0.0, 60.0)));
    }

    #[test]
    fn test_degenerate_fence_is_always_in_conflict() {
        let params = MonitorParams::default();
        let mut fence = GeoFence::new(12, FenceType::KeepOut, 3, 0.0, 50.0, &params);
        fence.add_vertex(0, 37.1020, -76.3870).unwrap();
        fence.add_vertex(1, 37.1025, -76.3870).unwrap();
        fence.add_vertex(2, 37.1030, -76.3870).unwrap();
        assert!(fence.is_degenerate());

        let status = fence.check_violation(&hovering(at(500.0, 500.0, 30.0)), 0.0, None);
        assert!(status.conflict);
        assert!(status.degenerate);
        assert!(fence.check_waypoint_feasibility(&at(0.0, 0.0, 30.0), &at(1.0, 1.0, 30.0)));
    }
}
