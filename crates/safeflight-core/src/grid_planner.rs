//! Grid-based heuristic search for keep-out avoidance.
//!
//! A density grid covers the containment fence (or the start/goal/obstacle
//! area when there is none), snapped so the start sits on a cell center.
//! Cells inside keep-out fences or outside the containment fence carry a
//! much higher traversal weight than free cells.

use crate::error::PlannerError;
use crate::geofence::{FenceType, GeoFence};
use crate::models::{Plan, Position};
use crate::params::MonitorParams;
use crate::polygon::{bounding_box, contains_point, Prism};
use crate::spatial::LocalProjection;
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap, HashSet};
use tracing::debug;

/// Heading change (radians) below which consecutive cells are collinear.
const HEADING_EPS_RAD: f64 = 0.01;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridPlannerConfig {
    pub cell_size_m: f64,
    pub buffer_m: f64,
    pub free_weight: f64,
    pub obstacle_weight: f64,
    pub max_expansions: usize,
    pub speed_mps: f64,
}

impl Default for GridPlannerConfig {
    fn default() -> Self {
        Self::from_params(&MonitorParams::default())
    }
}

impl GridPlannerConfig {
    pub fn from_params(params: &MonitorParams) -> Self {
        Self {
            cell_size_m: params.grid_size_m,
            buffer_m: params.grid_buffer_m,
            free_weight: params.grid_free_weight,
            obstacle_weight: params.grid_obstacle_weight,
            max_expansions: params.grid_max_expansions,
            speed_mps: params.resolution_speed_mps,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridPlanResult {
    pub plan: Plan,
    pub nodes_visited: usize,
    pub grid_cols: usize,
    pub grid_rows: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CellKey {
    col: usize,
    row: usize,
}

#[derive(Debug, Clone, Copy)]
struct FloatOrd(f64);

impl PartialEq for FloatOrd {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for FloatOrd {}

impl PartialOrd for FloatOrd {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FloatOrd {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OpenNode {
    key: CellKey,
    g_score: FloatOrd,
    f_score: FloatOrd,
}

impl PartialOrd for OpenNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenNode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.f_score
            .cmp(&other.f_score)
            .then_with(|| self.g_score.cmp(&other.g_score))
            .then_with(|| self.key.col.cmp(&other.key.col))
            .then_with(|| self.key.row.cmp(&other.key.row))
    }
}

/// Weighted occupancy grid in a local frame.
#[derive(Debug, Clone)]
pub struct DensityGrid {
    /// Local coordinates of cell (0, 0)'s center.
    origin: Vector2<f64>,
    cell_size_m: f64,
    cols: usize,
    rows: usize,
    weights: Vec<f64>,
}

impl DensityGrid {
    /// Grid covering [min, max] with `anchor` exactly on a cell center.
    pub fn snapped(min: Vector2<f64>, max: Vector2<f64>, anchor: Vector2<f64>, cell_size_m: f64) -> Self {
        let cell = cell_size_m.max(0.1);
        let col_lo = ((min.x - anchor.x) / cell).floor() as i64;
        let col_hi = ((max.x - anchor.x) / cell).ceil() as i64;
        let row_lo = ((min.y - anchor.y) / cell).floor() as i64;
        let row_hi = ((max.y - anchor.y) / cell).ceil() as i64;
        let cols = (col_hi - col_lo + 1).max(1) as usize;
        let rows = (row_hi - row_lo + 1).max(1) as usize;
        Self {
            origin: anchor + Vector2::new(col_lo as f64 * cell, row_lo as f64 * cell),
            cell_size_m: cell,
            cols,
            rows,
            weights: vec![1.0; cols * rows],
        }
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.cols, self.rows)
    }

    fn center(&self, key: CellKey) -> Vector2<f64> {
        self.origin
            + Vector2::new(
                key.col as f64 * self.cell_size_m,
                key.row as f64 * self.cell_size_m,
            )
    }

    /// Nearest cell to `p`, if `p` lies on the grid.
    fn cell_of(&self, p: Vector2<f64>) -> Option<CellKey> {
        let col = ((p.x - self.origin.x) / self.cell_size_m).round();
        let row = ((p.y - self.origin.y) / self.cell_size_m).round();
        if col < 0.0 || row < 0.0 || col as usize >= self.cols || row as usize >= self.rows {
            return None;
        }
        Some(CellKey {
            col: col as usize,
            row: row as usize,
        })
    }

    fn weight(&self, key: CellKey) -> f64 {
        self.weights[key.row * self.cols + key.col]
    }

    pub fn assign_weights(&mut self, weight_at: impl Fn(Vector2<f64>) -> f64) {
        for row in 0..self.rows {
            for col in 0..self.cols {
                let w = weight_at(self.center(CellKey { col, row }));
                self.weights[row * self.cols + col] = w;
            }
        }
    }

    fn neighbors(&self, key: CellKey) -> impl Iterator<Item = CellKey> + '_ {
        const OFFSETS: [(i64, i64); 8] = [
            (-1, -1),
            (0, -1),
            (1, -1),
            (-1, 0),
            (1, 0),
            (-1, 1),
            (0, 1),
            (1, 1),
        ];
        OFFSETS.iter().filter_map(move |(dc, dr)| {
            let col = key.col as i64 + dc;
            let row = key.row as i64 + dr;
            if col < 0 || row < 0 || col >= self.cols as i64 || row >= self.rows as i64 {
                return None;
            }
            Some(CellKey {
                col: col as usize,
                row: row as usize,
            })
        })
    }
}

/// Go-around planner over a density grid.
#[derive(Debug, Clone, Default)]
pub struct GridPlanner {
    pub config: GridPlannerConfig,
}

impl GridPlanner {
    pub fn new(config: GridPlannerConfig) -> Self {
        Self { config }
    }

    /// Plan from `start` to `goal` at the start altitude, avoiding keep-out
    /// fences whose altitude band contains it.
    pub fn plan_around(
        &self,
        fences: &[GeoFence],
        start: &Position,
        goal: &Position,
        start_time_s: f64,
    ) -> Result<GridPlanResult, PlannerError> {
        let cfg = &self.config;
        let projection = LocalProjection::at(start);
        let start_local = projection.project(start).xy();
        let goal_local = projection.project(goal).xy();
        let cruise_alt = start.altitude_m;

        let containment: Option<Prism> = fences
            .iter()
            .find(|f| f.fence_type() == FenceType::KeepIn && f.is_finalized())
            .and_then(|f| f.buffered_prism_in(&projection));
        let obstacles: Vec<Prism> = fences
            .iter()
            .filter(|f| f.fence_type() == FenceType::KeepOut)
            .filter_map(|f| f.buffered_prism_in(&projection))
            .filter(|prism| prism.altitude_within(cruise_alt))
            .collect();

        let (min, max) = match containment.as_ref().and_then(Prism::bounding_box) {
            Some(bounds) => bounds,
            None => {
                let mut points = vec![start_local, goal_local];
                for prism in &obstacles {
                    points.extend(prism.vertices.iter().copied());
                }
                bounding_box(&points).ok_or(PlannerError::StartOutOfBounds)?
            }
        };
        let pad = Vector2::new(cfg.buffer_m, cfg.buffer_m);
        let mut grid = DensityGrid::snapped(min - pad, max + pad, start_local, cfg.cell_size_m);

        let free = cfg.free_weight;
        let blocked = cfg.obstacle_weight;
        grid.assign_weights(|p| {
            let outside_containment = containment
                .as_ref()
                .map(|c| !contains_point(&c.vertices, p))
                .unwrap_or(false);
            let in_obstacle = obstacles.iter().any(|o| contains_point(&o.vertices, p));
            if outside_containment || in_obstacle {
                blocked
            } else {
                free
            }
        });

        let start_key = grid
            .cell_of(start_local)
            .ok_or(PlannerError::StartOutOfBounds)?;
        let goal_key = grid
            .cell_of(goal_local)
            .ok_or(PlannerError::GoalOutOfBounds)?;

        let (path, nodes_visited) = self.search(&grid, start_key, goal_key)?;
        let (cols, rows) = grid.dims();
        debug!(
            "Grid search {}x{} visited {} nodes, raw path {} cells",
            cols,
            rows,
            nodes_visited,
            path.len()
        );

        let mut waypoints = vec![*start];
        for key in simplify(&grid, &path) {
            if key == start_key || key == goal_key {
                continue;
            }
            let c = grid.center(key);
            waypoints.push(projection.inverse(&Vector3::new(c.x, c.y, cruise_alt)));
        }
        waypoints.push(*goal);

        let plan = Plan::timed_at_speed("grid", &waypoints, start_time_s, cfg.speed_mps)?;
        Ok(GridPlanResult {
            plan,
            nodes_visited,
            grid_cols: cols,
            grid_rows: rows,
        })
    }

    fn search(
        &self,
        grid: &DensityGrid,
        start: CellKey,
        goal: CellKey,
    ) -> Result<(Vec<CellKey>, usize), PlannerError> {
        let goal_center = grid.center(goal);
        let heuristic = |key: CellKey| (grid.center(key) - goal_center).norm() * self.config.free_weight;

        let mut open_set: BinaryHeap<Reverse<OpenNode>> = BinaryHeap::new();
        open_set.push(Reverse(OpenNode {
            key: start,
            g_score: FloatOrd(0.0),
            f_score: FloatOrd(heuristic(start)),
        }));
        let mut closed_set: HashSet<CellKey> = HashSet::new();
        let mut g_score: HashMap<CellKey, f64> = HashMap::new();
        let mut came_from: HashMap<CellKey, CellKey> = HashMap::new();
        g_score.insert(start, 0.0);

        let mut nodes_visited = 0usize;
        let mut reached = false;

        while let Some(Reverse(current)) = open_set.pop() {
            if closed_set.contains(&current.key) {
                continue;
            }
            let best_g = g_score.get(&current.key).copied().unwrap_or(f64::INFINITY);
            if current.g_score.0 > best_g + 1e-9 {
                continue;
            }

            nodes_visited += 1;
            if current.key == goal {
                reached = true;
                break;
            }
            if nodes_visited > self.config.max_expansions {
                break;
            }
            closed_set.insert(current.key);

            let here = grid.center(current.key);
            for next in grid.neighbors(current.key) {
                if closed_set.contains(&next) {
                    continue;
                }
                let step_len = (grid.center(next) - here).norm();
                let tentative_g = best_g + step_len * grid.weight(next);
                if tentative_g < g_score.get(&next).copied().unwrap_or(f64::INFINITY) {
                    came_from.insert(next, current.key);
                    g_score.insert(next, tentative_g);
                    open_set.push(Reverse(OpenNode {
                        key: next,
                        g_score: FloatOrd(tentative_g),
                        f_score: FloatOrd(tentative_g + heuristic(next)),
                    }));
                }
            }
        }

        if !reached {
            return Err(PlannerError::Exhausted {
                expansions: nodes_visited,
            });
        }

        let mut path = vec![goal];
        let mut current = goal;
        while let Some(prev) = came_from.get(&current) {
            path.push(*prev);
            current = *prev;
        }
        path.reverse();
        Ok((path, nodes_visited))
    }
}

/// Keep only the cells where the path changes heading.
fn simplify(grid: &DensityGrid, path: &[CellKey]) -> Vec<CellKey> {
    if path.len() <= 2 {
        return path.to_vec();
    }
    let heading = |a: CellKey, b: CellKey| {
        let d = grid.center(b) - grid.center(a);
        d.y.atan2(d.x)
    };

    let mut kept = vec![path[0]];
    for window in path.windows(3) {
        let h_in = heading(window[0], window[1]);
        let h_out = heading(window[1], window[2]);
        let mut turn = (h_out - h_in).abs();
        if turn > std::f64::consts::PI {
            turn = 2.0 * std::f64::consts::PI - turn;
        }
        if turn > HEADING_EPS_RAD {
            kept.push(window[1]);
        }
    }
    if let Some(last) = path.last() {
        kept.push(*last);
    }
    kept
}

/// Four-point climb / transit / descend profile over an obstacle.
pub fn go_above_plan(
    start: &Position,
    goal: &Position,
    transit_alt_m: f64,
    start_time_s: f64,
    speed_mps: f64,
) -> Result<Plan, PlannerError> {
    let points = [
        *start,
        start.with_altitude(transit_alt_m),
        goal.with_altitude(transit_alt_m),
        *goal,
    ];
    Ok(Plan::timed_at_speed("go-above", &points, start_time_s, speed_mps)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN_LAT: f64 = 37.1021;
    const ORIGIN_LON: f64 = -76.3872;

    fn at(x: f64, y: f64, z: f64) -> Position {
        LocalProjection::new(ORIGIN_LAT, ORIGIN_LON).inverse(&Vector3::new(x, y, z))
    }

    fn square(id: u32, fence_type: FenceType, cx: f64, cy: f64, half: f64, ceiling: f64) -> GeoFence {
        let params = MonitorParams::default();
        let corners = [
            (cx - half, cy - half),
            (cx + half, cy - half),
            (cx + half, cy + half),
            (cx - half, cy + half),
        ];
        let mut fence = GeoFence::new(id, fence_type, 4, 0.0, ceiling, &params);
        for (i, (x, y)) in corners.iter().enumerate() {
            let p = at(*x, *y, 0.0);
            fence.add_vertex(i, p.lat, p.lon).unwrap();
        }
        fence
    }

    #[test]
    fn test_snapped_grid_puts_anchor_on_center() {
        let grid = DensityGrid::snapped(
            Vector2::new(-33.0, -17.0),
            Vector2::new(41.0, 29.0),
            Vector2::new(3.0, 4.0),
            10.0,
        );
        let key = grid.cell_of(Vector2::new(3.0, 4.0)).unwrap();
        assert!((grid.center(key) - Vector2::new(3.0, 4.0)).norm() < 1e-9);
    }

    #[test]
    fn test_straight_path_without_obstacles() {
        let fences = vec![square(1, FenceType::KeepIn, 100.0, 0.0, 300.0, 100.0)];
        let planner = GridPlanner::default();
        let result = planner
            .plan_around(&fences, &at(0.0, 0.0, 30.0), &at(200.0, 0.0, 30.0), 10.0)
            .unwrap();
        assert_eq!(result.plan.len(), 2);
        assert_eq!(result.plan.first_time(), Some(10.0));
    }

    #[test]
    fn test_path_avoids_keep_out_cells() {
        let keep_out = square(2, FenceType::KeepOut, 100.0, 0.0, 30.0, 60.0);
        let fences = vec![
            square(1, FenceType::KeepIn, 100.0, 0.0, 300.0, 100.0),
            keep_out.clone(),
        ];
        let planner = GridPlanner::default();
        let result = planner
            .plan_around(&fences, &at(0.0, 0.0, 30.0), &at(200.0, 0.0, 30.0), 0.0)
            .unwrap();
        let plan = &result.plan;
        assert!(plan.len() > 2);
        for point in plan.points() {
            assert!(!keep_out.contains(&point.position));
        }
        for leg in plan.points().windows(2) {
            assert!(keep_out.check_waypoint_feasibility(&leg[0].position, &leg[1].position));
        }
    }

    #[test]
    fn test_goal_outside_grid_is_an_error() {
        let fences = vec![square(1, FenceType::KeepIn, 0.0, 0.0, 50.0, 100.0)];
        let planner = GridPlanner::default();
        let err = planner
            .plan_around(&fences, &at(0.0, 0.0, 30.0), &at(2000.0, 0.0, 30.0), 0.0)
            .unwrap_err();
        assert_eq!(err, PlannerError::GoalOutOfBounds);
    }

    #[test]
    fn test_go_above_profile() {
        let plan = go_above_plan(&at(0.0, 0.0, 30.0), &at(100.0, 0.0, 30.0), 61.0, 0.0, 5.0).unwrap();
        assert_eq!(plan.len(), 4);
        assert!((plan.point(1).unwrap().position.altitude_m - 61.0).abs() < 1e-9);
        // Climb leg timed by vertical distance.
        assert!((plan.point(1).unwrap().time_s - 31.0 / 5.0).abs() < 1e-6);
    }
}
