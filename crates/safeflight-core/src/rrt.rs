//! Kinodynamic sampling planner.
//!
//! Grows a tree of point-mass states from the current ownship state toward a
//! goal. Every extension integrates a critically damped velocity response to
//! a bounded input and propagates the traffic snapshot alongside it, so fence
//! and traffic checks run on each integration sub-step.

use crate::daa::DaaCapability;
use crate::error::PlanError;
use crate::geofence::{FenceType, GeoFence};
use crate::models::{OwnshipState, Plan, Position, TrafficTrack, Velocity};
use crate::params::MonitorParams;
use crate::polygon::{bounding_box, Prism};
use crate::spatial::{track_of, LocalProjection};
use nalgebra::{Vector2, Vector3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Probability of sampling the goal itself instead of a random point.
const GOAL_BIAS: f64 = 0.1;
/// Spacing of separation samples along a direct-to-goal segment (meters).
const CONNECT_SAMPLE_M: f64 = 2.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RrtConfig {
    pub iterations: usize,
    pub substeps: usize,
    pub dt_s: f64,
    pub damping_gain: f64,
    pub max_input_mps: f64,
    pub goal_tolerance_m: f64,
    pub traffic_separation_m: f64,
    pub default_extent_m: f64,
    /// Speed the finished path is flown at; times the direct goal connection
    pub speed_mps: f64,
    pub seed: Option<u64>,
}

impl Default for RrtConfig {
    fn default() -> Self {
        Self::from_params(&MonitorParams::default())
    }
}

impl RrtConfig {
    pub fn from_params(params: &MonitorParams) -> Self {
        Self {
            iterations: params.rrt_iterations,
            substeps: params.rrt_substeps.max(1),
            dt_s: params.rrt_dt_s,
            damping_gain: params.rrt_damping_gain,
            max_input_mps: params.rrt_max_input_mps,
            goal_tolerance_m: params.rrt_goal_tolerance_m,
            traffic_separation_m: params.rrt_traffic_separation_m,
            default_extent_m: params.rrt_default_extent_m,
            speed_mps: params.resolution_speed_mps,
            seed: params.rrt_seed,
        }
    }
}

/// One state of the search tree, in the planner-local frame.
#[derive(Debug, Clone)]
pub struct SearchNode {
    pub id: usize,
    pub pos: Vector3<f64>,
    pub vel: Vector3<f64>,
    /// Seconds since the root
    pub time_s: f64,
    /// Traffic positions propagated to this node's time
    pub traffic_pos: Vec<Vector3<f64>>,
    pub traffic_vel: Vec<Vector3<f64>>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

/// Working set of one planner invocation.
#[derive(Debug, Clone)]
pub struct SearchTree {
    projection: LocalProjection,
    nodes: Vec<SearchNode>,
    goal: Vector3<f64>,
    goal_node: Option<usize>,
    closest: usize,
    closest_dist_m: f64,
    iterations: usize,
}

impl SearchTree {
    pub fn nodes(&self) -> &[SearchNode] {
        &self.nodes
    }

    pub fn goal_reached(&self) -> bool {
        self.goal_node.is_some()
    }

    /// Goal that was requested, whether or not it was reached.
    pub fn goal(&self) -> Position {
        self.projection.inverse(&self.goal)
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Horizontal distance from the best node to the goal.
    pub fn closest_distance_m(&self) -> f64 {
        self.closest_dist_m
    }

    /// Nodes from the root to the goal node, or to the closest node when the
    /// goal was not reached.
    pub fn path_nodes(&self) -> Vec<&SearchNode> {
        let mut path = Vec::new();
        let mut cursor = Some(self.goal_node.unwrap_or(self.closest));
        while let Some(id) = cursor {
            let node = &self.nodes[id];
            path.push(node);
            cursor = node.parent;
        }
        path.reverse();
        path
    }

    /// Walk the tree back from the goal (or closest node) and time the
    /// waypoints at a constant speed.
    pub fn plan(&self, start_time_s: f64, speed_mps: f64) -> Result<Plan, PlanError> {
        let positions: Vec<Position> = self
            .path_nodes()
            .iter()
            .map(|node| self.projection.inverse(&node.pos))
            .collect();
        Plan::timed_at_speed("rrt", &positions, start_time_s, speed_mps)
    }
}

/// Obstacles and traffic as seen from the planner-local frame.
struct Environment<'a> {
    projection: LocalProjection,
    obstacles: Vec<Prism>,
    containment: Option<Prism>,
    traffic: &'a [TrafficTrack],
    daa: Option<&'a dyn DaaCapability>,
}

impl Environment<'_> {
    fn fence_collision(&self, p: &Vector3<f64>) -> bool {
        if self.obstacles.iter().any(|o| o.contains(p)) {
            return true;
        }
        match &self.containment {
            Some(c) => !c.contains(p),
            None => false,
        }
    }

    fn segment_blocked(&self, a: &Vector3<f64>, b: &Vector3<f64>) -> bool {
        if self.fence_collision(b) {
            return true;
        }
        self.obstacles.iter().any(|o| o.segment_crosses_wall(a, b))
            || self
                .containment
                .as_ref()
                .map(|c| c.segment_crosses_wall(a, b))
                .unwrap_or(false)
    }

    fn ownship_at(&self, pos: &Vector3<f64>, vel: &Vector3<f64>, time_s: f64) -> OwnshipState {
        OwnshipState::new(
            self.projection.inverse(pos),
            Velocity::from_enu(vel.x, vel.y, vel.z),
            time_s,
        )
    }

    fn traffic_at(&self, pos: &[Vector3<f64>], vel: &[Vector3<f64>]) -> Vec<TrafficTrack> {
        self.traffic
            .iter()
            .zip(pos.iter().zip(vel.iter()))
            .map(|(track, (p, v))| {
                TrafficTrack::new(
                    track.id.clone(),
                    self.projection.inverse(p),
                    Velocity::from_enu(v.x, v.y, v.z),
                )
            })
            .collect()
    }

    fn too_close(&self, pos: &Vector3<f64>, traffic_pos: &[Vector3<f64>], separation_m: f64) -> bool {
        traffic_pos
            .iter()
            .any(|t| (t.xy() - pos.xy()).norm() < separation_m)
    }

    fn daa_loss(
        &self,
        pos: &Vector3<f64>,
        vel: &Vector3<f64>,
        traffic_pos: &[Vector3<f64>],
        traffic_vel: &[Vector3<f64>],
        time_s: f64,
    ) -> bool {
        let Some(daa) = self.daa else {
            return false;
        };
        if self.traffic.is_empty() {
            return false;
        }
        let own = self.ownship_at(pos, vel, time_s);
        self.traffic_at(traffic_pos, traffic_vel)
            .iter()
            .any(|track| daa.time_to_violation(&own, track).is_some())
    }
}

/// Sampling planner with a seedable random source.
#[derive(Debug, Clone)]
pub struct SamplingPlanner {
    pub config: RrtConfig,
    rng: StdRng,
}

impl Default for SamplingPlanner {
    fn default() -> Self {
        Self::new(RrtConfig::default())
    }
}

impl SamplingPlanner {
    pub fn new(config: RrtConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self { config, rng }
    }

    /// Search from `start` to `goal`, avoiding fences and traffic.
    ///
    /// The search runs at the start altitude. When the iteration budget runs
    /// out the returned tree still holds the closest-approach path.
    pub fn search(
        &mut self,
        fences: &[GeoFence],
        traffic: &[TrafficTrack],
        daa: Option<&dyn DaaCapability>,
        start: &OwnshipState,
        goal: &Position,
    ) -> SearchTree {
        let projection = LocalProjection::at(&start.position);
        let env = Environment {
            projection,
            obstacles: fences
                .iter()
                .filter(|f| f.fence_type() == FenceType::KeepOut)
                .filter_map(|f| f.buffered_prism_in(&projection))
                .collect(),
            containment: fences
                .iter()
                .find(|f| f.fence_type() == FenceType::KeepIn && f.is_finalized())
                .and_then(|f| f.buffered_prism_in(&projection)),
            traffic,
            daa,
        };

        let altitude = start.position.altitude_m;
        let root_pos = projection.project(&start.position);
        let mut goal_pos = projection.project(goal);
        goal_pos.z = altitude;

        let root = SearchNode {
            id: 0,
            pos: root_pos,
            vel: start.velocity.to_enu(),
            time_s: 0.0,
            traffic_pos: traffic
                .iter()
                .map(|t| projection.project(&t.position))
                .collect(),
            traffic_vel: traffic.iter().map(|t| t.velocity.to_enu()).collect(),
            parent: None,
            children: Vec::new(),
        };
        let mut tree = SearchTree {
            projection,
            goal: goal_pos,
            goal_node: None,
            closest: 0,
            closest_dist_m: (goal_pos.xy() - root_pos.xy()).norm(),
            iterations: 0,
            nodes: vec![root],
        };

        let (lo, hi) = self.sampling_box(&env, &root_pos, &goal_pos);

        if self.try_connect(&env, &mut tree, 0) {
            return tree;
        }

        for iteration in 0..self.config.iterations {
            tree.iterations = iteration + 1;

            let sample = if self.rng.random_bool(GOAL_BIAS) {
                goal_pos.xy()
            } else {
                Vector2::new(
                    self.rng.random_range(lo.x..hi.x),
                    self.rng.random_range(lo.y..hi.y),
                )
            };
            let nearest = nearest_node(&tree.nodes, sample);

            let Some(candidate) = self.extend(&env, &tree.nodes[nearest], sample, tree.nodes.len())
            else {
                continue;
            };
            let id = candidate.id;
            tree.nodes[nearest].children.push(id);
            tree.nodes.push(candidate);

            let dist = (tree.nodes[id].pos.xy() - goal_pos.xy()).norm();
            if dist < tree.closest_dist_m {
                tree.closest = id;
                tree.closest_dist_m = dist;
            }
            if dist < self.config.goal_tolerance_m {
                tree.goal_node = Some(id);
                break;
            }
            if self.try_connect(&env, &mut tree, id) {
                break;
            }
        }

        debug!(
            "Sampling search: {} nodes after {} iterations, goal reached: {}, closest {:.1} m",
            tree.nodes.len(),
            tree.iterations,
            tree.goal_reached(),
            tree.closest_dist_m
        );
        tree
    }

    fn sampling_box(
        &self,
        env: &Environment<'_>,
        root: &Vector3<f64>,
        goal: &Vector3<f64>,
    ) -> (Vector2<f64>, Vector2<f64>) {
        let (lo, hi) = env
            .containment
            .as_ref()
            .and_then(Prism::bounding_box)
            .or_else(|| {
                let extent = Vector2::new(self.config.default_extent_m, self.config.default_extent_m);
                bounding_box(&[root.xy(), goal.xy()]).map(|(lo, hi)| (lo - extent, hi + extent))
            })
            .unwrap_or((root.xy(), root.xy()));
        // random_range needs a non-empty interval.
        let pad = Vector2::new(
            if hi.x - lo.x < 1.0 { 1.0 } else { 0.0 },
            if hi.y - lo.y < 1.0 { 1.0 } else { 0.0 },
        );
        (lo - pad, hi + pad)
    }

    /// Integrate one extension from `from` toward `sample`; None when any
    /// sub-step collides or the resulting turn sweeps a conflict band.
    fn extend(
        &self,
        env: &Environment<'_>,
        from: &SearchNode,
        sample: Vector2<f64>,
        id: usize,
    ) -> Option<SearchNode> {
        let cfg = &self.config;
        let horizon = cfg.dt_s * cfg.substeps as f64;
        let mut input = Vector3::new(sample.x - from.pos.x, sample.y - from.pos.y, 0.0) / horizon;
        if input.norm() > cfg.max_input_mps {
            input = input.normalize() * cfg.max_input_mps;
        }

        let kc = cfg.damping_gain;
        let accel = |v: &Vector3<f64>| -kc * (v - input);

        let mut pos = from.pos;
        let mut vel = from.vel;
        vel.z = 0.0;
        let mut traffic_pos = from.traffic_pos.clone();
        let traffic_vel = from.traffic_vel.clone();
        let mut time_s = from.time_s;
        let h = cfg.dt_s;

        for _ in 0..cfg.substeps {
            // Two-stage Runge-Kutta (midpoint).
            let k1v = accel(&vel);
            let v_mid = vel + k1v * (0.5 * h);
            let k2v = accel(&v_mid);
            pos += v_mid * h;
            vel += k2v * h;
            time_s += h;
            for (tp, tv) in traffic_pos.iter_mut().zip(traffic_vel.iter()) {
                *tp += tv * h;
            }

            if env.fence_collision(&pos) {
                return None;
            }
            if env.too_close(&pos, &traffic_pos, cfg.traffic_separation_m) {
                return None;
            }
            if env.daa_loss(&pos, &vel, &traffic_pos, &traffic_vel, time_s) {
                return None;
            }
        }

        if let Some(daa) = env.daa {
            if !env.traffic.is_empty() && from.vel.xy().norm() > 1e-3 && vel.xy().norm() > 1e-3 {
                let own = env.ownship_at(&pos, &vel, time_s);
                let report = daa.evaluate(&own, &env.traffic_at(&traffic_pos, &traffic_vel));
                let old_heading = track_of(from.vel.x, from.vel.y);
                let new_heading = track_of(vel.x, vel.y);
                if report.turn_crosses_conflict(old_heading, new_heading) {
                    return None;
                }
            }
        }

        Some(SearchNode {
            id,
            pos,
            vel,
            time_s,
            traffic_pos,
            traffic_vel,
            parent: Some(from.id),
            children: Vec::new(),
        })
    }

    /// Attach the goal directly to `from` when the straight segment is clear.
    fn try_connect(&self, env: &Environment<'_>, tree: &mut SearchTree, from: usize) -> bool {
        let cfg = &self.config;
        let node = &tree.nodes[from];
        let goal = tree.goal;
        if env.segment_blocked(&node.pos, &goal) {
            return false;
        }

        let delta = goal - node.pos;
        let dist = delta.norm();
        let speed = cfg.speed_mps;
        let samples = (dist / CONNECT_SAMPLE_M).ceil().max(1.0) as usize;
        for k in 0..=samples {
            let frac = k as f64 / samples as f64;
            let p = node.pos + delta * frac;
            let dt = dist * frac / speed;
            let traffic_now: Vec<Vector3<f64>> = node
                .traffic_pos
                .iter()
                .zip(node.traffic_vel.iter())
                .map(|(tp, tv)| tp + tv * dt)
                .collect();
            if env.too_close(&p, &traffic_now, cfg.traffic_separation_m) {
                return false;
            }
        }

        if let Some(daa) = env.daa {
            if !env.traffic.is_empty() && dist > 1e-6 {
                let vel = delta / dist * speed;
                let own = env.ownship_at(&node.pos, &vel, node.time_s);
                let report = daa.evaluate(&own, &env.traffic_at(&node.traffic_pos, &node.traffic_vel));
                if report.is_conflict_heading(track_of(delta.x, delta.y)) {
                    return false;
                }
            }
        }

        let travel_s = dist / speed;
        let goal_node = SearchNode {
            id: tree.nodes.len(),
            pos: goal,
            vel: Vector3::zeros(),
            time_s: node.time_s + travel_s,
            traffic_pos: node
                .traffic_pos
                .iter()
                .zip(node.traffic_vel.iter())
                .map(|(tp, tv)| tp + tv * travel_s)
                .collect(),
            traffic_vel: node.traffic_vel.clone(),
            parent: Some(from),
            children: Vec::new(),
        };
        let id = goal_node.id;
        tree.nodes[from].children.push(id);
        tree.nodes.push(goal_node);
        tree.goal_node = Some(id);
        tree.closest = id;
        tree.closest_dist_m = 0.0;
        true
    }
}

fn nearest_node(nodes: &[SearchNode], sample: Vector2<f64>) -> usize {
    nodes
        .iter()
        .min_by(|a, b| {
            (a.pos.xy() - sample)
                .norm_squared()
                .total_cmp(&(b.pos.xy() - sample).norm_squared())
        })
        .map(|n| n.id)
        .unwrap_or(0)
}
